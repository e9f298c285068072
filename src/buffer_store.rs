//! Buffer store (§4.6) — per-pipeline-invocation map from `save_to`
//! name to the fully-materialized bytes of the stage that produced it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::stream::{self, ByteStream};

/// Scoped to a single pipeline invocation; never shared across
/// invocations.
pub struct BufferStore {
    buffers: Mutex<HashMap<String, Bytes>>,
    limit_bytes: usize,
    used_bytes: AtomicUsize,
    exceeded: AtomicBool,
}

impl BufferStore {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            limit_bytes,
            used_bytes: AtomicUsize::new(0),
            exceeded: AtomicBool::new(false),
        }
    }

    /// Reserves `n` more bytes against the shared per-invocation cap.
    /// Returns `false` (and latches `exceeded`) once the cap would be
    /// crossed.
    fn reserve(&self, n: usize) -> bool {
        let prev = self.used_bytes.fetch_add(n, Ordering::SeqCst);
        if prev + n > self.limit_bytes {
            self.exceeded.store(true, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    /// Whether any capture this invocation has overrun the cap. The
    /// orchestrator checks this after draining the pipeline and fails
    /// with `BufferLimitExceeded` if set.
    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    pub fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }

    fn insert(&self, name: String, bytes: Bytes) {
        self.buffers.lock().unwrap().insert(name, bytes);
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.buffers.lock().unwrap().get(name).cloned()
    }

    /// Builds the JSON object `read_buffers` emits: requested names map
    /// to their stored contents as strings, or JSON null for unknown
    /// names. Unknown names are reported back for the diagnostics
    /// array (§4.4, §9 open question: treated as a warning, not an
    /// error).
    pub fn read_many(&self, names: &[String]) -> (Value, Vec<String>) {
        let buffers = self.buffers.lock().unwrap();
        let mut unknown = Vec::new();
        let mut map = serde_json::Map::with_capacity(names.len());
        for name in names {
            match buffers.get(name) {
                Some(bytes) => {
                    map.insert(name.clone(), Value::String(String::from_utf8_lossy(bytes).into_owned()));
                }
                None => {
                    map.insert(name.clone(), Value::Null);
                    unknown.push(name.clone());
                }
            }
        }
        (Value::Object(map), unknown)
    }
}

/// Tees `upstream`: every chunk is forwarded downstream unchanged, and
/// a full copy accumulates into `store` under `name`, committed once
/// the stream ends. If capturing would exceed the store's shared
/// budget, accumulation for *this* capture is abandoned (the
/// downstream copy is unaffected) and `store.exceeded()` latches true
/// for the orchestrator to observe afterwards.
pub fn tee_capturing(mut upstream: ByteStream, store: Arc<BufferStore>, name: String) -> ByteStream {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut captured = BytesMut::new();
        let mut capture_failed = false;
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    if !capture_failed {
                        if store.reserve(bytes.len()) {
                            captured.extend_from_slice(&bytes);
                        } else {
                            capture_failed = true;
                        }
                    }
                    if tx.send(Ok(bytes)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        if !capture_failed {
            store.insert(name, captured.freeze());
        }
    });
    stream::from_receiver(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn tee_captures_the_bytes_delivered_downstream() {
        let store = Arc::new(BufferStore::new(1024));
        let downstream = tee_capturing(stream::once(Bytes::from_static(b"payload")), store.clone(), "b".into());
        let forwarded = stream::materialize(downstream, 1024).await.unwrap();
        // give the spawned task a moment to commit the capture
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(forwarded, b"payload");
        assert_eq!(store.get("b").unwrap(), Bytes::from_static(b"payload"));
        assert!(!store.exceeded());
    }

    #[test]
    fn read_many_reports_unknown_names_as_null_with_a_warning() {
        let store = BufferStore::new(1024);
        store.insert("raw".into(), Bytes::from_static(b"{\"x\":7}\n"));

        let (value, unknown) = store.read_many(&["raw".to_string(), "missing".to_string()]);
        assert_eq!(value["raw"], Value::String("{\"x\":7}\n".to_string()));
        assert_eq!(value["missing"], Value::Null);
        assert_eq!(unknown, vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn exceeding_the_shared_cap_latches_exceeded() {
        let store = Arc::new(BufferStore::new(4));
        let downstream = tee_capturing(stream::once(Bytes::from_static(b"far too long")), store.clone(), "b".into());
        let _ = stream::materialize(downstream, 1024).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(store.exceeded());
    }
}
