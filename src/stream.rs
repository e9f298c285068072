//! The inter-stage byte stream (§3 "Stream", §9 "Streaming composition
//! without coroutines").
//!
//! Each stage executor exposes a pull-style byte source and accepts a
//! pull-style byte source: a lazily-produced sequence of `Bytes` chunks.
//! Implementations realize this with blocking reads on an OS pipe
//! (subprocess stdout), a bounded channel (tool invocation results,
//! tee'd buffer captures), or a single already-materialized chunk
//! (seed input, for-each aggregation). What matters is order
//! preservation, early termination on cancel/error, and no full
//! buffering of inter-stage data unless `save_to` or `for_each`
//! explicitly demands it.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{EngineError, EngineResult};

/// A lazy, single-consumption sequence of byte chunks flowing from one
/// stage to the next.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wraps a single, already-materialized buffer as a one-chunk stream.
pub fn once(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    if bytes.is_empty() {
        return empty();
    }
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// A stream that yields nothing.
pub fn empty() -> ByteStream {
    Box::pin(futures::stream::empty())
}

/// Wraps an mpsc receiver (used by the subprocess runner and the
/// for-each driver) as a `ByteStream`.
pub fn from_receiver(rx: tokio::sync::mpsc::Receiver<io::Result<Bytes>>) -> ByteStream {
    Box::pin(ReceiverStream::new(rx))
}

/// Fully consumes `stream` into a single `Vec<u8>`, failing if the
/// total exceeds `limit_bytes` (§5 per-stage input cap). Used wherever
/// a stage needs the whole upstream materialized before it can act
/// (tool args binding, command stdin is **not** materialized this way
/// — it streams — but preview and non-streaming tool args are).
pub async fn materialize(mut stream: ByteStream, limit_bytes: usize) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(io_error_to_engine_error)?;
        out.extend_from_slice(&chunk);
        if out.len() > limit_bytes {
            return Err(EngineError::StageInputTooLarge {
                limit_bytes,
            });
        }
    }
    Ok(out)
}

/// Fully consumes `stream`, discarding its bytes. Used by `read_buffers`
/// (§4.4) which ignores its upstream entirely, and by `preview` once it
/// has read enough to summarize (it still must drain the rest).
pub async fn drain(mut stream: ByteStream) -> EngineResult<()> {
    while let Some(chunk) = stream.next().await {
        chunk.map_err(io_error_to_engine_error)?;
    }
    Ok(())
}

/// Recovers the original `EngineError` from an `io::Error` wrapping one
/// (e.g. `io::Error::other(engine_err)` from a `command` stage's
/// `attach_wait`, see `stage/command.rs`), so a failed/cancelled
/// upstream keeps its real kind instead of collapsing to a generic
/// configuration error.
pub(crate) fn io_error_to_engine_error(e: io::Error) -> EngineError {
    let message = e.to_string();
    match e.into_inner() {
        Some(inner) => match inner.downcast::<EngineError>() {
            Ok(engine_err) => *engine_err,
            Err(other) => EngineError::Configuration(format!("stream read: {other}")),
        },
        None => EngineError::Configuration(format!("stream read: {message}")),
    }
}
