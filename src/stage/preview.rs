//! Preview executor (§4.4 "Preview executor") — a compact structural
//! summary of the upstream bytes, not necessarily valid JSON itself.

use serde_json::Value;

use crate::error::EngineResult;
use crate::stream::{self, ByteStream};

use super::StageContext;

/// How many keys/elements a single object/array renders before eliding
/// the rest with an ellipsis marker.
const MAX_SAMPLES: usize = 5;
/// How deep the structural walk recurses before collapsing to a type tag.
const MAX_DEPTH: usize = 3;
/// Sentinel used both for truncation inside long scalars and the
/// `chars = 0` boundary case (§8).
const TRUNCATION_MARKER: &str = "\u{2026}"; // "…"

pub async fn run(
    chars: usize,
    upstream: ByteStream,
    ctx: &StageContext,
) -> EngineResult<(ByteStream, Vec<String>)> {
    let bytes = stream::materialize(upstream, ctx.limits.max_stage_input_bytes).await?;

    let summary = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => describe(&value, 0),
        Err(_) => format!("text({} bytes): {}", bytes.len(), String::from_utf8_lossy(&bytes)),
    };

    let truncated = truncate_to_chars(&summary, chars);
    Ok((stream::once(truncated.into_bytes()), Vec::new()))
}

fn describe(value: &Value, depth: usize) -> String {
    if depth >= MAX_DEPTH {
        return type_tag(value);
    }
    match value {
        Value::Object(map) => {
            let mut parts: Vec<String> = map
                .iter()
                .take(MAX_SAMPLES)
                .map(|(k, v)| format!("{k}: {}", describe(v, depth + 1)))
                .collect();
            if map.len() > MAX_SAMPLES {
                parts.push(TRUNCATION_MARKER.to_string());
            }
            format!("{{{}}}", parts.join(", "))
        }
        Value::Array(items) => {
            let mut parts: Vec<String> = items
                .iter()
                .take(MAX_SAMPLES)
                .map(|v| describe(v, depth + 1))
                .collect();
            if items.len() > MAX_SAMPLES {
                parts.push(TRUNCATION_MARKER.to_string());
            }
            format!("Array({})[{}]", items.len(), parts.join(", "))
        }
        Value::String(s) => {
            let sample: String = s.chars().take(24).collect();
            if s.chars().count() > 24 {
                format!("{sample:?}{TRUNCATION_MARKER}")
            } else {
                format!("{sample:?}")
            }
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

fn type_tag(value: &Value) -> String {
    match value {
        Value::Object(_) => "{…}".to_string(),
        Value::Array(items) => format!("Array({})", items.len()),
        other => describe(other, MAX_DEPTH),
    }
}

/// Truncates `text` to at most `chars` UTF-8 scalar values, appending
/// the truncation marker when anything was cut. `chars = 0` still
/// always emits the marker alone (§8 boundary behavior).
fn truncate_to_chars(text: &str, chars: usize) -> String {
    if chars == 0 {
        return TRUNCATION_MARKER.to_string();
    }
    let total = text.chars().count();
    if total <= chars {
        return text.to_string();
    }
    let keep = chars.saturating_sub(1).max(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
