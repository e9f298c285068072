//! Tool executor (§4.4 "Tool executor").

use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::stream::{self, ByteStream};

use super::{bind_upstream_if_declared, StageContext, UPSTREAM_FIELD};

pub async fn run(
    server: &str,
    name: &str,
    mut args: Map<String, Value>,
    upstream: ByteStream,
    ctx: &StageContext,
) -> EngineResult<(ByteStream, Vec<String>)> {
    let upstream_bytes = stream::materialize(upstream, ctx.limits.max_stage_input_bytes).await?;

    if !upstream_bytes.is_empty() {
        if let Ok(details) = ctx.sessions.get_tool_details(Some(server), name).await {
            let upstream_text = String::from_utf8_lossy(&upstream_bytes).into_owned();
            bind_upstream_if_declared(&mut args, &details.input_schema, UPSTREAM_FIELD, upstream_text);
        }
    }

    let result = tokio::select! {
        result = ctx.sessions.invoke(server, name, args) => result?,
        _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
    };

    let bytes = match result {
        Value::String(s) => s.into_bytes(),
        other => other.to_string().into_bytes(),
    };

    Ok((stream::once(bytes), Vec::new()))
}
