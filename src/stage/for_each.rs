//! For-Each Driver (§4.5) — applies a tool or command stage once per
//! line of a JSON-lines upstream, aggregating results into a JSON array
//! in input order.

use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::pipeline::Stage;
use crate::stream::{self, ByteStream};
use crate::subprocess;

use super::StageContext;

pub async fn run(
    stage_index: usize,
    stage: &Stage,
    upstream: ByteStream,
    ctx: &StageContext,
) -> EngineResult<(ByteStream, Vec<String>)> {
    let bytes = stream::materialize(upstream, ctx.limits.max_stage_input_bytes).await?;
    let text = String::from_utf8_lossy(&bytes);

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > ctx.limits.max_for_each_items {
        return Err(EngineError::ForEachLimitExceeded {
            limit: ctx.limits.max_for_each_items,
        });
    }

    let mut results = Vec::with_capacity(lines.len());
    let mut warnings = Vec::new();

    for (item_index, line) in lines.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warnings.push(format!(
                    "for_each item {item_index} (stage {stage_index}): invalid JSON: {e}"
                ));
                results.push(error_marker(&format!("invalid JSON: {e}")));
                continue;
            }
        };

        let outcome = match stage {
            Stage::Tool { name, server, args, .. } => {
                run_tool_item(server, name, args, &parsed, ctx).await
            }
            Stage::Command { command, args, .. } => {
                run_command_item(command, args, line, ctx).await
            }
            Stage::Preview { .. } | Stage::ReadBuffers { .. } => {
                unreachable!("for_each is only meaningful on tool/command stages")
            }
        };

        match outcome {
            Ok(value) => results.push(value),
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warnings.push(format!(
                    "for_each item {item_index} (stage {stage_index}): {e}"
                ));
                results.push(error_marker(&e.to_string()));
            }
        }
    }

    let array = Value::Array(results);
    Ok((stream::once(array.to_string().into_bytes()), warnings))
}

fn error_marker(message: &str) -> Value {
    serde_json::json!({ "error": message })
}

async fn run_tool_item(
    server: &str,
    name: &str,
    declared_args: &Map<String, Value>,
    parsed: &Value,
    ctx: &StageContext,
) -> EngineResult<Value> {
    let mut args = declared_args.clone();
    if let Value::Object(fields) = parsed {
        for (k, v) in fields {
            args.insert(k.clone(), v.clone());
        }
    }

    tokio::select! {
        result = ctx.sessions.invoke(server, name, args) => result,
        _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
    }
}

async fn run_command_item(
    command: &str,
    args: &[String],
    line: &str,
    ctx: &StageContext,
) -> EngineResult<Value> {
    let spawned = subprocess::run(
        command,
        args.to_vec(),
        stream::once(Bytes::copy_from_slice(line.as_bytes())),
        ctx.cancel.clone(),
        ctx.limits.subprocess_timeout,
    )?;

    let mut stdout = spawned.stdout;
    let mut out = Vec::new();
    while let Some(chunk) = stdout.next().await {
        out.extend_from_slice(&chunk.map_err(|e| EngineError::CommandFailed {
            command: command.to_string(),
            exit_code: -1,
            stderr_tail: e.to_string(),
        })?);
    }
    spawned.wait.await.map_err(|e| EngineError::CommandFailed {
        command: command.to_string(),
        exit_code: -1,
        stderr_tail: e.to_string(),
    })??;

    match serde_json::from_slice::<Value>(&out) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(String::from_utf8_lossy(&out).into_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_store::BufferStore;
    use crate::config::Limits;
    use crate::session_pool::{RuntimeRegistry, SessionPool};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn test_context() -> StageContext {
        StageContext {
            buffers: Arc::new(BufferStore::new(1024 * 1024)),
            sessions: Arc::new(SessionPool::new(
                Arc::new(RuntimeRegistry::new(None)),
                std::time::Duration::from_secs(5),
            )),
            limits: Limits::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn zero_input_lines_emit_an_empty_array() {
        let ctx = test_context();
        let stage = Stage::Command {
            command: "jq".into(),
            args: vec![".".into()],
            for_each: true,
            save_to: None,
        };
        let (output, _warnings) = run(0, &stage, stream::empty(), &ctx).await.unwrap();
        let bytes = stream::materialize(output, 1024).await.unwrap();
        assert_eq!(bytes, b"[]");
    }

    #[tokio::test]
    async fn invalid_json_line_becomes_a_per_item_error_without_failing_the_stage() {
        let ctx = test_context();
        let stage = Stage::Command {
            command: "jq".into(),
            args: vec![".".into()],
            for_each: true,
            save_to: None,
        };
        // The invalid line is rejected during JSON parsing, before the
        // subprocess is ever spawned.
        let (output, warnings) = run(0, &stage, stream::once(Bytes::from_static(b"not json\n")), &ctx)
            .await
            .unwrap();
        let bytes = stream::materialize(output, 1024).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert!(value[0].get("error").is_some());
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn fan_out_preserves_input_order() {
        let ctx = test_context();
        let stage = Stage::Command {
            command: "jq".into(),
            args: vec!["-c".into(), ".n".into()],
            for_each: true,
            save_to: None,
        };
        let input = "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n";
        let (output, _warnings) = run(0, &stage, stream::once(Bytes::from_static(input.as_bytes())), &ctx)
            .await
            .unwrap();
        let bytes = stream::materialize(output, 1024).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }
}
