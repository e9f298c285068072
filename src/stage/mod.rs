//! Stage Executors (§4.4) — one executor per `Stage` kind, sharing the
//! shape `execute(stage, upstream, context) -> output_stream`.

mod command;
mod for_each;
mod preview;
mod read_buffers;
mod tool;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::buffer_store::BufferStore;
use crate::config::Limits;
use crate::error::EngineResult;
use crate::pipeline::Stage;
use crate::session_pool::SessionPool;
use crate::stream::ByteStream;

/// Shared, read-only handles every executor needs: the buffer store for
/// this invocation, the process-global session pool, the resource
/// bounds, and the invocation's cancellation signal.
#[derive(Clone)]
pub struct StageContext {
    pub buffers: Arc<BufferStore>,
    pub sessions: Arc<SessionPool>,
    pub limits: Limits,
    pub cancel: CancellationToken,
}

/// One stage's execution outcome: its output stream plus a diagnostic
/// record for the result envelope (§4.7 step 5).
pub struct StageOutcome {
    pub output: ByteStream,
    pub diagnostic: StageDiagnostic,
}

/// Per-stage entry in the envelope's diagnostics array.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageDiagnostic {
    pub stage_index: usize,
    pub kind: &'static str,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}

impl StageDiagnostic {
    fn new(stage_index: usize, kind: &'static str, started: Instant, warnings: Vec<String>) -> Self {
        Self {
            stage_index,
            kind,
            duration_ms: started.elapsed().as_millis(),
            warnings,
        }
    }
}

/// Dispatches `stage` to its executor. `for_each` stages are routed
/// through the For-Each Driver regardless of kind (§4.5); the driver
/// internally calls back into the same tool/command primitives used by
/// their non-mapped counterparts.
pub async fn execute(
    stage_index: usize,
    stage: &Stage,
    upstream: ByteStream,
    ctx: &StageContext,
) -> EngineResult<StageOutcome> {
    let started = Instant::now();

    if stage.for_each() {
        let (output, warnings) = for_each::run(stage_index, stage, upstream, ctx).await?;
        return Ok(StageOutcome {
            output,
            diagnostic: StageDiagnostic::new(stage_index, stage.kind(), started, warnings),
        });
    }

    let (output, warnings) = match stage {
        Stage::Tool { name, server, args, .. } => {
            tool::run(server, name, args.clone(), upstream, ctx).await?
        }
        Stage::Command { command, args, .. } => {
            command::run(command, args.clone(), upstream, ctx).await?
        }
        Stage::Preview { chars } => preview::run(*chars, upstream, ctx).await?,
        Stage::ReadBuffers { buffers } => read_buffers::run(buffers, upstream, ctx).await?,
    };

    Ok(StageOutcome {
        output,
        diagnostic: StageDiagnostic::new(stage_index, stage.kind(), started, warnings),
    })
}

/// Binds a materialized upstream string into `args` under `field`, but
/// only when the tool's declared schema names that field (§4.4 "Tool
/// executor", §9 open question — resolved conservatively per spec.md).
pub(crate) fn bind_upstream_if_declared(
    args: &mut serde_json::Map<String, Value>,
    schema: &Value,
    field: &str,
    upstream: String,
) {
    let schema_has_field = schema
        .get("properties")
        .and_then(|p| p.get(field))
        .is_some();
    if schema_has_field && !args.contains_key(field) {
        args.insert(field.to_string(), Value::String(upstream));
    }
}

pub(crate) const UPSTREAM_FIELD: &str = "input";
