//! Pipeline Orchestrator (§4.7) — validates, seeds, composes stage
//! executors in order, drains the terminal stream, and returns a
//! structured result envelope regardless of how the pipeline ends.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::buffer_store::BufferStore;
use crate::config::Limits;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::Pipeline;
use crate::session_pool::SessionPool;
use crate::stage::{self, StageContext};
pub use crate::stage::StageDiagnostic;
use crate::stream::{self, ByteStream};

/// Terminal outcome of `execute_pipeline` (§6 table, §4.7 step 5).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error { kind: &'static str, message: String },
    Cancelled,
}

/// The structured return value of `execute_pipeline`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEnvelope {
    pub output: String,
    pub diagnostics: Vec<StageDiagnostic>,
    #[serde(flatten)]
    pub status: Status,
}

pub struct Orchestrator {
    sessions: Arc<SessionPool>,
    limits: Limits,
}

impl Orchestrator {
    pub fn new(sessions: Arc<SessionPool>, limits: Limits) -> Self {
        Self { sessions, limits }
    }

    /// Runs `pipeline` to completion. A validation failure returns
    /// `Err` before any subprocess or tool call is made (§4.7 step 1);
    /// every other outcome — success, a runtime error, or cancellation —
    /// is reported inside the envelope after cleanup has run, since
    /// cleanup must happen regardless of how the pipeline ends.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionEnvelope> {
        pipeline.validate()?;

        let buffers = Arc::new(BufferStore::new(self.limits.max_buffer_bytes));
        let ctx = StageContext {
            buffers: buffers.clone(),
            sessions: self.sessions.clone(),
            limits: self.limits.clone(),
            cancel: cancel.clone(),
        };

        let mut stream: ByteStream = match &pipeline.initial_input {
            Some(seed) => stream::once(seed.clone().into_bytes()),
            None => stream::empty(),
        };

        let mut diagnostics = Vec::new();
        let mut run_error: Option<EngineError> = None;

        for (index, stage_def) in pipeline.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                run_error = Some(EngineError::Cancelled);
                break;
            }

            let span = info_span!("stage", index, kind = stage_def.kind());
            let outcome = stage::execute(index, stage_def, stream, &ctx)
                .instrument(span)
                .await;

            match outcome {
                Ok(mut outcome) => {
                    if let Some(name) = stage_def.save_to() {
                        outcome.output = crate::buffer_store::tee_capturing(
                            outcome.output,
                            buffers.clone(),
                            name.to_string(),
                        );
                    }
                    diagnostics.push(outcome.diagnostic);
                    stream = outcome.output;
                }
                Err(e) => {
                    run_error = Some(e);
                    break;
                }
            }
        }

        let output_bytes = if run_error.is_none() {
            match stream::materialize(stream, usize::MAX).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    run_error = Some(e);
                    None
                }
            }
        } else {
            stream::drain(stream).await.ok();
            None
        };

        if buffers.exceeded() && run_error.is_none() {
            run_error = Some(EngineError::BufferLimitExceeded {
                limit_bytes: buffers.limit_bytes(),
            });
        }

        // §4.7 step 6: cleanup. Subprocess reaping and tool-session
        // cleanup happen inside each component already (kill_on_drop,
        // the session pool's own lifecycle); here we just make sure the
        // stream above was fully drained in every branch, which the
        // logic above guarantees.

        match run_error {
            None => {
                let mut output_bytes = output_bytes.unwrap_or_default();
                let mut warning = None;
                if output_bytes.len() > self.limits.max_output_bytes {
                    output_bytes.truncate(self.limits.max_output_bytes);
                    warning = Some(format!(
                        "final output truncated to {} bytes",
                        self.limits.max_output_bytes
                    ));
                }
                if let Some(w) = warning {
                    warn!(warning = %w, "final output truncated");
                    if let Some(last) = diagnostics.last_mut() {
                        last.warnings.push(w);
                    }
                }
                Ok(ExecutionEnvelope {
                    output: String::from_utf8_lossy(&output_bytes).into_owned(),
                    diagnostics,
                    status: Status::Ok,
                })
            }
            Some(EngineError::Cancelled) => Ok(ExecutionEnvelope {
                output: String::new(),
                diagnostics,
                status: Status::Cancelled,
            }),
            Some(e) => Ok(ExecutionEnvelope {
                output: String::new(),
                diagnostics,
                status: Status::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            }),
        }
    }
}
