//! Public Operations Facade (§4.8 [AMBIENT], §6) — the four agent-facing
//! operations, delegating to the orchestrator, session pool, and
//! allow-list.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::allowlist;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::orchestrator::{ExecutionEnvelope, Orchestrator};
use crate::pipeline::Pipeline;
use crate::session_pool::{RuntimeRegistry, SessionPool, ToolInfo};

/// A single tool's description as returned by `list_all_tools` /
/// `get_tool_details` (§6 table).
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub schema: serde_json::Value,
}

impl From<ToolInfo> for ToolDescriptor {
    fn from(info: ToolInfo) -> Self {
        Self {
            name: info.name,
            description: info.description,
            schema: info.input_schema,
        }
    }
}

/// Cheap to clone: every field is `Arc`-wrapped or `Copy`, so a
/// surrounding transport can hand a clone to each concurrent request
/// without synchronizing on a shared mutable `Engine`.
#[derive(Clone)]
pub struct Engine {
    sessions: Arc<SessionPool>,
    orchestrator: Arc<Orchestrator>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        let registry = Arc::new(RuntimeRegistry::new(config.runtime_addr.clone()));
        let sessions = Arc::new(SessionPool::new(registry, config.limits.tool_timeout));
        let orchestrator = Arc::new(Orchestrator::new(sessions.clone(), config.limits.clone()));
        Self {
            sessions,
            orchestrator,
        }
    }

    /// Runs `pipeline` end-to-end, returning the result envelope.
    pub async fn execute_pipeline(
        &self,
        pipeline: &Pipeline,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionEnvelope> {
        self.orchestrator.execute(pipeline, cancel).await
    }

    /// Aggregates tool descriptors across every server the runtime
    /// currently advertises.
    pub async fn list_all_tools(&self) -> EngineResult<Vec<ToolDescriptor>> {
        Ok(self
            .sessions
            .list_all_tools()
            .await?
            .into_iter()
            .map(ToolDescriptor::from)
            .collect())
    }

    /// Describes a single named tool, optionally scoped to `server`.
    pub async fn get_tool_details(
        &self,
        server: Option<&str>,
        tool: &str,
    ) -> EngineResult<ToolDescriptor> {
        Ok(self
            .sessions
            .get_tool_details(server, tool)
            .await?
            .into())
    }

    /// The allow-listed local utility names, in their stable order.
    pub fn list_available_shell_commands(&self) -> Vec<&'static str> {
        allowlist::list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(&EngineConfig {
            runtime_addr: None,
            bind_host: "127.0.0.1".to_string(),
            bind_port: 7887,
            limits: crate::config::Limits::default(),
        })
    }

    #[test]
    fn shell_commands_match_the_allow_list() {
        let engine = engine();
        assert_eq!(engine.list_available_shell_commands(), allowlist::list());
    }

    #[tokio::test]
    async fn list_all_tools_is_empty_with_no_runtime_configured() {
        let engine = engine();
        let tools = engine.list_all_tools().await.unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn execute_pipeline_delegates_to_the_orchestrator() {
        let engine = engine();
        let pipeline = Pipeline {
            stages: vec![crate::pipeline::Stage::Command {
                command: "jq".into(),
                args: vec![".a".into()],
                for_each: false,
                save_to: None,
            }],
            initial_input: Some("{\"a\":42}".into()),
        };
        let envelope = engine
            .execute_pipeline(&pipeline, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(envelope.output, "42\n");
    }
}
