//! MCP server implementation using the official rmcp SDK.
//!
//! Exposes the four Public Operations Facade methods (§6, §4.8) over
//! the Model Context Protocol.

use std::borrow::Cow;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::facade::Engine;

/// Parameters for the `execute_pipeline` tool. `pipeline` is taken as a
/// raw JSON value and decoded against [`crate::pipeline::Pipeline`] so
/// the stage schema (§3) is validated in one place, not duplicated here
/// via `schemars`.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ExecutePipelineParams {
    #[schemars(description = "Ordered sequence of pipeline stages (tool | command | preview | read_buffers)")]
    pub pipeline: serde_json::Value,
    #[serde(default)]
    #[schemars(description = "Optional initial input fed to the first stage")]
    pub initial_input: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GetToolDetailsParams {
    #[serde(default)]
    #[schemars(description = "Restrict the search to this server name")]
    pub server: Option<String>,
    #[schemars(description = "Tool name to describe")]
    pub tool: String,
}

/// Model Context Shell's MCP service: a thin `rmcp::ServerHandler`
/// wrapping [`Engine`] (§4.8).
#[derive(Clone)]
pub struct ModelContextShellService {
    engine: Engine,
    tool_router: ToolRouter<Self>,
}

impl ModelContextShellService {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }
}

fn mcp_error(message: impl Into<String>) -> McpError {
    McpError {
        code: ErrorCode::INTERNAL_ERROR,
        message: Cow::from(message.into()),
        data: None,
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| mcp_error(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[tool_router]
impl ModelContextShellService {
    /// Run a declarative multi-stage pipeline end-to-end (§6).
    #[tool(description = "Execute a declarative pipeline of tool/command/preview/read_buffers stages and return the result envelope")]
    async fn execute_pipeline(
        &self,
        Parameters(params): Parameters<ExecutePipelineParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut pipeline: crate::pipeline::Pipeline =
            serde_json::from_value(params.pipeline).map_err(|e| mcp_error(format!("invalid pipeline: {e}")))?;
        if params.initial_input.is_some() {
            pipeline.initial_input = params.initial_input;
        }

        let envelope = self
            .engine
            .execute_pipeline(&pipeline, CancellationToken::new())
            .await
            .map_err(|e| mcp_error(e.to_string()))?;
        json_result(&envelope)
    }

    /// List every tool exposed by every server the runtime advertises.
    #[tool(description = "List all tools exposed by every configured remote tool server")]
    async fn list_all_tools(&self) -> Result<CallToolResult, McpError> {
        let tools = self
            .engine
            .list_all_tools()
            .await
            .map_err(|e| mcp_error(e.to_string()))?;
        json_result(&tools)
    }

    /// Describe a single tool by name.
    #[tool(description = "Get the description and schema of a single named tool")]
    async fn get_tool_details(
        &self,
        Parameters(params): Parameters<GetToolDetailsParams>,
    ) -> Result<CallToolResult, McpError> {
        let details = self
            .engine
            .get_tool_details(params.server.as_deref(), &params.tool)
            .await
            .map_err(|e| mcp_error(e.to_string()))?;
        json_result(&details)
    }

    /// List the allow-listed local utility names.
    #[tool(description = "List the fixed set of local shell utilities a command stage may invoke")]
    async fn list_available_shell_commands(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.engine.list_available_shell_commands())
    }
}

#[tool_handler]
impl ServerHandler for ModelContextShellService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "model-context-shell".to_string(),
                title: Some("Model Context Shell".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Model Context Shell — run declarative pipelines mixing remote tool-server \
                 calls with allow-listed local utilities"
                    .to_string(),
            ),
        }
    }
}
