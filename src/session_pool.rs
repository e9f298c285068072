//! Tool-Server Session Pool (§4.3) — one lazily-opened, process-lifetime
//! logical MCP session per remote server name. Concurrent invocations
//! against the same server are serialized; a transport error closes the
//! session and marks it for reopening on the next use. Retrying a failed
//! call is explicitly an agent concern, not this pool's.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolRequestParam, Tool as RmcpTool};
use rmcp::service::RunningService;
use rmcp::transport::{ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

type McpClient = RunningService<RoleClient, ()>;

/// How a tool server is reached, as resolved from the runtime registry.
#[derive(Debug, Clone)]
pub enum ServerTransport {
    Stdio { command: String, args: Vec<String> },
    Sse { url: String },
    StreamableHttp { url: String },
}

/// A tool's advertised shape, flattened to the fields the facade exposes
/// via `list_all_tools` / `get_tool_details` (§4.8).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Resolves server names to transports by querying the runtime named in
/// `MCSH_RUNTIME_ADDR` (§6.1). With no runtime configured, every lookup
/// fails with `NoRuntimeConfigured` rather than silently returning an
/// empty set, so callers can distinguish "no tool servers reachable"
/// from "unknown server name".
pub struct RuntimeRegistry {
    base_url: Option<String>,
    http: reqwest::Client,
}

impl RuntimeRegistry {
    pub fn new(runtime_addr: Option<String>) -> Self {
        Self {
            base_url: runtime_addr.map(|addr| format!("http://{addr}")),
            http: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> EngineResult<&str> {
        self.base_url
            .as_deref()
            .ok_or(EngineError::NoRuntimeConfigured("MCSH_RUNTIME_ADDR"))
    }

    /// Lists the names of every server the runtime currently advertises.
    pub async fn list_servers(&self) -> EngineResult<Vec<String>> {
        let base = self.base_url()?;
        let resp = self
            .http
            .get(format!("{base}/servers"))
            .send()
            .await
            .map_err(|e| EngineError::ToolTransport {
                server: "<runtime>".to_string(),
                message: format!("listing servers: {e}"),
            })?;
        let names: Vec<String> = resp.json().await.map_err(|e| EngineError::ToolTransport {
            server: "<runtime>".to_string(),
            message: format!("decoding server list: {e}"),
        })?;
        Ok(names)
    }

    /// Resolves a single server name to its transport descriptor.
    pub async fn resolve(&self, server: &str) -> EngineResult<ServerTransport> {
        let base = self.base_url()?;
        let resp = self
            .http
            .get(format!("{base}/servers/{server}"))
            .send()
            .await
            .map_err(|e| EngineError::ToolTransport {
                server: server.to_string(),
                message: format!("resolving transport: {e}"),
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(format!("tool server {server:?}")));
        }
        resp.json().await.map_err(|e| EngineError::ToolTransport {
            server: server.to_string(),
            message: format!("decoding transport descriptor: {e}"),
        })
    }
}

// The runtime's wire format for a resolved server (`GET /servers/{name}`).
impl<'de> serde::Deserialize<'de> for ServerTransport {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(tag = "transport", rename_all = "snake_case")]
        enum Wire {
            Stdio {
                command: String,
                #[serde(default)]
                args: Vec<String>,
            },
            Sse {
                url: String,
            },
            StreamableHttp {
                url: String,
            },
        }
        Ok(match Wire::deserialize(deserializer)? {
            Wire::Stdio { command, args } => ServerTransport::Stdio { command, args },
            Wire::Sse { url } => ServerTransport::Sse { url },
            Wire::StreamableHttp { url } => ServerTransport::StreamableHttp { url },
        })
    }
}

/// A single server's slot in the pool: an optional live session behind a
/// mutex, whose lock is held for the duration of each invocation. This
/// both serializes concurrent calls to the same server and gives us a
/// safe place to tear down and clear the session on transport error.
struct ServerSlot {
    session: Mutex<Option<McpClient>>,
}

impl ServerSlot {
    fn empty() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }
}

/// The process-lifetime pool of MCP sessions, one per server name seen
/// so far. Never shared across pipeline invocations is *not* required —
/// unlike the buffer store, sessions are deliberately process-scoped.
pub struct SessionPool {
    registry: Arc<RuntimeRegistry>,
    slots: Mutex<HashMap<String, Arc<ServerSlot>>>,
    tool_timeout: Duration,
}

impl SessionPool {
    pub fn new(registry: Arc<RuntimeRegistry>, tool_timeout: Duration) -> Self {
        Self {
            registry,
            slots: Mutex::new(HashMap::new()),
            tool_timeout,
        }
    }

    async fn slot_for(&self, server: &str) -> Arc<ServerSlot> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(ServerSlot::empty()))
            .clone()
    }

    async fn open(&self, server: &str) -> EngineResult<McpClient> {
        let transport = self.registry.resolve(server).await?;
        info!(server, "opening MCP session");
        let client = match transport {
            ServerTransport::Stdio { command, args } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(&command).configure(|cmd| {
                        cmd.args(&args).stderr(std::process::Stdio::inherit());
                    }),
                )
                .map_err(|e| EngineError::ToolTransport {
                    server: server.to_string(),
                    message: format!("spawning stdio transport: {e}"),
                })?;
                ().serve(transport)
                    .await
                    .map_err(|e| EngineError::ToolTransport {
                        server: server.to_string(),
                        message: format!("initializing stdio session: {e}"),
                    })?
            }
            ServerTransport::Sse { url } => {
                let http_client = reqwest::Client::new();
                let cfg = rmcp::transport::sse_client::SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };
                let transport = SseClientTransport::start_with_client(http_client, cfg)
                    .await
                    .map_err(|e| EngineError::ToolTransport {
                        server: server.to_string(),
                        message: format!("creating SSE transport: {e}"),
                    })?;
                ().serve(transport)
                    .await
                    .map_err(|e| EngineError::ToolTransport {
                        server: server.to_string(),
                        message: format!("initializing SSE session: {e}"),
                    })?
            }
            ServerTransport::StreamableHttp { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ().serve(transport)
                    .await
                    .map_err(|e| EngineError::ToolTransport {
                        server: server.to_string(),
                        message: format!("initializing streamable HTTP session: {e}"),
                    })?
            }
        };
        Ok(client)
    }

    /// Invokes `tool` on `server` with `args`, opening the session if
    /// this is its first use. The result is flattened to canonical JSON
    /// (§4.3). A tool-reported error (`is_error`) surfaces as
    /// `ToolInvocation`; a transport-level failure surfaces as
    /// `ToolTransport` and evicts the session so the next call reopens it.
    pub async fn invoke(&self, server: &str, tool: &str, args: Map<String, Value>) -> EngineResult<Value> {
        let slot = self.slot_for(server).await;
        let mut guard = slot.session.lock().await;

        if guard.is_none() {
            *guard = Some(self.open(server).await?);
        }
        let client = guard.as_ref().expect("just opened");

        let request = CallToolRequestParam {
            name: Cow::Owned(tool.to_string()),
            arguments: Some(args),
        };

        let call = tokio::time::timeout(self.tool_timeout, client.call_tool(request)).await;
        let result = match call {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(server, tool, error = %e, "MCP transport error, evicting session");
                *guard = None;
                return Err(EngineError::ToolTransport {
                    server: server.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(server, tool, "tool invocation timed out, evicting session");
                *guard = None;
                return Err(EngineError::ToolTransport {
                    server: server.to_string(),
                    message: format!("tool call exceeded {:?}", self.tool_timeout),
                });
            }
        };
        drop(guard);

        if result.is_error.unwrap_or(false) {
            let message = serde_json::to_value(&result.content)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "tool reported an error with no decodable content".to_string());
            return Err(EngineError::ToolInvocation {
                server: server.to_string(),
                tool: tool.to_string(),
                message,
            });
        }

        serde_json::to_value(&result.content).map_err(|e| EngineError::ToolTransport {
            server: server.to_string(),
            message: format!("flattening tool result: {e}"),
        })
    }

    /// Lists every tool exposed by `server`.
    pub async fn list_tools(&self, server: &str) -> EngineResult<Vec<ToolInfo>> {
        let slot = self.slot_for(server).await;
        let mut guard = slot.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.open(server).await?);
        }
        let client = guard.as_ref().expect("just opened");
        let result = match client.peer().list_all_tools().await {
            Ok(result) => result,
            Err(e) => {
                warn!(server, error = %e, "MCP transport error listing tools, evicting session");
                *guard = None;
                return Err(EngineError::ToolTransport {
                    server: server.to_string(),
                    message: e.to_string(),
                });
            }
        };
        Ok(result
            .into_iter()
            .map(|tool| tool_info(server, tool))
            .collect())
    }

    /// Lists every tool on every server the runtime currently advertises
    /// (§4.8 `list_all_tools`). A single unreachable server does not
    /// fail the whole call; it is logged and skipped.
    pub async fn list_all_tools(&self) -> EngineResult<Vec<ToolInfo>> {
        let servers = match self.registry.list_servers().await {
            Ok(servers) => servers,
            Err(EngineError::NoRuntimeConfigured(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut all = Vec::new();
        for server in servers {
            match self.list_tools(&server).await {
                Ok(mut tools) => all.append(&mut tools),
                Err(e) => debug!(server, error = %e, "skipping unreachable server in list_all_tools"),
            }
        }
        Ok(all)
    }

    /// Finds a single tool's details by name, searching across servers
    /// unless `server` narrows the search (§4.8 `get_tool_details`).
    pub async fn get_tool_details(&self, server: Option<&str>, tool: &str) -> EngineResult<ToolInfo> {
        let servers = match server {
            Some(s) => vec![s.to_string()],
            None => self.registry.list_servers().await?,
        };
        for server in servers {
            if let Ok(tools) = self.list_tools(&server).await {
                if let Some(found) = tools.into_iter().find(|t| t.name == tool) {
                    return Ok(found);
                }
            }
        }
        Err(EngineError::NotFound(format!("tool {tool:?}")))
    }
}

fn tool_info(server: &str, tool: RmcpTool) -> ToolInfo {
    ToolInfo {
        server: server.to_string(),
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: Value::Object((*tool.input_schema).clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_without_runtime_reports_no_runtime_configured() {
        let registry = RuntimeRegistry::new(None);
        assert!(registry.base_url().is_err());
    }

    #[test]
    fn stdio_transport_descriptor_deserializes() {
        let raw = serde_json::json!({
            "transport": "stdio",
            "command": "my-tool-server",
            "args": ["--flag"],
        });
        let transport: ServerTransport = serde_json::from_value(raw).unwrap();
        assert!(matches!(transport, ServerTransport::Stdio { command, .. } if command == "my-tool-server"));
    }

    #[test]
    fn streamable_http_transport_descriptor_deserializes() {
        let raw = serde_json::json!({
            "transport": "streamable_http",
            "url": "https://example.invalid/mcp",
        });
        let transport: ServerTransport = serde_json::from_value(raw).unwrap();
        assert!(matches!(transport, ServerTransport::StreamableHttp { url } if url == "https://example.invalid/mcp"));
    }

    #[tokio::test]
    async fn invoking_an_unresolvable_server_surfaces_no_runtime_configured() {
        let registry = Arc::new(RuntimeRegistry::new(None));
        let pool = SessionPool::new(registry, Duration::from_secs(1));
        let err = pool
            .invoke("missing", "noop", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NoRuntimeConfigured");
    }

    #[tokio::test]
    async fn list_all_tools_is_empty_rather_than_an_error_with_no_runtime() {
        let registry = Arc::new(RuntimeRegistry::new(None));
        let pool = SessionPool::new(registry, Duration::from_secs(1));
        let tools = pool.list_all_tools().await.unwrap();
        assert!(tools.is_empty());
    }
}
