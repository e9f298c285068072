//! Engine configuration, read once from the environment at startup.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Resource bounds from §5, each with a documented default and an
/// environment override (§6.1).
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_stage_input_bytes: usize,
    pub max_buffer_bytes: usize,
    pub max_output_bytes: usize,
    pub subprocess_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_for_each_items: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stage_input_bytes: 32 * 1024 * 1024,
            max_buffer_bytes: 32 * 1024 * 1024,
            max_output_bytes: 8 * 1024 * 1024,
            subprocess_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(60),
            max_for_each_items: 10_000,
        }
    }
}

/// Top-level engine configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `host:port` of the runtime that enumerates remote tool servers.
    /// `None` means the engine runs with no tool servers: `list_all_tools`
    /// returns empty and tool-kind stages fail fast.
    pub runtime_addr: Option<String>,
    pub bind_host: String,
    pub bind_port: u16,
    pub limits: Limits,
}

impl EngineConfig {
    /// Loads configuration from environment variables, applying the
    /// defaults documented in SPEC_FULL.md §6.1.
    pub fn from_env() -> EngineResult<Self> {
        let runtime_addr = non_empty_env("MCSH_RUNTIME_ADDR");

        let default_bind_host = if runtime_addr.is_some() {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        let bind_host =
            non_empty_env("MCSH_BIND_HOST").unwrap_or_else(|| default_bind_host.to_string());
        let bind_port = parse_env("MCSH_BIND_PORT", 7887u16)?;

        let limits = Limits {
            max_stage_input_bytes: parse_env("MCSH_MAX_STAGE_INPUT_BYTES", 32 * 1024 * 1024)?,
            max_buffer_bytes: parse_env("MCSH_MAX_BUFFER_BYTES", 32 * 1024 * 1024)?,
            max_output_bytes: parse_env("MCSH_MAX_OUTPUT_BYTES", 8 * 1024 * 1024)?,
            subprocess_timeout: Duration::from_secs(parse_env(
                "MCSH_SUBPROCESS_TIMEOUT_SECS",
                60,
            )?),
            tool_timeout: Duration::from_secs(parse_env("MCSH_TOOL_TIMEOUT_SECS", 60)?),
            max_for_each_items: parse_env("MCSH_MAX_FOR_EACH_ITEMS", 10_000)?,
        };

        Ok(Self {
            runtime_addr,
            bind_host,
            bind_port,
            limits,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> EngineResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| EngineError::Configuration(format!("{key}={raw:?}: {e}"))),
    }
}
