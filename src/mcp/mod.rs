//! Model Context Protocol transport binding, built on the official
//! `rmcp` SDK. Exposes the engine's four public operations (§6) to an
//! MCP client over stdio.

mod server;

pub use server::ModelContextShellService;
