//! Async MCP client for upstream servers.
//!
//! One [`McpClient`] holds one MCP session over a chosen transport: a child
//! process speaking line-delimited JSON-RPC over stdio, a streamable-HTTP
//! endpoint, or an SSE endpoint. The crate hides JSON-RPC framing behind a
//! typed API and classifies failures into the shared error taxonomy at this
//! boundary.
//!
//! OAuth lives here as well: metadata discovery, dynamic client
//! registration, the interactive PKCE login flow, and silent refresh. Tokens
//! are persisted through the [`mcpproxy_protocol::oauth::TokenStore`] seam.

mod client;
mod env;
pub mod oauth;

pub use client::McpClient;
pub use env::create_env_for_mcp_server;
