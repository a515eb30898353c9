//! Shared wire and domain types for the mcpproxy workspace.
//!
//! This crate defines the JSON-RPC framing and MCP model types spoken on both
//! sides of the proxy, the event types published on the in-process bus, the
//! error taxonomy, and the connection/application state enums. It carries no
//! I/O of its own.

pub mod connection;
pub mod error;
pub mod events;
pub mod jsonrpc;
pub mod mcp;
pub mod oauth;
pub mod tools;

pub use connection::AppState;
pub use connection::ConnectionInfo;
pub use connection::ConnectionState;
pub use error::ErrorKind;
pub use error::ErrorSummary;
pub use error::ProxyError;
pub use events::Event;
pub use events::EventKind;
pub use events::EventPayload;
pub use tools::ToolMetadata;
