//! Core of the aggregating MCP proxy.
//!
//! The [`manager::UpstreamManager`] owns one [`managed_client::ManagedClient`]
//! per configured upstream and is the process-wide registry and scheduler:
//! bounded-parallelism startup, `server:tool` routing with quarantine and
//! lazy-connect gates, OAuth completion reactors, and the health checker.
//! Observers attach through the [`event_bus::EventBus`]; the
//! [`app_state::AppStateMachine`] folds per-server states into one
//! application state.

pub mod app_state;
pub mod backoff;
pub mod config;
pub mod event_bus;
pub mod managed_client;
pub mod manager;
pub mod quarantine;
pub mod tool_index;
pub mod transport;

pub use app_state::AppStateMachine;
pub use config::Config;
pub use config::ProtocolKind;
pub use config::ServerConfig;
pub use config::StartupMode;
pub use event_bus::EventBus;
pub use event_bus::EventSubscription;
pub use managed_client::ManagedClient;
pub use manager::ManagerStats;
pub use manager::UpstreamManager;
pub use tool_index::RetrievedTool;
pub use tool_index::ToolIndex;
