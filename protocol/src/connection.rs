//! Connection and application state machines.
//!
//! The transition tables here are the single source of truth; the managed
//! client and the application aggregator both validate against them before
//! mutating state.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ErrorSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Error,
}

impl ConnectionState {
    /// Whether the transition `self -> next` is allowed. `Disconnect` is
    /// always allowed, so every state may move to `Disconnected`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if next == Disconnected {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Ready)
                | (Connecting, Error)
                | (Authenticating, Connecting)
                | (Authenticating, Error)
                | (Ready, Error)
                | (Error, Connecting)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Ready
    }

    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Runtime snapshot of one managed client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub first_attempt_time: Option<DateTime<Utc>>,
    pub last_retry_time: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorSummary>,
    pub server_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

impl ConnectionInfo {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            first_attempt_time: None,
            last_retry_time: None,
            connected_at: None,
            last_error: None,
            server_name: server_name.into(),
            server_version: None,
            protocol_version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Starting,
    Running,
    Degraded,
    Stopping,
    Stopped,
}

impl AppState {
    pub fn can_transition_to(self, next: AppState) -> bool {
        use AppState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Degraded)
                | (Starting, Stopping)
                | (Running, Degraded)
                | (Running, Stopping)
                | (Degraded, Running)
                | (Degraded, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Starting)
        )
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AppState::Starting => "starting",
            AppState::Running => "running",
            AppState::Degraded => "degraded",
            AppState::Stopping => "stopping",
            AppState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_is_always_allowed() {
        use ConnectionState::*;
        for state in [Disconnected, Connecting, Authenticating, Ready, Error] {
            assert!(state.can_transition_to(Disconnected), "{state} -> Disconnected");
        }
    }

    #[test]
    fn ready_cannot_jump_back_to_connecting() {
        assert!(!ConnectionState::Ready.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Ready.can_transition_to(ConnectionState::Authenticating));
    }

    #[test]
    fn error_recovers_only_through_connecting() {
        assert!(ConnectionState::Error.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Error.can_transition_to(ConnectionState::Ready));
    }

    #[test]
    fn app_state_dag_rejects_backwards_edges() {
        assert!(AppState::Stopping.can_transition_to(AppState::Stopped));
        assert!(!AppState::Stopped.can_transition_to(AppState::Running));
        assert!(!AppState::Stopping.can_transition_to(AppState::Running));
        assert!(AppState::Degraded.can_transition_to(AppState::Running));
        assert!(!AppState::Running.can_transition_to(AppState::Starting));
    }
}
