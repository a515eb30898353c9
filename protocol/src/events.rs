//! Typed events published on the in-process bus.
//!
//! Subscribers pick the subset of [`EventKind`]s they want; payload fields
//! are part of the wire contract for WebSocket observers, so shapes here are
//! serialized with stable snake_case tags.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::connection::AppState;
use crate::connection::ConnectionInfo;
use crate::connection::ConnectionState;
use crate::error::ErrorSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChange,
    ToolsUpdated,
    ToolCalled,
    ServerStateChanged,
    ServerConfigChanged,
    ServerAutoDisabled,
    ServerGroupUpdated,
    ConnectionEstablished,
    ConnectionLost,
    AppStateChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    StateChange {
        old: ConnectionState,
        new: ConnectionState,
        info: ConnectionInfo,
    },
    ToolsUpdated {
        tool_count: usize,
    },
    ToolCalled {
        tool: String,
        duration_ms: u64,
        is_error: bool,
    },
    ServerStateChanged {
        state: ConnectionState,
    },
    ServerConfigChanged,
    ServerAutoDisabled {
        reason: String,
    },
    ServerGroupUpdated {
        group_id: u64,
    },
    ConnectionEstablished {
        server_version: Option<String>,
    },
    ConnectionLost {
        reason: Option<ErrorSummary>,
    },
    AppStateChange {
        old: AppState,
        new: AppState,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::StateChange { .. } => EventKind::StateChange,
            EventPayload::ToolsUpdated { .. } => EventKind::ToolsUpdated,
            EventPayload::ToolCalled { .. } => EventKind::ToolCalled,
            EventPayload::ServerStateChanged { .. } => EventKind::ServerStateChanged,
            EventPayload::ServerConfigChanged => EventKind::ServerConfigChanged,
            EventPayload::ServerAutoDisabled { .. } => EventKind::ServerAutoDisabled,
            EventPayload::ServerGroupUpdated { .. } => EventKind::ServerGroupUpdated,
            EventPayload::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            EventPayload::ConnectionLost { .. } => EventKind::ConnectionLost,
            EventPayload::AppStateChange { .. } => EventKind::AppStateChange,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Originating server, empty for process-wide events.
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn now(server_name: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            server_name: server_name.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn payload_serializes_with_snake_case_tag() {
        let event = Event::now(
            "calc",
            EventPayload::ToolsUpdated { tool_count: 3 },
        );
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value.get("type"), Some(&serde_json::json!("tools_updated")));
        assert_eq!(value.get("server_name"), Some(&serde_json::json!("calc")));
        assert_eq!(value.get("tool_count"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn kind_matches_payload() {
        let payload = EventPayload::AppStateChange {
            old: AppState::Degraded,
            new: AppState::Running,
        };
        assert_eq!(payload.kind(), EventKind::AppStateChange);
    }
}
