//! Error taxonomy shared across the proxy.
//!
//! Kinds are classified once, where a failure first becomes observable (the
//! core client boundary); every layer above only enriches the error with
//! routing context. Messages must never contain credential material.

use serde::Deserialize;
use serde::Serialize;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// TCP/DNS/IO failure, child process spawn failure.
    #[error("transport")]
    Transport,
    /// `initialize` rejected or returned an unusable server.
    #[error("protocol_init")]
    ProtocolInit,
    /// Remote returned 401 / `authorization_required`.
    #[error("auth_required")]
    AuthRequired,
    /// OAuth metadata endpoints absent or unusable.
    #[error("oauth_misconfigured")]
    OAuthMisconfigured,
    /// Remote accepted credentials but denied the operation.
    #[error("insufficient_scope")]
    InsufficientScope,
    /// Remote indicated backoff (e.g. 429).
    #[error("rate_limited")]
    RateLimited,
    /// Upstream reports the tool id is unknown.
    #[error("tool_not_found")]
    ToolNotFound,
    /// Quarantine gate rejected the invocation.
    #[error("quarantined")]
    Quarantined,
    /// Target client not in `Ready` after lazy-connect attempts.
    #[error("not_connected")]
    NotConnected,
    /// Context deadline expired.
    #[error("timeout")]
    Timeout,
    /// Invariant violation in the proxy itself.
    #[error("internal")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::ProtocolInit => "protocol_init",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::OAuthMisconfigured => "oauth_misconfigured",
            ErrorKind::InsufficientScope => "insufficient_scope",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::Quarantined => "quarantined",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "transport" => ErrorKind::Transport,
            "protocol_init" => ErrorKind::ProtocolInit,
            "auth_required" => ErrorKind::AuthRequired,
            "oauth_misconfigured" => ErrorKind::OAuthMisconfigured,
            "insufficient_scope" => ErrorKind::InsufficientScope,
            "rate_limited" => ErrorKind::RateLimited,
            "tool_not_found" => ErrorKind::ToolNotFound,
            "quarantined" => ErrorKind::Quarantined,
            "not_connected" => ErrorKind::NotConnected,
            "timeout" => ErrorKind::Timeout,
            "internal" => ErrorKind::Internal,
            _ => return Err(()),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone)]
pub struct ProxyError {
    kind: ErrorKind,
    message: String,
    server: Option<String>,
    tool: Option<String>,
    hint: Option<String>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            server: None,
            tool: None,
            hint: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn protocol_init(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolInit, message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, message)
    }

    pub fn oauth_misconfigured(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OAuthMisconfigured, message)
    }

    pub fn quarantined(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Quarantined, message)
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConnected, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.server, &self.tool) {
            (Some(server), Some(tool)) => {
                write!(f, "{}: {} (server `{server}`, tool `{tool}`)", self.kind, self.message)?;
            }
            (Some(server), None) => {
                write!(f, "{}: {} (server `{server}`)", self.kind, self.message)?;
            }
            _ => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(hint) = &self.hint {
            write!(f, "; hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProxyError {}

/// Compact error record kept in [`crate::ConnectionInfo`] and event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_includes_context_and_hint() {
        let err = ProxyError::not_connected("server is disabled")
            .with_server("jira")
            .with_tool("search")
            .with_hint("use `upstream_servers list`");
        assert_eq!(
            err.to_string(),
            "not_connected: server is disabled (server `jira`, tool `search`); \
             hint: use `upstream_servers list`"
        );
    }

    #[test]
    fn summary_preserves_kind() {
        let err = ProxyError::auth_required("401 from remote");
        assert_eq!(
            err.summary(),
            ErrorSummary {
                kind: ErrorKind::AuthRequired,
                message: "401 from remote".to_string(),
            }
        );
    }
}
