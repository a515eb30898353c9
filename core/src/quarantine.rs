//! Quarantine policy.
//!
//! Servers added by an operator at runtime start quarantined; their tools
//! stay visible in the index (flagged) but never execute. The gate reads
//! the live config on every call, so promotion takes effect immediately.

use mcpproxy_protocol::ProxyError;

use crate::config::ServerConfig;

/// Reject tool invocation for quarantined servers. Called on every routed
/// tool call, before any upstream I/O.
pub fn ensure_not_quarantined(config: &ServerConfig) -> Result<(), ProxyError> {
    if config.quarantined {
        return Err(ProxyError::quarantined(format!(
            "server `{}` is quarantined; its tools are visible but cannot be executed",
            config.name
        ))
        .with_server(config.name.clone())
        .with_hint("use `quarantine_security` with operation `unquarantine` to promote it"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpproxy_protocol::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn quarantined_servers_are_rejected() {
        let mut config = ServerConfig::stdio("calc", "echo", vec![]);
        config.quarantined = true;
        let err = ensure_not_quarantined(&config).expect_err("must reject");
        assert_eq!(err.kind(), ErrorKind::Quarantined);
        assert!(err.hint().is_some());
    }

    #[test]
    fn clean_servers_pass() {
        let config = ServerConfig::stdio("calc", "echo", vec![]);
        assert!(ensure_not_quarantined(&config).is_ok());
    }
}
