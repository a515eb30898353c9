//! Transport selection: map a [`ServerConfig`] onto a concrete client
//! variant. `auto` resolves to stdio when a command is configured and to
//! streamable-HTTP otherwise; the managed client downgrades auto-HTTP to
//! SSE when the first handshake fails in a protocol-shaped way.

use std::ffi::OsString;

use mcpproxy_mcp_client::McpClient;
use mcpproxy_mcp_client::oauth::should_use_oauth;
use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::oauth::TokenStore;

use crate::config::ProtocolKind;
use crate::config::ServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTransport {
    Stdio,
    StreamableHttp,
    Sse,
}

pub fn resolve_transport(config: &ServerConfig) -> Result<ResolvedTransport, ProxyError> {
    let has_command = config
        .command
        .as_deref()
        .is_some_and(|command| !command.is_empty());
    let resolved = match config.protocol {
        ProtocolKind::Stdio => ResolvedTransport::Stdio,
        ProtocolKind::Sse => ResolvedTransport::Sse,
        ProtocolKind::Http | ProtocolKind::StreamableHttp => ResolvedTransport::StreamableHttp,
        ProtocolKind::Auto => {
            if has_command {
                ResolvedTransport::Stdio
            } else {
                ResolvedTransport::StreamableHttp
            }
        }
    };
    match resolved {
        ResolvedTransport::Stdio if !has_command => Err(ProxyError::internal(format!(
            "server `{}` resolves to stdio but has no command",
            config.name
        ))),
        ResolvedTransport::StreamableHttp | ResolvedTransport::Sse
            if config.url.as_deref().is_none_or(str::is_empty) =>
        {
            Err(ProxyError::internal(format!(
                "server `{}` resolves to an HTTP transport but has no url",
                config.name
            )))
        }
        other => Ok(other),
    }
}

/// Construct a core client for `config` over the given transport variant,
/// attaching a stored bearer token on HTTP transports when OAuth applies.
pub async fn build_client(
    config: &ServerConfig,
    transport: ResolvedTransport,
    token_store: &dyn TokenStore,
) -> Result<McpClient, ProxyError> {
    match transport {
        ResolvedTransport::Stdio => {
            let command = config.command.clone().ok_or_else(|| {
                ProxyError::internal(format!("server `{}` has no command", config.name))
            })?;
            let args: Vec<OsString> = config.args.iter().map(OsString::from).collect();
            McpClient::new_stdio_client(
                OsString::from(command),
                args,
                &config.env,
                config.working_dir.clone(),
            )
            .await
        }
        ResolvedTransport::StreamableHttp => {
            let url = require_url(config)?;
            let bearer = stored_bearer(config, token_store, url).await;
            McpClient::new_streamable_http_client(url, bearer, &config.headers).await
        }
        ResolvedTransport::Sse => {
            let url = require_url(config)?;
            let bearer = stored_bearer(config, token_store, url).await;
            McpClient::new_sse_client(url, None, bearer, &config.headers).await
        }
    }
}

fn require_url(config: &ServerConfig) -> Result<&str, ProxyError> {
    config
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ProxyError::internal(format!("server `{}` has no url", config.name)))
}

async fn stored_bearer(
    config: &ServerConfig,
    token_store: &dyn TokenStore,
    url: &str,
) -> Option<String> {
    if !should_use_oauth(&config.headers) {
        return None;
    }
    match token_store.get_token(&config.name, url).await {
        Ok(token) => token.map(|token| token.access_token),
        Err(err) => {
            tracing::warn!(
                "failed to read stored token for `{}`: {err:#}",
                config.name
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn auto_prefers_stdio_when_command_is_set() {
        let config = ServerConfig::stdio("calc", "echo", vec![]);
        let mut config = config;
        config.protocol = ProtocolKind::Auto;
        assert_eq!(
            resolve_transport(&config).expect("resolve"),
            ResolvedTransport::Stdio
        );
    }

    #[test]
    fn auto_falls_back_to_streamable_http_for_urls() {
        let mut config = ServerConfig::http("jira", "https://jira.example/mcp");
        config.protocol = ProtocolKind::Auto;
        assert_eq!(
            resolve_transport(&config).expect("resolve"),
            ResolvedTransport::StreamableHttp
        );
    }

    #[test]
    fn http_alias_means_streamable_http() {
        let mut config = ServerConfig::http("jira", "https://jira.example/mcp");
        config.protocol = ProtocolKind::Http;
        assert_eq!(
            resolve_transport(&config).expect("resolve"),
            ResolvedTransport::StreamableHttp
        );
    }

    #[test]
    fn stdio_without_command_is_rejected() {
        let mut config = ServerConfig::http("jira", "https://jira.example/mcp");
        config.protocol = ProtocolKind::Stdio;
        let err = resolve_transport(&config).expect_err("must reject");
        assert_eq!(err.kind(), mcpproxy_protocol::ErrorKind::Internal);
    }
}
