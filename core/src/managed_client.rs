//! One managed upstream: a core client gated by a connection state machine.
//!
//! All transitions are serialized by one async operation lock; status reads
//! go through a read lock on the [`ConnectionInfo`] snapshot. Every accepted
//! transition publishes `StateChange` (and a summary `ServerStateChanged`)
//! on the bus, in order.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use mcpproxy_mcp_client::McpClient;
use mcpproxy_mcp_client::oauth::refresh_access_token;
use mcpproxy_mcp_client::oauth::should_use_oauth;
use mcpproxy_protocol::ConnectionInfo;
use mcpproxy_protocol::ConnectionState;
use mcpproxy_protocol::ErrorKind;
use mcpproxy_protocol::Event;
use mcpproxy_protocol::EventPayload;
use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::ToolMetadata;
use mcpproxy_protocol::mcp::CallToolResult;
use mcpproxy_protocol::mcp::ClientCapabilities;
use mcpproxy_protocol::mcp::Implementation;
use mcpproxy_protocol::mcp::InitializeRequestParams;
use mcpproxy_protocol::mcp::MCP_PROTOCOL_VERSION;
use mcpproxy_protocol::oauth::TokenStore;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::backoff::RetryPolicy;
use crate::config::ProtocolKind;
use crate::config::ServerConfig;
use crate::event_bus::EventBus;
use crate::transport::ResolvedTransport;
use crate::transport::build_client;
use crate::transport::resolve_transport;

/// Per-client tunables inherited from the manager.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Default enclosing timeout for tool calls.
    pub tool_call_timeout: Duration,
    /// Bounded wait when a tool call triggers a lazy connect.
    pub lazy_connect_wait: Duration,
    pub enable_lazy_loading: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            tool_call_timeout: Duration::from_secs(60),
            lazy_connect_wait: Duration::from_secs(30),
            enable_lazy_loading: true,
        }
    }
}

pub struct ManagedClient {
    name: String,
    config: StdRwLock<Arc<ServerConfig>>,
    info: StdRwLock<ConnectionInfo>,
    client: Mutex<Option<Arc<McpClient>>>,
    /// Serializes connect/disconnect/auth flows.
    op_lock: Mutex<()>,
    retry: StdMutex<RetryPolicy>,
    next_retry_at: StdMutex<Option<Instant>>,
    bus: EventBus,
    token_store: Arc<dyn TokenStore>,
    settings: ClientSettings,
    /// Incremented on every connect/disconnect so stale close watchers can
    /// recognize themselves.
    generation: AtomicU64,
}

impl ManagedClient {
    pub fn new(
        config: ServerConfig,
        bus: EventBus,
        token_store: Arc<dyn TokenStore>,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let name = config.name.clone();
        Arc::new(Self {
            info: StdRwLock::new(ConnectionInfo::new(&name)),
            name,
            config: StdRwLock::new(Arc::new(config)),
            client: Mutex::new(None),
            op_lock: Mutex::new(()),
            retry: StdMutex::new(RetryPolicy::new()),
            next_retry_at: StdMutex::new(None),
            bus,
            token_store,
            settings,
            generation: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> ConnectionInfo {
        self.info
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Record a successful `tools/list` in the cached config: `tool_count`
    /// feeds the lazy-connect gate and `ever_connected` the startup
    /// priority.
    pub fn record_listing(&self, tool_count: u64) {
        let mut guard = self
            .config
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut updated = (**guard).clone();
        updated.tool_count = tool_count;
        updated.ever_connected = true;
        *guard = Arc::new(updated);
    }

    /// Whether the backoff window since the last failed attempt has passed.
    pub fn retry_window_elapsed(&self) -> bool {
        let guard = self
            .next_retry_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.is_none_or(|at| Instant::now() >= at)
    }

    /// Apply a replacement config. Returns `true` when connection-affecting
    /// fields changed and the client was torn down (caller decides whether
    /// to reconnect).
    pub async fn update_config(&self, new_config: ServerConfig) -> bool {
        let _op = self.op_lock.lock().await;
        let hot_swappable = self.config().connection_fields_eq(&new_config);
        {
            let mut guard = self
                .config
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = Arc::new(new_config);
        }
        self.bus.publish(Event::now(
            self.name.clone(),
            EventPayload::ServerConfigChanged,
        ));
        if hot_swappable {
            return false;
        }
        self.disconnect_locked().await;
        true
    }

    /// Connect if not already connected or connecting. Idempotent.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ProxyError> {
        let _op = self.op_lock.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(self: &Arc<Self>) -> Result<(), ProxyError> {
        match self.state() {
            ConnectionState::Ready
            | ConnectionState::Connecting
            | ConnectionState::Authenticating => return Ok(()),
            ConnectionState::Disconnected | ConnectionState::Error => {}
        }

        let config = self.config();
        if !config.enabled {
            return Err(ProxyError::not_connected(format!(
                "server `{}` is disabled",
                self.name
            ))
            .with_server(self.name.clone()));
        }
        if config.quarantined {
            return Err(ProxyError::quarantined(format!(
                "server `{}` is quarantined",
                self.name
            ))
            .with_server(self.name.clone()));
        }

        let now = Utc::now();
        self.set_state(ConnectionState::Connecting, |mcinfo| {
            mcinfo.first_attempt_time.get_or_insert(now);
            mcinfo.last_retry_time = Some(now);
        })?;

        match self.establish(&config).await {
            Ok(()) => Ok(()),
            Err(err)
                if err.kind() == ErrorKind::AuthRequired
                    && config.url.is_some()
                    && should_use_oauth(&config.headers) =>
            {
                self.set_state(ConnectionState::Authenticating, |_| {})?;
                match self.try_silent_refresh(&config).await {
                    Ok(()) => {
                        // Re-initialize exactly once with the fresh token.
                        self.set_state(ConnectionState::Connecting, |_| {})?;
                        match self.establish(&config).await {
                            Ok(()) => Ok(()),
                            Err(retry_err) => self.fail_with(retry_err),
                        }
                    }
                    Err(refresh_err) => {
                        debug!(
                            "silent refresh for `{}` unavailable: {refresh_err}",
                            self.name
                        );
                        self.fail_with(err)
                    }
                }
            }
            Err(err) => self.fail_with(err),
        }
    }

    /// Build the transport, run `initialize`, and install the session. For
    /// `auto` URL servers a protocol-shaped streamable-HTTP failure is
    /// retried once over SSE.
    async fn establish(self: &Arc<Self>, config: &ServerConfig) -> Result<(), ProxyError> {
        let transport = resolve_transport(config)?;
        match self.establish_over(config, transport).await {
            Ok(()) => Ok(()),
            Err(err)
                if transport == ResolvedTransport::StreamableHttp
                    && config.protocol == ProtocolKind::Auto
                    && matches!(err.kind(), ErrorKind::Transport | ErrorKind::ProtocolInit) =>
            {
                debug!(
                    "streamable-http handshake with `{}` failed ({err}); retrying over SSE",
                    self.name
                );
                self.establish_over(config, ResolvedTransport::Sse).await
            }
            Err(err) => Err(err),
        }
    }

    async fn establish_over(
        self: &Arc<Self>,
        config: &ServerConfig,
        transport: ResolvedTransport,
    ) -> Result<(), ProxyError> {
        let client =
            Arc::new(build_client(config, transport, self.token_store.as_ref()).await?);

        let params = InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "mcpproxy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        };
        let init = client
            .initialize(params, Some(self.settings.connect_timeout))
            .await;
        let init = match init {
            Ok(init) => init,
            Err(err) => {
                client.disconnect().await;
                return Err(err);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = self.client.lock().await;
            *guard = Some(Arc::clone(&client));
        }

        let server_version = Some(init.server_info.version.clone());
        self.set_state(ConnectionState::Ready, |mcinfo| {
            mcinfo.connected_at = Some(Utc::now());
            mcinfo.last_error = None;
            mcinfo.retry_count = 0;
            mcinfo.server_version = Some(init.server_info.version.clone());
            mcinfo.protocol_version = Some(init.protocol_version.clone());
        })?;
        {
            let mut retry = self
                .retry
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            retry.reset();
        }
        {
            let mut next = self
                .next_retry_at
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *next = None;
        }

        self.bus.publish(Event::now(
            self.name.clone(),
            EventPayload::ConnectionEstablished { server_version },
        ));
        info!("connected to MCP server `{}`", self.name);

        // Watch for unexpected transport closure.
        let closed = client.closed();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            closed.cancelled().await;
            if let Some(this) = weak.upgrade() {
                this.on_transport_closed(generation).await;
            }
        });

        Ok(())
    }

    fn fail_with(&self, err: ProxyError) -> Result<(), ProxyError> {
        let delay = {
            let mut retry = self
                .retry
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            retry.next_delay()
        };
        {
            let mut next = self
                .next_retry_at
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *next = Some(Instant::now() + delay);
        }
        let summary = err.summary();
        let set = self.set_state(ConnectionState::Error, |mcinfo| {
            mcinfo.last_error = Some(summary);
            mcinfo.retry_count = mcinfo.retry_count.saturating_add(1);
        });
        if let Err(transition_err) = set {
            warn!("failed to record error state for `{}`: {transition_err}", self.name);
        }
        warn!("connect to `{}` failed: {err}", self.name);
        Err(err)
    }

    async fn try_silent_refresh(&self, config: &ServerConfig) -> Result<(), ProxyError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ProxyError::auth_required("server has no url"))?;
        let token = self
            .token_store
            .get_token(&self.name, url)
            .await
            .map_err(|err| ProxyError::internal(format!("token store read failed: {err:#}")))?
            .ok_or_else(|| {
                ProxyError::auth_required("no stored token; waiting for out-of-band login")
            })?;
        let refreshed = refresh_access_token(&token).await?;
        self.token_store
            .save_token(&self.name, url, &refreshed)
            .await
            .map_err(|err| ProxyError::internal(format!("token store write failed: {err:#}")))?;
        Ok(())
    }

    async fn on_transport_closed(self: &Arc<Self>, generation: u64) {
        let _op = self.op_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            // A newer session or a deliberate disconnect superseded us.
            return;
        }
        if self.state() != ConnectionState::Ready {
            return;
        }
        {
            let mut guard = self.client.lock().await;
            *guard = None;
        }
        let err = ProxyError::transport("transport closed by remote");
        let summary = err.summary();
        let _ = self.set_state(ConnectionState::Error, |mcinfo| {
            mcinfo.last_error = Some(summary.clone());
            mcinfo.connected_at = None;
        });
        self.bus.publish(Event::now(
            self.name.clone(),
            EventPayload::ConnectionLost {
                reason: Some(summary),
            },
        ));
    }

    /// Disconnect if connected. Idempotent; never fails.
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;
        self.disconnect_locked().await;
    }

    async fn disconnect_locked(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let client = {
            let mut guard = self.client.lock().await;
            guard.take()
        };
        let was_ready = self.state() == ConnectionState::Ready;
        if let Some(client) = client {
            client.disconnect().await;
        }
        if self.state() != ConnectionState::Disconnected {
            let _ = self.set_state(ConnectionState::Disconnected, |mcinfo| {
                mcinfo.connected_at = None;
                mcinfo.server_version = None;
                mcinfo.protocol_version = None;
            });
            if was_ready {
                self.bus.publish(Event::now(
                    self.name.clone(),
                    EventPayload::ConnectionLost { reason: None },
                ));
            }
        }
    }

    /// List the upstream's tools as proxy metadata records.
    pub async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ProxyError> {
        let client = self.current_client().await?;
        let result = client
            .list_tools(None, Some(self.settings.tool_call_timeout))
            .await?;
        Ok(result
            .tools
            .into_iter()
            .map(|tool| ToolMetadata {
                server_name: self.name.clone(),
                tool_name: tool.name,
                description: tool.description.unwrap_or_default(),
                params_schema: tool.input_schema,
            })
            .collect())
    }

    /// Invoke one tool, lazily connecting first when policy allows it.
    pub async fn call_tool(
        self: &Arc<Self>,
        tool: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, ProxyError> {
        if !self.is_ready() {
            self.lazy_connect().await?;
        }
        let client = self.current_client().await?;

        let started = Instant::now();
        let result = client
            .call_tool(
                tool.to_string(),
                arguments,
                Some(self.settings.tool_call_timeout),
            )
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.bus.publish(Event::now(
            self.name.clone(),
            EventPayload::ToolCalled {
                tool: tool.to_string(),
                duration_ms,
                is_error: match &result {
                    Ok(call) => call.is_error.unwrap_or(false),
                    Err(_) => true,
                },
            },
        ));
        result
    }

    async fn lazy_connect(self: &Arc<Self>) -> Result<(), ProxyError> {
        let config = self.config();
        let state = self.state();
        let eligible = self.settings.enable_lazy_loading
            && config.tool_count > 0
            && matches!(
                state,
                ConnectionState::Disconnected
                    | ConnectionState::Error
                    | ConnectionState::Connecting
                    | ConnectionState::Authenticating
            );
        if !eligible {
            return Err(ProxyError::not_connected(format!(
                "server `{}` is not connected (state: {state})",
                self.name
            ))
            .with_server(self.name.clone()));
        }

        debug!("lazy connect to `{}` triggered by tool call", self.name);
        match tokio::time::timeout(self.settings.lazy_connect_wait, self.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(ProxyError::not_connected(format!(
                    "lazy connect to `{}` failed: {err}",
                    self.name
                ))
                .with_server(self.name.clone()));
            }
            Err(_) => {
                return Err(ProxyError::not_connected(format!(
                    "lazy connect to `{}` timed out",
                    self.name
                ))
                .with_server(self.name.clone()));
            }
        }
        if !self.is_ready() {
            return Err(ProxyError::not_connected(format!(
                "server `{}` did not reach ready after lazy connect",
                self.name
            ))
            .with_server(self.name.clone()));
        }
        Ok(())
    }

    /// Run the interactive OAuth flow for this server. Guarded by the same
    /// operation lock as `connect`, so the two can never interleave.
    pub async fn force_oauth_flow(self: &Arc<Self>, force: bool) -> Result<(), ProxyError> {
        let config = self.config();
        let url = config.url.clone().ok_or_else(|| {
            ProxyError::oauth_misconfigured(format!(
                "server `{}` does not use an HTTP transport",
                self.name
            ))
        })?;
        let scopes = config.oauth_scopes.clone().unwrap_or_default();

        let _op = self.op_lock.lock().await;
        if force
            && let Err(err) = self.token_store.delete_token(&self.name, &url).await
        {
            warn!("failed to clear stored token for `{}`: {err:#}", self.name);
        }

        // Walk the DAG when we can; a flow started while Ready refreshes
        // credentials without disturbing the session.
        let entered_from = self.state();
        let walk_states = matches!(
            entered_from,
            ConnectionState::Disconnected | ConnectionState::Error
        );
        if walk_states {
            self.set_state(ConnectionState::Connecting, |_| {})?;
            self.set_state(ConnectionState::Authenticating, |_| {})?;
        }

        let login = mcpproxy_mcp_client::oauth::perform_oauth_login(
            &self.name,
            &url,
            &scopes,
            self.token_store.as_ref(),
            true,
            None,
        )
        .await;

        match login {
            Ok(_token) => {
                if walk_states {
                    // OAuth completed: retry initialize with the fresh token.
                    self.set_state(ConnectionState::Connecting, |_| {})?;
                    let config = self.config();
                    match self.establish(&config).await {
                        Ok(()) => Ok(()),
                        Err(err) => self.fail_with(err),
                    }
                } else {
                    Ok(())
                }
            }
            Err(err) => {
                if walk_states {
                    let summary = err.summary();
                    let _ = self.set_state(ConnectionState::Error, |mcinfo| {
                        mcinfo.last_error = Some(summary);
                        mcinfo.retry_count = mcinfo.retry_count.saturating_add(1);
                    });
                }
                Err(err)
            }
        }
    }

    /// Forget stored OAuth credentials for this server.
    pub async fn clear_oauth_state(&self) -> Result<(), ProxyError> {
        let config = self.config();
        let Some(url) = config.url.as_deref() else {
            return Ok(());
        };
        self.token_store
            .delete_token(&self.name, url)
            .await
            .map_err(|err| ProxyError::internal(format!("failed to delete token: {err:#}")))
    }

    async fn current_client(&self) -> Result<Arc<McpClient>, ProxyError> {
        let guard = self.client.lock().await;
        guard.clone().ok_or_else(|| {
            ProxyError::not_connected(format!("server `{}` is not connected", self.name))
                .with_server(self.name.clone())
        })
    }

    /// Apply one transition, publishing `StateChange` + `ServerStateChanged`
    /// while the info write lock is held so per-client event order matches
    /// transition order. Self-transitions are silent no-ops.
    fn set_state(
        &self,
        next: ConnectionState,
        mutate: impl FnOnce(&mut ConnectionInfo),
    ) -> Result<(), ProxyError> {
        let mut guard = self
            .info
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let old = guard.state;
        if old == next {
            return Ok(());
        }
        if !old.can_transition_to(next) {
            return Err(ProxyError::internal(format!(
                "invalid transition {old} -> {next} for server `{}`",
                self.name
            )));
        }
        guard.state = next;
        mutate(&mut guard);
        let info = guard.clone();
        self.bus.publish(Event::now(
            self.name.clone(),
            EventPayload::StateChange {
                old,
                new: next,
                info,
            },
        ));
        self.bus.publish(Event::now(
            self.name.clone(),
            EventPayload::ServerStateChanged { state: next },
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpproxy_protocol::EventKind;
    use mcpproxy_protocol::oauth::OAuthToken;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::collections::HashSet;

    struct NullTokenStore;

    #[async_trait::async_trait]
    impl TokenStore for NullTokenStore {
        async fn get_token(
            &self,
            _server: &str,
            _url: &str,
        ) -> anyhow::Result<Option<OAuthToken>> {
            Ok(None)
        }

        async fn save_token(
            &self,
            _server: &str,
            _url: &str,
            _token: &OAuthToken,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn delete_token(&self, _server: &str, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn client_for(config: ServerConfig, bus: EventBus) -> Arc<ManagedClient> {
        ManagedClient::new(
            config,
            bus,
            Arc::new(NullTokenStore),
            ClientSettings {
                connect_timeout: Duration::from_secs(5),
                ..ClientSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn spawn_failure_walks_connecting_then_error() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(HashSet::from([EventKind::StateChange])));
        let client = client_for(
            ServerConfig::stdio("ghost", "/nonexistent/mcpproxy-missing", vec![]),
            bus,
        );

        let err = client.connect().await.expect_err("spawn must fail");
        assert_eq!(err.kind(), ErrorKind::Transport);

        let first = sub.recv().await.expect("first transition");
        match first.payload {
            EventPayload::StateChange { old, new, .. } => {
                assert_eq!(old, ConnectionState::Disconnected);
                assert_eq!(new, ConnectionState::Connecting);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        let second = sub.recv().await.expect("second transition");
        match second.payload {
            EventPayload::StateChange { old, new, info } => {
                assert_eq!(old, ConnectionState::Connecting);
                assert_eq!(new, ConnectionState::Error);
                assert_eq!(info.retry_count, 1);
                assert_eq!(
                    info.last_error.map(|summary| summary.kind),
                    Some(ErrorKind::Transport)
                );
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_servers_refuse_to_connect() {
        let mut config = ServerConfig::stdio("calc", "echo", vec![]);
        config.enabled = false;
        let client = client_for(config, EventBus::new());
        let err = client.connect().await.expect_err("must refuse");
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn quarantined_servers_refuse_to_connect() {
        let mut config = ServerConfig::stdio("calc", "echo", vec![]);
        config.quarantined = true;
        let client = client_for(config, EventBus::new());
        let err = client.connect().await.expect_err("must refuse");
        assert_eq!(err.kind(), ErrorKind::Quarantined);
    }

    #[tokio::test]
    async fn disconnect_from_disconnected_is_a_silent_noop() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        let client = client_for(ServerConfig::stdio("calc", "echo", vec![]), bus);
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn lazy_connect_requires_cached_tools() {
        let client = client_for(ServerConfig::stdio("calc", "echo", vec![]), EventBus::new());
        // tool_count == 0: the call must fail fast with NotConnected.
        let err = client
            .call_tool("add", None)
            .await
            .expect_err("must not lazily connect");
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn hot_swap_keeps_disconnected_state_quiet() {
        let mut config = ServerConfig::stdio("calc", "echo", vec![]);
        config.env = HashMap::new();
        let client = client_for(config.clone(), EventBus::new());

        let mut runtime_only = config.clone();
        runtime_only.health_check = true;
        assert!(!client.update_config(runtime_only).await);

        let mut transport_change = config;
        transport_change.args = vec!["changed".to_string()];
        assert!(client.update_config(transport_change).await);
    }
}
