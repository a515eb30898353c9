//! Process-wide registry and scheduler for upstream servers.
//!
//! Owns one [`ManagedClient`] per configured upstream. Startup fans out over
//! a bounded worker pool ordered by connect priority; tool calls route by
//! `server:tool` through the quarantine and lazy-connect gates; two OAuth
//! reactors and a health checker run in the background under one
//! cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use mcpproxy_protocol::ConnectionInfo;
use mcpproxy_protocol::ConnectionState;
use mcpproxy_protocol::Event;
use mcpproxy_protocol::EventPayload;
use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::mcp::CallToolResult;
use mcpproxy_protocol::oauth::TokenStore;
use mcpproxy_protocol::tools::parse_qualified_name;
use mcpproxy_state::StateStore;
use mcpproxy_state::UpstreamRecord;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::app_state::AppStateMachine;
use crate::config::Config;
use crate::config::ServerConfig;
use crate::config::StartupMode;
use crate::event_bus::EventBus;
use crate::managed_client::ClientSettings;
use crate::managed_client::ManagedClient;
use crate::quarantine::ensure_not_quarantined;
use crate::tool_index::RetrievedTool;
use crate::tool_index::ToolIndex;

/// Consecutive failed attempts after which the health checker gives up and
/// auto-disables a server.
const AUTO_DISABLE_RETRY_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_concurrent_connections: usize,
    pub enable_lazy_loading: bool,
    pub connect_timeout: Duration,
    /// Aggregate budget for a manual retry.
    pub manual_retry_budget: Duration,
    pub oauth_reactor_interval: Duration,
    /// Minimum gap between reactor-triggered retries for one server.
    pub token_scan_min_gap: Duration,
    pub health_check_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_connections: 20,
            enable_lazy_loading: true,
            connect_timeout: Duration::from_secs(30),
            manual_retry_budget: Duration::from_secs(120),
            oauth_reactor_interval: Duration::from_secs(5),
            token_scan_min_gap: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_connections: config.max_concurrent_connections.max(1),
            enable_lazy_loading: config.enable_lazy_loading,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub total_servers: usize,
    pub enabled_servers: usize,
    pub quarantined_servers: usize,
    pub connected_servers: usize,
    pub total_tools: usize,
    pub events_dropped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectAllOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Startup priority classes, ascending. Stable within a class.
pub fn connect_priority(config: &ServerConfig, info: &ConnectionInfo) -> u8 {
    if config.ever_connected && config.tool_count > 0 {
        1
    } else if info.last_error.is_some() {
        3
    } else {
        2
    }
}

pub struct UpstreamManager {
    clients: StdRwLock<HashMap<String, Arc<ManagedClient>>>,
    bus: EventBus,
    store: StateStore,
    token_store: Arc<dyn TokenStore>,
    index: ToolIndex,
    app: AppStateMachine,
    settings: ManagerSettings,
    cancel: CancellationToken,
    last_triggered_retry: StdMutex<HashMap<String, Instant>>,
}

impl UpstreamManager {
    pub fn new(store: StateStore, bus: EventBus, settings: ManagerSettings) -> Arc<Self> {
        let index = ToolIndex::new(store.clone());
        let app = AppStateMachine::new(bus.clone());
        let token_store: Arc<dyn TokenStore> = Arc::new(store.clone());
        Arc::new(Self {
            clients: StdRwLock::new(HashMap::new()),
            bus,
            store,
            token_store,
            index,
            app,
            settings,
            cancel: CancellationToken::new(),
            last_triggered_retry: StdMutex::new(HashMap::new()),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn app_state(&self) -> &AppStateMachine {
        &self.app
    }

    pub fn tool_index(&self) -> &ToolIndex {
        &self.index
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Load persisted upstreams, rebuild the tool index, and start the
    /// background reactors.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let indexed = self.index.load().await?;
        debug!("tool index rebuilt with {indexed} entries");

        for record in self.store.list_upstreams().await? {
            let UpstreamRecord {
                name,
                config,
                ever_connected,
                tool_count,
                ..
            } = record;
            match serde_json::from_value::<ServerConfig>(config) {
                Ok(mut config) => {
                    config.ever_connected = ever_connected;
                    config.tool_count = tool_count;
                    if let Err(err) = self.install_client(config) {
                        warn!("skipping persisted upstream `{name}`: {err}");
                    }
                }
                Err(err) => warn!("persisted upstream `{name}` did not parse: {err}"),
            }
        }

        self.spawn_background_tasks();
        Ok(())
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.settings.oauth_reactor_interval;
        let arrivals = self.store.token_arrivals();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = arrivals.notified() => {}
                }
                let Some(manager) = weak.upgrade() else { break };
                manager.oauth_reactor_tick().await;
            }
        });

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.settings.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup owns the
            // first connect wave.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = weak.upgrade() else { break };
                manager.health_check_tick().await;
            }
        });
    }

    /// Stop reactors, disconnect everything, and settle the app state.
    pub async fn shutdown(self: &Arc<Self>) {
        if let Err(err) = self.app.transition(mcpproxy_protocol::AppState::Stopping) {
            debug!("shutdown transition: {err}");
        }
        self.cancel.cancel();
        self.disconnect_all().await;
        if let Err(err) = self.app.transition(mcpproxy_protocol::AppState::Stopped) {
            debug!("shutdown transition: {err}");
        }
    }

    fn install_client(&self, config: ServerConfig) -> Result<Arc<ManagedClient>, ProxyError> {
        config
            .validate()
            .map_err(|err| ProxyError::internal(err.to_string()))?;
        let name = config.name.clone();
        let client = ManagedClient::new(
            config,
            self.bus.clone(),
            Arc::clone(&self.token_store),
            ClientSettings {
                connect_timeout: self.settings.connect_timeout,
                enable_lazy_loading: self.settings.enable_lazy_loading,
                ..ClientSettings::default()
            },
        );
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if clients.contains_key(&name) {
            return Err(ProxyError::internal(format!(
                "server `{name}` already exists"
            ))
            .with_hint("use `upstream_servers` with operation `update` to modify it"));
        }
        clients.insert(name, Arc::clone(&client));
        Ok(client)
    }

    /// Register a new upstream and persist it. The config arrives already
    /// validated for the url-xor-command invariant.
    pub async fn add_server_config(&self, config: ServerConfig) -> Result<(), ProxyError> {
        let name = config.name.clone();
        let client = self.install_client(config)?;
        self.persist_upstream(&client).await;
        self.bus
            .publish(Event::now(name, EventPayload::ServerConfigChanged));
        self.update_app_state();
        Ok(())
    }

    /// Remove an upstream: disconnect, drop its index entries and persisted
    /// record. Stored tokens are left untouched unless explicitly cleared.
    pub async fn remove_server(&self, name: &str) -> Result<(), ProxyError> {
        let client = {
            let mut clients = self
                .clients
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            clients.remove(name)
        };
        let Some(client) = client else {
            return Err(
                ProxyError::not_connected(format!("no client found for server `{name}`"))
                    .with_server(name.to_string())
                    .with_hint("use `upstream_servers list` to see configured servers"),
            );
        };
        client.disconnect().await;
        if let Err(err) = self.index.remove_server(name).await {
            warn!("failed to drop index entries for `{name}`: {err:#}");
        }
        if let Err(err) = self.store.delete_upstream(name).await {
            warn!("failed to delete upstream record for `{name}`: {err:#}");
        }
        self.bus.publish(Event::now(
            name.to_string(),
            EventPayload::ServerConfigChanged,
        ));
        self.update_app_state();
        Ok(())
    }

    pub fn get_client(&self, name: &str) -> Option<Arc<ManagedClient>> {
        let clients = self
            .clients
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        clients.get(name).cloned()
    }

    fn clients_snapshot(&self) -> Vec<Arc<ManagedClient>> {
        let clients = self
            .clients
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        clients.values().cloned().collect()
    }

    pub fn list_servers(&self) -> Vec<(Arc<ServerConfig>, ConnectionInfo)> {
        let mut servers: Vec<(Arc<ServerConfig>, ConnectionInfo)> = self
            .clients_snapshot()
            .into_iter()
            .map(|client| (client.config(), client.snapshot()))
            .collect();
        servers.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        servers
    }

    /// Connect every eligible upstream through a bounded worker pool, in
    /// priority order. Individual failures never abort the batch.
    pub async fn connect_all(self: &Arc<Self>) -> ConnectAllOutcome {
        let mut eligible: Vec<(u8, usize, Arc<ManagedClient>)> = Vec::new();
        for (position, client) in self.clients_snapshot().into_iter().enumerate() {
            let config = client.config();
            let startable = config.enabled
                && !config.quarantined
                && (config.start_on_boot
                    || config.tool_count == 0
                    || !self.settings.enable_lazy_loading);
            if !startable {
                continue;
            }
            let info = client.snapshot();
            eligible.push((connect_priority(&config, &info), position, client));
        }
        if eligible.is_empty() {
            debug!("connect_all: no eligible servers");
            self.update_app_state();
            return ConnectAllOutcome::default();
        }
        // Stable within equal priority classes.
        eligible.sort_by_key(|(priority, position, _)| (*priority, *position));

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_connections));
        let mut join_set = JoinSet::new();
        let attempted = eligible.len();
        for (_, _, client) in eligible {
            // Acquire before spawning so workers are issued in priority
            // order and at most `max_concurrent_connections` run at once.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let manager = Arc::clone(self);
            join_set.spawn(async move {
                let _permit = permit;
                let name = client.name().to_string();
                match manager.connect_and_discover(&client).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("startup connect to `{name}` failed: {err}");
                        false
                    }
                }
            });
        }

        let mut succeeded = 0;
        while let Some(join_result) = join_set.join_next().await {
            match join_result {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(err) => warn!("connect worker panicked: {err}"),
            }
        }
        let outcome = ConnectAllOutcome {
            attempted,
            succeeded,
            failed: attempted - succeeded,
        };
        info!(
            "connect_all finished: {}/{} servers connected",
            outcome.succeeded, outcome.attempted
        );
        self.update_app_state();
        outcome
    }

    pub async fn disconnect_all(&self) {
        for client in self.clients_snapshot() {
            client.disconnect().await;
        }
        self.update_app_state();
    }

    async fn connect_and_discover(
        self: &Arc<Self>,
        client: &Arc<ManagedClient>,
    ) -> Result<(), ProxyError> {
        client.connect().await?;
        if let Err(err) = self.discover_server_tools(client).await {
            warn!(
                "connected to `{}` but tool discovery failed: {err}",
                client.name()
            );
        }
        self.update_app_state();
        Ok(())
    }

    /// Refresh the tool index for one connected server. Publishes
    /// `ToolsUpdated` only when the indexed set actually changed.
    pub async fn discover_server_tools(
        &self,
        client: &Arc<ManagedClient>,
    ) -> Result<usize, ProxyError> {
        let tools = client.list_tools().await?;
        let tool_count = tools.len();
        let changed = self
            .index
            .update_server_tools(client.name(), tools)
            .await
            .map_err(|err| ProxyError::internal(format!("index update failed: {err:#}")))?;
        client.record_listing(tool_count as u64);
        self.persist_upstream(client).await;
        if changed {
            self.bus.publish(Event::now(
                client.name().to_string(),
                EventPayload::ToolsUpdated { tool_count },
            ));
        }
        Ok(tool_count)
    }

    /// Refresh every connected server's tools.
    pub async fn discover_tools(self: &Arc<Self>) -> usize {
        let mut total = 0;
        for client in self.clients_snapshot() {
            if !client.is_ready() {
                continue;
            }
            match self.discover_server_tools(&client).await {
                Ok(count) => total += count,
                Err(err) => warn!("tool discovery for `{}` failed: {err}", client.name()),
            }
        }
        total
    }

    /// Route a downstream `server:tool` invocation to its upstream.
    pub async fn call_tool(
        &self,
        qualified_name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, ProxyError> {
        let Some((server, tool)) = parse_qualified_name(qualified_name) else {
            return Err(ProxyError::internal(format!(
                "invalid tool name `{qualified_name}`: expected `server:tool`"
            ))
            .with_hint("use `retrieve_tools` to discover fully qualified tool names"));
        };
        let Some(client) = self.get_client(server) else {
            return Err(
                ProxyError::not_connected(format!("no client found for server `{server}`"))
                    .with_server(server.to_string())
                    .with_tool(tool.to_string())
                    .with_hint("use `upstream_servers list` to see configured servers"),
            );
        };

        let config = client.config();
        if !config.enabled {
            return Err(
                ProxyError::not_connected(format!("server `{server}` is disabled"))
                    .with_server(server.to_string())
                    .with_tool(tool.to_string())
                    .with_hint("enable it via `upstream_servers` operation `enable`"),
            );
        }
        ensure_not_quarantined(&config).map_err(|err| err.with_tool(tool.to_string()))?;

        client.call_tool(tool, arguments).await.map_err(|err| {
            let already_enriched = err.server().is_some() && err.tool().is_some();
            if already_enriched {
                err
            } else {
                err.with_server(server.to_string())
                    .with_tool(tool.to_string())
            }
        })
    }

    /// Ranked tool retrieval with live quarantine markers.
    pub fn retrieve_tools(&self, query: &str, limit: usize) -> Vec<RetrievedTool> {
        self.index.search(query, limit, &|server| {
            self.get_client(server)
                .map(|client| client.config().quarantined)
                .unwrap_or(false)
        })
    }

    /// Event-driven retry trigger: token arrival, health check, or manual.
    /// Short-circuits when the client is already connected or connecting.
    pub async fn retry_connection(self: &Arc<Self>, name: &str) -> Result<(), ProxyError> {
        let Some(client) = self.get_client(name) else {
            return Err(
                ProxyError::not_connected(format!("no client found for server `{name}`"))
                    .with_server(name.to_string()),
            );
        };
        let state = client.state();
        if state.is_connected() || state.is_connecting() {
            return Ok(());
        }
        self.note_retry_trigger(name);
        let result = tokio::time::timeout(
            self.settings.manual_retry_budget,
            self.connect_and_discover(&client),
        )
        .await;
        match result {
            Ok(inner) => inner,
            Err(_) => Err(ProxyError::timeout(format!(
                "retry budget exhausted for `{name}`"
            ))
            .with_server(name.to_string())),
        }
    }

    /// Kick off the interactive OAuth flow for one server, then reconcile.
    pub async fn start_manual_oauth(
        self: &Arc<Self>,
        name: &str,
        force: bool,
    ) -> Result<(), ProxyError> {
        let Some(client) = self.get_client(name) else {
            return Err(
                ProxyError::not_connected(format!("no client found for server `{name}`"))
                    .with_server(name.to_string()),
            );
        };
        client.force_oauth_flow(force).await?;
        if let Err(err) = self.store.append_oauth_completion(name).await {
            warn!("failed to record OAuth completion for `{name}`: {err:#}");
        }
        self.update_app_state();
        Ok(())
    }

    pub fn get_stats(&self) -> ManagerStats {
        let servers = self.list_servers();
        let connected = servers
            .iter()
            .filter(|(_, info)| info.state == ConnectionState::Ready)
            .count();
        ManagerStats {
            total_servers: servers.len(),
            enabled_servers: servers.iter().filter(|(cfg, _)| cfg.enabled).count(),
            quarantined_servers: servers.iter().filter(|(cfg, _)| cfg.quarantined).count(),
            connected_servers: connected,
            total_tools: self.index.total_tools(),
            events_dropped: self.bus.dropped_total(),
        }
    }

    /// Whether any upstream is launched through docker; operators use this
    /// to sequence shutdown with container teardown.
    pub fn has_docker_containers(&self) -> bool {
        self.clients_snapshot().iter().any(|client| {
            let config = client.config();
            config.command.as_deref() == Some("docker")
                || config.args.iter().any(|arg| arg == "docker")
        })
    }

    /// Replace one server's config, reconnecting when transport fields
    /// changed and the server remains startable.
    pub async fn update_server_config(
        self: &Arc<Self>,
        config: ServerConfig,
    ) -> Result<(), ProxyError> {
        let Some(client) = self.get_client(&config.name) else {
            return Err(ProxyError::not_connected(format!(
                "no client found for server `{}`",
                config.name
            ))
            .with_server(config.name));
        };
        config
            .validate()
            .map_err(|err| ProxyError::internal(err.to_string()))?;
        let needs_reconnect = client.update_config(config).await;
        self.persist_upstream(&client).await;
        let config = client.config();
        if needs_reconnect && config.enabled && !config.quarantined {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = manager.connect_and_discover(&client).await {
                    warn!("reconnect after config update failed: {err}");
                }
            });
        }
        self.update_app_state();
        Ok(())
    }

    pub async fn set_enabled(self: &Arc<Self>, name: &str, enabled: bool) -> Result<(), ProxyError> {
        let client = self.get_client(name).ok_or_else(|| {
            ProxyError::not_connected(format!("no client found for server `{name}`"))
                .with_server(name.to_string())
        })?;
        let mut config = (*client.config()).clone();
        if config.enabled == enabled {
            return Ok(());
        }
        config.enabled = enabled;
        if enabled {
            config.startup_mode = StartupMode::Active;
            config.auto_disable_reason = None;
        } else {
            config.startup_mode = StartupMode::Disabled;
        }
        client.update_config(config).await;
        if !enabled {
            client.disconnect().await;
        } else {
            let manager = Arc::clone(self);
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                if let Err(err) = manager.connect_and_discover(&client).await {
                    warn!("connect after enable failed: {err}");
                }
            });
        }
        self.persist_upstream(&client).await;
        self.update_app_state();
        Ok(())
    }

    pub async fn set_quarantined(
        &self,
        name: &str,
        quarantined: bool,
    ) -> Result<(), ProxyError> {
        let client = self.get_client(name).ok_or_else(|| {
            ProxyError::not_connected(format!("no client found for server `{name}`"))
                .with_server(name.to_string())
        })?;
        let mut config = (*client.config()).clone();
        if config.quarantined == quarantined {
            return Ok(());
        }
        config.quarantined = quarantined;
        client.update_config(config).await;
        if quarantined {
            client.disconnect().await;
        }
        self.persist_upstream(&client).await;
        self.update_app_state();
        Ok(())
    }

    pub async fn assign_group(&self, name: &str, group_id: u64) -> Result<(), ProxyError> {
        let client = self.get_client(name).ok_or_else(|| {
            ProxyError::not_connected(format!("no client found for server `{name}`"))
                .with_server(name.to_string())
        })?;
        let mut config = (*client.config()).clone();
        if config.group_id == group_id {
            return Ok(());
        }
        config.group_id = group_id;
        client.update_config(config).await;
        self.persist_upstream(&client).await;
        self.bus.publish(Event::now(
            name.to_string(),
            EventPayload::ServerGroupUpdated { group_id },
        ));
        Ok(())
    }

    /// Take a persistently failing server out of rotation.
    pub async fn auto_disable(&self, name: &str, reason: &str) -> Result<(), ProxyError> {
        let client = self.get_client(name).ok_or_else(|| {
            ProxyError::not_connected(format!("no client found for server `{name}`"))
                .with_server(name.to_string())
        })?;
        let mut config = (*client.config()).clone();
        config.enabled = false;
        config.startup_mode = StartupMode::AutoDisabled;
        config.auto_disable_reason = Some(reason.to_string());
        client.update_config(config).await;
        client.disconnect().await;
        self.persist_upstream(&client).await;
        self.bus.publish(Event::now(
            name.to_string(),
            EventPayload::ServerAutoDisabled {
                reason: reason.to_string(),
            },
        ));
        self.update_app_state();
        Ok(())
    }

    async fn persist_upstream(&self, client: &Arc<ManagedClient>) {
        let config = client.config();
        let record = match serde_json::to_value(&*config) {
            Ok(value) => UpstreamRecord {
                name: config.name.clone(),
                config: value,
                ever_connected: config.ever_connected,
                tool_count: config.tool_count,
                updated_at: Utc::now(),
            },
            Err(err) => {
                warn!("failed to serialize config for `{}`: {err}", config.name);
                return;
            }
        };
        if let Err(err) = self.store.put_upstream(&record).await {
            warn!("failed to persist upstream `{}`: {err:#}", config.name);
        }
    }

    /// Recompute the app-level aggregate from enabled, non-quarantined
    /// clients.
    pub fn update_app_state(&self) {
        let states: Vec<ConnectionState> = self
            .clients_snapshot()
            .into_iter()
            .filter(|client| {
                let config = client.config();
                config.enabled && !config.quarantined
            })
            .map(|client| client.state())
            .collect();
        if let Err(err) = self.app.update_state(&states) {
            warn!("app state aggregation failed: {err}");
        }
    }

    fn note_retry_trigger(&self, name: &str) {
        let mut guard = self
            .last_triggered_retry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(name.to_string(), Instant::now());
    }

    fn retry_gap_elapsed(&self, name: &str) -> bool {
        let guard = self
            .last_triggered_retry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .get(name)
            .is_none_or(|last| last.elapsed() >= self.settings.token_scan_min_gap)
    }

    /// One pass of the OAuth completion reactor: drain persisted completion
    /// events, then scan for Error clients whose token has appeared in the
    /// store (guards against completions that never produced an event).
    async fn oauth_reactor_tick(self: &Arc<Self>) {
        match self.store.take_unprocessed_oauth_events().await {
            Ok(events) => {
                for event in events {
                    let Some(client) = self.get_client(&event.server_name) else {
                        continue;
                    };
                    let state = client.state();
                    if state.is_connected() || state.is_connecting() {
                        continue;
                    }
                    info!(
                        "OAuth completion for `{}` observed; retrying connection",
                        event.server_name
                    );
                    self.spawn_retry(event.server_name);
                }
            }
            Err(err) => warn!("failed to drain OAuth completion events: {err:#}"),
        }

        for client in self.clients_snapshot() {
            if client.state() != ConnectionState::Error {
                continue;
            }
            let config = client.config();
            let Some(url) = config.url.clone() else {
                continue;
            };
            if !self.retry_gap_elapsed(client.name()) {
                continue;
            }
            match self.token_store.get_token(client.name(), &url).await {
                Ok(Some(_)) => {
                    info!(
                        "stored token found for errored server `{}`; retrying connection",
                        client.name()
                    );
                    self.spawn_retry(client.name().to_string());
                }
                Ok(None) => {}
                Err(err) => warn!(
                    "token scan failed for `{}`: {err:#}",
                    client.name()
                ),
            }
        }
    }

    fn spawn_retry(self: &Arc<Self>, name: String) {
        self.note_retry_trigger(&name);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = manager.retry_connection(&name).await {
                debug!("reactor retry for `{name}` failed: {err}");
            }
        });
    }

    /// One pass of the health checker: bounded reconnects for health-checked
    /// servers that are down, auto-disable after too many failures.
    async fn health_check_tick(self: &Arc<Self>) {
        for client in self.clients_snapshot() {
            let config = client.config();
            if !config.health_check || !config.enabled || config.quarantined {
                continue;
            }
            let info = client.snapshot();
            if info.state.is_connected() || info.state.is_connecting() {
                continue;
            }
            if info.retry_count >= AUTO_DISABLE_RETRY_LIMIT {
                warn!(
                    "server `{}` exceeded {AUTO_DISABLE_RETRY_LIMIT} failed attempts; auto-disabling",
                    client.name()
                );
                let reason = format!(
                    "health check gave up after {} failed attempts",
                    info.retry_count
                );
                if let Err(err) = self.auto_disable(client.name(), &reason).await {
                    warn!("auto-disable for `{}` failed: {err}", client.name());
                }
                continue;
            }
            if !client.retry_window_elapsed() {
                continue;
            }
            debug!("health check reconnecting `{}`", client.name());
            self.spawn_retry(client.name().to_string());
        }
    }
}
