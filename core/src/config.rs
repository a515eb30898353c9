//! Configuration types for the proxy and its upstreams.
//!
//! The on-disk file format is owned by an external loader; this module only
//! requires that deserialization delivers a validated [`Config`]. Upstream
//! entries arrive as a map keyed by server name and are validated through
//! [`RawServerConfig`]: a connectable config carries exactly one of `url`
//! or `command`.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;
use serde::de::Error as SerdeError;
use tokio::sync::watch;

pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    Stdio,
    Http,
    StreamableHttp,
    Sse,
    Auto,
}

impl Default for ProtocolKind {
    fn default() -> Self {
        ProtocolKind::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    Active,
    Disabled,
    AutoDisabled,
}

impl Default for StartupMode {
    fn default() -> Self {
        StartupMode::Active
    }
}

/// Static declaration of one upstream server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub protocol: ProtocolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub quarantined: bool,
    #[serde(default)]
    pub startup_mode: StartupMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disable_reason: Option<String>,
    #[serde(default = "default_true")]
    pub start_on_boot: bool,
    #[serde(default)]
    pub health_check: bool,
    /// 0 = no group.
    #[serde(default)]
    pub group_id: u64,
    #[serde(default)]
    pub ever_connected: bool,
    /// Cached count of tools observed on the last successful listing.
    /// Nonzero implies the server was listed at least once.
    #[serde(default)]
    pub tool_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_scopes: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol: ProtocolKind::Stdio,
            url: None,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            working_dir: None,
            headers: HashMap::new(),
            enabled: true,
            quarantined: false,
            startup_mode: StartupMode::Active,
            auto_disable_reason: None,
            start_on_boot: true,
            health_check: false,
            group_id: 0,
            ever_connected: false,
            tool_count: 0,
            oauth_scopes: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: ProtocolKind::StreamableHttp,
            url: Some(url.into()),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            headers: HashMap::new(),
            enabled: true,
            quarantined: false,
            startup_mode: StartupMode::Active,
            auto_disable_reason: None,
            start_on_boot: true,
            health_check: false,
            group_id: 0,
            ever_connected: false,
            tool_count: 0,
            oauth_scopes: None,
        }
    }

    /// A connectable config carries exactly one of `url` / `command`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            bail!("server name must not be empty");
        }
        let has_url = self.url.as_deref().is_some_and(|url| !url.is_empty());
        let has_command = self
            .command
            .as_deref()
            .is_some_and(|command| !command.is_empty());
        match (has_url, has_command) {
            (true, true) => bail!(
                "server `{}` specifies both url and command; exactly one is required",
                self.name
            ),
            (false, false) => bail!(
                "server `{}` specifies neither url nor command; exactly one is required",
                self.name
            ),
            _ => Ok(()),
        }
    }

    /// Whether a replacement config can be hot-swapped onto a live client.
    /// Anything that affects the transport forces a disconnect + recreate.
    pub fn connection_fields_eq(&self, other: &ServerConfig) -> bool {
        self.protocol == other.protocol
            && self.url == other.url
            && self.command == other.command
            && self.args == other.args
            && self.env == other.env
            && self.working_dir == other.working_dir
            && self.headers == other.headers
    }
}

/// Raw deserialization shape for one upstream entry; the map key supplies
/// the name. Kept separate so validation has one home.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServerConfig {
    #[serde(default)]
    pub protocol: Option<ProtocolKind>,
    pub url: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub quarantined: Option<bool>,
    #[serde(default)]
    pub start_on_boot: Option<bool>,
    #[serde(default)]
    pub health_check: Option<bool>,
    #[serde(default)]
    pub oauth_scopes: Option<Vec<String>>,
}

impl ServerConfig {
    pub fn from_raw(name: impl Into<String>, raw: RawServerConfig) -> anyhow::Result<Self> {
        let name = name.into();
        let config = Self {
            name,
            protocol: raw.protocol.unwrap_or_default(),
            url: raw.url,
            command: raw.command,
            args: raw.args.unwrap_or_default(),
            env: raw.env.unwrap_or_default(),
            working_dir: raw.working_dir,
            headers: raw.headers.unwrap_or_default(),
            enabled: raw.enabled.unwrap_or(true),
            quarantined: raw.quarantined.unwrap_or(false),
            startup_mode: StartupMode::Active,
            auto_disable_reason: None,
            start_on_boot: raw.start_on_boot.unwrap_or(true),
            health_check: raw.health_check.unwrap_or(false),
            group_id: 0,
            ever_connected: false,
            tool_count: 0,
            oauth_scopes: raw.oauth_scopes,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,mcpproxy_core=debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Process-wide configuration delivered by the loader.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub max_concurrent_connections: usize,
    pub enable_lazy_loading: bool,
    pub log: LogConfig,
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            enable_lazy_loading: true,
            log: LogConfig::default(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    max_concurrent_connections: Option<usize>,
    enable_lazy_loading: Option<bool>,
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    servers: BTreeMap<String, RawServerConfig>,
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawConfig::deserialize(deserializer)?;
        let mut servers = Vec::with_capacity(raw.servers.len());
        for (name, raw_server) in raw.servers {
            let server =
                ServerConfig::from_raw(name, raw_server).map_err(D::Error::custom)?;
            servers.push(server);
        }
        Ok(Config {
            max_concurrent_connections: raw
                .max_concurrent_connections
                .unwrap_or(DEFAULT_MAX_CONCURRENT_CONNECTIONS),
            enable_lazy_loading: raw.enable_lazy_loading.unwrap_or(true),
            log: raw.log,
            servers,
        })
    }
}

impl Config {
    pub fn parse_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("failed to parse config")
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::parse_toml(&contents)
    }
}

/// Change-notification handle the external file watcher feeds. Components
/// hold the receiving side and see the latest [`Config`] snapshot.
#[derive(Clone)]
pub struct ConfigWatch {
    tx: Arc<watch::Sender<Arc<Config>>>,
}

impl ConfigWatch {
    pub fn new(initial: Config) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, config: Config) {
        let _ = self.tx.send(Arc::new(config));
    }

    pub fn current(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_servers_from_map_keys() {
        let config = Config::parse_toml(
            r#"
max_concurrent_connections = 4

[servers.calc]
protocol = "stdio"
command = "echo"
args = ["hi"]

[servers.jira]
protocol = "streamable-http"
url = "https://jira.example/mcp"
health_check = true
"#,
        )
        .expect("parse");

        assert_eq!(config.max_concurrent_connections, 4);
        assert!(config.enable_lazy_loading);
        assert_eq!(config.servers.len(), 2);

        let calc = &config.servers[0];
        assert_eq!(calc.name, "calc");
        assert_eq!(calc.command.as_deref(), Some("echo"));
        assert_eq!(calc.args, vec!["hi".to_string()]);
        assert!(calc.enabled);
        assert!(!calc.quarantined);

        let jira = &config.servers[1];
        assert_eq!(jira.protocol, ProtocolKind::StreamableHttp);
        assert!(jira.health_check);
    }

    #[test]
    fn rejects_url_and_command_together() {
        let err = Config::parse_toml(
            r#"
[servers.bad]
command = "echo"
url = "https://bad.example"
"#,
        )
        .expect_err("must reject");
        assert!(err.to_string().contains("exactly one is required"));
    }

    #[test]
    fn rejects_neither_url_nor_command() {
        let err = Config::parse_toml("[servers.empty]\n").expect_err("must reject");
        assert!(err.to_string().contains("exactly one is required"));
    }

    #[test]
    fn connection_fields_ignore_runtime_flags() {
        let a = ServerConfig::stdio("calc", "echo", vec!["hi".to_string()]);
        let mut b = a.clone();
        b.enabled = false;
        b.quarantined = true;
        b.tool_count = 7;
        assert!(a.connection_fields_eq(&b));

        b.args = vec!["other".to_string()];
        assert!(!a.connection_fields_eq(&b));
    }

    #[test]
    fn config_watch_delivers_snapshots() {
        let watch = ConfigWatch::new(Config::default());
        let mut rx = watch.subscribe();
        let updated = Config {
            max_concurrent_connections: 3,
            ..Config::default()
        };
        watch.publish(updated);
        assert!(rx.has_changed().expect("watch alive"));
        assert_eq!(watch.current().max_concurrent_connections, 3);
    }
}
