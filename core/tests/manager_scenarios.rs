//! End-to-end scenarios against a real stdio upstream (the `test_upstream`
//! binary) driven through the manager.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mcpproxy_core::EventBus;
use mcpproxy_core::ServerConfig;
use mcpproxy_core::UpstreamManager;
use mcpproxy_core::manager::ManagerSettings;
use mcpproxy_protocol::AppState;
use mcpproxy_protocol::ConnectionState;
use mcpproxy_protocol::ErrorKind;
use mcpproxy_protocol::EventKind;
use mcpproxy_protocol::EventPayload;
use mcpproxy_state::StateStore;
use pretty_assertions::assert_eq;
use serde_json::json;

fn upstream_bin() -> String {
    env!("CARGO_BIN_EXE_test_upstream").to_string()
}

fn calc_config(name: &str) -> ServerConfig {
    ServerConfig::stdio(name, upstream_bin(), vec![])
}

fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        connect_timeout: Duration::from_secs(10),
        manual_retry_budget: Duration::from_secs(20),
        ..ManagerSettings::default()
    }
}

async fn manager_with(
    settings: ManagerSettings,
) -> anyhow::Result<(Arc<UpstreamManager>, EventBus)> {
    let store = StateStore::in_memory().await?;
    let bus = EventBus::new();
    let manager = UpstreamManager::new(store, bus.clone(), settings);
    Ok((manager, bus))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_add_list_call() {
    let (manager, _bus) = manager_with(fast_settings()).await.expect("manager");

    manager
        .add_server_config(calc_config("calc"))
        .await
        .expect("add");
    let outcome = manager.connect_all().await;
    assert_eq!(outcome.succeeded, 1);

    let client = manager.get_client("calc").expect("client");
    assert_eq!(client.state(), ConnectionState::Ready);

    let retrieved = manager.retrieve_tools("add", 3);
    assert!(!retrieved.is_empty());
    assert_eq!(retrieved[0].metadata.server_name, "calc");

    let result = manager
        .call_tool("calc:add", Some(json!({"a": 1, "b": 2})))
        .await
        .expect("call");
    assert_eq!(result.structured_content, Some(json!({"sum": 3.0})));

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn quarantine_blocks_execution_but_not_retrieval() {
    let (manager, _bus) = manager_with(fast_settings()).await.expect("manager");
    manager
        .add_server_config(calc_config("calc"))
        .await
        .expect("add");
    manager.connect_all().await;
    assert!(!manager.retrieve_tools("add", 3).is_empty());

    manager
        .set_quarantined("calc", true)
        .await
        .expect("quarantine");

    let err = manager
        .call_tool("calc:add", Some(json!({"a": 1, "b": 2})))
        .await
        .expect_err("quarantined servers must not execute");
    assert_eq!(err.kind(), ErrorKind::Quarantined);

    let retrieved = manager.retrieve_tools("add", 3);
    assert!(!retrieved.is_empty());
    assert!(retrieved[0].quarantined);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lazy_connect_transparently_serves_the_call() {
    let (manager, _bus) = manager_with(fast_settings()).await.expect("manager");

    let mut config = calc_config("archon");
    config.start_on_boot = false;
    config.ever_connected = true;
    config.tool_count = 12;
    manager.add_server_config(config).await.expect("add");

    manager.connect_all().await;
    let client = manager.get_client("archon").expect("client");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    let before = manager.get_stats().connected_servers;

    let result = manager
        .call_tool("archon:rag_search", Some(json!({"query": "embeddings"})))
        .await
        .expect("lazy call");
    assert!(!result.content.is_empty());

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(manager.get_stats().connected_servers, before + 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_walks_the_documented_path() {
    let (manager, bus) = manager_with(fast_settings()).await.expect("manager");
    manager
        .add_server_config(calc_config("calc"))
        .await
        .expect("add");
    manager.connect_all().await;
    let client = manager.get_client("calc").expect("client");
    assert_eq!(client.state(), ConnectionState::Ready);

    let mut sub = bus.subscribe(Some(HashSet::from([EventKind::StateChange])));
    client.disconnect().await;
    client.connect().await.expect("reconnect");

    let mut transitions = Vec::new();
    while let Some(event) = sub.try_recv() {
        if let EventPayload::StateChange { old, new, .. } = event.payload {
            transitions.push((old, new));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (ConnectionState::Ready, ConnectionState::Disconnected),
            (ConnectionState::Disconnected, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Ready),
        ]
    );

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_all_honors_priority_order() {
    let settings = ManagerSettings {
        max_concurrent_connections: 1,
        ..fast_settings()
    };
    let (manager, bus) = manager_with(settings).await.expect("manager");

    // C goes in first so map/insert order cannot accidentally produce the
    // expected result.
    manager
        .add_server_config(ServerConfig::stdio(
            "c",
            "/nonexistent/mcpproxy-broken",
            vec![],
        ))
        .await
        .expect("add c");
    let _ = manager.retry_connection("c").await; // leaves `c` in Error
    manager
        .add_server_config(calc_config("b"))
        .await
        .expect("add b");
    let mut a = calc_config("a");
    a.ever_connected = true;
    a.tool_count = 5;
    manager.add_server_config(a).await.expect("add a");

    let mut sub = bus.subscribe(Some(HashSet::from([EventKind::StateChange])));
    manager.connect_all().await;

    let mut connecting_order = Vec::new();
    while let Some(event) = sub.try_recv() {
        if let EventPayload::StateChange { new, .. } = &event.payload
            && *new == ConnectionState::Connecting
        {
            connecting_order.push(event.server_name.clone());
        }
    }
    assert_eq!(
        connecting_order,
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn app_state_reflects_partial_and_full_health() {
    let (manager, bus) = manager_with(fast_settings()).await.expect("manager");
    manager
        .add_server_config(calc_config("good"))
        .await
        .expect("add good");
    manager
        .add_server_config(ServerConfig::stdio(
            "bad",
            "/nonexistent/mcpproxy-broken",
            vec![],
        ))
        .await
        .expect("add bad");

    let mut sub = bus.subscribe(Some(HashSet::from([EventKind::AppStateChange])));
    manager.connect_all().await;
    assert_eq!(manager.app_state().current(), AppState::Degraded);

    // Point the failing server at a working upstream; once it comes back
    // the aggregate must move Degraded -> Running.
    manager
        .update_server_config(calc_config("bad"))
        .await
        .expect("update");

    let mut saw_recovery = false;
    for _ in 0..100 {
        if manager.app_state().current() == AppState::Running {
            saw_recovery = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(saw_recovery, "app never recovered to Running");

    let mut observed = Vec::new();
    while let Some(event) = sub.try_recv() {
        if let EventPayload::AppStateChange { old, new } = event.payload {
            observed.push((old, new));
        }
    }
    assert!(
        observed.contains(&(AppState::Degraded, AppState::Running)),
        "missing Degraded -> Running transition; saw {observed:?}"
    );

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_arrival_triggers_a_retry_for_errored_servers() {
    let settings = ManagerSettings {
        connect_timeout: Duration::from_secs(2),
        manual_retry_budget: Duration::from_secs(5),
        oauth_reactor_interval: Duration::from_millis(200),
        token_scan_min_gap: Duration::from_millis(0),
        ..ManagerSettings::default()
    };
    let (manager, bus) = manager_with(settings).await.expect("manager");
    manager.start().await.expect("start");

    // Nothing listens on this port, so connect parks the client in Error.
    manager
        .add_server_config(ServerConfig::http("jira", "http://127.0.0.1:9/mcp"))
        .await
        .expect("add");
    let _ = manager.retry_connection("jira").await;
    let client = manager.get_client("jira").expect("client");
    assert_eq!(client.state(), ConnectionState::Error);

    let mut sub = bus.subscribe(Some(HashSet::from([EventKind::StateChange])));

    use mcpproxy_protocol::oauth::OAuthToken;
    use mcpproxy_protocol::oauth::TokenStore;
    manager
        .store()
        .save_token(
            "jira",
            "http://127.0.0.1:9/mcp",
            &OAuthToken {
                access_token: "fresh".to_string(),
                refresh_token: None,
                expires_at: None,
                scopes: vec![],
                client_id: "cid".to_string(),
                token_endpoint: None,
            },
        )
        .await
        .expect("save token");

    // The token scanner must fire a retry (Error -> Connecting) well within
    // the 10 s contract; the test uses a tighter reactor interval.
    let mut saw_retry = false;
    for _ in 0..100 {
        while let Some(event) = sub.try_recv() {
            if let EventPayload::StateChange { old, new, .. } = event.payload
                && old == ConnectionState::Error
                && new == ConnectionState::Connecting
            {
                saw_retry = true;
            }
        }
        if saw_retry {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(saw_retry, "token arrival never triggered a retry");

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persisted_upstreams_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("proxy.sqlite");

    {
        let store = StateStore::open(&db_path).await.expect("open");
        let manager =
            UpstreamManager::new(store, EventBus::new(), fast_settings());
        manager
            .add_server_config(calc_config("calc"))
            .await
            .expect("add");
        manager.connect_all().await;
        assert_eq!(manager.get_stats().total_tools, 2);
        manager.shutdown().await;
    }

    let store = StateStore::open(&db_path).await.expect("reopen");
    let manager = UpstreamManager::new(store, EventBus::new(), fast_settings());
    manager.start().await.expect("start");

    let client = manager.get_client("calc").expect("restored client");
    let config = client.config();
    assert!(config.ever_connected);
    assert_eq!(config.tool_count, 2);
    // The index rebuilt from persistence without any connection.
    assert!(!manager.retrieve_tools("add", 3).is_empty());

    manager.shutdown().await;
}
