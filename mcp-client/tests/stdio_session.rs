use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

use mcpproxy_mcp_client::McpClient;
use mcpproxy_protocol::ErrorKind;
use mcpproxy_protocol::mcp::ClientCapabilities;
use mcpproxy_protocol::mcp::Implementation;
use mcpproxy_protocol::mcp::InitializeRequestParams;
use mcpproxy_protocol::mcp::MCP_PROTOCOL_VERSION;
use pretty_assertions::assert_eq;
use serde_json::json;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn initialize_params() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "mcpproxy-tests".to_string(),
            version: "0.0.0".to_string(),
            title: None,
        },
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
    }
}

async fn spawn_test_server() -> Result<McpClient, mcpproxy_protocol::ProxyError> {
    McpClient::new_stdio_client(
        OsString::from(env!("CARGO_BIN_EXE_test_stdio_server")),
        Vec::new(),
        &HashMap::new(),
        None,
    )
    .await
}

#[tokio::test]
async fn initialize_lists_and_calls_tools() {
    let client = spawn_test_server().await.expect("spawn test server");

    let init = client
        .initialize(initialize_params(), TIMEOUT)
        .await
        .expect("initialize");
    assert_eq!(init.server_info.name, "test_stdio_server");
    assert_eq!(
        client.server_info().map(|info| info.server_info.name),
        Some("test_stdio_server".to_string())
    );

    let tools = client.list_tools(None, TIMEOUT).await.expect("list tools");
    let mut names: Vec<String> = tools.tools.iter().map(|tool| tool.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["add".to_string(), "echo".to_string()]);

    let result = client
        .call_tool("add".to_string(), Some(json!({"a": 1, "b": 2})), TIMEOUT)
        .await
        .expect("call add");
    assert_eq!(result.structured_content, Some(json!({"sum": 3.0})));

    client.disconnect().await;
}

#[tokio::test]
async fn unknown_tool_is_classified() {
    let client = spawn_test_server().await.expect("spawn test server");
    client
        .initialize(initialize_params(), TIMEOUT)
        .await
        .expect("initialize");

    let err = client
        .call_tool("no_such_tool".to_string(), None, TIMEOUT)
        .await
        .expect_err("unknown tool must fail");
    assert_eq!(err.kind(), ErrorKind::ToolNotFound);

    client.disconnect().await;
}

#[tokio::test]
async fn spawn_failure_is_a_transport_error() {
    let err = McpClient::new_stdio_client(
        OsString::from("/nonexistent/mcpproxy-no-such-binary"),
        Vec::new(),
        &HashMap::new(),
        None,
    )
    .await
    .expect_err("spawn must fail");
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn disconnect_fails_in_flight_requests() {
    let client = spawn_test_server().await.expect("spawn test server");
    client
        .initialize(initialize_params(), TIMEOUT)
        .await
        .expect("initialize");

    client.disconnect().await;

    let err = client
        .call_tool("echo".to_string(), Some(json!({"message": "hi"})), TIMEOUT)
        .await
        .expect_err("calls after disconnect must fail");
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn disconnect_kills_child_process_group() {
    use std::path::Path;

    fn process_exists(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn wait_for_pid_file(path: &Path) -> u32 {
        for _ in 0..50 {
            if let Ok(content) = std::fs::read_to_string(path)
                && let Ok(pid) = content.trim().parse::<u32>()
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("timed out waiting for child pid file at {}", path.display());
    }

    let temp_dir = tempfile::tempdir().expect("tempdir");
    let child_pid_file = temp_dir.path().join("child.pid");
    let env = HashMap::from([(
        "CHILD_PID_FILE".to_string(),
        child_pid_file.to_string_lossy().into_owned(),
    )]);

    let client = McpClient::new_stdio_client(
        OsString::from("/bin/sh"),
        vec![
            OsString::from("-c"),
            OsString::from(
                "sleep 300 & child_pid=$!; echo \"$child_pid\" > \"$CHILD_PID_FILE\"; cat >/dev/null",
            ),
        ],
        &env,
        None,
    )
    .await
    .expect("spawn wrapper");

    let grandchild_pid = wait_for_pid_file(&child_pid_file).await;
    assert!(process_exists(grandchild_pid), "grandchild should be alive");

    client.disconnect().await;

    for _ in 0..50 {
        if !process_exists(grandchild_pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("grandchild {grandchild_pid} still running after disconnect");
}
