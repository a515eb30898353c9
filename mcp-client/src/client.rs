//! One MCP session over one transport.
//!
//! The client spawns background reader/writer tasks and pairs JSON-RPC
//! requests with their responses through a pending map keyed by integer
//! request id. Dropping the client (or calling [`McpClient::disconnect`])
//! cancels the tasks and, for stdio transports, signals the child's whole
//! process group so descendants are reaped too.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use mcpproxy_protocol::ErrorKind;
use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::jsonrpc::JSONRPCError;
use mcpproxy_protocol::jsonrpc::JSONRPCErrorError;
use mcpproxy_protocol::jsonrpc::JSONRPCMessage;
use mcpproxy_protocol::jsonrpc::JSONRPCNotification;
use mcpproxy_protocol::jsonrpc::JSONRPCRequest;
use mcpproxy_protocol::jsonrpc::JSONRPCResponse;
use mcpproxy_protocol::jsonrpc::JSONRPC_VERSION;
use mcpproxy_protocol::jsonrpc::METHOD_NOT_FOUND;
use mcpproxy_protocol::jsonrpc::RequestId;
use mcpproxy_protocol::jsonrpc::SEND_FAILURE;
use mcpproxy_protocol::mcp::CallToolRequest;
use mcpproxy_protocol::mcp::CallToolRequestParams;
use mcpproxy_protocol::mcp::CallToolResult;
use mcpproxy_protocol::mcp::InitializeRequest;
use mcpproxy_protocol::mcp::InitializeRequestParams;
use mcpproxy_protocol::mcp::InitializeResult;
use mcpproxy_protocol::mcp::InitializedNotification;
use mcpproxy_protocol::mcp::ListToolsRequest;
use mcpproxy_protocol::mcp::ListToolsRequestParams;
use mcpproxy_protocol::mcp::ListToolsResult;
use mcpproxy_protocol::mcp::ModelContextProtocolNotification;
use mcpproxy_protocol::mcp::ModelContextProtocolRequest;
use reqwest::Url;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::env::create_env_for_mcp_server;

/// Capacity of the bounded channels carrying messages between the client API
/// and the IO tasks.
const CHANNEL_CAPACITY: usize = 128;

/// Grace period between SIGTERM and SIGKILL when tearing a child down.
const CHILD_KILL_GRACE: Duration = Duration::from_secs(2);

type PendingSender = oneshot::Sender<JSONRPCMessage>;
type PendingMap = Arc<Mutex<HashMap<i64, PendingSender>>>;

enum TransportHandle {
    Stdio {
        child: Mutex<Option<Child>>,
        pid: Option<u32>,
    },
    Network,
}

/// A running MCP client instance.
pub struct McpClient {
    transport: TransportHandle,
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,
    pending: PendingMap,
    id_counter: AtomicI64,
    /// Cancelled by `disconnect`; IO tasks select on it.
    shutdown: CancellationToken,
    /// Cancelled by the IO tasks when the transport stops delivering
    /// messages, so owners can observe unexpected closure.
    closed: CancellationToken,
    server_info: StdRwLock<Option<InitializeResult>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient").finish_non_exhaustive()
    }
}

impl McpClient {
    /// Spawn the given command and establish an MCP session over its stdio.
    /// The child gets its own process group so `disconnect` can signal the
    /// whole tree.
    pub async fn new_stdio_client(
        program: OsString,
        args: Vec<OsString>,
        env: &HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> Result<Self, ProxyError> {
        let program_name = program.to_string_lossy().into_owned();

        let mut command = Command::new(&program);
        command
            .args(&args)
            .env_clear()
            .envs(create_env_for_mcp_server(env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Best-effort reaping if the owner drops us without disconnecting.
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|err| {
            ProxyError::transport(format!("failed to spawn `{program_name}`: {err}"))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ProxyError::transport("failed to capture child stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProxyError::transport("failed to capture child stdout".to_string())
        })?;

        if let Some(stderr) = child.stderr.take() {
            let program_name = program_name.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    info!("MCP server stderr ({program_name}): {line}");
                }
            });
        }

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        // Writer task: serialize outgoing messages onto the child's stdin.
        {
            let shutdown = shutdown.clone();
            let mut stdin = stdin;
            tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = outgoing_rx.recv() => match msg {
                            Some(msg) => msg,
                            None => break,
                        },
                    };
                    match serde_json::to_string(&msg) {
                        Ok(json) => {
                            debug!("MCP message to server: {json}");
                            if stdin.write_all(json.as_bytes()).await.is_err()
                                || stdin.write_all(b"\n").await.is_err()
                            {
                                error!("failed to write message to child stdin");
                                break;
                            }
                        }
                        Err(err) => error!("failed to serialize JSON-RPC message: {err}"),
                    }
                }
            });
        }

        // Reader task: line-delimited JSON from the child's stdout.
        {
            let pending = Arc::clone(&pending);
            let shutdown = shutdown.clone();
            let closed = closed.clone();
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                loop {
                    let line = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => line,
                            Ok(None) | Err(_) => break,
                        },
                    };
                    debug!("MCP message from server: {line}");
                    match serde_json::from_str::<JSONRPCMessage>(&line) {
                        Ok(message) => handle_incoming_message(message, &pending).await,
                        Err(err) => {
                            error!("failed to deserialize JSON-RPC message: {err}; line = {line}")
                        }
                    }
                }
                closed.cancel();
                fail_all_pending(&pending, ErrorKind::Transport, "transport closed").await;
            });
        }

        let pid = child.id();
        Ok(Self {
            transport: TransportHandle::Stdio {
                child: Mutex::new(Some(child)),
                pid,
            },
            outgoing_tx,
            pending,
            id_counter: AtomicI64::new(1),
            shutdown,
            closed,
            server_info: StdRwLock::new(None),
        })
    }

    /// Establish an MCP session over the streamable-HTTP transport: every
    /// outgoing message is POSTed, responses stream back as NDJSON.
    pub async fn new_streamable_http_client(
        url: &str,
        bearer_token: Option<String>,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ProxyError> {
        let post_url = Url::parse(url)
            .map_err(|err| ProxyError::transport(format!("invalid HTTP URL `{url}`: {err}")))?;

        let header_map = Arc::new(build_header_map(headers, bearer_token.as_deref())?);
        let client = reqwest::Client::builder().build().map_err(|err| {
            ProxyError::transport(format!("failed to construct HTTP client: {err}"))
        })?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        {
            let client = client.clone();
            let headers = Arc::clone(&header_map);
            let pending = Arc::clone(&pending);
            let shutdown = shutdown.clone();
            let closed = closed.clone();
            let post_url = post_url.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = outgoing_rx.recv() => match msg {
                            Some(msg) => msg,
                            None => break,
                        },
                    };
                    match post_json_message(&client, &post_url, &headers, &message).await {
                        Ok(response) => {
                            if let Err(err) =
                                process_ndjson_stream(response, Arc::clone(&pending)).await
                            {
                                handle_send_failure(
                                    &message,
                                    &pending,
                                    ErrorKind::Transport,
                                    &format!("{err:#}"),
                                )
                                .await;
                            }
                        }
                        Err((kind, text)) => {
                            handle_send_failure(&message, &pending, kind, &text).await;
                        }
                    }
                }
                closed.cancel();
            });
        }

        spawn_http_stream_reader(
            client,
            post_url,
            header_map,
            Arc::clone(&pending),
            shutdown.clone(),
        );

        Ok(Self {
            transport: TransportHandle::Network,
            outgoing_tx,
            pending,
            id_counter: AtomicI64::new(1),
            shutdown,
            closed,
            server_info: StdRwLock::new(None),
        })
    }

    /// Establish an MCP session over an SSE transport: a long-lived GET
    /// stream delivers messages, outgoing messages are POSTed.
    pub async fn new_sse_client(
        stream_url: &str,
        messages_url: Option<&str>,
        bearer_token: Option<String>,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ProxyError> {
        let stream_url = Url::parse(stream_url).map_err(|err| {
            ProxyError::transport(format!("invalid SSE stream URL `{stream_url}`: {err}"))
        })?;
        let post_url = match messages_url {
            Some(url) => Url::parse(url).map_err(|err| {
                ProxyError::transport(format!("invalid SSE messages URL `{url}`: {err}"))
            })?,
            None => stream_url.clone(),
        };

        let header_map = Arc::new(build_header_map(headers, bearer_token.as_deref())?);
        let client = reqwest::Client::builder().build().map_err(|err| {
            ProxyError::transport(format!("failed to construct HTTP client: {err}"))
        })?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        {
            let client = client.clone();
            let headers = Arc::clone(&header_map);
            let pending = Arc::clone(&pending);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = outgoing_rx.recv() => match msg {
                            Some(msg) => msg,
                            None => break,
                        },
                    };
                    if let Err((kind, text)) =
                        post_json_message(&client, &post_url, &headers, &message).await
                    {
                        handle_send_failure(&message, &pending, kind, &text).await;
                    }
                }
            });
        }

        spawn_sse_reader(
            client,
            stream_url,
            header_map,
            Arc::clone(&pending),
            shutdown.clone(),
            closed.clone(),
        );

        Ok(Self {
            transport: TransportHandle::Network,
            outgoing_tx,
            pending,
            id_counter: AtomicI64::new(1),
            shutdown,
            closed,
            server_info: StdRwLock::new(None),
        })
    }

    /// Send an arbitrary MCP request and await the typed result.
    pub async fn send_request<R>(
        &self,
        params: R::Params,
        timeout: Option<Duration>,
    ) -> Result<R::Result, ProxyError>
    where
        R: ModelContextProtocolRequest,
        R::Params: Serialize,
        R::Result: DeserializeOwned,
    {
        if self.shutdown.is_cancelled() {
            return Err(ProxyError::transport("client is disconnected"));
        }
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request_id = RequestId::Integer(id);

        let params_json = serde_json::to_value(&params)
            .map_err(|err| ProxyError::internal(format!("failed to serialize params: {err}")))?;
        let params_field = if params_json.is_null() {
            None
        } else {
            Some(params_json)
        };

        let message = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request_id,
            method: R::METHOD.to_string(),
            params: params_field,
        });

        let (tx, rx) = oneshot::channel();
        // Register before sending so an immediate response cannot be lost.
        {
            let mut guard = self.pending.lock().await;
            guard.insert(id, tx);
        }

        if self.outgoing_tx.send(message).await.is_err() {
            let mut guard = self.pending.lock().await;
            guard.remove(&id);
            return Err(ProxyError::transport("client is disconnected"));
        }

        let msg = match timeout {
            Some(duration) => match time::timeout(duration, rx).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(_)) => {
                    let mut guard = self.pending.lock().await;
                    guard.remove(&id);
                    return Err(ProxyError::transport(
                        "response channel closed before a reply was received",
                    ));
                }
                Err(_) => {
                    let mut guard = self.pending.lock().await;
                    guard.remove(&id);
                    return Err(ProxyError::timeout(format!(
                        "request `{}` timed out after {duration:?}",
                        R::METHOD
                    )));
                }
            },
            None => rx.await.map_err(|_| {
                ProxyError::transport("response channel closed before a reply was received")
            })?,
        };

        match msg {
            JSONRPCMessage::Response(JSONRPCResponse { result, .. }) => {
                serde_json::from_value::<R::Result>(result).map_err(|err| {
                    ProxyError::internal(format!(
                        "failed to decode `{}` result: {err}",
                        R::METHOD
                    ))
                })
            }
            JSONRPCMessage::Error(err) => Err(proxy_error_from_rpc(R::METHOD, err.error)),
            other => Err(ProxyError::internal(format!(
                "unexpected message variant in reply path: {other:?}"
            ))),
        }
    }

    pub async fn send_notification<N>(&self, params: N::Params) -> Result<(), ProxyError>
    where
        N: ModelContextProtocolNotification,
        N::Params: Serialize,
    {
        if self.shutdown.is_cancelled() {
            return Err(ProxyError::transport("client is disconnected"));
        }
        let params_json = serde_json::to_value(&params)
            .map_err(|err| ProxyError::internal(format!("failed to serialize params: {err}")))?;
        let params_field = if params_json.is_null() {
            None
        } else {
            Some(params_json)
        };

        let notification = JSONRPCMessage::Notification(JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: N::METHOD.to_string(),
            params: params_field,
        });
        self.outgoing_tx
            .send(notification)
            .await
            .map_err(|_| ProxyError::transport("client is disconnected"))
    }

    /// Run the MCP initialization handshake: `initialize` followed by the
    /// `notifications/initialized` notification.
    pub async fn initialize(
        &self,
        params: InitializeRequestParams,
        timeout: Option<Duration>,
    ) -> Result<InitializeResult, ProxyError> {
        let result = self
            .send_request::<InitializeRequest>(params, timeout)
            .await
            .map_err(|err| match err.kind() {
                // Decode failures on initialize mean the server is unusable.
                ErrorKind::Internal => ProxyError::protocol_init(err.message().to_string()),
                _ => err,
            })?;
        self.send_notification::<InitializedNotification>(None)
            .await?;
        if let Ok(mut guard) = self.server_info.write() {
            *guard = Some(result.clone());
        }
        Ok(result)
    }

    /// Convenience wrapper around `tools/list`.
    pub async fn list_tools(
        &self,
        params: Option<ListToolsRequestParams>,
        timeout: Option<Duration>,
    ) -> Result<ListToolsResult, ProxyError> {
        self.send_request::<ListToolsRequest>(params, timeout).await
    }

    /// Convenience wrapper around `tools/call`.
    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult, ProxyError> {
        if let Some(arguments) = &arguments
            && !arguments.is_object()
        {
            return Err(ProxyError::internal(format!(
                "MCP tool arguments must be a JSON object, got {arguments}"
            )));
        }
        let params = CallToolRequestParams { name, arguments };
        debug!("MCP tool call: {params:?}");
        self.send_request::<CallToolRequest>(params, timeout).await
    }

    /// The `initialize` result captured from the server, if the handshake
    /// has completed.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Token cancelled when the transport stops delivering messages.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Tear the session down: cancel IO tasks, fail in-flight requests, and
    /// for stdio transports signal the child's process group (SIGTERM, then
    /// SIGKILL after a grace period).
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        fail_all_pending(&self.pending, ErrorKind::Transport, "client is disconnected").await;

        if let TransportHandle::Stdio { child, pid } = &self.transport {
            let mut guard = child.lock().await;
            if let Some(mut child) = guard.take() {
                #[cfg(unix)]
                if let Some(pid) = pid {
                    // The child is its own process group leader, so this
                    // reaches descendants as well.
                    unsafe {
                        libc::killpg(*pid as libc::pid_t, libc::SIGTERM);
                    }
                    if time::timeout(CHILD_KILL_GRACE, child.wait()).await.is_ok() {
                        return;
                    }
                    unsafe {
                        libc::killpg(*pid as libc::pid_t, libc::SIGKILL);
                    }
                }
                #[cfg(not(unix))]
                let _ = pid;
                if let Err(err) = child.kill().await {
                    warn!("failed to kill MCP server child: {err}");
                }
            }
        }
    }

    async fn dispatch_response(resp: JSONRPCResponse, pending: &PendingMap) {
        let id = match resp.id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => {
                // We only generate integer IDs, so there is nothing to match.
                error!("response with string ID - no matching pending request");
                return;
            }
        };

        let tx_opt = {
            let mut guard = pending.lock().await;
            guard.remove(&id)
        };
        if let Some(tx) = tx_opt {
            let _ = tx.send(JSONRPCMessage::Response(resp));
        } else {
            warn!(id, "no pending request found for response");
        }
    }

    async fn dispatch_error(err: JSONRPCError, pending: &PendingMap) {
        let id = match err.id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => return,
        };

        let tx_opt = {
            let mut guard = pending.lock().await;
            guard.remove(&id)
        };
        if let Some(tx) = tx_opt {
            let _ = tx.send(JSONRPCMessage::Error(err));
        }
    }
}

/// Map a JSON-RPC error object back into the shared taxonomy. The writer
/// tasks tag errors they originate with a `kind` in the data payload;
/// everything else is classified from codes and message text.
fn proxy_error_from_rpc(method: &str, err: JSONRPCErrorError) -> ProxyError {
    if let Some(kind) = err
        .data
        .as_ref()
        .and_then(|data| data.get("kind"))
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<ErrorKind>().ok())
    {
        return ProxyError::new(kind, err.message);
    }

    let lowered = err.message.to_ascii_lowercase();
    let kind = if lowered.contains("authorization_required") || lowered.contains("unauthorized") {
        ErrorKind::AuthRequired
    } else if method == CallToolRequest::METHOD
        && (err.code == METHOD_NOT_FOUND
            || lowered.contains("unknown tool")
            || lowered.contains("tool not found"))
    {
        ErrorKind::ToolNotFound
    } else if err.code == SEND_FAILURE {
        ErrorKind::Transport
    } else if method == InitializeRequest::METHOD {
        ErrorKind::ProtocolInit
    } else {
        ErrorKind::Internal
    };
    ProxyError::new(
        kind,
        format!(
            "server returned JSON-RPC error: code = {}, message = {}",
            err.code, err.message
        ),
    )
}

fn classify_http_failure(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }
    match err.status() {
        Some(status) => classify_http_status(status.as_u16()),
        None => ErrorKind::Transport,
    }
}

pub(crate) fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::AuthRequired,
        403 => ErrorKind::InsufficientScope,
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::Transport,
    }
}

fn build_header_map(
    headers: &HashMap<String, String>,
    bearer_token: Option<&str>,
) -> Result<HeaderMap, ProxyError> {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ProxyError::transport(format!("invalid header name: {key}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProxyError::transport(format!("invalid header value for {key}")))?;
        header_map.insert(name, value);
    }
    if let Some(token) = bearer_token
        && !header_map.contains_key(AUTHORIZATION)
    {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ProxyError::transport("invalid bearer token value".to_string()))?;
        header_map.insert(AUTHORIZATION, value);
    }
    Ok(header_map)
}

async fn post_json_message(
    client: &reqwest::Client,
    url: &Url,
    headers: &HeaderMap,
    message: &JSONRPCMessage,
) -> Result<reqwest::Response, (ErrorKind, String)> {
    let mut request = client.post(url.clone());
    if !headers.is_empty() {
        request = request.headers(headers.clone());
    }
    let body = serde_json::to_vec(message)
        .map_err(|err| (ErrorKind::Internal, format!("failed to serialize message: {err}")))?;
    let response = request
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|err| (classify_http_failure(&err), format!("{err:#}")))?;
    response.error_for_status().map_err(|err| {
        let kind = classify_http_failure(&err);
        (kind, format!("{err:#}"))
    })
}

fn spawn_sse_reader(
    client: reqwest::Client,
    stream_url: Url,
    headers: Arc<HeaderMap>,
    pending: PendingMap,
    shutdown: CancellationToken,
    closed: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let mut request = client.get(stream_url.clone());
            if !headers.is_empty() {
                request = request.headers((*headers).clone());
            }
            request = request.header(ACCEPT, "text/event-stream");

            match request.send().await {
                Ok(response) => {
                    if let Err(err) =
                        process_sse_stream(response, Arc::clone(&pending), &shutdown).await
                    {
                        warn!("SSE stream error: {err:#}");
                    }
                }
                Err(err) => warn!("failed to establish SSE stream: {err:#}"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(Duration::from_secs(1)) => {}
            }
        }
        closed.cancel();
    });
}

fn spawn_http_stream_reader(
    client: reqwest::Client,
    stream_url: Url,
    headers: Arc<HeaderMap>,
    pending: PendingMap,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let mut request = client.get(stream_url.clone());
            if !headers.is_empty() {
                request = request.headers((*headers).clone());
            }
            request = request.header(ACCEPT, "application/x-ndjson");

            match request.send().await {
                Ok(response) => {
                    // Many streamable-HTTP servers do not offer a GET stream
                    // at all; stop probing once they say so.
                    let status = response.status().as_u16();
                    if status == 404 || status == 405 {
                        break;
                    }
                    if let Err(err) =
                        process_ndjson_stream(response, Arc::clone(&pending)).await
                    {
                        warn!("HTTP stream error: {err:#}");
                    }
                }
                Err(err) => warn!("failed to establish HTTP stream: {err:#}"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(Duration::from_secs(1)) => {}
            }
        }
    });
}

async fn process_sse_stream(
    response: reqwest::Response,
    pending: PendingMap,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    use eventsource_stream::Eventsource;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("SSE stream returned {status}: {body}");
    }

    let mut events = response.bytes_stream().eventsource();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = events.next() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };
        match event {
            Ok(event) => {
                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JSONRPCMessage>(data) {
                    Ok(message) => handle_incoming_message(message, &pending).await,
                    Err(err) => {
                        warn!("failed to decode SSE payload as JSON-RPC: {err}; payload={data}")
                    }
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn process_ndjson_stream(
    response: reqwest::Response,
    pending: PendingMap,
) -> anyhow::Result<()> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("HTTP stream returned {status}: {body}");
    }

    let mut buffer = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let mut line = buffer.drain(..=pos).collect::<Vec<u8>>();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            let text = String::from_utf8(line)
                .map_err(|err| anyhow::anyhow!("invalid UTF-8 in NDJSON stream: {err}"))?;
            decode_and_dispatch(&text, &pending).await;
        }
    }

    if !buffer.is_empty() {
        let text = String::from_utf8(buffer)
            .map_err(|err| anyhow::anyhow!("invalid UTF-8 in NDJSON tail: {err}"))?;
        if !text.trim().is_empty() {
            decode_and_dispatch(&text, &pending).await;
        }
    }

    Ok(())
}

async fn decode_and_dispatch(text: &str, pending: &PendingMap) {
    match serde_json::from_str::<JSONRPCMessage>(text) {
        Ok(message) => handle_incoming_message(message, pending).await,
        Err(err) => warn!("failed to decode payload as JSON-RPC: {err}; payload={text}"),
    }
}

async fn handle_incoming_message(message: JSONRPCMessage, pending: &PendingMap) {
    match message {
        JSONRPCMessage::Response(resp) => McpClient::dispatch_response(resp, pending).await,
        JSONRPCMessage::Error(err) => McpClient::dispatch_error(err, pending).await,
        JSONRPCMessage::Notification(notification) => {
            info!("<- notification: {}", notification.method);
        }
        JSONRPCMessage::Request(request) => {
            info!("<- server-initiated request ignored: {}", request.method);
        }
    }
}

/// Resolve the pending request a failed send belonged to with a classified
/// error so the caller sees the original failure kind.
async fn handle_send_failure(
    message: &JSONRPCMessage,
    pending: &PendingMap,
    kind: ErrorKind,
    error_text: &str,
) {
    warn!("failed to send MCP message ({kind}): {error_text}");

    let request_id = match message {
        JSONRPCMessage::Request(req) => match &req.id {
            RequestId::Integer(id) => Some(*id),
            RequestId::String(_) => None,
        },
        _ => None,
    };

    if let Some(id) = request_id {
        let mut guard = pending.lock().await;
        if let Some(tx) = guard.remove(&id) {
            let err = JSONRPCError {
                jsonrpc: JSONRPC_VERSION.to_owned(),
                id: RequestId::Integer(id),
                error: JSONRPCErrorError {
                    code: SEND_FAILURE,
                    message: format!("failed to send request: {error_text}"),
                    data: Some(serde_json::json!({ "kind": kind.as_str() })),
                },
            };
            let _ = tx.send(JSONRPCMessage::Error(err));
        }
    }
}

async fn fail_all_pending(pending: &PendingMap, kind: ErrorKind, reason: &str) {
    let drained: Vec<(i64, PendingSender)> = {
        let mut guard = pending.lock().await;
        guard.drain().collect()
    };
    for (id, tx) in drained {
        let err = JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: RequestId::Integer(id),
            error: JSONRPCErrorError {
                code: SEND_FAILURE,
                message: reason.to_string(),
                data: Some(serde_json::json!({ "kind": kind.as_str() })),
            },
        };
        let _ = tx.send(JSONRPCMessage::Error(err));
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let TransportHandle::Stdio { child, .. } = &mut self.transport {
            // kill_on_drop already covers the child itself; try_wait forces
            // an immediate reap if it has already exited.
            if let Ok(mut guard) = child.try_lock()
                && let Some(child) = guard.as_mut()
            {
                let _ = child.try_wait();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn http_statuses_map_to_kinds() {
        assert_eq!(classify_http_status(401), ErrorKind::AuthRequired);
        assert_eq!(classify_http_status(403), ErrorKind::InsufficientScope);
        assert_eq!(classify_http_status(429), ErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), ErrorKind::Transport);
    }

    #[test]
    fn rpc_errors_preserve_tagged_kind() {
        let err = JSONRPCErrorError {
            code: SEND_FAILURE,
            message: "failed to send request: 401".to_string(),
            data: Some(serde_json::json!({ "kind": "auth_required" })),
        };
        let proxied = proxy_error_from_rpc(CallToolRequest::METHOD, err);
        assert_eq!(proxied.kind(), ErrorKind::AuthRequired);
    }

    #[test]
    fn unknown_tool_errors_classify_as_tool_not_found() {
        let err = JSONRPCErrorError {
            code: METHOD_NOT_FOUND,
            message: "unknown tool: frobnicate".to_string(),
            data: None,
        };
        let proxied = proxy_error_from_rpc(CallToolRequest::METHOD, err);
        assert_eq!(proxied.kind(), ErrorKind::ToolNotFound);
    }

    #[test]
    fn initialize_errors_classify_as_protocol_init() {
        let err = JSONRPCErrorError {
            code: -32600,
            message: "unsupported protocol version".to_string(),
            data: None,
        };
        let proxied = proxy_error_from_rpc(InitializeRequest::METHOD, err);
        assert_eq!(proxied.kind(), ErrorKind::ProtocolInit);
    }
}
