//! Dispatch loop for downstream JSON-RPC traffic.

use std::sync::Arc;

use mcpproxy_core::UpstreamManager;
use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::jsonrpc::INVALID_PARAMS;
use mcpproxy_protocol::jsonrpc::INVALID_REQUEST;
use mcpproxy_protocol::jsonrpc::JSONRPCMessage;
use mcpproxy_protocol::jsonrpc::JSONRPCRequest;
use mcpproxy_protocol::jsonrpc::METHOD_NOT_FOUND;
use mcpproxy_protocol::jsonrpc::RequestId;
use mcpproxy_protocol::mcp::CallToolRequestParams;
use mcpproxy_protocol::mcp::CallToolResult;
use mcpproxy_protocol::mcp::Implementation;
use mcpproxy_protocol::mcp::InitializeResult;
use mcpproxy_protocol::mcp::ListToolsResult;
use mcpproxy_protocol::mcp::MCP_PROTOCOL_VERSION;
use mcpproxy_protocol::mcp::ServerCapabilities;
use mcpproxy_protocol::mcp::ToolsCapability;
use mcpproxy_protocol::tools::parse_qualified_name;
use serde_json::Value;
use serde_json::json;
use tracing::info;
use tracing::warn;

use crate::builtin;
use crate::builtin::ToolContext;
use crate::outgoing_message::OutgoingMessageSender;
use crate::script::ScriptSupervisor;

pub(crate) struct MessageProcessor {
    outgoing: Arc<OutgoingMessageSender>,
    initialized: bool,
    ctx: ToolContext,
}

impl MessageProcessor {
    pub(crate) fn new(
        outgoing: Arc<OutgoingMessageSender>,
        manager: Arc<UpstreamManager>,
        script: Arc<ScriptSupervisor>,
    ) -> Self {
        Self {
            outgoing,
            initialized: false,
            ctx: ToolContext { manager, script },
        }
    }

    pub(crate) async fn process_message(&mut self, message: JSONRPCMessage) {
        match message {
            JSONRPCMessage::Request(request) => self.process_request(request).await,
            JSONRPCMessage::Notification(notification) => {
                if notification.method == "notifications/initialized" {
                    info!("downstream consumer initialized");
                } else {
                    info!("<- notification: {}", notification.method);
                }
            }
            JSONRPCMessage::Response(response) => {
                info!("<- unexpected response: {:?}", response.id);
            }
            JSONRPCMessage::Error(error) => {
                warn!("<- error: {:?}", error.error.message);
            }
        }
    }

    async fn process_request(&mut self, request: JSONRPCRequest) {
        let JSONRPCRequest {
            id, method, params, ..
        } = request;
        match method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => self.outgoing.send_response(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, params).await,
            other => self.outgoing.send_error(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
                Some(json!({ "method": other })),
            ),
        }
    }

    fn handle_initialize(&mut self, id: RequestId) {
        if self.initialized {
            self.outgoing.send_error(
                id,
                INVALID_REQUEST,
                "initialize called more than once".to_string(),
                None,
            );
            return;
        }
        self.initialized = true;
        let result = InitializeResult {
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                experimental: None,
                resources: None,
                prompts: None,
            },
            server_info: Implementation {
                name: "mcpproxy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("MCP aggregating proxy".to_string()),
            },
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            instructions: Some(
                "Call `retrieve_tools` to find upstream tools, then invoke them by their \
                 fully qualified `server:tool` name."
                    .to_string(),
            ),
        };
        self.outgoing.send_response(id, result);
    }

    fn handle_list_tools(&self, id: RequestId) {
        let result = ListToolsResult {
            tools: builtin::definitions(),
            next_cursor: None,
        };
        self.outgoing.send_response(id, result);
    }

    async fn handle_call_tool(&self, id: RequestId, params: Option<Value>) {
        let params: CallToolRequestParams = match params
            .and_then(|params| serde_json::from_value(params).ok())
        {
            Some(params) => params,
            None => {
                self.outgoing.send_error(
                    id,
                    INVALID_PARAMS,
                    "invalid tools/call params".to_string(),
                    None,
                );
                return;
            }
        };

        // Router rule: names shaped `server:tool` go upstream, bare names
        // address the built-in management tools.
        if parse_qualified_name(&params.name).is_some() {
            let result = self
                .ctx
                .manager
                .call_tool(&params.name, params.arguments)
                .await;
            match result {
                Ok(call_result) => self.outgoing.send_response(id, call_result),
                Err(err) => self
                    .outgoing
                    .send_response(id, error_call_result(&err)),
            }
            return;
        }

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        match builtin::dispatch(&params.name, arguments, &self.ctx).await {
            Some(Ok(value)) => self
                .outgoing
                .send_response(id, CallToolResult::json(value)),
            Some(Err(err)) => self.outgoing.send_response(id, error_call_result(&err)),
            None => self.outgoing.send_error(
                id,
                METHOD_NOT_FOUND,
                format!("unknown tool: {}", params.name),
                Some(json!({ "tool": params.name })),
            ),
        }
    }
}

/// Tool failures surface as `isError` results, with the classified kind in
/// the structured payload so downstream agents can react programmatically.
fn error_call_result(err: &ProxyError) -> CallToolResult {
    CallToolResult {
        content: vec![mcpproxy_protocol::mcp::text_content(err.to_string())],
        structured_content: Some(json!({
            "error": {
                "kind": err.kind(),
                "message": err.message(),
                "server": err.server(),
                "tool": err.tool(),
                "hint": err.hint(),
            },
        })),
        is_error: Some(true),
    }
}
