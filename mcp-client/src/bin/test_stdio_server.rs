//! Minimal MCP server speaking line-delimited JSON-RPC over stdio.
//!
//! Exists for integration tests: advertises an `echo` and an `add` tool and
//! answers `initialize`, `tools/list`, and `tools/call`.

use mcpproxy_protocol::jsonrpc::INVALID_PARAMS;
use mcpproxy_protocol::jsonrpc::JSONRPCError;
use mcpproxy_protocol::jsonrpc::JSONRPCErrorError;
use mcpproxy_protocol::jsonrpc::JSONRPCMessage;
use mcpproxy_protocol::jsonrpc::JSONRPCRequest;
use mcpproxy_protocol::jsonrpc::JSONRPCResponse;
use mcpproxy_protocol::jsonrpc::JSONRPC_VERSION;
use mcpproxy_protocol::jsonrpc::METHOD_NOT_FOUND;
use mcpproxy_protocol::mcp::CallToolRequestParams;
use mcpproxy_protocol::mcp::CallToolResult;
use mcpproxy_protocol::mcp::MCP_PROTOCOL_VERSION;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: JSONRPCMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => continue,
        };
        let JSONRPCMessage::Request(request) = message else {
            continue;
        };
        let reply = handle_request(request);
        let serialized = serde_json::to_string(&reply)?;
        stdout.write_all(serialized.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn handle_request(request: JSONRPCRequest) -> JSONRPCMessage {
    let JSONRPCRequest {
        id, method, params, ..
    } = request;
    let result = match method.as_str() {
        "initialize" => Ok(json!({
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "test_stdio_server", "version": "1.0.0" },
            "protocolVersion": MCP_PROTOCOL_VERSION,
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo the provided message back.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "message": { "type": "string" } },
                        "required": ["message"],
                    },
                },
                {
                    "name": "add",
                    "description": "Add two numbers.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "a": { "type": "number" },
                            "b": { "type": "number" },
                        },
                        "required": ["a", "b"],
                    },
                },
            ],
        })),
        "tools/call" => call_tool(params),
        _ => Err(JSONRPCErrorError {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }),
    };

    match result {
        Ok(result) => JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }),
        Err(error) => JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }),
    }
}

fn call_tool(params: Option<Value>) -> Result<Value, JSONRPCErrorError> {
    let params: CallToolRequestParams = params
        .and_then(|params| serde_json::from_value(params).ok())
        .ok_or_else(|| JSONRPCErrorError {
            code: INVALID_PARAMS,
            message: "invalid tools/call params".to_string(),
            data: None,
        })?;

    let arguments = params.arguments.unwrap_or_else(|| json!({}));
    let result = match params.name.as_str() {
        "echo" => {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            CallToolResult::text(message)
        }
        "add" => {
            let a = arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = arguments.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            CallToolResult::json(json!({ "sum": a + b }))
        }
        other => {
            return Err(JSONRPCErrorError {
                code: METHOD_NOT_FOUND,
                message: format!("unknown tool: {other}"),
                data: None,
            });
        }
    };
    serde_json::to_value(result).map_err(|err| JSONRPCErrorError {
        code: INVALID_PARAMS,
        message: format!("failed to serialize tool result: {err}"),
        data: None,
    })
}
