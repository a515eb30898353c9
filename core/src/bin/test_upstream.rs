//! Throwaway upstream MCP server used by the integration tests: a stdio
//! JSON-RPC loop exposing `add` and `rag_search`.

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
        let Ok(JSONRPCMessage::Request(request)) = serde_json::from_str(&line) else {
            continue;
        };
        let reply = respond(request);
        stdout
            .write_all(serde_json::to_string(&reply)?.as_bytes())
            .await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn respond(request: JSONRPCRequest) -> JSONRPCMessage {
    let JSONRPCRequest {
        id, method, params, ..
    } = request;
    let outcome = match method.as_str() {
        "initialize" => Ok(json!({
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "test_upstream", "version": "0.1.0" },
            "protocolVersion": MCP_PROTOCOL_VERSION,
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({
            "tools": [
                {
                    "name": "add",
                    "description": "Add two numbers and return the sum.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "a": { "type": "number" },
                            "b": { "type": "number" },
                        },
                        "required": ["a", "b"],
                    },
                },
                {
                    "name": "rag_search",
                    "description": "Search indexed documents for a query string.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "query": { "type": "string" } },
                        "required": ["query"],
                    },
                },
            ],
        })),
        "tools/call" => dispatch_tool(params),
        other => Err(JSONRPCErrorError {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {other}"),
            data: None,
        }),
    };

    match outcome {
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

fn dispatch_tool(params: Option<Value>) -> Result<Value, JSONRPCErrorError> {
    let params: CallToolRequestParams = params
        .and_then(|value| serde_json::from_value(value).ok())
        .ok_or_else(|| JSONRPCErrorError {
            code: INVALID_PARAMS,
            message: "invalid tools/call params".to_string(),
            data: None,
        })?;
    let arguments = params.arguments.unwrap_or_else(|| json!({}));

    let result = match params.name.as_str() {
        "add" => {
            let a = arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = arguments.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            CallToolResult::json(json!({ "sum": a + b }))
        }
        "rag_search" => {
            let query = arguments
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or_default();
            CallToolResult::text(format!("results for: {query}"))
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
