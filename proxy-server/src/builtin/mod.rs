//! Built-in management tools exposed to the downstream consumer.
//!
//! Tool names and argument schemas are stable wire contracts; handlers live
//! one file per tool.

pub(crate) mod groups;
pub(crate) mod quarantine_security;
pub(crate) mod registries;
pub(crate) mod retrieve_tools;
pub(crate) mod startup_script;
pub(crate) mod upstream_servers;

use std::sync::Arc;

use mcpproxy_core::UpstreamManager;
use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::mcp::Tool;
use serde_json::Value;
use serde_json::json;

use crate::script::ScriptSupervisor;

pub(crate) struct ToolContext {
    pub manager: Arc<UpstreamManager>,
    pub script: Arc<ScriptSupervisor>,
}

pub(crate) fn definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "retrieve_tools".to_string(),
            title: None,
            description: Some(
                "Search the indexed tools of all upstream servers and return the best \
                 matches as fully qualified `server:tool` names."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Free-text search query." },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default 10, max 100).",
                    },
                },
                "required": ["query"],
            }),
        },
        Tool {
            name: "upstream_servers".to_string(),
            title: None,
            description: Some(
                "Manage upstream MCP servers: list, add, remove, enable, disable, update."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["list", "add", "remove", "enable", "disable", "update"],
                    },
                    "name": { "type": "string" },
                    "url": { "type": "string" },
                    "command": { "type": "string" },
                    "args_json": {
                        "type": "string",
                        "description": "JSON array of command arguments.",
                    },
                    "protocol": {
                        "type": "string",
                        "enum": ["stdio", "http", "streamable-http", "sse", "auto"],
                    },
                    "env": { "type": "object" },
                    "enabled": { "type": "boolean" },
                },
                "required": ["operation"],
            }),
        },
        Tool {
            name: "quarantine_security".to_string(),
            title: None,
            description: Some(
                "Inspect and change quarantine status of upstream servers.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["list_quarantined", "quarantine", "unquarantine"],
                    },
                    "name": { "type": "string" },
                },
                "required": ["operation"],
            }),
        },
        Tool {
            name: "groups".to_string(),
            title: None,
            description: Some(
                "Manage server groups and group membership.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["list", "create", "delete", "assign_server", "unassign_server"],
                    },
                    "group_name": { "type": "string" },
                    "server_name": { "type": "string" },
                },
                "required": ["operation"],
            }),
        },
        Tool {
            name: "list_available_groups".to_string(),
            title: None,
            description: Some("List all known server groups.".to_string()),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        Tool {
            name: "list_registries".to_string(),
            title: None,
            description: Some(
                "List known public registries of MCP servers.".to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        Tool {
            name: "startup_script".to_string(),
            title: None,
            description: Some(
                "Control the optional process-local startup helper script.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["status", "start", "stop", "restart", "update"],
                    },
                    "path": { "type": "string" },
                },
                "required": ["operation"],
            }),
        },
    ]
}

/// Dispatch a built-in tool call. Returns `None` for unknown names so the
/// processor can answer with a JSON-RPC method error.
pub(crate) async fn dispatch(
    name: &str,
    arguments: Value,
    ctx: &ToolContext,
) -> Option<Result<Value, ProxyError>> {
    let result = match name {
        "retrieve_tools" => retrieve_tools::handle(ctx, arguments),
        "upstream_servers" => upstream_servers::handle(ctx, arguments).await,
        "quarantine_security" => quarantine_security::handle(ctx, arguments).await,
        "groups" => groups::handle(ctx, arguments).await,
        "list_available_groups" => groups::handle_list_available(ctx).await,
        "list_registries" => Ok(registries::list()),
        "startup_script" => startup_script::handle(ctx, arguments).await,
        _ => return None,
    };
    Some(result)
}

pub(crate) fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ProxyError> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProxyError::internal(format!("missing required string field `{field}`"))
        })
}
