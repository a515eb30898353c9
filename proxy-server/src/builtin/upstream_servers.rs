use mcpproxy_core::ServerConfig;
use mcpproxy_core::config::RawServerConfig;
use mcpproxy_protocol::ConnectionInfo;
use mcpproxy_protocol::ProxyError;
use serde_json::Value;
use serde_json::json;

use super::ToolContext;
use super::required_str;

pub(crate) async fn handle(ctx: &ToolContext, arguments: Value) -> Result<Value, ProxyError> {
    let operation = required_str(&arguments, "operation")?;
    match operation {
        "list" => Ok(list(ctx)),
        "add" => add(ctx, &arguments).await,
        "remove" => {
            let name = required_str(&arguments, "name")?;
            ctx.manager.remove_server(name).await?;
            Ok(json!({ "removed": name }))
        }
        "enable" => {
            let name = required_str(&arguments, "name")?;
            ctx.manager.set_enabled(name, true).await?;
            Ok(server_record_by_name(ctx, name)?)
        }
        "disable" => {
            let name = required_str(&arguments, "name")?;
            ctx.manager.set_enabled(name, false).await?;
            Ok(server_record_by_name(ctx, name)?)
        }
        "update" => update(ctx, &arguments).await,
        other => Err(ProxyError::internal(format!(
            "unknown operation `{other}` for upstream_servers"
        ))),
    }
}

fn list(ctx: &ToolContext) -> Value {
    let servers: Vec<Value> = ctx
        .manager
        .list_servers()
        .into_iter()
        .map(|(config, info)| server_record(&config, &info))
        .collect();
    json!({ "servers": servers })
}

async fn add(ctx: &ToolContext, arguments: &Value) -> Result<Value, ProxyError> {
    let name = required_str(arguments, "name")?;
    let mut config = config_from_args(name, arguments)?;
    // Operator-added servers start quarantined until explicitly promoted.
    if arguments.get("quarantined").is_none() {
        config.quarantined = true;
    }
    ctx.manager.add_server_config(config).await?;
    server_record_by_name(ctx, name)
}

async fn update(ctx: &ToolContext, arguments: &Value) -> Result<Value, ProxyError> {
    let name = required_str(arguments, "name")?;
    let existing = ctx.manager.get_client(name).ok_or_else(|| {
        ProxyError::not_connected(format!("no client found for server `{name}`"))
            .with_server(name.to_string())
            .with_hint("use `upstream_servers list` to see configured servers")
    })?;

    // Partial update: start from the live config and overlay provided
    // fields.
    let mut config = (*existing.config()).clone();
    overlay_config(&mut config, arguments)?;
    config
        .validate()
        .map_err(|err| ProxyError::internal(err.to_string()))?;
    ctx.manager.update_server_config(config).await?;
    server_record_by_name(ctx, name)
}

fn config_from_args(name: &str, arguments: &Value) -> Result<ServerConfig, ProxyError> {
    let raw = RawServerConfig {
        protocol: parse_protocol(arguments)?,
        url: string_field(arguments, "url"),
        command: string_field(arguments, "command"),
        args: parse_args_json(arguments)?,
        env: parse_env(arguments)?,
        working_dir: None,
        headers: None,
        enabled: arguments.get("enabled").and_then(Value::as_bool),
        quarantined: arguments.get("quarantined").and_then(Value::as_bool),
        start_on_boot: None,
        health_check: None,
        oauth_scopes: None,
    };
    ServerConfig::from_raw(name, raw).map_err(|err| ProxyError::internal(err.to_string()))
}

fn overlay_config(config: &mut ServerConfig, arguments: &Value) -> Result<(), ProxyError> {
    if let Some(protocol) = parse_protocol(arguments)? {
        config.protocol = protocol;
    }
    if let Some(url) = string_field(arguments, "url") {
        config.url = Some(url);
        config.command = None;
        config.args = Vec::new();
    }
    if let Some(command) = string_field(arguments, "command") {
        config.command = Some(command);
        config.url = None;
    }
    if let Some(args) = parse_args_json(arguments)? {
        config.args = args;
    }
    if let Some(env) = parse_env(arguments)? {
        config.env = env;
    }
    if let Some(enabled) = arguments.get("enabled").and_then(Value::as_bool) {
        config.enabled = enabled;
    }
    Ok(())
}

fn string_field(arguments: &Value, field: &str) -> Option<String> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_protocol(
    arguments: &Value,
) -> Result<Option<mcpproxy_core::ProtocolKind>, ProxyError> {
    let Some(raw) = arguments.get("protocol").and_then(Value::as_str) else {
        return Ok(None);
    };
    serde_json::from_value(Value::String(raw.to_string()))
        .map(Some)
        .map_err(|_| ProxyError::internal(format!("unknown protocol `{raw}`")))
}

fn parse_args_json(arguments: &Value) -> Result<Option<Vec<String>>, ProxyError> {
    let Some(raw) = arguments.get("args_json").and_then(Value::as_str) else {
        return Ok(None);
    };
    serde_json::from_str::<Vec<String>>(raw)
        .map(Some)
        .map_err(|err| ProxyError::internal(format!("args_json must be a JSON string array: {err}")))
}

fn parse_env(
    arguments: &Value,
) -> Result<Option<std::collections::HashMap<String, String>>, ProxyError> {
    let Some(raw) = arguments.get("env") else {
        return Ok(None);
    };
    serde_json::from_value(raw.clone())
        .map(Some)
        .map_err(|err| ProxyError::internal(format!("env must be a string map: {err}")))
}

fn server_record_by_name(ctx: &ToolContext, name: &str) -> Result<Value, ProxyError> {
    let client = ctx.manager.get_client(name).ok_or_else(|| {
        ProxyError::not_connected(format!("no client found for server `{name}`"))
            .with_server(name.to_string())
    })?;
    Ok(server_record(&client.config(), &client.snapshot()))
}

pub(crate) fn server_record(config: &ServerConfig, info: &ConnectionInfo) -> Value {
    json!({
        "name": config.name,
        "protocol": config.protocol,
        "url": config.url,
        "command": config.command,
        "args": config.args,
        "enabled": config.enabled,
        "quarantined": config.quarantined,
        "startup_mode": config.startup_mode,
        "auto_disable_reason": config.auto_disable_reason,
        "start_on_boot": config.start_on_boot,
        "health_check": config.health_check,
        "group_id": config.group_id,
        "ever_connected": config.ever_connected,
        "tool_count": config.tool_count,
        "state": info.state,
        "retry_count": info.retry_count,
        "connected_at": info.connected_at,
        "last_error": info.last_error,
        "server_version": info.server_version,
    })
}
