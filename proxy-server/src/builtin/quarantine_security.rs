use mcpproxy_protocol::ProxyError;
use serde_json::Value;
use serde_json::json;

use super::ToolContext;
use super::required_str;
use super::upstream_servers::server_record;

pub(crate) async fn handle(ctx: &ToolContext, arguments: Value) -> Result<Value, ProxyError> {
    let operation = required_str(&arguments, "operation")?;
    match operation {
        "list_quarantined" => {
            let quarantined: Vec<Value> = ctx
                .manager
                .list_servers()
                .into_iter()
                .filter(|(config, _)| config.quarantined)
                .map(|(config, info)| server_record(&config, &info))
                .collect();
            Ok(json!({ "servers": quarantined }))
        }
        "quarantine" => set(ctx, &arguments, true).await,
        "unquarantine" => set(ctx, &arguments, false).await,
        other => Err(ProxyError::internal(format!(
            "unknown operation `{other}` for quarantine_security"
        ))),
    }
}

async fn set(ctx: &ToolContext, arguments: &Value, quarantined: bool) -> Result<Value, ProxyError> {
    let name = required_str(arguments, "name")?;
    ctx.manager.set_quarantined(name, quarantined).await?;
    Ok(json!({ "name": name, "quarantined": quarantined }))
}
