use std::path::PathBuf;

use mcpproxy_protocol::ProxyError;
use serde_json::Value;
use serde_json::json;

use super::ToolContext;
use super::required_str;

pub(crate) async fn handle(ctx: &ToolContext, arguments: Value) -> Result<Value, ProxyError> {
    let operation = required_str(&arguments, "operation")?;
    let status = match operation {
        "status" => ctx.script.status().await,
        "start" => ctx.script.start().await?,
        "stop" => ctx.script.stop().await?,
        "restart" => ctx.script.restart().await?,
        "update" => {
            let path = required_str(&arguments, "path")?;
            ctx.script.update(PathBuf::from(path)).await?
        }
        other => {
            return Err(ProxyError::internal(format!(
                "unknown operation `{other}` for startup_script"
            )));
        }
    };
    serde_json::to_value(&status)
        .map(|status| json!({ "script": status }))
        .map_err(|err| ProxyError::internal(format!("failed to serialize status: {err}")))
}
