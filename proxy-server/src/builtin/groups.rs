use mcpproxy_protocol::ProxyError;
use serde_json::Value;
use serde_json::json;

use super::ToolContext;
use super::required_str;

pub(crate) async fn handle(ctx: &ToolContext, arguments: Value) -> Result<Value, ProxyError> {
    let operation = required_str(&arguments, "operation")?;
    match operation {
        "list" => handle_list_available(ctx).await,
        "create" => {
            let group_name = required_str(&arguments, "group_name")?;
            let id = ctx
                .manager
                .store()
                .create_group(group_name)
                .await
                .map_err(internal)?;
            Ok(json!({ "group": { "id": id, "name": group_name } }))
        }
        "delete" => {
            let group_name = required_str(&arguments, "group_name")?;
            let group = ctx
                .manager
                .store()
                .find_group(group_name)
                .await
                .map_err(internal)?;
            let deleted = ctx
                .manager
                .store()
                .delete_group(group_name)
                .await
                .map_err(internal)?;
            // Unassign members so no server points at a dangling group id.
            if let Some(group) = group {
                for (config, _) in ctx.manager.list_servers() {
                    if config.group_id == group.id as u64 {
                        ctx.manager.assign_group(&config.name, 0).await?;
                    }
                }
            }
            Ok(json!({ "deleted": deleted }))
        }
        "assign_server" => {
            let server_name = required_str(&arguments, "server_name")?;
            let group_name = required_str(&arguments, "group_name")?;
            let group = ctx
                .manager
                .store()
                .find_group(group_name)
                .await
                .map_err(internal)?
                .ok_or_else(|| {
                    ProxyError::internal(format!("no group named `{group_name}`"))
                        .with_hint("use `groups` with operation `create` first")
                })?;
            ctx.manager
                .assign_group(server_name, group.id as u64)
                .await?;
            Ok(json!({ "server": server_name, "group": group.name, "group_id": group.id }))
        }
        "unassign_server" => {
            let server_name = required_str(&arguments, "server_name")?;
            ctx.manager.assign_group(server_name, 0).await?;
            Ok(json!({ "server": server_name, "group_id": 0 }))
        }
        other => Err(ProxyError::internal(format!(
            "unknown operation `{other}` for groups"
        ))),
    }
}

pub(crate) async fn handle_list_available(ctx: &ToolContext) -> Result<Value, ProxyError> {
    let groups = ctx.manager.store().list_groups().await.map_err(internal)?;
    let members: Vec<Value> = groups
        .into_iter()
        .map(|group| {
            let servers: Vec<String> = ctx
                .manager
                .list_servers()
                .into_iter()
                .filter(|(config, _)| config.group_id == group.id as u64)
                .map(|(config, _)| config.name.clone())
                .collect();
            json!({ "id": group.id, "name": group.name, "servers": servers })
        })
        .collect();
    Ok(json!({ "groups": members }))
}

fn internal(err: anyhow::Error) -> ProxyError {
    ProxyError::internal(format!("group store operation failed: {err:#}"))
}
