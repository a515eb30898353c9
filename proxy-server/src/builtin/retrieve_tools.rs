use mcpproxy_protocol::ProxyError;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use super::ToolContext;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Deserialize)]
struct RetrieveToolsArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

pub(crate) fn handle(ctx: &ToolContext, arguments: Value) -> Result<Value, ProxyError> {
    let args: RetrieveToolsArgs = serde_json::from_value(arguments)
        .map_err(|err| ProxyError::internal(format!("invalid arguments: {err}")))?;

    let query = args.query.trim();
    if query.is_empty() {
        return Err(ProxyError::internal("query must not be empty"));
    }
    if args.limit == 0 || args.limit > MAX_LIMIT {
        return Err(ProxyError::internal(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }

    let results = ctx.manager.retrieve_tools(query, args.limit);
    let tools: Vec<Value> = results
        .iter()
        .map(|retrieved| {
            json!({
                "server": retrieved.metadata.server_name,
                "tool": retrieved.metadata.tool_name,
                "name": retrieved.metadata.qualified_name(),
                "description": retrieved.metadata.description,
                "schema": retrieved.metadata.params_schema,
                "quarantined": retrieved.quarantined,
                "score": retrieved.score,
            })
        })
        .collect();

    Ok(json!({
        "query": query,
        "total_indexed": ctx.manager.tool_index().total_tools(),
        "tools": tools,
    }))
}
