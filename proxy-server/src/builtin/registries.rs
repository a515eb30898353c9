use serde_json::Value;
use serde_json::json;

/// Static metadata about well-known MCP server registries.
pub(crate) fn list() -> Value {
    json!({
        "registries": [
            {
                "id": "mcp-official",
                "name": "Official MCP Registry",
                "url": "https://registry.modelcontextprotocol.io",
                "description": "Community registry maintained by the MCP project.",
            },
            {
                "id": "smithery",
                "name": "Smithery",
                "url": "https://smithery.ai",
                "description": "Hosted catalog of MCP servers with one-line installs.",
            },
            {
                "id": "mcp-so",
                "name": "mcp.so",
                "url": "https://mcp.so",
                "description": "Community-curated directory of MCP servers.",
            },
            {
                "id": "pulsemcp",
                "name": "PulseMCP",
                "url": "https://www.pulsemcp.com/servers",
                "description": "Directory tracking MCP servers and their health.",
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_have_stable_ids_and_urls() {
        let value = list();
        let registries = value
            .get("registries")
            .and_then(Value::as_array)
            .expect("array");
        assert!(registries.len() >= 4);
        for registry in registries {
            assert!(registry.get("id").and_then(Value::as_str).is_some());
            assert!(
                registry
                    .get("url")
                    .and_then(Value::as_str)
                    .is_some_and(|url| url.starts_with("https://"))
            );
        }
    }
}
