//! Tool metadata and the `server:tool` naming grammar.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Delimiter between the server name and the tool name in the fully
/// qualified names exposed downstream.
pub const TOOL_NAME_DELIMITER: char = ':';

/// One tool discovered from one upstream, as persisted and indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub params_schema: Value,
}

impl ToolMetadata {
    pub fn qualified_name(&self) -> String {
        format!(
            "{}{}{}",
            self.server_name, TOOL_NAME_DELIMITER, self.tool_name
        )
    }
}

/// Split a downstream tool name into `(server, tool)` on the *first*
/// delimiter. Names without a delimiter address built-in tools and return
/// `None`.
pub fn parse_qualified_name(name: &str) -> Option<(&str, &str)> {
    let (server, tool) = name.split_once(TOOL_NAME_DELIMITER)?;
    Some((server, tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_first_delimiter_only() {
        assert_eq!(
            parse_qualified_name("archon:rag:search"),
            Some(("archon", "rag:search"))
        );
    }

    #[test]
    fn names_without_delimiter_are_builtin() {
        assert_eq!(parse_qualified_name("retrieve_tools"), None);
    }

    #[test]
    fn qualified_name_round_trips() {
        let meta = ToolMetadata {
            server_name: "calc".to_string(),
            tool_name: "add".to_string(),
            description: String::new(),
            params_schema: serde_json::json!({}),
        };
        assert_eq!(meta.qualified_name(), "calc:add");
        assert_eq!(
            parse_qualified_name(&meta.qualified_name()),
            Some(("calc", "add"))
        );
    }
}
