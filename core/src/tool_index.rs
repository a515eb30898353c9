//! Full-text searchable catalog of discovered tools.
//!
//! The authoritative copy lives in the persistent store (`tool_index`
//! bucket); this in-memory catalog rebuilds from it on startup and is kept
//! write-through afterwards. Ranking is BM25 over tool name, server name,
//! description, and schema property names, with `(server, tool)` as a
//! deterministic tiebreak.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bm25::Document;
use bm25::Language;
use bm25::SearchEngineBuilder;
use mcpproxy_protocol::ToolMetadata;
use mcpproxy_state::StateStore;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedTool {
    pub metadata: ToolMetadata,
    pub quarantined: bool,
    pub score: f32,
}

pub struct ToolIndex {
    store: StateStore,
    entries: RwLock<BTreeMap<(String, String), ToolMetadata>>,
}

impl ToolIndex {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Rebuild the in-memory catalog from the persistent store.
    pub async fn load(&self) -> anyhow::Result<usize> {
        let tools = self.store.load_all_tools().await?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.clear();
        for tool in tools {
            entries.insert((tool.server_name.clone(), tool.tool_name.clone()), tool);
        }
        Ok(entries.len())
    }

    /// Replace the indexed tools for one server. Returns whether the set
    /// actually changed, so callers can publish `ToolsUpdated` only on real
    /// changes.
    pub async fn update_server_tools(
        &self,
        server: &str,
        tools: Vec<ToolMetadata>,
    ) -> anyhow::Result<bool> {
        let changed = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut current: Vec<&ToolMetadata> = entries
                .range((server.to_string(), String::new())..)
                .take_while(|((s, _), _)| s == server)
                .map(|(_, tool)| tool)
                .collect();
            current.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
            let mut incoming: Vec<&ToolMetadata> = tools.iter().collect();
            incoming.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
            current != incoming
        };

        if !changed {
            debug!("tool set for `{server}` unchanged; skipping index write");
            return Ok(false);
        }

        self.store.replace_server_tools(server, &tools).await?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|(s, _), _| s != server);
        for tool in tools {
            entries.insert((tool.server_name.clone(), tool.tool_name.clone()), tool);
        }
        Ok(true)
    }

    pub async fn remove_server(&self, server: &str) -> anyhow::Result<()> {
        self.store.delete_server_tools(server).await?;
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|(s, _), _| s != server);
        Ok(())
    }

    pub fn server_tool_count(&self, server: &str) -> usize {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.keys().filter(|(s, _)| s == server).count()
    }

    pub fn total_tools(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Ranked retrieval. `is_quarantined` is consulted per server at result
    /// construction time, so quarantine promotion is visible immediately.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        is_quarantined: &dyn Fn(&str) -> bool,
    ) -> Vec<RetrievedTool> {
        let entries: Vec<ToolMetadata> = {
            let guard = self
                .entries
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.values().cloned().collect()
        };
        if entries.is_empty() || limit == 0 {
            return Vec::new();
        }

        let documents: Vec<Document<usize>> = entries
            .iter()
            .enumerate()
            .map(|(idx, tool)| Document::new(idx, build_search_text(tool)))
            .collect();
        let search_engine =
            SearchEngineBuilder::<usize>::with_documents(Language::English, documents).build();
        let results = search_engine.search(query, limit);

        let mut retrieved: Vec<RetrievedTool> = results
            .into_iter()
            .filter_map(|result| entries.get(result.document.id).cloned().map(|metadata| {
                let quarantined = is_quarantined(&metadata.server_name);
                RetrievedTool {
                    metadata,
                    quarantined,
                    score: result.score,
                }
            }))
            .collect();
        // Scores first, then deterministic tiebreak on (server, tool).
        retrieved.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.metadata.server_name.cmp(&b.metadata.server_name))
                .then_with(|| a.metadata.tool_name.cmp(&b.metadata.tool_name))
        });
        retrieved
    }
}

fn build_search_text(tool: &ToolMetadata) -> String {
    let mut parts = vec![
        tool.tool_name.clone(),
        tool.server_name.clone(),
        tool.description.clone(),
    ];
    if let Some(properties) = tool
        .params_schema
        .get("properties")
        .and_then(Value::as_object)
    {
        parts.extend(properties.keys().cloned());
    }
    parts.retain(|part| !part.trim().is_empty());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tool(server: &str, name: &str, description: &str) -> ToolMetadata {
        ToolMetadata {
            server_name: server.to_string(),
            tool_name: name.to_string(),
            description: description.to_string(),
            params_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
            }),
        }
    }

    async fn index_with(tools: Vec<(&str, Vec<ToolMetadata>)>) -> ToolIndex {
        let store = StateStore::in_memory().await.expect("open");
        let index = ToolIndex::new(store);
        for (server, server_tools) in tools {
            index
                .update_server_tools(server, server_tools)
                .await
                .expect("update");
        }
        index
    }

    #[tokio::test]
    async fn update_reports_changes_only() {
        let index = index_with(vec![]).await;
        let tools = vec![tool("calc", "add", "Add two numbers")];

        assert!(index
            .update_server_tools("calc", tools.clone())
            .await
            .expect("first"));
        assert!(!index
            .update_server_tools("calc", tools)
            .await
            .expect("identical"));
        assert!(index
            .update_server_tools("calc", vec![])
            .await
            .expect("removal"));
        assert_eq!(index.server_tool_count("calc"), 0);
    }

    #[tokio::test]
    async fn search_ranks_relevant_tools_first() {
        let index = index_with(vec![
            (
                "calc",
                vec![
                    tool("calc", "add", "Add two numbers together"),
                    tool("calc", "multiply", "Multiply two numbers"),
                ],
            ),
            (
                "wiki",
                vec![tool("wiki", "search", "Search wiki pages for text")],
            ),
        ])
        .await;

        let results = index.search("add numbers", 3, &|_| false);
        assert!(!results.is_empty());
        assert_eq!(results[0].metadata.tool_name, "add");
        assert!(results.iter().all(|r| !r.quarantined));
    }

    #[tokio::test]
    async fn quarantine_marker_is_attached_per_server() {
        let index = index_with(vec![(
            "calc",
            vec![tool("calc", "add", "Add two numbers")],
        )])
        .await;

        let results = index.search("add", 3, &|server| server == "calc");
        assert!(!results.is_empty());
        assert!(results[0].quarantined);
    }

    #[tokio::test]
    async fn index_rebuilds_from_store() {
        let store = StateStore::in_memory().await.expect("open");
        let index = ToolIndex::new(store.clone());
        index
            .update_server_tools("calc", vec![tool("calc", "add", "Add two numbers")])
            .await
            .expect("seed");

        // A fresh index over the same store starts empty and recovers the
        // catalog from persistence.
        let rebuilt = ToolIndex::new(store);
        assert_eq!(rebuilt.total_tools(), 0);
        let loaded = rebuilt.load().await.expect("load");
        assert_eq!(loaded, 1);
        assert_eq!(rebuilt.server_tool_count("calc"), 1);
    }

    #[tokio::test]
    async fn remove_server_clears_entries() {
        let index = index_with(vec![
            ("calc", vec![tool("calc", "add", "Add two numbers")]),
            ("wiki", vec![tool("wiki", "search", "Search pages")]),
        ])
        .await;

        index.remove_server("calc").await.expect("remove");
        assert_eq!(index.server_tool_count("calc"), 0);
        assert_eq!(index.total_tools(), 1);
    }
}
