use mcpproxy_protocol::ToolMetadata;
use sqlx::Row;

use super::StateStore;

impl StateStore {
    /// Replace every indexed tool for `server` in one transaction, so
    /// readers never observe a partially updated server.
    pub async fn replace_server_tools(
        &self,
        server: &str,
        tools: &[ToolMetadata],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM tool_index WHERE server_name = ?")
            .bind(server)
            .execute(&mut *tx)
            .await?;
        for tool in tools {
            let schema = serde_json::to_string(&tool.params_schema)?;
            sqlx::query(
                "INSERT INTO tool_index (server_name, tool_name, description, params_schema) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(server)
            .bind(&tool.tool_name)
            .bind(&tool.description)
            .bind(schema)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_server_tools(&self, server: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM tool_index WHERE server_name = ?")
            .bind(server)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn load_all_tools(&self) -> anyhow::Result<Vec<ToolMetadata>> {
        let rows = sqlx::query(
            "SELECT server_name, tool_name, description, params_schema \
             FROM tool_index ORDER BY server_name, tool_name",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|row| {
                let schema_raw: String = row.try_get("params_schema")?;
                Ok(ToolMetadata {
                    server_name: row.try_get("server_name")?,
                    tool_name: row.try_get("tool_name")?,
                    description: row.try_get("description")?,
                    params_schema: serde_json::from_str(&schema_raw)?,
                })
            })
            .collect()
    }
}
