use sqlx::Row;

use super::StateStore;
use super::now_unix;
use crate::UpstreamRecord;
use crate::datetime_from_unix;

impl StateStore {
    /// Insert or replace the record for one upstream.
    pub async fn put_upstream(&self, record: &UpstreamRecord) -> anyhow::Result<()> {
        let config = serde_json::to_string(&record.config)?;
        sqlx::query(
            "INSERT INTO upstreams (name, record, ever_connected, tool_count, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
                 record = excluded.record, \
                 ever_connected = excluded.ever_connected, \
                 tool_count = excluded.tool_count, \
                 updated_at = excluded.updated_at",
        )
        .bind(&record.name)
        .bind(config)
        .bind(record.ever_connected)
        .bind(record.tool_count as i64)
        .bind(now_unix())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_upstream(&self, name: &str) -> anyhow::Result<Option<UpstreamRecord>> {
        let row = sqlx::query(
            "SELECT name, record, ever_connected, tool_count, updated_at \
             FROM upstreams WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn list_upstreams(&self) -> anyhow::Result<Vec<UpstreamRecord>> {
        let rows = sqlx::query(
            "SELECT name, record, ever_connected, tool_count, updated_at \
             FROM upstreams ORDER BY name",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn delete_upstream(&self, name: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM upstreams WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Update only the cached connectivity stats for one upstream. A nonzero
    /// `tool_count` implies the server was successfully listed at least once.
    pub async fn set_upstream_stats(
        &self,
        name: &str,
        ever_connected: bool,
        tool_count: u64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE upstreams SET ever_connected = ?, tool_count = ?, updated_at = ? \
             WHERE name = ?",
        )
        .bind(ever_connected)
        .bind(tool_count as i64)
        .bind(now_unix())
        .bind(name)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> anyhow::Result<UpstreamRecord> {
    let config_raw: String = row.try_get("record")?;
    Ok(UpstreamRecord {
        name: row.try_get("name")?,
        config: serde_json::from_str(&config_raw)?,
        ever_connected: row.try_get("ever_connected")?,
        tool_count: row.try_get::<i64, _>("tool_count")?.max(0) as u64,
        updated_at: datetime_from_unix(row.try_get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(name: &str) -> UpstreamRecord {
        UpstreamRecord {
            name: name.to_string(),
            config: json!({"protocol": "stdio", "command": "echo"}),
            ever_connected: false,
            tool_count: 0,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = StateStore::in_memory().await.expect("open");
        store.put_upstream(&record("calc")).await.expect("put");

        let loaded = store
            .get_upstream("calc")
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(loaded.name, "calc");
        assert_eq!(loaded.config["command"], json!("echo"));
        assert!(!loaded.ever_connected);
    }

    #[tokio::test]
    async fn stats_update_is_visible() {
        let store = StateStore::in_memory().await.expect("open");
        store.put_upstream(&record("calc")).await.expect("put");
        store
            .set_upstream_stats("calc", true, 12)
            .await
            .expect("stats");

        let loaded = store
            .get_upstream("calc")
            .await
            .expect("get")
            .expect("record exists");
        assert!(loaded.ever_connected);
        assert_eq!(loaded.tool_count, 12);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = StateStore::in_memory().await.expect("open");
        store.put_upstream(&record("calc")).await.expect("put");
        store.delete_upstream("calc").await.expect("delete");
        assert!(store.get_upstream("calc").await.expect("get").is_none());
        assert!(store.list_upstreams().await.expect("list").is_empty());
    }
}
