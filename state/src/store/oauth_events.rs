use mcpproxy_protocol::oauth::OAuthCompletionEvent;
use sqlx::Row;

use super::StateStore;
use super::now_unix;
use crate::datetime_from_unix;

impl StateStore {
    /// Record that an OAuth flow finished for `server`. Written by whichever
    /// process completed the flow; drained by the manager's reactor.
    pub async fn append_oauth_completion(&self, server: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO oauth_events (server_name, completed_at) VALUES (?, ?)")
            .bind(server)
            .bind(now_unix())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_unprocessed_oauth_events(
        &self,
    ) -> anyhow::Result<Vec<OAuthCompletionEvent>> {
        let rows = sqlx::query(
            "SELECT server_name, completed_at, processed FROM oauth_events \
             WHERE processed = 0 ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(OAuthCompletionEvent {
                    server_name: row.try_get("server_name")?,
                    completed_at: datetime_from_unix(row.try_get("completed_at")?),
                    processed: row.try_get("processed")?,
                })
            })
            .collect()
    }

    /// Atomically claim all unprocessed completion events: the `processed`
    /// flag flips in the same transaction that returns the rows, so each
    /// event is consumed at most once across observers.
    pub async fn take_unprocessed_oauth_events(
        &self,
    ) -> anyhow::Result<Vec<OAuthCompletionEvent>> {
        let mut tx = self.pool().begin().await?;
        let rows = sqlx::query(
            "SELECT id, server_name, completed_at FROM oauth_events \
             WHERE processed = 0 ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            sqlx::query("UPDATE oauth_events SET processed = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            events.push(OAuthCompletionEvent {
                server_name: row.try_get("server_name")?,
                completed_at: datetime_from_unix(row.try_get("completed_at")?),
                processed: true,
            });
        }
        tx.commit().await?;
        Ok(events)
    }

    pub async fn mark_oauth_event_processed(
        &self,
        server: &str,
        completed_at: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE oauth_events SET processed = 1 \
             WHERE server_name = ? AND completed_at = ?",
        )
        .bind(server)
        .bind(completed_at.timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Drop processed events older than `max_age_secs`.
    pub async fn cleanup_old_oauth_events(&self, max_age_secs: i64) -> anyhow::Result<u64> {
        let cutoff = now_unix() - max_age_secs;
        let result = sqlx::query(
            "DELETE FROM oauth_events WHERE processed = 1 AND completed_at < ?",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn take_consumes_each_event_once() {
        let store = StateStore::in_memory().await.expect("open");
        store.append_oauth_completion("jira").await.expect("append");
        store.append_oauth_completion("wiki").await.expect("append");

        let first = store
            .take_unprocessed_oauth_events()
            .await
            .expect("first take");
        let names: Vec<&str> = first.iter().map(|e| e.server_name.as_str()).collect();
        assert_eq!(names, vec!["jira", "wiki"]);
        assert!(first.iter().all(|e| e.processed));

        let second = store
            .take_unprocessed_oauth_events()
            .await
            .expect("second take");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn get_leaves_events_unprocessed() {
        let store = StateStore::in_memory().await.expect("open");
        store.append_oauth_completion("jira").await.expect("append");

        let seen = store
            .get_unprocessed_oauth_events()
            .await
            .expect("get");
        assert_eq!(seen.len(), 1);
        let again = store
            .get_unprocessed_oauth_events()
            .await
            .expect("get again");
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_only_touches_processed_rows() {
        let store = StateStore::in_memory().await.expect("open");
        store.append_oauth_completion("jira").await.expect("append");
        store.append_oauth_completion("wiki").await.expect("append");
        let taken = store
            .take_unprocessed_oauth_events()
            .await
            .expect("take");
        assert_eq!(taken.len(), 2);
        store.append_oauth_completion("late").await.expect("append");

        // Negative age makes "now" older than the cutoff, so every
        // processed row qualifies.
        let removed = store
            .cleanup_old_oauth_events(-60)
            .await
            .expect("cleanup");
        assert_eq!(removed, 2);

        let remaining = store
            .get_unprocessed_oauth_events()
            .await
            .expect("get");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].server_name, "late");
    }
}
