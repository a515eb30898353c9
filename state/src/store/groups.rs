use sqlx::Row;

use super::StateStore;
use crate::GroupRecord;

impl StateStore {
    /// Create a group if it does not exist yet; returns its id either way.
    pub async fn create_group(&self, name: &str) -> anyhow::Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO groups (name) VALUES (?)")
            .bind(name)
            .execute(self.pool())
            .await?;
        let row = sqlx::query("SELECT id FROM groups WHERE name = ?")
            .bind(name)
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn delete_group(&self, name: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM groups WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_group(&self, name: &str) -> anyhow::Result<Option<GroupRecord>> {
        let row = sqlx::query("SELECT id, name FROM groups WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(|row| {
            Ok(GroupRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    pub async fn list_groups(&self) -> anyhow::Result<Vec<GroupRecord>> {
        let rows = sqlx::query("SELECT id, name FROM groups ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(GroupRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = StateStore::in_memory().await.expect("open");
        let first = store.create_group("prod").await.expect("create");
        let second = store.create_group("prod").await.expect("create again");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn list_is_sorted_by_name() {
        let store = StateStore::in_memory().await.expect("open");
        store.create_group("staging").await.expect("create");
        store.create_group("prod").await.expect("create");

        let names: Vec<String> = store
            .list_groups()
            .await
            .expect("list")
            .into_iter()
            .map(|g| g.name)
            .collect();
        assert_eq!(names, vec!["prod".to_string(), "staging".to_string()]);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = StateStore::in_memory().await.expect("open");
        store.create_group("prod").await.expect("create");
        assert!(store.delete_group("prod").await.expect("delete"));
        assert!(!store.delete_group("prod").await.expect("delete again"));
        assert!(store.find_group("prod").await.expect("find").is_none());
    }
}
