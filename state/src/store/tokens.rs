use async_trait::async_trait;
use mcpproxy_protocol::oauth::OAuthToken;
use mcpproxy_protocol::oauth::TokenStore;
use sqlx::Row;

use super::StateStore;
use super::now_unix;

impl StateStore {
    async fn read_token(&self, server: &str, url: &str) -> anyhow::Result<Option<OAuthToken>> {
        let row = sqlx::query("SELECT url, token FROM tokens WHERE server_name = ?")
            .bind(server)
            .fetch_optional(self.pool())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        // A token minted for a different URL is useless; treat as absent.
        let stored_url: String = row.try_get("url")?;
        if stored_url != url {
            return Ok(None);
        }
        let raw: String = row.try_get("token")?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn write_token(
        &self,
        server: &str,
        url: &str,
        token: &OAuthToken,
    ) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(token)?;
        sqlx::query(
            "INSERT INTO tokens (server_name, url, token, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(server_name) DO UPDATE SET \
                 url = excluded.url, token = excluded.token, updated_at = excluded.updated_at",
        )
        .bind(server)
        .bind(url)
        .bind(serialized)
        .bind(now_unix())
        .execute(self.pool())
        .await?;
        self.token_arrivals().notify_waiters();
        Ok(())
    }

    async fn remove_token(&self, server: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM tokens WHERE server_name = ?")
            .bind(server)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for StateStore {
    async fn get_token(&self, server: &str, url: &str) -> anyhow::Result<Option<OAuthToken>> {
        self.read_token(server, url).await
    }

    async fn save_token(
        &self,
        server: &str,
        url: &str,
        token: &OAuthToken,
    ) -> anyhow::Result<()> {
        self.write_token(server, url, token).await
    }

    async fn delete_token(&self, server: &str, _url: &str) -> anyhow::Result<()> {
        self.remove_token(server).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token() -> OAuthToken {
        OAuthToken {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expires_at: Some(2_000_000_000),
            scopes: vec!["mcp".to_string()],
            client_id: "cid".to_string(),
            token_endpoint: Some("https://issuer.example/token".to_string()),
        }
    }

    #[tokio::test]
    async fn save_and_load_by_server_and_url() {
        let store = StateStore::in_memory().await.expect("open");
        let url = "https://mcp.example/mcp";
        store
            .save_token("jira", url, &token())
            .await
            .expect("save");

        let loaded = store
            .get_token("jira", url)
            .await
            .expect("get")
            .expect("token present");
        assert_eq!(loaded, token());
    }

    #[tokio::test]
    async fn url_mismatch_hides_token() {
        let store = StateStore::in_memory().await.expect("open");
        store
            .save_token("jira", "https://a.example/mcp", &token())
            .await
            .expect("save");
        let loaded = store
            .get_token("jira", "https://b.example/mcp")
            .await
            .expect("get");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn delete_removes_token() {
        let store = StateStore::in_memory().await.expect("open");
        let url = "https://mcp.example/mcp";
        store.save_token("jira", url, &token()).await.expect("save");
        store.delete_token("jira", url).await.expect("delete");
        assert!(store.get_token("jira", url).await.expect("get").is_none());
    }
}
