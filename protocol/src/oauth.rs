//! OAuth credential and completion-event shapes shared between the client
//! (which runs flows), the state store (which persists them), and the
//! manager (which reacts to arrivals).

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Access credentials for one upstream. `expires_at` is absolute unix
/// seconds so the stored shape stays valid across process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub client_id: String,
    /// Token endpoint recorded at issuance so refresh does not need to
    /// re-run discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

impl OAuthToken {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_unix >= expires_at,
            None => false,
        }
    }
}

/// Persisted marker that an out-of-process OAuth flow finished for a named
/// server. Consumed at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCompletionEvent {
    pub server_name: String,
    pub completed_at: DateTime<Utc>,
    pub processed: bool,
}

/// Storage seam for OAuth tokens. The persistent store implements this;
/// the client and manager only see the trait.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_token(&self, server: &str, url: &str) -> anyhow::Result<Option<OAuthToken>>;
    async fn save_token(&self, server: &str, url: &str, token: &OAuthToken)
    -> anyhow::Result<()>;
    async fn delete_token(&self, server: &str, url: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_without_expiry_never_expires() {
        let token = OAuthToken {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: None,
            scopes: vec![],
            client_id: "cid".to_string(),
            token_endpoint: None,
        };
        assert!(!token.is_expired(i64::MAX));
    }

    #[test]
    fn token_expiry_is_inclusive() {
        let token = OAuthToken {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: Some(100),
            scopes: vec![],
            client_id: "cid".to_string(),
            token_endpoint: None,
        };
        assert!(!token.is_expired(99));
        assert!(token.is_expired(100));
    }
}
