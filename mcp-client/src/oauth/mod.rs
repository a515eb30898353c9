//! OAuth support for HTTP upstreams: metadata discovery, dynamic client
//! registration, the interactive PKCE login flow, and silent refresh.
//!
//! Tokens are persisted through the [`TokenStore`] seam owned by the caller,
//! never written to disk here directly.

mod discovery;
mod login;
mod refresh;

use std::collections::HashMap;

pub use discovery::AuthServerMetadata;
pub use discovery::discover_auth_server;
pub use discovery::register_client;
pub use login::perform_oauth_login;
pub use mcpproxy_protocol::oauth::OAuthToken;
pub use mcpproxy_protocol::oauth::TokenStore;
pub use refresh::refresh_access_token;

/// Whether OAuth applies to a server config: a statically configured
/// `Authorization` header means credentials are managed out of band.
pub fn should_use_oauth(headers: &HashMap<String, String>) -> bool {
    !headers
        .keys()
        .any(|key| key.eq_ignore_ascii_case("authorization"))
}

pub(crate) fn now_unix() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_authorization_header_disables_oauth() {
        let headers = HashMap::from([("Authorization".to_string(), "Bearer abc".to_string())]);
        assert!(!should_use_oauth(&headers));

        let headers = HashMap::from([("authorization".to_string(), "Basic xyz".to_string())]);
        assert!(!should_use_oauth(&headers));
    }

    #[test]
    fn other_headers_leave_oauth_enabled() {
        let headers = HashMap::from([("X-Api-Version".to_string(), "2".to_string())]);
        assert!(should_use_oauth(&headers));
        assert!(should_use_oauth(&HashMap::new()));
    }
}
