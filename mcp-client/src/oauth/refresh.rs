//! Silent token renewal via the refresh-token grant.

use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::oauth::OAuthToken;
use oauth2::ClientId;
use oauth2::RefreshToken;
use oauth2::TokenResponse;
use oauth2::TokenUrl;
use oauth2::basic::BasicClient;

use super::now_unix;

/// Exchange the stored refresh token for fresh credentials. Requires the
/// token to carry its issuing `token_endpoint` and a refresh token;
/// otherwise the caller must fall back to an interactive login.
pub async fn refresh_access_token(token: &OAuthToken) -> Result<OAuthToken, ProxyError> {
    let Some(refresh_token) = &token.refresh_token else {
        return Err(ProxyError::auth_required(
            "stored token has no refresh token; interactive login required",
        ));
    };
    let Some(token_endpoint) = &token.token_endpoint else {
        return Err(ProxyError::oauth_misconfigured(
            "stored token has no token endpoint; interactive login required",
        ));
    };

    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| ProxyError::transport(format!("failed to build HTTP client: {err}")))?;

    let token_url = TokenUrl::new(token_endpoint.clone()).map_err(|err| {
        ProxyError::oauth_misconfigured(format!("invalid token endpoint: {err}"))
    })?;
    let oauth_client =
        BasicClient::new(ClientId::new(token.client_id.clone())).set_token_uri(token_url);

    let response = oauth_client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
        .request_async(&http)
        .await
        .map_err(|err| ProxyError::auth_required(format!("token refresh failed: {err}")))?;

    Ok(OAuthToken {
        access_token: response.access_token().secret().clone(),
        refresh_token: response
            .refresh_token()
            .map(|rt| rt.secret().clone())
            .or_else(|| token.refresh_token.clone()),
        expires_at: response
            .expires_in()
            .map(|ttl| now_unix() + ttl.as_secs() as i64),
        scopes: response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_ref().to_string()).collect())
            .unwrap_or_else(|| token.scopes.clone()),
        client_id: token.client_id.clone(),
        token_endpoint: token.token_endpoint.clone(),
    })
}
