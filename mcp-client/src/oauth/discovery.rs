//! RFC 8414 authorization-server metadata discovery and RFC 7591 dynamic
//! client registration.

use mcpproxy_protocol::ProxyError;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ProtectedResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClientRegistrationResponse {
    client_id: String,
}

/// Discover the authorization server governing `server_url`.
///
/// Tries, in order: path-aware and root `.well-known/oauth-authorization-server`
/// documents on the server's origin, then the protected-resource document's
/// `authorization_servers` indirection. Every miss downgrades to the next
/// candidate; exhaustion is `OAuthMisconfigured`.
pub async fn discover_auth_server(
    http: &reqwest::Client,
    server_url: &str,
) -> Result<AuthServerMetadata, ProxyError> {
    let url = Url::parse(server_url).map_err(|err| {
        ProxyError::oauth_misconfigured(format!("invalid server URL `{server_url}`: {err}"))
    })?;
    let origin = url.origin().ascii_serialization();
    let path = url.path().trim_end_matches('/');

    let mut candidates = Vec::new();
    if !path.is_empty() {
        candidates.push(format!(
            "{origin}/.well-known/oauth-authorization-server{path}"
        ));
    }
    candidates.push(format!("{origin}/.well-known/oauth-authorization-server"));

    for candidate in &candidates {
        if let Some(metadata) = fetch_metadata(http, candidate).await {
            return Ok(metadata);
        }
    }

    // Indirection: the resource server may point at a separate issuer.
    let mut resource_candidates = Vec::new();
    if !path.is_empty() {
        resource_candidates.push(format!(
            "{origin}/.well-known/oauth-protected-resource{path}"
        ));
    }
    resource_candidates.push(format!("{origin}/.well-known/oauth-protected-resource"));

    for candidate in &resource_candidates {
        let Some(resource) = fetch_json::<ProtectedResourceMetadata>(http, candidate).await
        else {
            continue;
        };
        for issuer in &resource.authorization_servers {
            let issuer_doc = format!(
                "{}/.well-known/oauth-authorization-server",
                issuer.trim_end_matches('/')
            );
            if let Some(metadata) = fetch_metadata(http, &issuer_doc).await {
                return Ok(metadata);
            }
        }
    }

    Err(ProxyError::oauth_misconfigured(format!(
        "no OAuth authorization server metadata found for `{server_url}`"
    )))
}

async fn fetch_metadata(http: &reqwest::Client, url: &str) -> Option<AuthServerMetadata> {
    fetch_json::<AuthServerMetadata>(http, url).await
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Option<T> {
    let response = match http.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!("metadata fetch failed for {url}: {err}");
            return None;
        }
    };
    if !response.status().is_success() {
        debug!("metadata fetch for {url} returned {}", response.status());
        return None;
    }
    match response.json::<T>().await {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!("metadata document at {url} did not parse: {err}");
            None
        }
    }
}

/// Register a public client with the authorization server and return the
/// issued client id.
pub async fn register_client(
    http: &reqwest::Client,
    metadata: &AuthServerMetadata,
    redirect_uri: &str,
    client_name: &str,
) -> Result<String, ProxyError> {
    let Some(registration_endpoint) = &metadata.registration_endpoint else {
        return Err(ProxyError::oauth_misconfigured(
            "authorization server does not support dynamic client registration",
        ));
    };

    let body = serde_json::json!({
        "client_name": client_name,
        "redirect_uris": [redirect_uri],
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "token_endpoint_auth_method": "none",
    });

    let response = http
        .post(registration_endpoint)
        .json(&body)
        .send()
        .await
        .map_err(|err| {
            ProxyError::oauth_misconfigured(format!("client registration failed: {err}"))
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProxyError::oauth_misconfigured(format!(
            "client registration returned {status}"
        )));
    }
    let registered: ClientRegistrationResponse = response.json().await.map_err(|err| {
        ProxyError::oauth_misconfigured(format!("client registration response did not parse: {err}"))
    })?;
    Ok(registered.client_id)
}
