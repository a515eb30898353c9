//! Interactive PKCE login flow with a loopback callback server.

use std::sync::Arc;
use std::time::Duration;

use mcpproxy_protocol::ProxyError;
use mcpproxy_protocol::oauth::OAuthToken;
use mcpproxy_protocol::oauth::TokenStore;
use oauth2::AuthUrl;
use oauth2::AuthorizationCode;
use oauth2::ClientId;
use oauth2::CsrfToken;
use oauth2::PkceCodeChallenge;
use oauth2::RedirectUrl;
use oauth2::Scope;
use oauth2::TokenResponse;
use oauth2::TokenUrl;
use oauth2::basic::BasicClient;
use tiny_http::Response;
use tiny_http::Server;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::info;
use urlencoding::decode;

use super::discovery::discover_auth_server;
use super::discovery::register_client;
use super::now_unix;

const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);
const CLIENT_NAME: &str = "mcpproxy";

struct CallbackServerGuard {
    server: Arc<Server>,
}

impl Drop for CallbackServerGuard {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

struct OauthCallbackResult {
    code: String,
    state: String,
}

enum CallbackOutcome {
    Success(OauthCallbackResult),
    Error(String),
    Invalid,
}

fn parse_oauth_callback(path: &str) -> CallbackOutcome {
    let Some((route, query)) = path.split_once('?') else {
        return CallbackOutcome::Invalid;
    };
    if route != "/callback" {
        return CallbackOutcome::Invalid;
    }

    let mut code = None;
    let mut state = None;
    let mut error_description = None;

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Ok(decoded) = decode(value) else {
            continue;
        };
        let decoded = decoded.into_owned();
        match key {
            "code" => code = Some(decoded),
            "state" => state = Some(decoded),
            "error_description" => error_description = Some(decoded),
            _ => {}
        }
    }

    if let (Some(code), Some(state)) = (code, state) {
        return CallbackOutcome::Success(OauthCallbackResult { code, state });
    }

    if let Some(description) = error_description {
        return CallbackOutcome::Error(description);
    }

    CallbackOutcome::Invalid
}

fn spawn_callback_server(server: Arc<Server>, tx: oneshot::Sender<(String, String)>) {
    tokio::task::spawn_blocking(move || {
        let mut tx = Some(tx);
        while let Ok(request) = server.recv() {
            let path = request.url().to_string();
            match parse_oauth_callback(&path) {
                CallbackOutcome::Success(OauthCallbackResult { code, state }) => {
                    let response = Response::from_string(
                        "Authentication complete. You may close this window.",
                    );
                    if let Err(err) = request.respond(response) {
                        tracing::warn!("failed to respond to OAuth callback: {err}");
                    }
                    if let Some(tx) = tx.take()
                        && tx.send((code, state)).is_err()
                    {
                        tracing::warn!("OAuth callback receiver dropped");
                    }
                    break;
                }
                CallbackOutcome::Error(description) => {
                    let response = Response::from_string(format!("OAuth error: {description}"))
                        .with_status_code(400);
                    let _ = request.respond(response);
                }
                CallbackOutcome::Invalid => {
                    let response =
                        Response::from_string("Invalid OAuth callback").with_status_code(400);
                    let _ = request.respond(response);
                }
            }
        }
    });
}

/// Run the full interactive flow for one upstream: discovery, registration
/// (reusing a previously issued client id when one is stored), browser
/// authorization with PKCE, code exchange, and persistence through the
/// token store.
pub async fn perform_oauth_login(
    server_name: &str,
    server_url: &str,
    scopes: &[String],
    token_store: &dyn TokenStore,
    open_browser: bool,
    login_timeout: Option<Duration>,
) -> Result<OAuthToken, ProxyError> {
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| ProxyError::transport(format!("failed to build HTTP client: {err}")))?;

    let metadata = discover_auth_server(&http, server_url).await?;

    let server = Arc::new(Server::http("127.0.0.1:0").map_err(|err| {
        ProxyError::transport(format!("failed to bind OAuth callback server: {err}"))
    })?);
    let guard = CallbackServerGuard {
        server: Arc::clone(&server),
    };
    let redirect_uri = match server.server_addr() {
        tiny_http::ListenAddr::IP(addr) => format!("http://{addr}/callback"),
        #[cfg(unix)]
        tiny_http::ListenAddr::Unix(_) => {
            return Err(ProxyError::internal("unexpected unix callback listener"));
        }
    };

    let existing_client_id = token_store
        .get_token(server_name, server_url)
        .await
        .ok()
        .flatten()
        .map(|token| token.client_id)
        .filter(|client_id| !client_id.is_empty());
    let client_id = match existing_client_id {
        Some(client_id) => client_id,
        None => register_client(&http, &metadata, &redirect_uri, CLIENT_NAME).await?,
    };

    let auth_url = AuthUrl::new(metadata.authorization_endpoint.clone()).map_err(|err| {
        ProxyError::oauth_misconfigured(format!("invalid authorization endpoint: {err}"))
    })?;
    let token_url = TokenUrl::new(metadata.token_endpoint.clone()).map_err(|err| {
        ProxyError::oauth_misconfigured(format!("invalid token endpoint: {err}"))
    })?;
    let redirect_url = RedirectUrl::new(redirect_uri.clone())
        .map_err(|err| ProxyError::internal(format!("invalid redirect URI: {err}")))?;

    let oauth_client = BasicClient::new(ClientId::new(client_id.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let mut authorize = oauth_client
        .authorize_url(CsrfToken::new_random)
        .set_pkce_challenge(pkce_challenge);
    for scope in scopes {
        authorize = authorize.add_scope(Scope::new(scope.clone()));
    }
    let (authorization_url, csrf_token) = authorize.url();

    let (tx, rx) = oneshot::channel();
    spawn_callback_server(server, tx);

    if open_browser {
        info!("authorize `{server_name}` by opening: {authorization_url}");
        if webbrowser::open(authorization_url.as_str()).is_err() {
            info!("browser launch failed; copy the URL above manually");
        }
    } else {
        info!("authorization URL for `{server_name}`: {authorization_url}");
    }

    let login_timeout = login_timeout.unwrap_or(DEFAULT_LOGIN_TIMEOUT);
    let (code, callback_state) = timeout(login_timeout, rx)
        .await
        .map_err(|_| ProxyError::timeout("timed out waiting for OAuth callback"))?
        .map_err(|_| ProxyError::auth_required("OAuth callback was cancelled"))?;

    if callback_state != *csrf_token.secret() {
        return Err(ProxyError::auth_required(
            "OAuth callback state mismatch; aborting login",
        ));
    }

    let token_response = oauth_client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request_async(&http)
        .await
        .map_err(|err| {
            ProxyError::auth_required(format!("authorization code exchange failed: {err}"))
        })?;

    let token = OAuthToken {
        access_token: token_response.access_token().secret().clone(),
        refresh_token: token_response
            .refresh_token()
            .map(|rt| rt.secret().clone()),
        expires_at: token_response
            .expires_in()
            .map(|ttl| now_unix() + ttl.as_secs() as i64),
        scopes: token_response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_ref().to_string()).collect())
            .unwrap_or_else(|| scopes.to_vec()),
        client_id,
        token_endpoint: Some(metadata.token_endpoint),
    };

    token_store
        .save_token(server_name, server_url, &token)
        .await
        .map_err(|err| ProxyError::internal(format!("failed to persist OAuth token: {err}")))?;

    drop(guard);
    Ok(token)
}
