//! The authorization-code flow: discovery, start, exchange, refresh,
//! dynamic registration.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use duplexmcp_protocol::{LATEST_PROTOCOL_VERSION, McpError, McpResult};

use crate::metadata::AuthorizationServerMetadata;
use crate::pkce::{code_challenge_s256, generate_code_verifier};
use crate::token::TokenResponse;

const WELL_KNOWN_PATH: &str = "/.well-known/oauth-authorization-server";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Inputs to [`start_authorization`].
#[derive(Debug, Clone)]
pub struct StartAuthorizationRequest {
    /// OAuth client identifier
    pub client_id: String,
    /// Redirect uri registered for the client
    pub redirect_uri: String,
    /// Requested scopes (joined with spaces; empty means none requested)
    pub scopes: Vec<String>,
}

/// Output of [`start_authorization`]: the url to send the user to, and the
/// verifier that must be kept secret until the code exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    /// Fully assembled authorization url
    pub authorization_url: String,
    /// PKCE code verifier for the later exchange
    pub code_verifier: String,
}

/// Inputs to [`AuthorizationFlow::exchange_authorization`].
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    /// OAuth client identifier
    pub client_id: String,
    /// Client secret, for confidential clients
    pub client_secret: Option<String>,
    /// Authorization code returned on the redirect
    pub code: String,
    /// The verifier from [`AuthorizationStart`]
    pub code_verifier: String,
    /// The redirect uri the code was issued for
    pub redirect_uri: String,
}

/// Inputs to [`AuthorizationFlow::refresh_authorization`].
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    /// OAuth client identifier
    pub client_id: String,
    /// Client secret, for confidential clients
    pub client_secret: Option<String>,
    /// The refresh token; replace it if the response rotates it
    pub refresh_token: String,
}

/// Client metadata submitted for dynamic registration (RFC 7591).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationMetadata {
    /// Human-readable client name
    pub client_name: String,
    /// Redirect uris the client will use
    pub redirect_uris: Vec<String>,
    /// Requested grant types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,
    /// Requested token-endpoint auth method (`"none"` for public clients)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    /// Requested scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Registration result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// Issued client identifier
    pub client_id: String,
    /// Issued client secret, absent for public clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Seconds-since-epoch issue time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    /// Seconds-since-epoch secret expiry, `0` meaning never
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

/// Assemble the authorization url and a fresh PKCE pair.
///
/// Requires the server to support the `code` response type and `S256`
/// challenges; anything else fails before any secret is generated.
pub fn start_authorization(
    metadata: &AuthorizationServerMetadata,
    request: &StartAuthorizationRequest,
) -> McpResult<AuthorizationStart> {
    if !metadata.supports_code_flow() {
        return Err(McpError::auth(
            "Authorization server does not support the code response type",
        ));
    }
    if !metadata.supports_s256() {
        return Err(McpError::auth(
            "Authorization server does not support S256 code challenges",
        ));
    }

    let code_verifier = generate_code_verifier();
    let code_challenge = code_challenge_s256(&code_verifier);

    let mut url = Url::parse(&metadata.authorization_endpoint)
        .map_err(|e| McpError::auth(format!("Invalid authorization endpoint: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &request.client_id)
            .append_pair("redirect_uri", &request.redirect_uri)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");
        if !request.scopes.is_empty() {
            query.append_pair("scope", &request.scopes.join(" "));
        }
    }

    Ok(AuthorizationStart {
        authorization_url: url.into(),
        code_verifier,
    })
}

/// HTTP side of the flow. Stateless beyond the reused connection pool.
#[derive(Clone)]
pub struct AuthorizationFlow {
    http: reqwest::Client,
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow").finish_non_exhaustive()
    }
}

impl AuthorizationFlow {
    /// Flow with a fresh HTTP client. Redirects are never followed; an
    /// authorization server that redirects token requests is misbehaving.
    pub fn new() -> McpResult<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| McpError::auth(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Flow over a caller-supplied HTTP client.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetch `{base}/.well-known/oauth-authorization-server`.
    ///
    /// `None` when the server answers 404 (no authorization offered); an
    /// auth error on any other non-2xx status.
    pub async fn discover(
        &self,
        base: &str,
    ) -> McpResult<Option<AuthorizationServerMetadata>> {
        let url = Url::parse(base)
            .and_then(|base| base.join(WELL_KNOWN_PATH))
            .map_err(|e| McpError::auth(format!("Invalid authorization base url: {e}")))?;

        let response = self
            .http
            .get(url.clone())
            .header(PROTOCOL_VERSION_HEADER, LATEST_PROTOCOL_VERSION)
            .send()
            .await
            .map_err(|e| McpError::auth(format!("Metadata discovery failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(%url, "no authorization-server metadata");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(McpError::auth(format!(
                "Metadata discovery failed: {}",
                response.status()
            )));
        }
        let metadata = response
            .json::<AuthorizationServerMetadata>()
            .await
            .map_err(|e| McpError::auth(format!("Malformed authorization metadata: {e}")))?;
        Ok(Some(metadata))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_authorization(
        &self,
        metadata: &AuthorizationServerMetadata,
        request: &ExchangeRequest,
    ) -> McpResult<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", &request.code),
            ("code_verifier", &request.code_verifier),
            ("client_id", &request.client_id),
            ("redirect_uri", &request.redirect_uri),
        ];
        if let Some(secret) = &request.client_secret {
            form.push(("client_secret", secret));
        }
        self.token_request(&metadata.token_endpoint, &form, "Token exchange")
            .await
    }

    /// Obtain a fresh access token from a refresh token. When the response
    /// carries a new refresh token the server rotated it; store the new one.
    pub async fn refresh_authorization(
        &self,
        metadata: &AuthorizationServerMetadata,
        request: &RefreshRequest,
    ) -> McpResult<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", &request.refresh_token),
            ("client_id", &request.client_id),
        ];
        if let Some(secret) = &request.client_secret {
            form.push(("client_secret", secret));
        }
        self.token_request(&metadata.token_endpoint, &form, "Token refresh")
            .await
    }

    /// Register a client dynamically (RFC 7591).
    pub async fn register_client(
        &self,
        metadata: &AuthorizationServerMetadata,
        client_metadata: &ClientRegistrationMetadata,
    ) -> McpResult<ClientRegistration> {
        let endpoint = metadata.registration_endpoint.as_ref().ok_or_else(|| {
            McpError::auth("Authorization server does not support dynamic client registration")
        })?;

        let response = self
            .http
            .post(endpoint)
            .header(PROTOCOL_VERSION_HEADER, LATEST_PROTOCOL_VERSION)
            .json(client_metadata)
            .send()
            .await
            .map_err(|e| McpError::auth(format!("Dynamic client registration failed: {e}")))?;

        if !response.status().is_success() {
            return Err(McpError::auth(format!(
                "Dynamic client registration failed: {}",
                response.status()
            )));
        }
        response
            .json::<ClientRegistration>()
            .await
            .map_err(|e| McpError::auth(format!("Malformed registration response: {e}")))
    }

    async fn token_request(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
        what: &str,
    ) -> McpResult<TokenResponse> {
        let response = self
            .http
            .post(endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| McpError::auth(format!("{what} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(McpError::auth(format!(
                "{what} failed: {}",
                response.status()
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| McpError::auth(format!("Malformed token response: {e}")))
    }
}
