//! # duplexmcp-auth
//!
//! Client-side OAuth 2.1 authorization for MCP servers that demand it:
//! RFC 8414 metadata discovery, the authorization-code flow with PKCE
//! (S256 only), token refresh, and RFC 7591 dynamic client registration.
//! Pure request shaping over an HTTP client, no session state.
//!
//! The session core never touches this crate; callers run the flow
//! out-of-band, persist the tokens, and attach them to their transport's
//! headers via [`AccessToken::authorization_header`].
//!
//! ```rust,no_run
//! use duplexmcp_auth::{AuthorizationFlow, StartAuthorizationRequest, start_authorization};
//!
//! # async fn example() -> duplexmcp_protocol::McpResult<()> {
//! let flow = AuthorizationFlow::new()?;
//! let metadata = flow
//!     .discover("https://mcp.example.com")
//!     .await?
//!     .expect("server advertises no authorization metadata");
//!
//! let start = start_authorization(
//!     &metadata,
//!     &StartAuthorizationRequest {
//!         client_id: "my-client".into(),
//!         redirect_uri: "http://localhost:8910/callback".into(),
//!         scopes: vec![],
//!     },
//! )?;
//! // Send the user to start.authorization_url, keep start.code_verifier
//! // until the code comes back, then exchange it.
//! # Ok(())
//! # }
//! ```
//!
//! Deliberately absent: server-side token issuance and JWT verification.
//! Neither is part of the protocol core.

mod flow;
mod metadata;
mod pkce;
mod token;

pub use flow::{
    AuthorizationFlow, AuthorizationStart, ClientRegistration, ClientRegistrationMetadata,
    ExchangeRequest, RefreshRequest, StartAuthorizationRequest, start_authorization,
};
pub use metadata::AuthorizationServerMetadata;
pub use pkce::{code_challenge_s256, generate_code_verifier};
pub use token::{AccessToken, TokenResponse};
