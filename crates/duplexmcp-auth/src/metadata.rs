//! Authorization-server metadata (RFC 8414).

use serde::{Deserialize, Serialize};

/// The `/.well-known/oauth-authorization-server` document, reduced to the
/// fields the flow consumes. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Where to send the user for authorization
    pub authorization_endpoint: String,

    /// Where codes and refresh tokens are exchanged
    pub token_endpoint: String,

    /// Dynamic client registration endpoint, when offered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Supported response types; the flow requires `"code"`
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported grant types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Supported PKCE methods; the flow requires `"S256"`
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    /// Supported client authentication methods at the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
}

impl AuthorizationServerMetadata {
    /// True when the server supports the authorization-code response type.
    pub fn supports_code_flow(&self) -> bool {
        self.response_types_supported.iter().any(|t| t == "code")
    }

    /// True when the server supports S256 code challenges.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m == "S256")
    }
}
