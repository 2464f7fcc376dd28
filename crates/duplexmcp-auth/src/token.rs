//! Token types and the bearer pass-through.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token-endpoint response (RFC 6749 §5.1). `access_token` and `token_type`
/// are required; a response missing either fails schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token
    pub access_token: String,
    /// Token type, `"Bearer"` in practice
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Refresh token; when the server rotates, replace the stored one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A bearer token with expiry bookkeeping, ready to be attached to
/// transport headers.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Wrap a raw bearer token with no known expiry.
    pub fn bearer(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    /// Build from a token response, stamping the expiry from `expires_in`.
    pub fn from_response(response: &TokenResponse) -> Self {
        Self {
            secret: response.access_token.clone(),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs as i64)),
        }
    }

    /// The raw token.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.secret)
    }

    /// Client-side expiry check. The server may have revoked the token
    /// regardless.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_response_requires_access_token_and_type() {
        assert!(
            serde_json::from_value::<TokenResponse>(json!({"token_type": "Bearer"})).is_err()
        );
        let parsed: TokenResponse = serde_json::from_value(json!({
            "access_token": "abc",
            "token_type": "Bearer",
            "expires_in": 3600,
        }))
        .unwrap();
        assert_eq!(parsed.refresh_token, None);
    }

    #[test]
    fn bearer_header_and_expiry() {
        let token = AccessToken::bearer("abc");
        assert_eq!(token.authorization_header(), "Bearer abc");
        assert!(!token.is_expired());

        let expired = AccessToken::from_response(&TokenResponse {
            access_token: "old".into(),
            token_type: "Bearer".into(),
            expires_in: Some(0),
            refresh_token: None,
            scope: None,
        });
        assert!(expired.is_expired());
    }
}
