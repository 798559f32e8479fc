//! Error types and `WWW-Authenticate` header construction.
//!
//! Implements bearer token error responses per RFC 6750 Section 3: each
//! [`AuthError`] variant maps to an HTTP status code, a machine-readable
//! error code, and a challenge header value built by
//! [`www_authenticate`](AuthError::www_authenticate).

use std::fmt;

use axum::http::StatusCode;

/// Authentication/authorization failure visible at the HTTP boundary.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No bearer token was found in the header, query, or body.
    /// Returns HTTP 400 with `error="invalid_request"`.
    MissingToken,

    /// More than one token source was populated on a single request.
    /// Returns HTTP 400 with `error="invalid_request"`.
    AmbiguousToken,

    /// The token failed verification (signature, discovery, key lookup,
    /// or claim validation). Returns HTTP 401 with `error="invalid_token"`.
    InvalidToken {
        /// Diagnostic message from the failing stage.
        description: String,
    },

    /// An authorization check ran without an authenticated context.
    /// Returns HTTP 401 with a bare challenge.
    Unauthorized,

    /// The token is valid but lacks a required scope or claim.
    /// Returns HTTP 403 with `error="insufficient_scope"`.
    InsufficientScope {
        /// Scopes the caller must present.
        required: Vec<String>,
        /// Diagnostic message.
        description: String,
    },
}

impl AuthError {
    /// Shorthand for an [`AuthError::InvalidToken`] with the given message.
    pub fn invalid_token(description: impl Into<String>) -> Self {
        AuthError::InvalidToken {
            description: description.into(),
        }
    }

    pub(crate) fn insufficient_scope(
        required: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        AuthError::InsufficientScope {
            required,
            description: description.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// - 400 for malformed requests (missing or ambiguous token)
    /// - 401 for authentication failures
    /// - 403 for authorization failures (insufficient scope)
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingToken | AuthError::AmbiguousToken => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken { .. } | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientScope { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Returns the RFC 6750 error code, if any.
    ///
    /// A bare [`AuthError::Unauthorized`] challenge carries no code.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            AuthError::MissingToken | AuthError::AmbiguousToken => Some("invalid_request"),
            AuthError::InvalidToken { .. } => Some("invalid_token"),
            AuthError::Unauthorized => None,
            AuthError::InsufficientScope { .. } => Some("insufficient_scope"),
        }
    }

    /// Builds the `WWW-Authenticate` header value.
    ///
    /// Format: `Bearer realm="api"[, error="<code>",
    /// error_description="<message>"][, scope="<space-separated list>"]`.
    /// Double quotes in the message are replaced with single quotes so the
    /// header stays parseable.
    pub fn www_authenticate(&self) -> String {
        let mut value = String::from("Bearer realm=\"api\"");
        if let Some(code) = self.error_code() {
            let description = self.to_string().replace('"', "'");
            value.push_str(&format!(
                ", error=\"{code}\", error_description=\"{description}\""
            ));
        }
        if let AuthError::InsufficientScope { required, .. } = self {
            if !required.is_empty() {
                value.push_str(&format!(", scope=\"{}\"", required.join(" ")));
            }
        }
        value
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "bearer token is missing"),
            AuthError::AmbiguousToken => {
                write!(f, "more than one method used for authentication")
            }
            AuthError::InvalidToken { description } => write!(f, "{}", description),
            AuthError::Unauthorized => write!(f, "unauthorized"),
            AuthError::InsufficientScope { description, .. } => write!(f, "{}", description),
        }
    }
}

impl std::error::Error for AuthError {}

/// Fatal verifier misconfiguration, raised at construction time.
///
/// Configuration errors abort setup; they are never surfaced per request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "an 'issuer_base_url', an 'issuer' and 'jwks_uri', or an 'issuer' and 'secret' must be provided"
    )]
    MissingIssuerConfig,

    #[error("'secret' and 'jwks_uri' are mutually exclusive")]
    SecretAndJwksUri,

    #[error("an 'audience' is required to validate the 'aud' claim")]
    MissingAudience,

    #[error(
        "a 'token_signing_alg' of HS256, HS384 or HS512 is required when a 'secret' is configured"
    )]
    SymmetricAlgRequired,

    #[error(
        "'token_signing_alg' must be an asymmetric algorithm (RS/PS/ES families or EdDSA) when no 'secret' is configured"
    )]
    AsymmetricAlgRequired,

    #[error("invalid 'issuer_base_url': {0}")]
    InvalidIssuerBaseUrl(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
