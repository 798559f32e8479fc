//! Token verification.
//!
//! [`JwtVerifier`] orchestrates the full verification flow: issuer
//! metadata discovery (when configured), signing-key resolution, signature
//! verification through `jsonwebtoken`, and the claim validation pipeline.
//! Configuration is validated once at construction; per-request failures
//! of any stage surface uniformly as [`AuthError::InvalidToken`] with the
//! originating diagnostic preserved.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use url::Url;

use crate::discovery::{DiscoveryCache, DiscoveryError};
use crate::errors::{AuthError, ConfigError};
use crate::jwks::{KeyError, KeySource, RemoteKeys};
use crate::secret::Secret;
use crate::validate::{self, ClaimValidator, FailedClaim, ValidatorSet};

const ASYMMETRIC_ALGS: [&str; 11] = [
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES256K", "ES384", "ES512",
    "EdDSA",
];
const SYMMETRIC_ALGS: [&str; 3] = ["HS256", "HS384", "HS512"];

const DEFAULT_COOLDOWN: Duration = Duration::from_millis(30_000);
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_millis(600_000);
const DEFAULT_CLOCK_TOLERANCE_SECS: u64 = 5;

/// A successfully verified token: decoded header and payload plus the raw
/// compact form. Attached to request extensions by the middleware and
/// discarded with the request.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    /// Decoded protected header.
    pub header: Map<String, Value>,
    /// Decoded payload claims.
    pub payload: Map<String, Value>,
    /// The raw token as presented.
    pub token: String,
}

impl VerifiedClaims {
    /// Returns a payload claim by name.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Parse the `scope` claim (space-delimited string or array) into a
    /// set of individual scopes.
    pub fn scopes(&self) -> HashSet<String> {
        match self.payload.get("scope") {
            Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => HashSet::new(),
        }
    }

    /// Check if the token was granted a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(scope)
    }
}

/// Internal verification failure; stringified into
/// [`AuthError::InvalidToken`] at the public boundary.
#[derive(Debug, thiserror::Error)]
enum VerifyError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("{0}")]
    Jose(String),

    #[error(transparent)]
    Claim(#[from] FailedClaim),

    #[error("no 'jwks_uri' available: configure one or use discovery")]
    UnresolvedJwksUri,

    #[error("no 'issuer' available: configure one or use discovery")]
    UnresolvedIssuer,
}

/// Builder for [`JwtVerifier`].
///
/// # Example
///
/// ```rust
/// use tower_oauth2_bearer::JwtVerifier;
///
/// let verifier = JwtVerifier::builder()
///     .issuer_base_url("https://issuer.example.com")
///     .audience("https://api.example.com")
///     .build()
///     .unwrap();
/// # drop(verifier);
/// ```
#[derive(Default)]
pub struct JwtVerifierBuilder {
    issuer_base_url: Option<String>,
    audience: Vec<String>,
    issuer: Option<String>,
    jwks_uri: Option<String>,
    secret: Option<Secret>,
    token_signing_alg: Option<String>,
    cooldown_duration: Option<Duration>,
    timeout_duration: Option<Duration>,
    cache_max_age: Option<Duration>,
    clock_tolerance: Option<u64>,
    max_token_age: Option<u64>,
    strict: bool,
    validators: Vec<(String, ClaimValidator)>,
}

impl JwtVerifierBuilder {
    /// Seed the builder from the process environment: `ISSUER_BASE_URL`,
    /// `JWKS_URI`, `ISSUER`, `AUDIENCE`, `SECRET`, `TOKEN_SIGNING_ALG`.
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        let mut builder = Self::default();
        builder.issuer_base_url = var("ISSUER_BASE_URL");
        builder.jwks_uri = var("JWKS_URI");
        builder.issuer = var("ISSUER");
        builder.secret = var("SECRET").map(Secret::from);
        builder.token_signing_alg = var("TOKEN_SIGNING_ALG");
        if let Some(audience) = var("AUDIENCE") {
            builder.audience.push(audience);
        }
        builder
    }

    /// Base URL of the authorization server, used for metadata discovery.
    pub fn issuer_base_url(mut self, url: impl Into<String>) -> Self {
        self.issuer_base_url = Some(url.into());
        self
    }

    /// Add an accepted audience. At least one is required.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience.push(audience.into());
        self
    }

    /// Add several accepted audiences.
    pub fn audiences(mut self, audiences: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.audience.extend(audiences.into_iter().map(Into::into));
        self
    }

    /// Expected `iss` value. Filled from discovery when unset.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Location of the signing key set. Filled from discovery when unset.
    pub fn jwks_uri(mut self, uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(uri.into());
        self
    }

    /// Shared secret for symmetrically signed tokens. Mutually exclusive
    /// with `jwks_uri`; requires a symmetric `token_signing_alg`.
    pub fn secret(mut self, secret: impl Into<Secret>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Pin the accepted signing algorithm.
    pub fn token_signing_alg(mut self, alg: impl Into<String>) -> Self {
        self.token_signing_alg = Some(alg.into());
        self
    }

    /// Minimum interval between forced key-set refreshes triggered by an
    /// unrecognized key id. Defaults to 30 seconds.
    pub fn cooldown_duration(mut self, duration: Duration) -> Self {
        self.cooldown_duration = Some(duration);
        self
    }

    /// Timeout applied to discovery and key-set fetches. Defaults to
    /// 5 seconds.
    pub fn timeout_duration(mut self, duration: Duration) -> Self {
        self.timeout_duration = Some(duration);
        self
    }

    /// Maximum age of cached discovery documents and key sets. Defaults
    /// to 10 minutes.
    pub fn cache_max_age(mut self, duration: Duration) -> Self {
        self.cache_max_age = Some(duration);
        self
    }

    /// Allowed clock skew in seconds when checking time-based claims.
    /// Defaults to 5.
    pub fn clock_tolerance(mut self, seconds: u64) -> Self {
        self.clock_tolerance = Some(seconds);
        self
    }

    /// Maximum accepted token age in seconds, enforced against `iat`.
    pub fn max_token_age(mut self, seconds: u64) -> Self {
        self.max_token_age = Some(seconds);
        self
    }

    /// Enforce the stricter claim rules of RFC 9068 (`at+jwt` typ,
    /// mandatory `iat`/`sub`/`client_id`/`jti`).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Override or add a claim validator. Overrides for default claims
    /// replace the default rule; other claims are validated after the
    /// defaults, in insertion order.
    pub fn validator(mut self, claim: impl Into<String>, validator: ClaimValidator) -> Self {
        self.validators.push((claim.into(), validator));
        self
    }

    /// Validates the configuration and builds the verifier.
    pub fn build(self) -> Result<JwtVerifier, ConfigError> {
        let has_issuer = self.issuer.is_some();
        if !(self.issuer_base_url.is_some()
            || (has_issuer && self.jwks_uri.is_some())
            || (has_issuer && self.secret.is_some()))
        {
            return Err(ConfigError::MissingIssuerConfig);
        }
        if self.secret.is_some() && self.jwks_uri.is_some() {
            return Err(ConfigError::SecretAndJwksUri);
        }
        if self.audience.is_empty() {
            return Err(ConfigError::MissingAudience);
        }
        match (&self.secret, self.token_signing_alg.as_deref()) {
            (Some(_), Some(alg)) if SYMMETRIC_ALGS.contains(&alg) => {}
            (Some(_), _) => return Err(ConfigError::SymmetricAlgRequired),
            (None, Some(alg)) if !ASYMMETRIC_ALGS.contains(&alg) => {
                return Err(ConfigError::AsymmetricAlgRequired);
            }
            _ => {}
        }

        let timeout = self.timeout_duration.unwrap_or(DEFAULT_TIMEOUT);
        let cooldown = self.cooldown_duration.unwrap_or(DEFAULT_COOLDOWN);
        let cache_max_age = self.cache_max_age.unwrap_or(DEFAULT_CACHE_MAX_AGE);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let discovery = match &self.issuer_base_url {
            Some(base) => {
                let url = Url::parse(base)
                    .map_err(|e| ConfigError::InvalidIssuerBaseUrl(e.to_string()))?;
                Some(DiscoveryCache::new(http.clone(), url, cache_max_age))
            }
            None => None,
        };

        let keys = match &self.secret {
            Some(secret) => {
                KeySource::Secret(Arc::new(DecodingKey::from_secret(secret.expose())))
            }
            None => KeySource::Remote(RemoteKeys::new(http, cooldown, cache_max_age)),
        };

        Ok(JwtVerifier {
            audience: self.audience,
            issuer: self.issuer,
            jwks_uri: self.jwks_uri,
            token_signing_alg: self.token_signing_alg,
            clock_tolerance: self.clock_tolerance.unwrap_or(DEFAULT_CLOCK_TOLERANCE_SECS),
            max_token_age: self.max_token_age,
            strict: self.strict,
            custom_validators: self.validators,
            discovery,
            keys,
            validators: OnceCell::new(),
        })
    }
}

/// Verifies bearer tokens against a single issuer configuration.
///
/// A verifier owns its discovery and key caches; share one instance (for
/// example behind an `Arc`) across all requests that use the same
/// configuration so the caches actually get hit.
pub struct JwtVerifier {
    audience: Vec<String>,
    issuer: Option<String>,
    jwks_uri: Option<String>,
    token_signing_alg: Option<String>,
    clock_tolerance: u64,
    max_token_age: Option<u64>,
    strict: bool,
    custom_validators: Vec<(String, ClaimValidator)>,
    discovery: Option<DiscoveryCache>,
    keys: KeySource,
    validators: OnceCell<ValidatorSet>,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("jwks_uri", &self.jwks_uri)
            .field("token_signing_alg", &self.token_signing_alg)
            .field("clock_tolerance", &self.clock_tolerance)
            .field("max_token_age", &self.max_token_age)
            .field("strict", &self.strict)
            .field("custom_validators", &self.custom_validators.len())
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Returns a new [`JwtVerifierBuilder`].
    pub fn builder() -> JwtVerifierBuilder {
        JwtVerifierBuilder::default()
    }

    /// Verifies a compact JWT and returns its decoded parts.
    ///
    /// Failures at any stage (discovery, key resolution, signature, claim
    /// validation) are reported as [`AuthError::InvalidToken`] carrying
    /// the stage's diagnostic message.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, AuthError> {
        self.verify_token(token)
            .await
            .map_err(|e| AuthError::invalid_token(e.to_string()))
    }

    async fn verify_token(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        // discovery fills in whatever the static configuration left unset,
        // and must complete before key resolution begins
        let (issuer, jwks_uri, allowed_algs) = match &self.discovery {
            Some(discovery) => {
                let metadata = discovery.resolve().await?;
                (
                    self.issuer
                        .clone()
                        .unwrap_or_else(|| metadata.issuer.clone()),
                    self.jwks_uri.clone().or_else(|| metadata.jwks_uri.clone()),
                    metadata.id_token_signing_alg_values_supported.clone(),
                )
            }
            None => (
                self.issuer.clone().ok_or(VerifyError::UnresolvedIssuer)?,
                self.jwks_uri.clone(),
                None,
            ),
        };

        let validators = self
            .validators
            .get_or_init(|| {
                let issuer = issuer.clone();
                async move {
                    ValidatorSet::merged(
                        validate::default_validators(
                            issuer,
                            self.audience.clone(),
                            self.clock_tolerance,
                            self.max_token_age,
                            self.strict,
                            allowed_algs,
                            self.token_signing_alg.clone(),
                        ),
                        &self.custom_validators,
                    )
                }
            })
            .await;

        let header =
            jsonwebtoken::decode_header(token).map_err(|e| VerifyError::Jose(e.to_string()))?;

        let key = match &self.keys {
            KeySource::Secret(key) => key.clone(),
            KeySource::Remote(remote) => {
                let uri = jwks_uri.as_deref().ok_or(VerifyError::UnresolvedJwksUri)?;
                remote.resolver_for(uri)?.decoding_key(&header).await?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.clock_tolerance;
        // the claim pipeline owns exp and aud so that failure order is fixed
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.required_spec_claims.clear();

        let decoded = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| VerifyError::Jose(e.to_string()))?;

        let header_claims = decode_json_part(token, 0)?;
        validate::validate(&decoded.claims, &header_claims, validators).await?;

        Ok(VerifiedClaims {
            header: header_claims,
            payload: decoded.claims,
            token: token.to_string(),
        })
    }
}

fn decode_json_part(token: &str, index: usize) -> Result<Map<String, Value>, VerifyError> {
    let part = token
        .split('.')
        .nth(index)
        .ok_or_else(|| VerifyError::Jose("malformed compact JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| VerifyError::Jose(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| VerifyError::Jose(e.to_string()))
}
