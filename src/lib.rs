//! # tower-oauth2-bearer
//!
//! OAuth2 bearer token authentication for [Tower](https://docs.rs/tower)
//! services.
//!
//! This crate implements the resource server side of bearer token
//! authentication per RFC 6750: it extracts the token from an incoming
//! request, resolves the issuing authority's verification material (a
//! static shared secret or remote signing keys found through OIDC/OAuth2
//! discovery), verifies the token's signature and claims, and exposes
//! composable authorization checks for request pipelines.
//!
//! # Architecture
//!
//! - **Token extraction** ([`extract`]): pulls the bearer token from the
//!   `Authorization` header, the `access_token` query parameter, or a
//!   form body field — exactly one of which must be present.
//!
//! - **Discovery** ([`discovery`]): resolves authorization server metadata
//!   from the issuer's well-known endpoints, with TTL caching and fetch
//!   coalescing scoped to the verifier instance.
//!
//! - **Key resolution** ([`jwks`]): a constant key from a shared secret,
//!   or a cached remote JSON Web Key Set with cooldown-throttled refresh
//!   on key rotation.
//!
//! - **Verification** ([`verifier`]): [`JwtVerifier`] orchestrates
//!   discovery, key resolution, signature verification (via the
//!   `jsonwebtoken` crate), and an ordered claim validation pipeline
//!   ([`validate`]).
//!
//! - **Authorization** ([`claims`]): [`ClaimCheck`] predicates
//!   (`claim_equals`, `claim_includes`, `required_scopes`,
//!   `scope_includes_any`) run downstream against the verified claims.
//!
//! - **Middleware** ([`middleware`]): [`BearerAuthLayer`] guards requests
//!   and injects [`VerifiedClaims`] into request extensions;
//!   [`ClaimCheckLayer`] enforces authorization checks per route.
//!
//! # Example
//!
//! ```rust,no_run
//! use tower_oauth2_bearer::{BearerAuthLayer, ClaimCheck, ClaimCheckLayer, JwtVerifier};
//!
//! # fn main() -> Result<(), tower_oauth2_bearer::ConfigError> {
//! let verifier = JwtVerifier::builder()
//!     .issuer_base_url("https://issuer.example.com")
//!     .audience("https://api.example.com")
//!     .build()?;
//!
//! let auth = BearerAuthLayer::new(verifier);
//! let can_write = ClaimCheckLayer::new(ClaimCheck::required_scopes(["write:messages"]));
//!
//! // let app = axum::Router::new()
//! //     .route("/messages", axum::routing::post(create_message).layer(can_write))
//! //     .layer(auth);
//! # Ok(())
//! # }
//! ```
//!
//! Handlers read the verified token from request extensions:
//!
//! ```rust,ignore
//! async fn create_message(
//!     axum::Extension(auth): axum::Extension<tower_oauth2_bearer::VerifiedClaims>,
//! ) -> String {
//!     format!("hello {:?}", auth.claim("sub"))
//! }
//! ```
//!
//! # Error semantics
//!
//! All failures surface as [`AuthError`] carrying an HTTP status, an
//! RFC 6750 error code, and a `WWW-Authenticate` challenge: malformed
//! requests (missing/ambiguous token) are 400 `invalid_request`, failed
//! verification is 401 `invalid_token`, missing authentication context at
//! an authorization check is a bare 401 challenge, and missing scopes are
//! 403 `insufficient_scope` listing the required set. Misconfiguration is
//! a construction-time [`ConfigError`], never a per-request failure.

pub mod claims;
pub mod discovery;
pub mod errors;
pub mod extract;
pub mod jwks;
pub mod middleware;
pub mod secret;
pub mod validate;
pub mod verifier;

// Re-exports
pub use claims::{ClaimCheck, Scopes};
pub use discovery::{DiscoveryError, IssuerMetadata};
pub use errors::{AuthError, ConfigError};
pub use jwks::KeyError;
pub use middleware::{BearerAuthLayer, BearerAuthService, ClaimCheckLayer, ClaimCheckService};
pub use secret::Secret;
pub use validate::{AsyncPredicate, ClaimValidator, PredicateFuture};
pub use verifier::{JwtVerifier, JwtVerifierBuilder, VerifiedClaims};
