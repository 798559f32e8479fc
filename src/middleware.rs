//! Tower middleware for bearer token authentication.
//!
//! [`BearerAuthLayer`] wraps a service with per-request token extraction
//! and verification. On success the [`VerifiedClaims`] are injected into
//! request extensions for downstream handlers; on failure the request is
//! answered with the error's status and `WWW-Authenticate` challenge,
//! unless the layer is configured to allow unauthenticated requests.
//!
//! [`ClaimCheckLayer`] applies a [`ClaimCheck`] downstream of the guard,
//! against the claims the guard attached.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tower::Layer;

use crate::claims::ClaimCheck;
use crate::errors::AuthError;
use crate::extract;
use crate::verifier::{JwtVerifier, VerifiedClaims};

/// Upper bound when buffering a form body in search of a token.
const FORM_BODY_LIMIT: usize = 64 * 1024;

/// Tower layer that authenticates requests with a [`JwtVerifier`].
///
/// # Example
///
/// ```rust,no_run
/// use tower_oauth2_bearer::{BearerAuthLayer, JwtVerifier};
///
/// let verifier = JwtVerifier::builder()
///     .issuer_base_url("https://issuer.example.com")
///     .audience("https://api.example.com")
///     .build()
///     .unwrap();
///
/// let layer = BearerAuthLayer::new(verifier);
/// // app = axum::Router::new()...layer(layer);
/// ```
#[derive(Clone)]
pub struct BearerAuthLayer {
    verifier: Arc<JwtVerifier>,
    auth_required: bool,
}

impl BearerAuthLayer {
    /// Create a layer that requires authentication on every request.
    pub fn new(verifier: JwtVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
            auth_required: true,
        }
    }

    /// Create a layer from an already shared verifier.
    pub fn from_shared(verifier: Arc<JwtVerifier>) -> Self {
        Self {
            verifier,
            auth_required: true,
        }
    }

    /// Whether unauthenticated requests are allowed through.
    ///
    /// With `false`, verification failures are swallowed and the request
    /// proceeds without attached claims; handlers can still distinguish
    /// authenticated callers by the presence of [`VerifiedClaims`].
    pub fn auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            verifier: self.verifier.clone(),
            auth_required: self.auth_required,
        }
    }
}

/// Tower service created by [`BearerAuthLayer`].
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    verifier: Arc<JwtVerifier>,
    auth_required: bool,
}

impl<S> tower_service::Service<Request<Body>> for BearerAuthService<S>
where
    S: tower_service::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let verifier = self.verifier.clone();
        let auth_required = self.auth_required;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let form_urlencoded = extract::is_form_urlencoded(&parts.headers);

            // only form submissions can carry a body token, so only those
            // bodies get buffered; an unreadable body carries no token
            let (body, form_bytes) = if form_urlencoded {
                match axum::body::to_bytes(body, FORM_BODY_LIMIT).await {
                    Ok(bytes) => (Body::from(bytes.clone()), Some(bytes)),
                    Err(_) => (Body::empty(), None),
                }
            } else {
                (body, None)
            };

            let outcome = match extract::bearer_token(
                &parts.headers,
                parts.uri.query(),
                form_bytes.as_deref(),
                form_urlencoded,
            ) {
                Ok(token) => verifier.verify(&token).await,
                Err(err) => Err(err),
            };

            let mut req = Request::from_parts(parts, body);
            match outcome {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(err) if !auth_required => {
                    tracing::debug!(error = %err, "proceeding unauthenticated");
                    inner.call(req).await
                }
                Err(err) => Ok(auth_error_response(&err)),
            }
        })
    }
}

/// Tower layer enforcing a [`ClaimCheck`] against the attached claims.
#[derive(Clone)]
pub struct ClaimCheckLayer {
    check: ClaimCheck,
}

impl ClaimCheckLayer {
    pub fn new(check: ClaimCheck) -> Self {
        Self { check }
    }
}

impl<S> Layer<S> for ClaimCheckLayer {
    type Service = ClaimCheckService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClaimCheckService {
            inner,
            check: self.check.clone(),
        }
    }
}

/// Tower service created by [`ClaimCheckLayer`].
#[derive(Clone)]
pub struct ClaimCheckService<S> {
    inner: S,
    check: ClaimCheck,
}

impl<S> tower_service::Service<Request<Body>> for ClaimCheckService<S>
where
    S: tower_service::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let check = self.check.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let auth = req.extensions().get::<VerifiedClaims>();
            match check.check(auth) {
                Ok(()) => inner.call(req).await,
                Err(err) => Ok(auth_error_response(&err)),
            }
        })
    }
}

/// Builds the HTTP response for an authentication/authorization failure:
/// status, `WWW-Authenticate` challenge, and a small JSON body.
fn auth_error_response(error: &AuthError) -> Response {
    let body = serde_json::json!({ "message": error.to_string() });
    let mut response = (error.status(), axum::Json(body)).into_response();
    if let Ok(value) = error.www_authenticate().parse() {
        response.headers_mut().insert("WWW-Authenticate", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use serde_json::json;
    use tower::ServiceExt;
    use tower_service::Service;

    const TEST_SECRET: &[u8] = b"middleware-test-secret";

    /// Inner service reporting whether claims were attached: 200 with
    /// claims, 204 without.
    #[derive(Clone)]
    struct ClaimsProbe;

    impl tower_service::Service<Request<Body>> for ClaimsProbe {
        type Response = Response;
        type Error = std::convert::Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Body>) -> Self::Future {
            let status = if req.extensions().get::<VerifiedClaims>().is_some() {
                StatusCode::OK
            } else {
                StatusCode::NO_CONTENT
            };
            Box::pin(async move {
                Ok(Response::builder()
                    .status(status)
                    .body(Body::empty())
                    .unwrap())
            })
        }
    }

    fn test_verifier() -> JwtVerifier {
        JwtVerifier::builder()
            .issuer("https://issuer.example.com/")
            .audience("https://api.example.com")
            .secret(TEST_SECRET)
            .token_signing_alg("HS256")
            .build()
            .unwrap()
    }

    fn make_token(extra: serde_json::Value) -> String {
        let mut claims = json!({
            "iss": "https://issuer.example.com/",
            "aud": "https://api.example.com",
            "sub": "user-1",
            "exp": crate::validate::unix_now() + 3600,
        });
        if let (Some(claims), Some(extra)) = (claims.as_object_mut(), extra.as_object()) {
            claims.extend(extra.clone());
        }
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_invalid_request() {
        let mut service = BearerAuthLayer::new(test_verifier()).layer(ClaimsProbe);
        let req = Request::builder().uri("/api").body(Body::empty()).unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let www = resp
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www.contains("invalid_request"));
    }

    #[tokio::test]
    async fn valid_token_attaches_claims() {
        let mut service = BearerAuthLayer::new(test_verifier()).layer(ClaimsProbe);
        let req = Request::builder()
            .uri("/api")
            .header("Authorization", format!("Bearer {}", make_token(json!({}))))
            .body(Body::empty())
            .unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn query_token_is_accepted() {
        let mut service = BearerAuthLayer::new(test_verifier()).layer(ClaimsProbe);
        let req = Request::builder()
            .uri(format!("/api?access_token={}", make_token(json!({}))))
            .body(Body::empty())
            .unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn form_body_token_is_accepted() {
        let mut service = BearerAuthLayer::new(test_verifier()).layer(ClaimsProbe);
        let req = Request::builder()
            .uri("/api")
            .method("POST")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("access_token={}", make_token(json!({})))))
            .unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn two_token_sources_are_rejected() {
        let mut service = BearerAuthLayer::new(test_verifier()).layer(ClaimsProbe);
        let token = make_token(json!({}));
        let req = Request::builder()
            .uri(format!("/api?access_token={token}"))
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_token_is_unauthorized() {
        let mut service = BearerAuthLayer::new(test_verifier()).layer(ClaimsProbe);
        let req = Request::builder()
            .uri("/api")
            .header("Authorization", "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let www = resp
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www.contains("invalid_token"));
    }

    #[tokio::test]
    async fn optional_auth_proceeds_without_claims() {
        let mut service = BearerAuthLayer::new(test_verifier())
            .auth_required(false)
            .layer(ClaimsProbe);
        let req = Request::builder().uri("/api").body(Body::empty()).unwrap();

        // no token: passes through, nothing attached, no error surfaced
        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn optional_auth_still_attaches_valid_claims() {
        let mut service = BearerAuthLayer::new(test_verifier())
            .auth_required(false)
            .layer(ClaimsProbe);
        let req = Request::builder()
            .uri("/api")
            .header("Authorization", format!("Bearer {}", make_token(json!({}))))
            .body(Body::empty())
            .unwrap();

        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scope_check_layer_enforces_scopes() {
        let guard = BearerAuthLayer::new(test_verifier());
        let check = ClaimCheckLayer::new(ClaimCheck::required_scopes(["read:x", "write:x"]));
        let mut service = guard.layer(check.layer(ClaimsProbe));

        let req = Request::builder()
            .uri("/api")
            .header(
                "Authorization",
                format!("Bearer {}", make_token(json!({"scope": "read:x"}))),
            )
            .body(Body::empty())
            .unwrap();
        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let www = resp
            .headers()
            .get("WWW-Authenticate")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www.contains("insufficient_scope"));
        assert!(www.contains("scope=\"read:x write:x\""));

        let req = Request::builder()
            .uri("/api")
            .header(
                "Authorization",
                format!(
                    "Bearer {}",
                    make_token(json!({"scope": "read:x write:x"}))
                ),
            )
            .body(Body::empty())
            .unwrap();
        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn claim_check_without_guard_is_unauthorized() {
        let check = ClaimCheckLayer::new(ClaimCheck::required_scopes(["read:x"]));
        let mut service = check.layer(ClaimsProbe);

        let req = Request::builder().uri("/api").body(Body::empty()).unwrap();
        let resp = service.ready().await.unwrap().call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()
                .get("WWW-Authenticate")
                .unwrap()
                .to_str()
                .unwrap(),
            "Bearer realm=\"api\""
        );
    }
}
