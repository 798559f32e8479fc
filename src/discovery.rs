//! OIDC/OAuth2 authorization server metadata discovery.
//!
//! Resolves the metadata document for an issuer base URL, trying the OIDC
//! well-known path before the OAuth2 one, and caches the result per
//! verifier instance. Concurrent callers share a single in-flight fetch.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;
use url::Url;

const OIDC_DISCOVERY: &str = "/.well-known/openid-configuration";
const OAUTH2_DISCOVERY: &str = "/.well-known/oauth-authorization-server";

/// Authorization server metadata, as served from a well-known endpoint.
///
/// Only the fields this crate consumes are modeled; the rest of the
/// document is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuerMetadata {
    /// The authorization server's issuer identifier.
    #[serde(default)]
    pub issuer: String,

    /// Location of the server's JSON Web Key Set.
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Signing algorithms the server advertises for issued tokens.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

/// Metadata resolution failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("'issuer' not found in authorization server metadata")]
    MissingIssuer,

    #[error("failed to fetch authorization server metadata")]
    Exhausted,
}

type SharedDiscovery = Shared<BoxFuture<'static, Result<Arc<IssuerMetadata>, DiscoveryError>>>;

/// Per-verifier metadata cache.
///
/// A cache entry ages from the moment its fetch starts and is superseded
/// wholesale on refresh. The pending fetch itself is the coalescing
/// marker: callers arriving while one is in flight await the same shared
/// future. A failed resolution clears the entry so the next call retries
/// immediately.
pub(crate) struct DiscoveryCache {
    http: reqwest::Client,
    issuer_base_url: Url,
    cache_max_age: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_generation: u64,
    entry: Option<Entry>,
}

struct Entry {
    generation: u64,
    started: Instant,
    fut: SharedDiscovery,
}

impl DiscoveryCache {
    pub(crate) fn new(http: reqwest::Client, issuer_base_url: Url, cache_max_age: Duration) -> Self {
        Self {
            http,
            issuer_base_url,
            cache_max_age,
            state: Mutex::new(State::default()),
        }
    }

    /// Resolves the issuer's metadata, from cache when fresh.
    pub(crate) async fn resolve(&self) -> Result<Arc<IssuerMetadata>, DiscoveryError> {
        let (generation, fut) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &state.entry {
                Some(entry) if entry.started.elapsed() <= self.cache_max_age => {
                    (entry.generation, entry.fut.clone())
                }
                _ => {
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    let fut = discover(self.http.clone(), self.issuer_base_url.clone())
                        .boxed()
                        .shared();
                    state.entry = Some(Entry {
                        generation,
                        started: Instant::now(),
                        fut: fut.clone(),
                    });
                    (generation, fut)
                }
            }
        };

        match fut.await {
            Ok(metadata) => Ok(metadata),
            Err(err) => {
                // a failure must not be served from cache on the next call
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state
                    .entry
                    .as_ref()
                    .is_some_and(|e| e.generation == generation)
                {
                    state.entry = None;
                }
                Err(err)
            }
        }
    }
}

async fn discover(
    http: reqwest::Client,
    base: Url,
) -> Result<Arc<IssuerMetadata>, DiscoveryError> {
    if base.path().contains("/.well-known/") {
        return fetch_metadata(&http, base).await.map(Arc::new);
    }

    for candidate in candidate_urls(&base) {
        match fetch_metadata(&http, candidate.clone()).await {
            Ok(metadata) => return Ok(Arc::new(metadata)),
            Err(err) => {
                tracing::warn!(url = %candidate, error = %err, "discovery candidate failed");
            }
        }
    }
    Err(DiscoveryError::Exhausted)
}

/// Candidate well-known URLs in the fixed probing order: the OIDC path
/// appended to the issuer path, then the OAuth2 path with the issuer path
/// as a suffix.
fn candidate_urls(base: &Url) -> [Url; 2] {
    let path = base.path();
    let oidc = if path.ends_with('/') {
        format!("{path}{}", &OIDC_DISCOVERY[1..])
    } else {
        format!("{path}{OIDC_DISCOVERY}")
    };
    let oauth2 = if path == "/" {
        OAUTH2_DISCOVERY.to_string()
    } else {
        format!("{OAUTH2_DISCOVERY}{path}")
    };

    let mut oidc_url = base.clone();
    oidc_url.set_path(&oidc);
    let mut oauth2_url = base.clone();
    oauth2_url.set_path(&oauth2);
    [oidc_url, oauth2_url]
}

async fn fetch_metadata(http: &reqwest::Client, url: Url) -> Result<IssuerMetadata, DiscoveryError> {
    tracing::debug!(url = %url, "fetching authorization server metadata");
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| DiscoveryError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(DiscoveryError::Fetch {
            url: url.to_string(),
            reason: format!("responded with {}", response.status()),
        });
    }

    let metadata: IssuerMetadata =
        response.json().await.map_err(|e| DiscoveryError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if metadata.issuer.is_empty() {
        return Err(DiscoveryError::MissingIssuer);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_for_root_path() {
        let base = Url::parse("https://issuer.example.com").unwrap();
        let [oidc, oauth2] = candidate_urls(&base);
        assert_eq!(
            oidc.as_str(),
            "https://issuer.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            oauth2.as_str(),
            "https://issuer.example.com/.well-known/oauth-authorization-server"
        );
    }

    #[test]
    fn candidates_for_nested_path() {
        let base = Url::parse("https://issuer.example.com/tenant").unwrap();
        let [oidc, oauth2] = candidate_urls(&base);
        assert_eq!(
            oidc.as_str(),
            "https://issuer.example.com/tenant/.well-known/openid-configuration"
        );
        assert_eq!(
            oauth2.as_str(),
            "https://issuer.example.com/.well-known/oauth-authorization-server/tenant"
        );
    }

    #[test]
    fn candidates_for_trailing_slash() {
        let base = Url::parse("https://issuer.example.com/tenant/").unwrap();
        let [oidc, _] = candidate_urls(&base);
        assert_eq!(
            oidc.as_str(),
            "https://issuer.example.com/tenant/.well-known/openid-configuration"
        );
    }

    #[test]
    fn metadata_tolerates_missing_optional_fields() {
        let metadata: IssuerMetadata =
            serde_json::from_str(r#"{"issuer": "https://issuer.example.com/"}"#).unwrap();
        assert_eq!(metadata.issuer, "https://issuer.example.com/");
        assert!(metadata.jwks_uri.is_none());
        assert!(metadata.id_token_signing_alg_values_supported.is_none());
    }
}
