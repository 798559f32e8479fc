//! Signing-key resolution.
//!
//! A verifier resolves keys from exactly one source fixed at construction:
//! a shared secret (no network, no cache) or a remote JSON Web Key Set.
//! The remote path caches the fetched key set, refreshes it once its max
//! age elapses, and allows one cooldown-throttled forced refresh when a
//! token references an unrecognized key id.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use url::Url;

/// Key resolution failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("failed to fetch key set from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("no key found for kid '{0}'")]
    KeyNotFound(String),

    #[error("a 'kid' is required when the key set holds multiple keys")]
    MissingKid,

    #[error("key set is empty")]
    NoKeys,

    #[error("unusable key in key set: {0}")]
    InvalidKey(String),

    #[error("invalid jwks_uri '{0}'")]
    InvalidUri(String),
}

/// The verifier's signing-key material.
pub(crate) enum KeySource {
    /// Constant key derived from the configured shared secret.
    Secret(Arc<DecodingKey>),
    /// Lazily built resolver over a remote key set.
    Remote(RemoteKeys),
}

/// Builds and reuses a [`RemoteJwks`] per effective `jwks_uri`.
///
/// The resolver (and its key cache) is rebuilt only when the URI changes,
/// so repeated verifications against an unchanged issuer share one cache.
pub(crate) struct RemoteKeys {
    http: reqwest::Client,
    cooldown: Duration,
    cache_max_age: Duration,
    current: Mutex<Option<(String, Arc<RemoteJwks>)>>,
}

impl RemoteKeys {
    pub(crate) fn new(http: reqwest::Client, cooldown: Duration, cache_max_age: Duration) -> Self {
        Self {
            http,
            cooldown,
            cache_max_age,
            current: Mutex::new(None),
        }
    }

    pub(crate) fn resolver_for(&self, jwks_uri: &str) -> Result<Arc<RemoteJwks>, KeyError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((uri, jwks)) = current.as_ref() {
            if uri == jwks_uri {
                return Ok(jwks.clone());
            }
        }
        let url =
            Url::parse(jwks_uri).map_err(|_| KeyError::InvalidUri(jwks_uri.to_string()))?;
        let jwks = Arc::new(RemoteJwks::new(
            self.http.clone(),
            url,
            self.cooldown,
            self.cache_max_age,
        ));
        *current = Some((jwks_uri.to_string(), jwks.clone()));
        Ok(jwks)
    }
}

/// Cached view of a remote JSON Web Key Set.
pub(crate) struct RemoteJwks {
    url: Url,
    http: reqwest::Client,
    cooldown: Duration,
    cache_max_age: Duration,
    state: Mutex<CacheState>,
    // held across fetches so concurrent refreshes collapse into one
    refresh: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct CacheState {
    keys: Option<Arc<JwkSet>>,
    fetched_at: Option<Instant>,
    last_forced_refresh: Option<Instant>,
}

impl RemoteJwks {
    fn new(http: reqwest::Client, url: Url, cooldown: Duration, cache_max_age: Duration) -> Self {
        Self {
            url,
            http,
            cooldown,
            cache_max_age,
            state: Mutex::new(CacheState::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolves the decoding key for the given token header.
    ///
    /// An unrecognized `kid` triggers at most one forced refresh per
    /// cooldown window before the lookup fails.
    pub(crate) async fn decoding_key(
        &self,
        header: &jsonwebtoken::Header,
    ) -> Result<Arc<DecodingKey>, KeyError> {
        let keys = self.fresh_keys().await?;
        let kid = header.kid.as_deref();
        match select_key(&keys, kid) {
            Ok(jwk) => decode_jwk(jwk),
            Err(err @ (KeyError::KeyNotFound(_) | KeyError::NoKeys)) => {
                if !self.try_forced_refresh().await? {
                    return Err(err);
                }
                let keys = self.cached_keys().ok_or(KeyError::NoKeys)?;
                decode_jwk(select_key(&keys, kid)?)
            }
            Err(err) => Err(err),
        }
    }

    fn cached_keys(&self) -> Option<Arc<JwkSet>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys
            .clone()
    }

    /// Returns the cached key set, refreshing it first when absent or
    /// older than `cache_max_age`.
    async fn fresh_keys(&self) -> Result<Arc<JwkSet>, KeyError> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let (Some(keys), Some(at)) = (&state.keys, state.fetched_at) {
                if at.elapsed() < self.cache_max_age {
                    return Ok(keys.clone());
                }
            }
        }
        self.refresh_keys().await
    }

    /// Fetches the key set. Callers that arrive while a fetch is in flight
    /// wait for it and reuse its result instead of issuing their own.
    async fn refresh_keys(&self) -> Result<Arc<JwkSet>, KeyError> {
        let observed = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fetched_at;
        let _guard = self.refresh.lock().await;
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.fetched_at != observed {
                if let Some(keys) = &state.keys {
                    return Ok(keys.clone());
                }
            }
        }

        // a failed fetch leaves previously cached keys untouched
        let set = fetch_jwks(&self.http, &self.url).await?;
        let keys = Arc::new(set);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.keys = Some(keys.clone());
        state.fetched_at = Some(Instant::now());
        Ok(keys)
    }

    /// Refreshes on a key miss unless the cooldown window is still open.
    /// Returns whether a refresh was performed.
    async fn try_forced_refresh(&self) -> Result<bool, KeyError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(last) = state.last_forced_refresh {
                if last.elapsed() < self.cooldown {
                    return Ok(false);
                }
            }
            state.last_forced_refresh = Some(Instant::now());
        }
        self.refresh_keys().await?;
        Ok(true)
    }
}

fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, KeyError> {
    if jwks.keys.is_empty() {
        return Err(KeyError::NoKeys);
    }
    if let Some(kid) = kid {
        return jwks
            .keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
            .ok_or_else(|| KeyError::KeyNotFound(kid.to_string()));
    }
    if jwks.keys.len() == 1 {
        return Ok(&jwks.keys[0]);
    }
    Err(KeyError::MissingKid)
}

fn decode_jwk(jwk: &Jwk) -> Result<Arc<DecodingKey>, KeyError> {
    DecodingKey::from_jwk(jwk)
        .map(Arc::new)
        .map_err(|e| KeyError::InvalidKey(e.to_string()))
}

async fn fetch_jwks(http: &reqwest::Client, url: &Url) -> Result<JwkSet, KeyError> {
    tracing::debug!(url = %url, "fetching JSON Web Key Set");
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| KeyError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(KeyError::Fetch {
            url: url.to_string(),
            reason: format!("responded with {}", response.status()),
        });
    }

    response.json().await.map_err(|e| KeyError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
