//! Claim validation pipeline.
//!
//! A verifier evaluates an ordered set of per-claim validators against a
//! verified token's header and payload. Entries for `alg` and `typ` read
//! the header; everything else reads the payload. Evaluation order is the
//! set order, so the first reported failure is deterministic regardless of
//! how long individual predicates take.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Boxed future returned by an async claim predicate.
pub type PredicateFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Asynchronous predicate over a claim value.
///
/// Receives the claim's value (if present) along with the full payload and
/// header. Implement this directly for predicates that need to await; plain
/// closures go through [`ClaimValidator::predicate`].
pub trait AsyncPredicate: Send + Sync {
    fn check<'a>(
        &'a self,
        value: Option<&'a Value>,
        payload: &'a Map<String, Value>,
        header: &'a Map<String, Value>,
    ) -> PredicateFuture<'a>;
}

struct SyncPredicate<F>(F);

impl<F> AsyncPredicate for SyncPredicate<F>
where
    F: Fn(Option<&Value>, &Map<String, Value>, &Map<String, Value>) -> bool + Send + Sync,
{
    fn check<'a>(
        &'a self,
        value: Option<&'a Value>,
        payload: &'a Map<String, Value>,
        header: &'a Map<String, Value>,
    ) -> PredicateFuture<'a> {
        let ok = (self.0)(value, payload, header);
        Box::pin(std::future::ready(ok))
    }
}

/// How a single claim is validated.
#[derive(Clone)]
pub enum ClaimValidator {
    /// Always passes; disables a default check.
    Skip,
    /// Passes iff the claim is exactly this string.
    Equals(String),
    /// Passes iff the predicate returns true.
    Predicate(Arc<dyn AsyncPredicate>),
}

impl ClaimValidator {
    /// Validator requiring the claim to equal the given string.
    pub fn equals(expected: impl Into<String>) -> Self {
        ClaimValidator::Equals(expected.into())
    }

    /// Validator from a synchronous predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &Map<String, Value>, &Map<String, Value>) -> bool
            + Send
            + Sync
            + 'static,
    {
        ClaimValidator::Predicate(Arc::new(SyncPredicate(f)))
    }

    /// Validator from an [`AsyncPredicate`] implementation.
    pub fn async_predicate(predicate: impl AsyncPredicate + 'static) -> Self {
        ClaimValidator::Predicate(Arc::new(predicate))
    }
}

/// A claim that failed validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unexpected '{0}' value")]
pub(crate) struct FailedClaim(pub(crate) String);

/// Ordered claim validator set.
///
/// Built once per verifier by merging the defaults with caller overrides:
/// an override for a known claim replaces the default entry in place (so
/// evaluation order is stable), unknown claims append in insertion order.
pub(crate) struct ValidatorSet {
    entries: Vec<(String, ClaimValidator)>,
}

impl ValidatorSet {
    pub(crate) fn merged(
        defaults: Vec<(String, ClaimValidator)>,
        overrides: &[(String, ClaimValidator)],
    ) -> Self {
        let mut entries = defaults;
        for (name, validator) in overrides {
            if let Some(slot) = entries.iter_mut().find(|(n, _)| n == name) {
                slot.1 = validator.clone();
            } else {
                entries.push((name.clone(), validator.clone()));
            }
        }
        Self { entries }
    }
}

/// Runs every validator in set order, reporting the first failure.
pub(crate) async fn validate(
    payload: &Map<String, Value>,
    header: &Map<String, Value>,
    set: &ValidatorSet,
) -> Result<(), FailedClaim> {
    for (name, validator) in &set.entries {
        let value = if name == "alg" || name == "typ" {
            header.get(name)
        } else {
            payload.get(name)
        };
        let ok = match validator {
            ClaimValidator::Skip => true,
            ClaimValidator::Equals(expected) => {
                value.and_then(Value::as_str) == Some(expected.as_str())
            }
            ClaimValidator::Predicate(predicate) => {
                predicate.check(value, payload, header).await
            }
        };
        if !ok {
            return Err(FailedClaim(name.clone()));
        }
    }
    Ok(())
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Builds the default validator set from the resolved constraints.
///
/// Order matters: it fixes which claim is reported when several fail.
pub(crate) fn default_validators(
    issuer: String,
    audience: Vec<String>,
    clock_tolerance: u64,
    max_token_age: Option<u64>,
    strict: bool,
    allowed_algs: Option<Vec<String>>,
    pinned_alg: Option<String>,
) -> Vec<(String, ClaimValidator)> {
    let alg = ClaimValidator::predicate(move |value, _, _| {
        let Some(alg) = value.and_then(Value::as_str) else {
            return false;
        };
        !alg.eq_ignore_ascii_case("none")
            && allowed_algs
                .as_ref()
                .map_or(true, |algs| algs.iter().any(|a| a == alg))
            && pinned_alg.as_ref().map_or(true, |pinned| pinned == alg)
    });

    let typ = ClaimValidator::predicate(move |value, _, _| {
        if !strict {
            return true;
        }
        value.and_then(Value::as_str).map_or(false, |typ| {
            let typ = typ.to_ascii_lowercase();
            typ.strip_prefix("application/").unwrap_or(&typ) == "at+jwt"
        })
    });

    let aud = ClaimValidator::predicate(move |value, _, _| match value {
        Some(Value::String(aud)) => audience.iter().any(|a| a == aud),
        Some(Value::Array(auds)) => auds
            .iter()
            .filter_map(Value::as_str)
            .any(|aud| audience.iter().any(|a| a == aud)),
        _ => false,
    });

    let exp = ClaimValidator::predicate(move |value, _, _| {
        value
            .and_then(Value::as_f64)
            .map_or(false, |exp| exp >= unix_now() as f64 - clock_tolerance as f64)
    });

    let iat = ClaimValidator::predicate(move |value, _, _| match max_token_age {
        None => match value {
            None => !strict,
            Some(v) => v.is_number(),
        },
        Some(max_age) => value.and_then(Value::as_f64).map_or(false, |iat| {
            let now = unix_now() as f64;
            let tolerance = clock_tolerance as f64;
            iat < now + tolerance && iat > now - tolerance - max_age as f64
        }),
    });

    vec![
        ("alg".into(), alg),
        ("typ".into(), typ),
        ("iss".into(), ClaimValidator::equals(issuer)),
        ("aud".into(), aud),
        ("exp".into(), exp),
        ("iat".into(), iat),
        ("sub".into(), string_or_absent(strict)),
        ("client_id".into(), string_or_absent(strict)),
        ("jti".into(), string_or_absent(strict)),
    ]
}

fn string_or_absent(strict: bool) -> ClaimValidator {
    ClaimValidator::predicate(move |value, _, _| match value {
        None => !strict,
        Some(v) => v.is_string(),
    })
}
