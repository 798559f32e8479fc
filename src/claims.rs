//! Authorization checks over verified claims.
//!
//! A [`ClaimCheck`] is a predicate applied strictly after verification,
//! against the [`VerifiedClaims`] attached to the request. Running a check
//! with no authenticated context fails with [`AuthError::Unauthorized`];
//! scope checks report missing scopes as [`AuthError::InsufficientScope`]
//! rather than a generic token error.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::AuthError;
use crate::verifier::VerifiedClaims;

type CheckFn = dyn Fn(&Map<String, Value>) -> Result<(), AuthError> + Send + Sync;

/// A post-verification authorization predicate.
///
/// # Example
///
/// ```rust
/// use tower_oauth2_bearer::ClaimCheck;
///
/// let admin_only = ClaimCheck::required_scopes(["read:admin"]);
/// let org_members = ClaimCheck::claim_equals("org_id", "org-42");
/// # drop((admin_only, org_members));
/// ```
#[derive(Clone)]
pub struct ClaimCheck {
    check: Arc<CheckFn>,
}

impl ClaimCheck {
    /// Check from a custom predicate; a false return fails with
    /// `InvalidToken` carrying `message`.
    pub fn new<F>(predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        let message = message.into();
        Self {
            check: Arc::new(move |payload| {
                if predicate(payload) {
                    Ok(())
                } else {
                    Err(AuthError::invalid_token(message.clone()))
                }
            }),
        }
    }

    /// Requires `claim` to be present and equal `expected` by JSON value.
    pub fn claim_equals(claim: impl Into<String>, expected: impl Into<Value>) -> Self {
        let claim = claim.into();
        let expected = expected.into();
        Self {
            check: Arc::new(move |payload| {
                let Some(actual) = payload.get(&claim) else {
                    return Err(AuthError::invalid_token(format!("missing '{claim}' claim")));
                };
                if actual == &expected {
                    Ok(())
                } else {
                    Err(AuthError::invalid_token(format!(
                        "unexpected '{claim}' value"
                    )))
                }
            }),
        }
    }

    /// Requires `claim` (space-delimited string or array) to contain every
    /// expected value.
    pub fn claim_includes(
        claim: impl Into<String>,
        expected: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        let claim = claim.into();
        let expected: Vec<Value> = expected.into_iter().map(Into::into).collect();
        Self {
            check: Arc::new(move |payload| {
                let Some(value) = payload.get(&claim) else {
                    return Err(AuthError::invalid_token(format!("missing '{claim}' claim")));
                };
                match claim_values(value) {
                    Some(actual) if expected.iter().all(|e| actual.contains(e)) => Ok(()),
                    _ => Err(AuthError::invalid_token(format!(
                        "unexpected '{claim}' value"
                    ))),
                }
            }),
        }
    }

    /// Requires the `scope` claim to contain every given scope.
    pub fn required_scopes(scopes: impl Into<Scopes>) -> Self {
        scope_check(scopes.into(), true)
    }

    /// Requires the `scope` claim to contain at least one given scope.
    pub fn scope_includes_any(scopes: impl Into<Scopes>) -> Self {
        scope_check(scopes.into(), false)
    }

    /// Runs the check against the request's verification result.
    pub fn check(&self, auth: Option<&VerifiedClaims>) -> Result<(), AuthError> {
        let Some(auth) = auth else {
            return Err(AuthError::Unauthorized);
        };
        (self.check)(&auth.payload)
    }
}

/// A list of scope values. Converts from a space-delimited string or any
/// list of strings.
#[derive(Debug, Clone)]
pub struct Scopes(Vec<String>);

impl From<&str> for Scopes {
    fn from(s: &str) -> Self {
        Scopes(s.split_whitespace().map(String::from).collect())
    }
}

impl From<String> for Scopes {
    fn from(s: String) -> Self {
        Scopes::from(s.as_str())
    }
}

impl From<Vec<String>> for Scopes {
    fn from(scopes: Vec<String>) -> Self {
        Scopes(scopes)
    }
}

impl<const N: usize> From<[&str; N]> for Scopes {
    fn from(scopes: [&str; N]) -> Self {
        Scopes(scopes.iter().map(|s| s.to_string()).collect())
    }
}

fn scope_check(scopes: Scopes, match_all: bool) -> ClaimCheck {
    let required = scopes.0;
    ClaimCheck {
        check: Arc::new(move |payload| {
            let Some(value) = payload.get("scope") else {
                return Err(AuthError::insufficient_scope(
                    required.clone(),
                    "missing 'scope' claim",
                ));
            };
            let granted = scope_values(value);
            let ok = if match_all {
                required.iter().all(|s| granted.contains(s))
            } else {
                required.iter().any(|s| granted.contains(s))
            };
            if ok {
                Ok(())
            } else {
                Err(AuthError::insufficient_scope(
                    required.clone(),
                    "insufficient scope",
                ))
            }
        }),
    }
}

fn scope_values(value: &Value) -> HashSet<String> {
    match value {
        Value::String(s) => s.split_whitespace().map(String::from).collect(),
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => HashSet::new(),
    }
}

fn claim_values(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::String(s) => Some(
            s.split_whitespace()
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        Value::Array(values) => Some(values.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verified(payload: Value) -> VerifiedClaims {
        VerifiedClaims {
            header: Map::new(),
            payload: serde_json::from_value(payload).unwrap(),
            token: String::new(),
        }
    }

    #[test]
    fn no_context_is_unauthorized() {
        let check = ClaimCheck::required_scopes(["read:x"]);
        assert!(matches!(check.check(None), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn required_scopes_demands_all() {
        let check = ClaimCheck::required_scopes(["read:x", "write:x"]);

        let auth = verified(json!({"scope": "read:x"}));
        match check.check(Some(&auth)) {
            Err(AuthError::InsufficientScope { required, .. }) => {
                assert_eq!(required, vec!["read:x", "write:x"]);
            }
            other => panic!("expected InsufficientScope, got {other:?}"),
        }

        let auth = verified(json!({"scope": "read:x write:x"}));
        check.check(Some(&auth)).unwrap();
    }

    #[test]
    fn missing_scope_claim_is_insufficient_scope() {
        let check = ClaimCheck::required_scopes(["read:x"]);
        let auth = verified(json!({"sub": "user-1"}));
        assert!(matches!(
            check.check(Some(&auth)),
            Err(AuthError::InsufficientScope { .. })
        ));
    }

    #[test]
    fn scope_includes_any_demands_one() {
        let check = ClaimCheck::scope_includes_any(["read:x", "admin:x"]);

        let auth = verified(json!({"scope": "read:x write:y"}));
        check.check(Some(&auth)).unwrap();

        let auth = verified(json!({"scope": "write:y"}));
        assert!(matches!(
            check.check(Some(&auth)),
            Err(AuthError::InsufficientScope { .. })
        ));
    }

    #[test]
    fn scopes_accept_space_delimited_string() {
        let check = ClaimCheck::required_scopes("read:x write:x");
        let auth = verified(json!({"scope": "write:x read:x extra"}));
        check.check(Some(&auth)).unwrap();
    }

    #[test]
    fn scope_claim_may_be_an_array() {
        let check = ClaimCheck::required_scopes(["read:x"]);
        let auth = verified(json!({"scope": ["read:x", "write:x"]}));
        check.check(Some(&auth)).unwrap();
    }

    #[test]
    fn claim_equals_checks_value_and_type() {
        let check = ClaimCheck::claim_equals("org_id", "org-42");
        check
            .check(Some(&verified(json!({"org_id": "org-42"}))))
            .unwrap();

        assert!(matches!(
            check.check(Some(&verified(json!({"org_id": "org-7"})))),
            Err(AuthError::InvalidToken { .. })
        ));

        // same digits, different JSON type
        let numeric = ClaimCheck::claim_equals("version", 2);
        assert!(numeric
            .check(Some(&verified(json!({"version": 2}))))
            .is_ok());
        assert!(numeric
            .check(Some(&verified(json!({"version": "2"}))))
            .is_err());
    }

    #[test]
    fn claim_equals_reports_missing_claim() {
        let check = ClaimCheck::claim_equals("org_id", "org-42");
        match check.check(Some(&verified(json!({})))) {
            Err(AuthError::InvalidToken { description }) => {
                assert!(description.contains("missing 'org_id' claim"));
            }
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }

    #[test]
    fn claim_includes_handles_string_and_array() {
        let check = ClaimCheck::claim_includes("roles", ["admin", "auditor"]);

        let auth = verified(json!({"roles": "admin auditor viewer"}));
        check.check(Some(&auth)).unwrap();

        let auth = verified(json!({"roles": ["admin", "auditor"]}));
        check.check(Some(&auth)).unwrap();

        let auth = verified(json!({"roles": ["admin"]}));
        assert!(check.check(Some(&auth)).is_err());

        let auth = verified(json!({"roles": 7}));
        assert!(check.check(Some(&auth)).is_err());
    }

    #[test]
    fn custom_predicate_uses_given_message() {
        let check = ClaimCheck::new(
            |payload| payload.get("email_verified") == Some(&json!(true)),
            "email is not verified",
        );
        match check.check(Some(&verified(json!({"email_verified": false})))) {
            Err(AuthError::InvalidToken { description }) => {
                assert_eq!(description, "email is not verified");
            }
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }
}
