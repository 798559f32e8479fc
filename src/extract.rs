//! Bearer token extraction.
//!
//! Per RFC 6750 a bearer token may arrive in the `Authorization` header,
//! the `access_token` query parameter, or an `access_token` form body
//! field. Exactly one source must be populated; the token value itself is
//! not inspected here.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::errors::AuthError;

const TOKEN_PARAM: &str = "access_token";

/// Extracts the bearer token from a request's possible carriers.
///
/// The body source is only consulted when `form_urlencoded` is true. Zero
/// populated sources fail with [`AuthError::MissingToken`]; more than one
/// fails with [`AuthError::AmbiguousToken`].
pub fn bearer_token(
    headers: &HeaderMap,
    query: Option<&str>,
    body: Option<&[u8]>,
    form_urlencoded: bool,
) -> Result<String, AuthError> {
    let from_header = token_from_header(headers);
    let from_query = query.and_then(token_from_pairs);
    let from_body = if form_urlencoded {
        body.and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(token_from_pairs)
    } else {
        None
    };

    let found = [&from_header, &from_query, &from_body]
        .iter()
        .filter(|t| t.is_some())
        .count();
    match found {
        0 => Err(AuthError::MissingToken),
        1 => Ok(from_query
            .or(from_body)
            .or(from_header)
            .unwrap_or_default()),
        _ => Err(AuthError::AmbiguousToken),
    }
}

/// True when the request body is `application/x-www-form-urlencoded`.
pub(crate) fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

fn token_from_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn token_from_pairs(pairs: &str) -> Option<String> {
    url::form_urlencoded::parse(pairs.as_bytes())
        .find(|(key, value)| key == TOKEN_PARAM && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
