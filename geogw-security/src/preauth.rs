//! Pre-authentication header reader.
//!
//! A trusted fronting proxy terminates the client connection and asserts the
//! identity through `preauth-*` headers, gated by
//! `sec-georchestra-preauthenticated: true`. Nothing cryptographic happens
//! here; the trust is topological, and the header projector strips all of
//! these headers before any request leaves the gateway.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::HeaderMap;

use geogw_core::User;

use crate::token::AuthToken;

/// Gate header set by the fronting proxy.
pub const PREAUTH_GATE_HEADER: &str = "sec-georchestra-preauthenticated";

/// Prefix of the identity headers.
pub const PREAUTH_PREFIX: &str = "preauth-";

/// Value prefix indicating a base64-encoded header value.
const BASE64_MARKER: &str = "{base64}";

/// Errors reading the pre-auth headers.
#[derive(Debug)]
pub enum PreAuthError {
    /// The gate header is present but `preauth-username` is missing or empty.
    MissingUsername,
    /// A header value is not valid (bad base64 or not UTF-8).
    BadValue(String),
}

impl std::fmt::Display for PreAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreAuthError::MissingUsername => write!(f, "preauth-username is required"),
            PreAuthError::BadValue(name) => write!(f, "unreadable pre-auth header '{name}'"),
        }
    }
}

impl std::error::Error for PreAuthError {}

impl From<PreAuthError> for geogw_core::GatewayError {
    fn from(err: PreAuthError) -> Self {
        geogw_core::GatewayError::AuthenticationFailed(err.to_string())
    }
}

/// Read a pre-auth token from the inbound headers.
///
/// Returns `Ok(None)` when pre-auth is disabled or the gate header is not
/// `true`; an asserted identity without a username is an error.
pub fn read_token(headers: &HeaderMap, enabled: bool) -> Result<Option<AuthToken>, PreAuthError> {
    if !enabled {
        return Ok(None);
    }
    let gated = headers
        .get(PREAUTH_GATE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if !gated {
        return Ok(None);
    }

    let mut map = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str(); // already lowercase
        if let Some(suffix) = name.strip_prefix(PREAUTH_PREFIX) {
            let raw = value
                .to_str()
                .map_err(|_| PreAuthError::BadValue(name.to_string()))?;
            map.insert(suffix.to_string(), decode_value(name, raw)?);
        }
    }

    match map.get("username") {
        Some(username) if !username.is_empty() => Ok(Some(AuthToken::PreAuthenticated {
            headers: map,
        })),
        _ => Err(PreAuthError::MissingUsername),
    }
}

/// Decode a header value, honoring the `{base64}` marker.
fn decode_value(name: &str, raw: &str) -> Result<String, PreAuthError> {
    match raw.strip_prefix(BASE64_MARKER) {
        Some(encoded) => {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|_| PreAuthError::BadValue(name.to_string()))?;
            String::from_utf8(bytes).map_err(|_| PreAuthError::BadValue(name.to_string()))
        }
        None => Ok(raw.to_string()),
    }
}

/// Map the asserted headers to a user record.
pub fn mapped_user(headers: &BTreeMap<String, String>) -> User {
    let get = |key: &str| headers.get(key).cloned().unwrap_or_default();
    User {
        username: get("username"),
        email: get("email"),
        first_name: get("firstname"),
        last_name: get("lastname"),
        organization: get("org"),
        roles: headers
            .get("roles")
            .map(|roles| {
                roles
                    .split(';')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        external_provider: get("provider"),
        external_uid: get("provider-id"),
        ..Default::default()
    }
}
