use geogw_core::GatewayError;

/// OIDC client-side errors.
#[derive(Debug)]
pub enum OidcError {
    /// Unknown provider registration id.
    UnknownProvider(String),
    /// The token endpoint rejected the exchange or could not be reached.
    TokenExchangeFailed(String),
    /// The userinfo endpoint failed.
    UserinfoFailed(String),
    /// The id-token is malformed or its signature/claims do not validate.
    InvalidIdToken(String),
    /// The key id from the token header is not in the provider JWKS.
    UnknownKeyId(String),
    /// The JWKS endpoint could not be fetched or parsed.
    JwksFetch(String),
    /// The `state` round-trip does not match the session.
    StateMismatch,
    /// A configured claim mapping is unusable (bad JSON-path, non-string
    /// scalar in the claims).
    InvalidClaimConfiguration(String),
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OidcError::UnknownProvider(id) => write!(f, "unknown provider: {id}"),
            OidcError::TokenExchangeFailed(msg) => write!(f, "token exchange failed: {msg}"),
            OidcError::UserinfoFailed(msg) => write!(f, "userinfo request failed: {msg}"),
            OidcError::InvalidIdToken(msg) => write!(f, "invalid id-token: {msg}"),
            OidcError::UnknownKeyId(kid) => write!(f, "unknown signing key: {kid}"),
            OidcError::JwksFetch(msg) => write!(f, "JWKS fetch failed: {msg}"),
            OidcError::StateMismatch => write!(f, "authorization state mismatch"),
            OidcError::InvalidClaimConfiguration(msg) => {
                write!(f, "invalid claim configuration: {msg}")
            }
        }
    }
}

impl std::error::Error for OidcError {}

impl From<OidcError> for GatewayError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::InvalidClaimConfiguration(msg) => GatewayError::InvalidConfiguration(msg),
            other => GatewayError::AuthenticationFailed(other.to_string()),
        }
    }
}
