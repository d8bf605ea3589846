use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unified authentication outcome.
///
/// Each authenticator produces one of these variants instead of raising;
/// the pipeline hands the token to the user resolver and stores it in the
/// session (all variants are serializable).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuthToken {
    /// A successful directory bind.
    DirectoryBind {
        /// Resolved entry DN.
        dn: String,
        username: String,
        /// Name of the directory source that authenticated the bind.
        source: String,
        /// Role names granted by the directory.
        authorities: Vec<String>,
        /// Password-expiry warning raised during the bind.
        warn: bool,
        remaining_days: Option<String>,
    },
    /// A completed authorization-code flow.
    Oidc {
        /// Provider registration id.
        provider: String,
        /// Claims of the validated id-token.
        id_claims: Value,
        /// Claims of the userinfo response.
        userinfo_claims: Value,
        /// Authorities granted during the flow, before claim mapping.
        authorities: Vec<String>,
    },
    /// Identity asserted by the trusted fronting proxy.
    PreAuthenticated {
        /// The `preauth-*` header values, keyed by lowercased suffix
        /// (e.g. `username`, `lastname`), already base64-decoded.
        headers: BTreeMap<String, String>,
    },
}

impl AuthToken {
    /// Short name of the authentication method, for the diagnostic context.
    pub fn method(&self) -> &'static str {
        match self {
            AuthToken::DirectoryBind { .. } => "ldap",
            AuthToken::Oidc { .. } => "oidc",
            AuthToken::PreAuthenticated { .. } => "preauth",
        }
    }

    /// Whether the identity came from outside the platform directory.
    pub fn is_external(&self) -> bool {
        !matches!(self, AuthToken::DirectoryBind { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_survive_a_serde_round_trip() {
        let token = AuthToken::DirectoryBind {
            dn: "uid=alice,ou=users,dc=geo,dc=org".into(),
            username: "alice".into(),
            source: "default".into(),
            authorities: vec!["USER".into()],
            warn: false,
            remaining_days: None,
        };
        let json = serde_json::to_string(&token).unwrap();
        let back: AuthToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back.method(), "ldap");
        assert!(!back.is_external());
    }

    #[test]
    fn external_flag() {
        let token = AuthToken::PreAuthenticated {
            headers: BTreeMap::new(),
        };
        assert!(token.is_external());
        assert_eq!(token.method(), "preauth");
    }
}
