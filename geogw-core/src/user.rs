use serde::{Deserialize, Serialize};

/// Role every resolved non-anonymous user carries.
pub const ROLE_USER: &str = "ROLE_USER";

/// Role carried by the anonymous principal.
pub const ROLE_ANONYMOUS: &str = "ROLE_ANONYMOUS";

/// The canonical user record.
///
/// Every authentication outcome (directory bind, OIDC, pre-auth headers) is
/// unified into this single representation before any downstream component
/// sees it. The record is immutable for the lifetime of the request that
/// resolved it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    /// Stable opaque identifier. Immutable once set.
    pub id: String,
    /// Lowercased slug, unique in the directory.
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Organization identifier, empty when the user has none.
    pub organization: String,
    /// Canonicalized role names, `ROLE_USER` always present.
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub telephone_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub postal_address: String,
    /// Name of the source identity provider, empty for directory binds.
    pub external_provider: String,
    /// Opaque subject at the provider.
    pub external_uid: String,
    /// Opaque organization id at the provider.
    pub external_org_id: String,
    /// Password-expiry warning raised by the directory during bind.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub directory_warn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_remaining_days: Option<String>,
    /// Synthetic marker for the unauthenticated principal.
    #[serde(skip)]
    pub anonymous: bool,
}

impl User {
    /// The unauthenticated principal: no identity, `ROLE_ANONYMOUS` only.
    pub fn anonymous() -> Self {
        User {
            username: "anonymousUser".into(),
            roles: vec![ROLE_ANONYMOUS.to_string()],
            anonymous: true,
            ..Default::default()
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Full display name, `"<first> <last>"` with empty parts dropped.
    pub fn full_name(&self) -> String {
        let mut name = String::new();
        for part in [&self.first_name, &self.last_name] {
            if !part.is_empty() {
                if !name.is_empty() {
                    name.push(' ');
                }
                name.push_str(part);
            }
        }
        name
    }

    /// Apply [`canonicalize_roles`] to this record in place.
    pub fn canonicalize(&mut self) {
        self.roles = canonicalize_roles(std::mem::take(&mut self.roles));
    }
}

/// An organization as stored in the directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Organization {
    /// Directory common name.
    pub id: String,
    pub name: String,
    pub short_name: String,
    /// Free-form category, `Other` when unset.
    pub org_type: String,
    /// Provider-assigned organization id, may be empty.
    pub external_uid: String,
    /// Current member usernames.
    pub members: Vec<String>,
}

impl Organization {
    pub fn new(id: impl Into<String>) -> Self {
        Organization {
            id: id.into(),
            org_type: "Other".into(),
            ..Default::default()
        }
    }
}

/// Prefix a role name with `ROLE_` exactly once.
///
/// Repeated prefixes collapse, so the function is idempotent.
pub fn canonicalize_role(role: &str) -> String {
    let mut name = role.trim();
    while let Some(rest) = name.strip_prefix("ROLE_") {
        name = rest;
    }
    format!("ROLE_{name}")
}

/// Canonicalize a role list: every role prefixed with `ROLE_` exactly once,
/// duplicates dropped (first occurrence wins), and `ROLE_USER` always present
/// and first.
pub fn canonicalize_roles(roles: Vec<String>) -> Vec<String> {
    let mut out = vec![ROLE_USER.to_string()];
    for role in roles {
        if role.trim().is_empty() {
            continue;
        }
        let canonical = canonicalize_role(&role);
        if !out.contains(&canonical) {
            out.push(canonical);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_prefix_added_once() {
        assert_eq!(canonicalize_role("ADMIN"), "ROLE_ADMIN");
        assert_eq!(canonicalize_role("ROLE_ADMIN"), "ROLE_ADMIN");
        assert_eq!(canonicalize_role("ROLE_ROLE_ADMIN"), "ROLE_ADMIN");
    }

    #[test]
    fn role_user_always_present_and_first() {
        let roles = canonicalize_roles(vec!["ADMIN".into(), "USER".into()]);
        assert_eq!(roles, vec!["ROLE_USER", "ROLE_ADMIN"]);

        let roles = canonicalize_roles(vec![]);
        assert_eq!(roles, vec!["ROLE_USER"]);
    }

    #[test]
    fn duplicate_roles_dropped_first_seen_order() {
        let roles = canonicalize_roles(vec![
            "A".into(),
            "ROLE_B".into(),
            "ROLE_A".into(),
            "B".into(),
        ]);
        assert_eq!(roles, vec!["ROLE_USER", "ROLE_A", "ROLE_B"]);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize_roles(vec!["Éditeur".into(), "ADMIN".into()]);
        let twice = canonicalize_roles(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn anonymous_user_shape() {
        let user = User::anonymous();
        assert!(user.anonymous);
        assert!(user.has_role(ROLE_ANONYMOUS));
        assert!(!user.has_role(ROLE_USER));
    }

    #[test]
    fn user_json_uses_camel_case() {
        let user = User {
            username: "alice".into(),
            first_name: "Alice".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["firstName"], "Alice");
        assert!(json.get("first_name").is_none());
    }

    #[test]
    fn full_name_skips_empty_parts() {
        let user = User {
            last_name: "Mauduit".into(),
            ..Default::default()
        };
        assert_eq!(user.full_name(), "Mauduit");
    }
}
