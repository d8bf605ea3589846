use std::collections::BTreeMap;

use serde::Deserialize;

/// Contents of `gateway.yaml`: global access rules, default header
/// projections, and the service map.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GatewayFile {
    #[serde(default)]
    pub global_access_rules: Vec<AccessRuleConfig>,
    #[serde(default)]
    pub default_headers: HeaderMappingsConfig,
    /// Logical backends, keyed by name. Each target must equal exactly one
    /// route's target URI.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// One ordered access rule: URL patterns plus an effect.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AccessRuleConfig {
    /// Ant-style patterns this rule intercepts. Must be non-empty.
    pub intercept_url: Vec<String>,
    /// Permit unconditionally, authenticated or not.
    #[serde(default)]
    pub anonymous: bool,
    /// Deny everyone.
    #[serde(default)]
    pub forbidden: bool,
    /// Admit any user holding one of these roles. Empty means any
    /// authenticated user. The `ROLE_` prefix may be omitted.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
}

/// A named logical backend with its own rules and header overrides.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServiceConfig {
    /// Must equal the target URI of exactly one route.
    pub target: String,
    #[serde(default)]
    pub access_rules: Vec<AccessRuleConfig>,
    /// Per-service header switches; unset fields inherit the defaults.
    #[serde(default)]
    pub headers: HeaderMappingsOverride,
}

/// Which identity headers are appended to upstream requests.
///
/// These are the global defaults; [`HeaderMappingsOverride`] lets a service
/// flip individual switches.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct HeaderMappingsConfig {
    pub proxy: bool,
    pub username: bool,
    pub roles: bool,
    pub org: bool,
    pub orgname: bool,
    pub email: bool,
    pub firstname: bool,
    pub lastname: bool,
    pub tel: bool,
    pub address: bool,
    pub json_user: bool,
    pub json_organization: bool,
    pub external_authentication: bool,
}

impl Default for HeaderMappingsConfig {
    fn default() -> Self {
        HeaderMappingsConfig {
            proxy: true,
            username: true,
            roles: true,
            org: true,
            orgname: true,
            email: true,
            firstname: true,
            lastname: true,
            tel: false,
            address: false,
            json_user: false,
            json_organization: false,
            external_authentication: true,
        }
    }
}

/// Sparse per-service header switches. A set field wins over the default,
/// whichever way it points.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct HeaderMappingsOverride {
    pub proxy: Option<bool>,
    pub username: Option<bool>,
    pub roles: Option<bool>,
    pub org: Option<bool>,
    pub orgname: Option<bool>,
    pub email: Option<bool>,
    pub firstname: Option<bool>,
    pub lastname: Option<bool>,
    pub tel: Option<bool>,
    pub address: Option<bool>,
    pub json_user: Option<bool>,
    pub json_organization: Option<bool>,
    pub external_authentication: Option<bool>,
}

impl HeaderMappingsConfig {
    /// Merge a service override over these defaults.
    pub fn merged(&self, over: &HeaderMappingsOverride) -> HeaderMappingsConfig {
        HeaderMappingsConfig {
            proxy: over.proxy.unwrap_or(self.proxy),
            username: over.username.unwrap_or(self.username),
            roles: over.roles.unwrap_or(self.roles),
            org: over.org.unwrap_or(self.org),
            orgname: over.orgname.unwrap_or(self.orgname),
            email: over.email.unwrap_or(self.email),
            firstname: over.firstname.unwrap_or(self.firstname),
            lastname: over.lastname.unwrap_or(self.lastname),
            tel: over.tel.unwrap_or(self.tel),
            address: over.address.unwrap_or(self.address),
            json_user: over.json_user.unwrap_or(self.json_user),
            json_organization: over.json_organization.unwrap_or(self.json_organization),
            external_authentication: over
                .external_authentication
                .unwrap_or(self.external_authentication),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_override_wins_both_ways() {
        let defaults = HeaderMappingsConfig::default();
        let over = HeaderMappingsOverride {
            username: Some(false),
            json_user: Some(true),
            ..Default::default()
        };
        let merged = defaults.merged(&over);
        assert!(!merged.username);
        assert!(merged.json_user);
        // untouched fields keep the default
        assert!(merged.roles);
        assert!(!merged.tel);
    }

    #[test]
    fn gateway_file_parses() {
        let yaml = r#"
global-access-rules:
  - intercept-url: ["/**"]
    anonymous: true
services:
  analytics:
    target: http://analytics:8080/analytics/
    access-rules:
      - intercept-url: ["/analytics/admin/**"]
        allowed-roles: [SUPERUSER]
    headers:
      json-user: true
"#;
        let file: GatewayFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.global_access_rules.len(), 1);
        assert!(file.global_access_rules[0].anonymous);
        let svc = &file.services["analytics"];
        assert_eq!(svc.target, "http://analytics:8080/analytics/");
        assert_eq!(svc.access_rules[0].allowed_roles, vec!["SUPERUSER"]);
        assert_eq!(svc.headers.json_user, Some(true));
    }
}
