//! Configuration model for the gateway.
//!
//! Five YAML files are loaded from the data directory, each optional,
//! each with `${VAR}` / `${VAR:default}` environment substitution applied
//! before parsing:
//!
//! | File | Contents |
//! |---|---|
//! | `gateway.yaml` | global access rules, default headers, services |
//! | `routes.yaml` | ordered route list |
//! | `security.yaml` | directory sources, OIDC registrations, pre-auth, provisioning |
//! | `role-mappings.yaml` | source-role glob → additional roles |
//! | `logging.yaml` | log level/format and diagnostic-context switches |
//!
//! Everything is loaded and validated before the listener opens; a violation
//! is fatal at startup.

mod gateway;
mod loader;
mod logging;
mod routes;
mod security;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

pub use gateway::{
    AccessRuleConfig, GatewayFile, HeaderMappingsConfig, HeaderMappingsOverride, ServiceConfig,
};
pub use logging::{LoggingConfig, LoggingFile, MdcConfig};
pub use routes::{FilterConfig, PredicateConfig, RouteConfig, RoutesFile};
pub use security::{
    ClaimMappingConfig, ClaimPathConfig, DirectorySourceConfig, OidcConfig, OidcProviderConfig,
    OutboundProxyConfig, PreAuthConfig, RabbitMqConfig, RoleClaimConfig, SecurityFile,
    TimeoutsConfig,
};

use crate::pattern::PathPattern;

/// Contents of `role-mappings.yaml`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RoleMappingsFile {
    /// Source-role glob (only `*` is a wildcard) → roles appended when any
    /// of the user's roles matches.
    #[serde(default)]
    pub role_mappings: BTreeMap<String, Vec<String>>,
}

/// The fully loaded data directory.
#[derive(Clone, Debug, Default)]
pub struct DatadirConfig {
    pub gateway: GatewayFile,
    pub routes: RoutesFile,
    pub security: SecurityFile,
    pub role_mappings: RoleMappingsFile,
    pub logging: LoggingFile,
    /// Active route profiles (comma-separated `GEOGW_PROFILES`).
    pub active_profiles: Vec<String>,
}

impl DatadirConfig {
    /// Load every configuration file from `dir` and validate the result.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut config = DatadirConfig {
            gateway: loader::load_yaml_file(&dir.join("gateway.yaml"))?,
            routes: loader::load_yaml_file(&dir.join("routes.yaml"))?,
            security: loader::load_yaml_file(&dir.join("security.yaml"))?,
            role_mappings: loader::load_yaml_file(&dir.join("role-mappings.yaml"))?,
            logging: loader::load_yaml_file(&dir.join("logging.yaml"))?,
            active_profiles: std::env::var("GEOGW_PROFILES")
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect(),
        };
        config.stamp_names();
        config.validate()?;
        Ok(config)
    }

    /// Build a config from YAML strings. Test constructor; validation
    /// applies as in [`DatadirConfig::load`].
    pub fn from_yaml(
        gateway: &str,
        routes: &str,
        security: &str,
        role_mappings: &str,
    ) -> Result<Self, ConfigError> {
        let mut config = DatadirConfig {
            gateway: loader::load_yaml_str(gateway)?,
            routes: loader::load_yaml_str(routes)?,
            security: loader::load_yaml_str(security)?,
            role_mappings: loader::load_yaml_str(role_mappings)?,
            logging: LoggingFile::default(),
            active_profiles: Vec::new(),
        };
        config.stamp_names();
        config.validate()?;
        Ok(config)
    }

    /// Copy map keys into the `name`/`registration_id` fields of the entries.
    fn stamp_names(&mut self) {
        for (name, source) in self.security.directory.iter_mut() {
            source.name = name.clone();
        }
        for (id, provider) in self.security.oidc.providers.iter_mut() {
            provider.registration_id = id.clone();
        }
    }

    /// Directory sources that take part in form login, in declaration order.
    pub fn enabled_directories(&self) -> impl Iterator<Item = &DirectorySourceConfig> {
        self.security.directory.values().filter(|d| d.enabled)
    }

    /// The extended directory source that owns account provisioning, if any.
    pub fn provisioning_directory(&self) -> Option<&DirectorySourceConfig> {
        self.security
            .directory
            .values()
            .find(|d| d.enabled && d.extended)
    }

    /// Effective header mappings for a service target, global defaults when
    /// the target is not a configured service.
    pub fn header_mappings_for(&self, target: Option<&str>) -> HeaderMappingsConfig {
        let defaults = &self.gateway.default_headers;
        match target.and_then(|t| self.gateway.services.values().find(|s| s.target == t)) {
            Some(service) => defaults.merged(&service.headers),
            None => defaults.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        fn check_rules(
            errors: &mut Vec<ValidationDetail>,
            scope: &str,
            rules: &[AccessRuleConfig],
        ) {
            for (i, rule) in rules.iter().enumerate() {
                if rule.intercept_url.is_empty() {
                    errors.push(ValidationDetail {
                        key: format!("{scope}[{i}].intercept-url"),
                        message: "at least one pattern is required".into(),
                    });
                }
                for pattern in &rule.intercept_url {
                    if let Err(e) = PathPattern::new(pattern) {
                        errors.push(ValidationDetail {
                            key: format!("{scope}[{i}].intercept-url"),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        let mut errors = Vec::new();

        check_rules(
            &mut errors,
            "global-access-rules",
            &self.gateway.global_access_rules,
        );
        for (name, service) in &self.gateway.services {
            check_rules(
                &mut errors,
                &format!("services.{name}.access-rules"),
                &service.access_rules,
            );
            if service.target.is_empty() {
                errors.push(ValidationDetail {
                    key: format!("services.{name}.target"),
                    message: "target is required".into(),
                });
            }
        }

        let mut targets: Vec<&str> = self
            .gateway
            .services
            .values()
            .map(|s| s.target.as_str())
            .collect();
        targets.sort_unstable();
        for pair in targets.windows(2) {
            if pair[0] == pair[1] && !pair[0].is_empty() {
                errors.push(ValidationDetail {
                    key: "services".into(),
                    message: format!("duplicate service target '{}'", pair[0]),
                });
            }
        }

        let mut route_ids: Vec<&str> = Vec::new();
        for route in &self.routes.routes {
            if route_ids.contains(&route.id.as_str()) {
                errors.push(ValidationDetail {
                    key: format!("routes.{}", route.id),
                    message: "duplicate route id".into(),
                });
            }
            route_ids.push(&route.id);
            if !route.uri.starts_with("http://") && !route.uri.starts_with("https://") {
                errors.push(ValidationDetail {
                    key: format!("routes.{}.uri", route.id),
                    message: format!("'{}' is not an http(s) URI", route.uri),
                });
            }
            for predicate in &route.predicates {
                let pattern = match predicate {
                    PredicateConfig::Path(p) => Some(p),
                    PredicateConfig::Host(h) => Some(h),
                    _ => None,
                };
                if let Some(p) = pattern {
                    if let Err(e) = PathPattern::new(p) {
                        errors.push(ValidationDetail {
                            key: format!("routes.{}.predicates", route.id),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        for source in self.enabled_directories() {
            if source.url.is_empty() {
                errors.push(ValidationDetail {
                    key: format!("directory.{}.url", source.name),
                    message: "url is required for an enabled source".into(),
                });
            }
            if source.base_dn.is_empty() {
                errors.push(ValidationDetail {
                    key: format!("directory.{}.base-dn", source.name),
                    message: "base-dn is required for an enabled source".into(),
                });
            }
        }

        let oidc = &self.security.oidc;
        for provider in oidc.providers.values().filter(|p| p.enabled) {
            let id = &provider.registration_id;
            for (field, value) in [
                ("client-id", &provider.client_id),
                ("issuer", &provider.issuer),
                ("authorization-uri", &provider.authorization_uri),
                ("token-uri", &provider.token_uri),
            ] {
                if value.is_empty() {
                    errors.push(ValidationDetail {
                        key: format!("oidc.providers.{id}.{field}"),
                        message: "required for an enabled provider".into(),
                    });
                }
            }
            if oidc.external_url.is_empty() {
                errors.push(ValidationDetail {
                    key: "oidc.external-url".into(),
                    message: "required when a provider is enabled".into(),
                });
            }
        }

        for source in self.role_mappings.role_mappings.keys() {
            if source.contains('?') || source.contains("**") {
                errors.push(ValidationDetail {
                    key: format!("role-mappings.'{source}'"),
                    message: "only '*' is allowed as a wildcard in a source role".into(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// One startup validation finding.
#[derive(Debug, Clone)]
pub struct ValidationDetail {
    pub key: String,
    pub message: String,
}

/// Error type for configuration loading and validation.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O, substitution, or YAML parsing problem.
    Load(String),
    /// The files parsed but the content is inconsistent.
    Validation(Vec<ValidationDetail>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
            ConfigError::Validation(details) => {
                write!(f, "config validation errors:")?;
                for detail in details {
                    write!(f, "\n  - {}: {}", detail.key, detail.message)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: &str = r#"
global-access-rules:
  - intercept-url: ["/**"]
    anonymous: true
services:
  svc:
    target: http://backend:8080/svc/
"#;

    const ROUTES: &str = r#"
routes:
  - id: svc
    uri: http://backend:8080/svc/
    predicates:
      - path: /svc/**
"#;

    const SECURITY: &str = r#"
directory:
  default:
    enabled: true
    extended: true
    url: ldap://localhost:389
    base-dn: dc=geo,dc=org
"#;

    #[test]
    fn minimal_config_validates() {
        let config = DatadirConfig::from_yaml(GATEWAY, ROUTES, SECURITY, "").unwrap();
        assert_eq!(config.routes.routes.len(), 1);
        assert!(config.provisioning_directory().is_some());
        assert_eq!(config.security.directory["default"].name, "default");
    }

    #[test]
    fn empty_intercept_patterns_rejected() {
        let gateway = r#"
global-access-rules:
  - intercept-url: []
    anonymous: true
"#;
        let err = DatadirConfig::from_yaml(gateway, "", "", "").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn duplicate_route_ids_rejected() {
        let routes = r#"
routes:
  - id: a
    uri: http://x/
  - id: a
    uri: http://y/
"#;
        assert!(DatadirConfig::from_yaml("", routes, "", "").is_err());
    }

    #[test]
    fn non_http_route_uri_rejected() {
        let routes = r#"
routes:
  - id: a
    uri: ftp://x/
"#;
        assert!(DatadirConfig::from_yaml("", routes, "", "").is_err());
    }

    #[test]
    fn role_mapping_source_limited_to_star() {
        let mappings = "role-mappings:\n  \"ROLE_GP.*\": [ROLE_EXTRA]\n";
        assert!(DatadirConfig::from_yaml("", "", "", mappings).is_ok());

        let bad = "role-mappings:\n  \"ROLE_?\": [ROLE_EXTRA]\n";
        assert!(DatadirConfig::from_yaml("", "", "", bad).is_err());
    }

    #[test]
    fn header_mappings_fall_back_to_defaults() {
        let config = DatadirConfig::from_yaml(GATEWAY, ROUTES, SECURITY, "").unwrap();
        let effective = config.header_mappings_for(Some("http://backend:8080/svc/"));
        assert!(effective.username);
        let unknown = config.header_mappings_for(Some("http://elsewhere/"));
        assert!(unknown.proxy);
    }
}
