//! Access-rule engine.
//!
//! Rules are evaluated in configured order; the first rule whose pattern
//! matches the request path decides. Service-specific rules (tied to the
//! matched route's target URI) take precedence over the global list; a
//! request nothing matches is denied.

use std::collections::HashMap;

use geogw_core::config::{AccessRuleConfig, GatewayFile};
use geogw_core::pattern::PatternError;
use geogw_core::user::canonicalize_role;
use geogw_core::{PathPattern, User};

/// Outcome of a rule evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
}

struct CompiledRule {
    patterns: Vec<PathPattern>,
    anonymous: bool,
    forbidden: bool,
    /// Canonicalized (`ROLE_`-prefixed) role names.
    allowed_roles: Vec<String>,
}

impl CompiledRule {
    fn compile(config: &AccessRuleConfig) -> Result<Self, PatternError> {
        Ok(CompiledRule {
            patterns: config
                .intercept_url
                .iter()
                .map(|p| PathPattern::new(p))
                .collect::<Result<_, _>>()?,
            anonymous: config.anonymous,
            forbidden: config.forbidden,
            allowed_roles: config
                .allowed_roles
                .iter()
                .map(|r| canonicalize_role(r))
                .collect(),
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    fn decide(&self, user: &User) -> AccessDecision {
        if self.forbidden {
            return AccessDecision::Denied;
        }
        if self.anonymous {
            return AccessDecision::Granted;
        }
        if user.anonymous {
            return AccessDecision::Denied;
        }
        if self.allowed_roles.is_empty() {
            return AccessDecision::Granted;
        }
        if self.allowed_roles.iter().any(|role| user.has_role(role)) {
            AccessDecision::Granted
        } else {
            AccessDecision::Denied
        }
    }
}

pub struct AccessRuleEngine {
    global: Vec<CompiledRule>,
    /// Service rules keyed by route target URI.
    services: HashMap<String, Vec<CompiledRule>>,
}

impl AccessRuleEngine {
    /// Compile the configured rules. Pattern errors are fatal at startup.
    pub fn compile(config: &GatewayFile) -> Result<Self, PatternError> {
        let global = config
            .global_access_rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<_, _>>()?;
        let mut services = HashMap::new();
        for service in config.services.values() {
            let rules: Vec<CompiledRule> = service
                .access_rules
                .iter()
                .map(CompiledRule::compile)
                .collect::<Result<_, _>>()?;
            if !rules.is_empty() {
                services.insert(service.target.clone(), rules);
            }
        }
        Ok(AccessRuleEngine { global, services })
    }

    /// Decide access for a request path.
    ///
    /// `service_target` is the matched route's target URI, if any; its rules
    /// are consulted first, the global list only when none of them matched.
    pub fn decide(
        &self,
        path: &str,
        service_target: Option<&str>,
        user: &User,
    ) -> AccessDecision {
        if let Some(rules) = service_target.and_then(|t| self.services.get(t)) {
            if let Some(rule) = rules.iter().find(|r| r.matches(path)) {
                return rule.decide(user);
            }
        }
        match self.global.iter().find(|r| r.matches(path)) {
            Some(rule) => rule.decide(user),
            None => AccessDecision::Denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(yaml: &str) -> AccessRuleEngine {
        let file: GatewayFile = serde_yaml::from_str(yaml).unwrap();
        AccessRuleEngine::compile(&file).unwrap()
    }

    fn user_with(roles: &[&str]) -> User {
        User {
            username: "u".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let engine = engine(
            r#"
global-access-rules:
  - intercept-url: ["/admin/**"]
    allowed-roles: [ADMIN]
  - intercept-url: ["/**"]
    anonymous: true
"#,
        );
        let anon = User::anonymous();
        assert_eq!(
            engine.decide("/admin/ui", None, &anon),
            AccessDecision::Denied
        );
        assert_eq!(engine.decide("/public", None, &anon), AccessDecision::Granted);
        // the broad anonymous rule below never shadows the admin rule
        let admin = user_with(&["ROLE_ADMIN"]);
        assert_eq!(
            engine.decide("/admin/ui", None, &admin),
            AccessDecision::Granted
        );
    }

    #[test]
    fn no_rule_means_denied() {
        let engine = engine("global-access-rules: []\n");
        assert_eq!(
            engine.decide("/anything", None, &User::anonymous()),
            AccessDecision::Denied
        );
    }

    #[test]
    fn forbidden_denies_even_privileged_users() {
        let engine = engine(
            r#"
global-access-rules:
  - intercept-url: ["/internal/**"]
    forbidden: true
"#,
        );
        let admin = user_with(&["ROLE_ADMIN"]);
        assert_eq!(
            engine.decide("/internal/x", None, &admin),
            AccessDecision::Denied
        );
    }

    #[test]
    fn empty_roles_means_any_authenticated() {
        let engine = engine(
            r#"
global-access-rules:
  - intercept-url: ["/private/**"]
"#,
        );
        assert_eq!(
            engine.decide("/private/x", None, &User::anonymous()),
            AccessDecision::Denied
        );
        assert_eq!(
            engine.decide("/private/x", None, &user_with(&["ROLE_USER"])),
            AccessDecision::Granted
        );
    }

    #[test]
    fn role_prefix_is_tolerated_in_config() {
        let engine = engine(
            r#"
global-access-rules:
  - intercept-url: ["/a/**"]
    allowed-roles: [ADMIN]
  - intercept-url: ["/b/**"]
    allowed-roles: [ROLE_ADMIN]
"#,
        );
        let admin = user_with(&["ROLE_ADMIN"]);
        assert_eq!(engine.decide("/a/x", None, &admin), AccessDecision::Granted);
        assert_eq!(engine.decide("/b/x", None, &admin), AccessDecision::Granted);
    }

    #[test]
    fn service_rules_take_precedence() {
        let engine = engine(
            r#"
global-access-rules:
  - intercept-url: ["/**"]
    anonymous: true
services:
  svc:
    target: http://backend/svc/
    access-rules:
      - intercept-url: ["/svc/admin/**"]
        allowed-roles: [SUPER]
"#,
        );
        let anon = User::anonymous();
        // service rule matches: global anonymous rule is not consulted
        assert_eq!(
            engine.decide("/svc/admin/x", Some("http://backend/svc/"), &anon),
            AccessDecision::Denied
        );
        // no service rule matches: the global list applies
        assert_eq!(
            engine.decide("/svc/public", Some("http://backend/svc/"), &anon),
            AccessDecision::Granted
        );
        // unrelated target: straight to the global list
        assert_eq!(
            engine.decide("/svc/admin/x", Some("http://other/"), &anon),
            AccessDecision::Granted
        );
    }
}
