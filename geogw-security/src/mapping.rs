//! Role mappings: append extra roles when a user's roles match a source glob.

use geogw_core::config::RoleMappingsFile;
use geogw_core::pattern::PatternError;
use geogw_core::user::canonicalize_role;
use geogw_core::PathPattern;

/// Compiled role mappings, applied in declaration order.
pub struct RoleMappings {
    mappings: Vec<(PathPattern, Vec<String>)>,
}

impl RoleMappings {
    pub fn compile(config: &RoleMappingsFile) -> Result<Self, PatternError> {
        let mut mappings = Vec::with_capacity(config.role_mappings.len());
        for (source, extra) in &config.role_mappings {
            mappings.push((PathPattern::new(source)?, extra.clone()));
        }
        Ok(RoleMappings { mappings })
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Additive application: every role the user already has stays; for each
    /// mapping whose source matches any current role, the configured roles
    /// are appended once, in first-seen order.
    ///
    /// Sources match the role name as given or its canonicalized
    /// (`ROLE_`-prefixed) form, so mappings work the same for directory
    /// authorities and mapped provider roles.
    pub fn apply(&self, roles: Vec<String>) -> Vec<String> {
        let mut out = roles;
        for (source, extra) in &self.mappings {
            let matched = out
                .iter()
                .any(|role| source.matches(role) || source.matches(&canonicalize_role(role)));
            if matched {
                for role in extra {
                    if !out.contains(role) {
                        out.push(role.clone());
                    }
                }
            }
        }
        out
    }
}
