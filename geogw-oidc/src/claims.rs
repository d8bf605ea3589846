//! Claim mapping: provider claims → canonical user fields and roles.
//!
//! Three layers, later layers overriding earlier ones when they extract a
//! non-empty value:
//!
//! 1. the standard OIDC claims (`sub`, `preferred_username`, `given_name`,
//!    `family_name`, `email`, `phone_number`, `address.formatted`),
//! 2. the general (provider-independent) JSON-path mapping,
//! 3. the provider-specific JSON-path mapping.
//!
//! Userinfo claims override id-token claims before any mapping runs. The
//! username is finally slugged as `<registration_id>_<username>`, lowercase,
//! everything outside `[a-z0-9_-]` replaced by `_`.

use serde_json::Value;
use serde_json_path::JsonPath;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use geogw_core::config::{ClaimMappingConfig, ClaimPathConfig, OidcProviderConfig, RoleClaimConfig};
use geogw_core::User;

use crate::error::OidcError;

/// A compiled scalar field mapping: ordered JSON-path expressions.
#[derive(Default)]
struct CompiledPaths {
    paths: Vec<JsonPath>,
}

impl CompiledPaths {
    fn compile(config: &ClaimPathConfig) -> Result<Self, OidcError> {
        let mut paths = Vec::with_capacity(config.path.len());
        for expr in &config.path {
            paths.push(JsonPath::parse(expr).map_err(|e| {
                OidcError::InvalidClaimConfiguration(format!("'{expr}': {e}"))
            })?);
        }
        Ok(CompiledPaths { paths })
    }

    /// First non-empty string extraction, in path order.
    fn extract_scalar(&self, claims: &Value) -> Result<Option<String>, OidcError> {
        for path in &self.paths {
            for node in path.query(claims).all() {
                match node {
                    Value::Null => {}
                    Value::String(s) if s.is_empty() => {}
                    Value::String(s) => return Ok(Some(s.clone())),
                    other => {
                        return Err(OidcError::InvalidClaimConfiguration(format!(
                            "claim path yielded a non-string value: {other}"
                        )))
                    }
                }
            }
        }
        Ok(None)
    }

    /// All string extractions across all paths, in order.
    fn extract_all(&self, claims: &Value) -> Result<Vec<String>, OidcError> {
        let mut out = Vec::new();
        for path in &self.paths {
            for node in path.query(claims).all() {
                match node {
                    Value::Null => {}
                    Value::String(s) if s.is_empty() => {}
                    Value::String(s) => out.push(s.clone()),
                    other => {
                        return Err(OidcError::InvalidClaimConfiguration(format!(
                            "role path yielded a non-string value: {other}"
                        )))
                    }
                }
            }
        }
        Ok(out)
    }
}

struct CompiledMapping {
    id: CompiledPaths,
    email: CompiledPaths,
    given_name: CompiledPaths,
    family_name: CompiledPaths,
    organization: CompiledPaths,
    organization_uid: CompiledPaths,
    roles: CompiledPaths,
    role_flags: RoleClaimConfig,
}

impl CompiledMapping {
    fn compile(config: &ClaimMappingConfig) -> Result<Self, OidcError> {
        Ok(CompiledMapping {
            id: CompiledPaths::compile(&config.id)?,
            email: CompiledPaths::compile(&config.email)?,
            given_name: CompiledPaths::compile(&config.given_name)?,
            family_name: CompiledPaths::compile(&config.family_name)?,
            organization: CompiledPaths::compile(&config.organization)?,
            organization_uid: CompiledPaths::compile(&config.organization_uid)?,
            roles: CompiledPaths::compile(&ClaimPathConfig {
                path: config.roles.path.clone(),
            })?,
            role_flags: config.roles.clone(),
        })
    }
}

/// Compiled claim extractor for one provider: general mapping plus the
/// provider-specific overrides.
pub struct ClaimsExtractor {
    registration_id: String,
    general: CompiledMapping,
    provider: CompiledMapping,
}

impl ClaimsExtractor {
    /// Compile the general and provider mappings. A malformed JSON-path is a
    /// configuration error and fails startup.
    pub fn new(
        general: &ClaimMappingConfig,
        provider: &OidcProviderConfig,
    ) -> Result<Self, OidcError> {
        Ok(ClaimsExtractor {
            registration_id: provider.registration_id.clone(),
            general: CompiledMapping::compile(general)?,
            provider: CompiledMapping::compile(&provider.claims)?,
        })
    }

    /// Map id-token and userinfo claims to a canonical user.
    ///
    /// `authorities` are the roles already granted by the authentication
    /// layer; extracted roles are prepended to (or replace) them according
    /// to the role mapping flags.
    pub fn extract(
        &self,
        id_claims: &Value,
        userinfo_claims: &Value,
        authorities: &[String],
    ) -> Result<User, OidcError> {
        let merged = merge_claims(id_claims, userinfo_claims);

        let mut user = User {
            id: string_claim(&merged, "sub"),
            email: string_claim(&merged, "email"),
            first_name: string_claim(&merged, "given_name"),
            last_name: string_claim(&merged, "family_name"),
            telephone_number: string_claim(&merged, "phone_number"),
            postal_address: merged
                .pointer("/address/formatted")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            external_provider: self.registration_id.clone(),
            ..Default::default()
        };
        user.external_uid = user.id.clone();

        let mut username = string_claim(&merged, "preferred_username");
        if username.is_empty() {
            username = user.email.clone();
        }
        if username.is_empty() {
            username = user.id.clone();
        }

        // general mapping overrides the standard values, provider overrides general
        for mapping in [&self.general, &self.provider] {
            apply_scalar(&mapping.id, &merged, &mut user.id)?;
            apply_scalar(&mapping.email, &merged, &mut user.email)?;
            apply_scalar(&mapping.given_name, &merged, &mut user.first_name)?;
            apply_scalar(&mapping.family_name, &merged, &mut user.last_name)?;
            apply_scalar(&mapping.organization, &merged, &mut user.organization)?;
            apply_scalar(&mapping.organization_uid, &merged, &mut user.external_org_id)?;
        }

        user.username = slug_username(&self.registration_id, &username);
        user.roles = self.extract_roles(&merged, authorities)?;
        Ok(user)
    }

    fn extract_roles(
        &self,
        claims: &Value,
        authorities: &[String],
    ) -> Result<Vec<String>, OidcError> {
        // provider role paths override the general ones entirely
        let (paths, flags) = if self.provider.roles.paths.is_empty() {
            (&self.general.roles, &self.general.role_flags)
        } else {
            (&self.provider.roles, &self.provider.role_flags)
        };

        let mut extracted = paths.extract_all(claims)?;
        extracted = extracted
            .into_iter()
            .map(|role| {
                let role = if flags.uppercase {
                    role.to_uppercase()
                } else {
                    role
                };
                if flags.normalize {
                    normalize_role(&role)
                } else {
                    role
                }
            })
            .filter(|r| !r.is_empty())
            .collect();

        if flags.append {
            extracted.extend(authorities.iter().cloned());
        }
        Ok(extracted)
    }
}

/// Userinfo claims override id-token claims, field by field.
pub fn merge_claims(id_claims: &Value, userinfo_claims: &Value) -> Value {
    let mut merged = id_claims.clone();
    if let (Some(base), Some(over)) = (merged.as_object_mut(), userinfo_claims.as_object()) {
        for (key, value) in over {
            base.insert(key.clone(), value.clone());
        }
    } else if userinfo_claims.is_object() {
        merged = userinfo_claims.clone();
    }
    merged
}

fn string_claim(claims: &Value, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn apply_scalar(
    paths: &CompiledPaths,
    claims: &Value,
    target: &mut String,
) -> Result<(), OidcError> {
    if let Some(value) = paths.extract_scalar(claims)? {
        *target = value;
    }
    Ok(())
}

/// `<registration_id>_<username>`, lowercased, everything outside
/// `[a-z0-9_-]` replaced by `_`.
pub fn slug_username(registration_id: &str, username: &str) -> String {
    format!("{registration_id}_{username}")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Normalize a role name: decompose, drop combining marks, collapse
/// whitespace runs to `_`, keep only `[A-Za-z0-9_]`.
///
/// Idempotent: the output alphabet is a fixed point of the function.
pub fn normalize_role(role: &str) -> String {
    let stripped: String = role.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let mut out = String::with_capacity(stripped.len());
    let mut in_whitespace = false;
    for c in stripped.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        }
    }
    out
}
