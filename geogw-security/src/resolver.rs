//! Canonical user resolution.
//!
//! Whatever authenticated the request — a directory bind, an OIDC flow, or
//! trusted pre-auth headers — this component maps the token to exactly one
//! immutable [`User`] record: mapped fields, find-or-create against the
//! directory, organization reconciliation, role mappings, and role
//! canonicalization. Resolution is idempotent for unchanged inputs; the
//! pipeline caches the result per request.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use geogw_core::user::canonicalize_roles;
use geogw_core::{GatewayError, Organization, User};
use geogw_directory::{AccountManager, DirectoryStore, LookupKey};
use geogw_oidc::OidcManager;

use crate::mapping::RoleMappings;
use crate::preauth;
use crate::token::AuthToken;

/// A resolved identity plus its directory organization, if any.
#[derive(Clone, Debug)]
pub struct ResolvedUser {
    pub user: User,
    pub organization: Option<Organization>,
    /// Short authentication-method name, for headers and diagnostics.
    pub method: &'static str,
    /// Identity established outside the platform directory.
    pub external: bool,
}

impl ResolvedUser {
    /// The anonymous principal.
    pub fn anonymous() -> Self {
        ResolvedUser {
            user: User::anonymous(),
            organization: None,
            method: "anonymous",
            external: false,
        }
    }
}

pub struct UserResolver {
    accounts: Arc<AccountManager>,
    oidc: Arc<OidcManager>,
    role_mappings: RoleMappings,
    /// Create unknown externally-authenticated users in the directory.
    provisioning: bool,
    /// Directory stores by source name, for bind-token lookups.
    directories: HashMap<String, Arc<dyn DirectoryStore>>,
}

impl UserResolver {
    pub fn new(
        accounts: Arc<AccountManager>,
        oidc: Arc<OidcManager>,
        role_mappings: RoleMappings,
        provisioning: bool,
    ) -> Self {
        UserResolver {
            accounts,
            oidc,
            role_mappings,
            provisioning,
            directories: HashMap::new(),
        }
    }

    /// Register a directory source for bind-token resolution.
    pub fn with_directory(mut self, name: impl Into<String>, store: Arc<dyn DirectoryStore>) -> Self {
        self.directories.insert(name.into(), store);
        self
    }

    /// Resolve the canonical user for an authentication token.
    pub async fn resolve(&self, token: &AuthToken) -> Result<ResolvedUser, GatewayError> {
        let mut user = match token {
            AuthToken::DirectoryBind {
                username,
                source,
                authorities,
                warn: expiry_warn,
                remaining_days,
                ..
            } => {
                let mut user = self
                    .load_directory_user(source, username)
                    .await?
                    .unwrap_or_else(|| User {
                        username: username.clone(),
                        ..Default::default()
                    });
                if user.roles.is_empty() {
                    user.roles = authorities.clone();
                }
                user.directory_warn = *expiry_warn;
                user.directory_remaining_days = remaining_days.clone();
                user
            }
            AuthToken::Oidc {
                provider,
                id_claims,
                userinfo_claims,
                authorities,
            } => {
                let client = self.oidc.client(provider).map_err(GatewayError::from)?;
                let mapped = client
                    .claims_extractor()
                    .extract(id_claims, userinfo_claims, authorities)
                    .map_err(GatewayError::from)?;
                let key = if client.config().search_email {
                    LookupKey::Email(&mapped.email)
                } else {
                    LookupKey::ExternalUid {
                        provider: &mapped.external_provider,
                        uid: &mapped.external_uid,
                    }
                };
                self.find_or_create(&mapped, key).await?
            }
            AuthToken::PreAuthenticated { headers } => {
                let mapped = preauth::mapped_user(headers);
                let key = LookupKey::Username(&mapped.username);
                self.find_or_create(&mapped, key).await?
            }
        };

        user.roles = self.role_mappings.apply(std::mem::take(&mut user.roles));
        user.roles = canonicalize_roles(user.roles);

        let organization = match self.accounts.organization_of(&user).await {
            Ok(org) => org,
            Err(e) => {
                warn!(username = %user.username, error = %e, "organization lookup failed");
                None
            }
        };

        Ok(ResolvedUser {
            user,
            organization,
            method: token.method(),
            external: token.is_external(),
        })
    }

    async fn load_directory_user(
        &self,
        source: &str,
        username: &str,
    ) -> Result<Option<User>, GatewayError> {
        match self.directories.get(source) {
            Some(store) => Ok(store.find_by_username(username).await?),
            None => Ok(self.accounts.find(LookupKey::Username(username)).await?),
        }
    }

    /// Find an existing account for the mapped user, provisioning it when
    /// enabled; the mapped record itself is the canonical user otherwise.
    async fn find_or_create(
        &self,
        mapped: &User,
        key: LookupKey<'_>,
    ) -> Result<User, GatewayError> {
        let existing = self.accounts.find(key).await?;
        match existing {
            Some(stored) => {
                let reconciled = if self.provisioning && !mapped.external_org_id.is_empty() {
                    self.accounts.reconcile_org(&stored, mapped).await?
                } else {
                    stored
                };
                Ok(merge_mapped(reconciled, mapped))
            }
            None if self.provisioning => Ok(self.accounts.get_or_create(mapped, key).await?),
            None => Ok(mapped.clone()),
        }
    }
}

/// Overlay the mapped (per-request) fields on the stored record: provider
/// linkage and the extracted roles, which come first so provider-granted
/// roles keep their priority over directory ones.
fn merge_mapped(stored: User, mapped: &User) -> User {
    let mut user = stored;
    if user.external_provider.is_empty() {
        user.external_provider = mapped.external_provider.clone();
    }
    if user.external_uid.is_empty() {
        user.external_uid = mapped.external_uid.clone();
    }
    let mut roles = mapped.roles.clone();
    for role in &user.roles {
        if !roles.contains(role) {
            roles.push(role.clone());
        }
    }
    user.roles = roles;
    if user.email.is_empty() {
        user.email = mapped.email.clone();
    }
    if user.first_name.is_empty() {
        user.first_name = mapped.first_name.clone();
    }
    if user.last_name.is_empty() {
        user.last_name = mapped.last_name.clone();
    }
    user
}

