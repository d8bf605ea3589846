//! Account management.
//!
//! The account manager is the single owner of user/organization mutations in
//! the directory. A reader-writer lock serializes writers against each other
//! and against readers, so two concurrent logins for the same unknown user
//! never both reach the insert path.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use geogw_core::{Organization, User};
use geogw_events::{EventSink, UserCreated};

use crate::error::DirectoryError;
use crate::store::DirectoryStore;

/// How to look an existing account up.
#[derive(Clone, Copy, Debug)]
pub enum LookupKey<'a> {
    Username(&'a str),
    Email(&'a str),
    ExternalUid { provider: &'a str, uid: &'a str },
}

pub struct AccountManager {
    store: Arc<dyn DirectoryStore>,
    events: Arc<dyn EventSink>,
    lock: RwLock<()>,
    default_organization: String,
}

impl AccountManager {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        events: Arc<dyn EventSink>,
        default_organization: impl Into<String>,
    ) -> Self {
        AccountManager {
            store,
            events,
            lock: RwLock::new(()),
            default_organization: default_organization.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    /// Look an account up. Multiple matches on an email key surface as
    /// [`DirectoryError::DuplicateEmail`].
    pub async fn find(&self, key: LookupKey<'_>) -> Result<Option<User>, DirectoryError> {
        let _read = self.lock.read().await;
        match key {
            LookupKey::Username(username) => self.store.find_by_username(username).await,
            LookupKey::ExternalUid { provider, uid } => {
                self.store.find_by_external_uid(provider, uid).await
            }
            LookupKey::Email(email) => {
                let mut matches = self.store.find_by_email(email).await?;
                match matches.len() {
                    0 => Ok(None),
                    1 => Ok(Some(matches.remove(0))),
                    _ => Err(DirectoryError::DuplicateEmail(email.to_string())),
                }
            }
        }
    }

    /// Organization record of a user, if any.
    pub async fn organization_of(&self, user: &User) -> Result<Option<Organization>, DirectoryError> {
        if user.organization.is_empty() {
            return Ok(None);
        }
        let _read = self.lock.read().await;
        self.store.find_org(&user.organization).await
    }

    /// Get an existing account or provision the mapped user.
    ///
    /// Runs under the write lock, with the lookup repeated inside it so a
    /// concurrent winner is returned instead of attempting a second insert.
    pub async fn get_or_create(
        &self,
        mapped: &User,
        key: LookupKey<'_>,
    ) -> Result<User, DirectoryError> {
        let _write = self.lock.write().await;

        let existing = match key {
            LookupKey::Username(username) => self.store.find_by_username(username).await?,
            LookupKey::ExternalUid { provider, uid } => {
                self.store.find_by_external_uid(provider, uid).await?
            }
            LookupKey::Email(email) => {
                let mut matches = self.store.find_by_email(email).await?;
                match matches.len() {
                    0 => None,
                    1 => Some(matches.remove(0)),
                    _ => return Err(DirectoryError::DuplicateEmail(email.to_string())),
                }
            }
        };
        if let Some(user) = existing {
            return Ok(user);
        }

        let mut user = mapped.clone();
        if user.organization.is_empty() && user.external_org_id.is_empty() {
            user.organization = self.default_organization.clone();
        }

        self.store.create_user(&user).await?;

        if let Err(e) = self.store.ensure_org(&user).await {
            self.rollback(&user.username).await;
            return Err(DirectoryError::OrgProvisioningFailed(e.to_string()));
        }
        if let Err(e) = self.store.ensure_roles(&user.roles, &user.username).await {
            self.rollback(&user.username).await;
            return Err(DirectoryError::RoleProvisioningFailed(e.to_string()));
        }

        let stored = self
            .store
            .find_by_username(&user.username)
            .await?
            .unwrap_or(user);

        info!(username = %stored.username, provider = %stored.external_provider, "user provisioned");
        if !stored.external_provider.is_empty() {
            if let Err(e) = self.events.user_created(&UserCreated::for_user(&stored)).await {
                warn!(error = %e, username = %stored.username, "user-created event not published");
            }
        }
        Ok(stored)
    }

    /// Align the stored organization with the provider-indicated one.
    ///
    /// When the mapped user carries an external organization id that differs
    /// from the current organization's, the user is unlinked from the old
    /// entry and linked (creating it if needed) to the new one.
    pub async fn reconcile_org(
        &self,
        current: &User,
        mapped: &User,
    ) -> Result<User, DirectoryError> {
        if mapped.external_org_id.is_empty() {
            return Ok(current.clone());
        }

        let _write = self.lock.write().await;

        let current_org = if current.organization.is_empty() {
            None
        } else {
            self.store.find_org(&current.organization).await?
        };
        if let Some(org) = &current_org {
            if org.external_uid == mapped.external_org_id {
                return Ok(current.clone());
            }
            self.store.unlink_org(&org.id, &current.username).await?;
        }

        let mut target = current.clone();
        target.external_org_id = mapped.external_org_id.clone();
        target.organization = mapped.organization.clone();
        let ensured = self.store.ensure_org(&target).await?;

        let mut updated = current.clone();
        updated.external_org_id = mapped.external_org_id.clone();
        if let Some(org) = ensured {
            updated.organization = org.id;
        }
        Ok(updated)
    }

    async fn rollback(&self, username: &str) {
        if let Err(e) = self.store.delete_user(username).await {
            warn!(username, error = %e, "rollback of partially provisioned user failed");
        }
    }
}
