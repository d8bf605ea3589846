use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use geogw_core::{Organization, User};

use crate::error::DirectoryError;

/// Result of a successful directory bind.
#[derive(Clone, Debug)]
pub struct BindOutcome {
    /// Distinguished name the bind resolved to.
    pub dn: String,
    pub username: String,
    /// Role names granted by the directory (unprefixed, e.g. `ADMINISTRATOR`).
    pub authorities: Vec<String>,
    /// Password-policy expiry warning raised during the bind.
    pub warn: bool,
    pub remaining_days: Option<String>,
}

/// Storage-specific directory operations.
///
/// One LDAP-backed implementation ([`crate::ldap::LdapDirectory`]) and one
/// in-memory fake ([`InMemoryDirectory`]) for tests. The account manager is
/// the only writer; everything else goes through it.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Authenticate `username`/`password`, returning the resolved DN and
    /// granted authorities.
    async fn bind(&self, username: &str, password: &str) -> Result<BindOutcome, DirectoryError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError>;

    /// All users holding this email. The caller decides whether more than
    /// one is an error.
    async fn find_by_email(&self, email: &str) -> Result<Vec<User>, DirectoryError>;

    async fn find_by_external_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, DirectoryError>;

    /// Insert a new account entry. `DuplicateUsername` / `DuplicateEmail`
    /// when a matching entry already exists.
    async fn create_user(&self, user: &User) -> Result<(), DirectoryError>;

    /// Ensure every unprefixed role entry exists with the user as a member,
    /// plus membership in `USER`. Idempotent.
    async fn ensure_roles(&self, roles: &[String], username: &str) -> Result<(), DirectoryError>;

    /// Ensure the user's organization entry exists with the user as a
    /// member; resolves by provider organization id when the user carries
    /// one, otherwise by common name. Idempotent.
    async fn ensure_org(&self, user: &User) -> Result<Option<Organization>, DirectoryError>;

    /// Remove the user from an organization's member set. Idempotent.
    async fn unlink_org(&self, org_id: &str, username: &str) -> Result<(), DirectoryError>;

    async fn find_org(&self, id: &str) -> Result<Option<Organization>, DirectoryError>;

    async fn find_org_by_external_uid(
        &self,
        uid: &str,
    ) -> Result<Option<Organization>, DirectoryError>;

    /// Best-effort removal of a user entry after a later provisioning step
    /// failed.
    async fn delete_user(&self, username: &str) -> Result<(), DirectoryError>;
}

/// In-memory directory fake.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    users: HashMap<String, User>,
    passwords: HashMap<String, String>,
    /// role name → member usernames
    roles: HashMap<String, Vec<String>>,
    orgs: HashMap<String, Organization>,
    expiry_warnings: HashMap<String, Option<String>>,
    next_id: u64,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user with credentials and directory roles.
    pub async fn add_user(&self, user: User, password: &str, roles: &[&str]) {
        let mut state = self.state.lock().await;
        let username = user.username.clone();
        state.passwords.insert(username.clone(), password.to_string());
        for role in roles {
            let members = state.roles.entry(role.to_string()).or_default();
            if !members.contains(&username) {
                members.push(username.clone());
            }
        }
        state.users.insert(username, user);
    }

    /// Seed an organization entry.
    pub async fn add_org(&self, org: Organization) {
        self.state.lock().await.orgs.insert(org.id.clone(), org);
    }

    /// Mark a user's password as close to expiry for the next bind.
    pub async fn set_expiry_warning(&self, username: &str, remaining_days: Option<&str>) {
        self.state
            .lock()
            .await
            .expiry_warnings
            .insert(username.to_string(), remaining_days.map(str::to_string));
    }

    /// Role memberships of a user, for assertions.
    pub async fn roles_of(&self, username: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut roles: Vec<String> = state
            .roles
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == username))
            .map(|(role, _)| role.clone())
            .collect();
        roles.sort();
        roles
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    fn roles_of_locked(state: &InMemoryState, username: &str) -> Vec<String> {
        let mut roles: Vec<String> = state
            .roles
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == username))
            .map(|(role, _)| role.clone())
            .collect();
        roles.sort();
        roles
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn bind(&self, username: &str, password: &str) -> Result<BindOutcome, DirectoryError> {
        let state = self.state.lock().await;
        match state.passwords.get(username) {
            Some(stored) if stored == password => {
                let warning = state.expiry_warnings.get(username);
                Ok(BindOutcome {
                    dn: format!("uid={username},ou=users"),
                    username: username.to_string(),
                    authorities: Self::roles_of_locked(&state, username),
                    warn: warning.is_some(),
                    remaining_days: warning.cloned().flatten(),
                })
            }
            _ => Err(DirectoryError::InvalidCredentials),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        let state = self.state.lock().await;
        Ok(state.users.get(username).map(|user| {
            let mut user = user.clone();
            user.roles = Self::roles_of_locked(&state, username);
            user
        }))
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<User>, DirectoryError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|u| !email.is_empty() && u.email == email)
            .map(|user| {
                let mut user = user.clone();
                user.roles = Self::roles_of_locked(&state, &user.username);
                user
            })
            .collect())
    }

    async fn find_by_external_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, DirectoryError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_provider == provider && u.external_uid == uid)
            .map(|user| {
                let mut user = user.clone();
                user.roles = Self::roles_of_locked(&state, &user.username);
                user
            }))
    }

    async fn create_user(&self, user: &User) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.username) {
            return Err(DirectoryError::DuplicateUsername(user.username.clone()));
        }
        if !user.email.is_empty() && state.users.values().any(|u| u.email == user.email) {
            return Err(DirectoryError::DuplicateEmail(user.email.clone()));
        }
        let mut stored = user.clone();
        if stored.id.is_empty() {
            state.next_id += 1;
            stored.id = format!("mem-{}", state.next_id);
        }
        state.users.insert(stored.username.clone(), stored);
        Ok(())
    }

    async fn ensure_roles(&self, roles: &[String], username: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().await;
        let mut wanted: Vec<&str> = roles
            .iter()
            .map(String::as_str)
            .filter(|r| !r.starts_with("ROLE_"))
            .collect();
        if !wanted.contains(&"USER") {
            wanted.push("USER");
        }
        for role in wanted {
            let members = state.roles.entry(role.to_string()).or_default();
            if !members.iter().any(|m| m == username) {
                members.push(username.to_string());
            }
        }
        Ok(())
    }

    async fn ensure_org(&self, user: &User) -> Result<Option<Organization>, DirectoryError> {
        if user.organization.is_empty() && user.external_org_id.is_empty() {
            return Ok(None);
        }
        let mut state = self.state.lock().await;
        let existing_id = if !user.external_org_id.is_empty() {
            state
                .orgs
                .values()
                .find(|o| o.external_uid == user.external_org_id)
                .map(|o| o.id.clone())
        } else {
            state.orgs.get(&user.organization).map(|o| o.id.clone())
        };
        let id = match existing_id {
            Some(id) => id,
            None => {
                let id = if user.organization.is_empty() {
                    user.external_org_id.clone()
                } else {
                    user.organization.clone()
                };
                let mut org = Organization::new(id.clone());
                org.name = id.clone();
                org.external_uid = user.external_org_id.clone();
                state.orgs.insert(id.clone(), org);
                id
            }
        };
        let org = state.orgs.get_mut(&id).expect("org just ensured");
        if !org.members.iter().any(|m| m == &user.username) {
            org.members.push(user.username.clone());
        }
        Ok(Some(org.clone()))
    }

    async fn unlink_org(&self, org_id: &str, username: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().await;
        if let Some(org) = state.orgs.get_mut(org_id) {
            org.members.retain(|m| m != username);
        }
        Ok(())
    }

    async fn find_org(&self, id: &str) -> Result<Option<Organization>, DirectoryError> {
        Ok(self.state.lock().await.orgs.get(id).cloned())
    }

    async fn find_org_by_external_uid(
        &self,
        uid: &str,
    ) -> Result<Option<Organization>, DirectoryError> {
        Ok(self
            .state
            .lock()
            .await
            .orgs
            .values()
            .find(|o| !uid.is_empty() && o.external_uid == uid)
            .cloned())
    }

    async fn delete_user(&self, username: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().await;
        state.users.remove(username);
        state.passwords.remove(username);
        for members in state.roles.values_mut() {
            members.retain(|m| m != username);
        }
        for org in state.orgs.values_mut() {
            org.members.retain(|m| m != username);
        }
        Ok(())
    }
}
