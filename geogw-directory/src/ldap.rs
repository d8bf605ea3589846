//! LDAP-backed [`DirectoryStore`].
//!
//! One connection per operation, bounded by the configured directory
//! timeout, with a single retry on transient connection loss. Mutations run
//! under an administrative bind; user authentication resolves the entry DN
//! through the configured search filter and binds as that DN.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{drive, ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use tracing::{debug, warn};

use geogw_core::config::DirectorySourceConfig;
use geogw_core::{Organization, User};

use crate::error::DirectoryError;
use crate::store::{BindOutcome, DirectoryStore};

/// Password-policy response control (draft-behera-ldap-password-policy).
const PPOLICY_OID: &str = "1.3.6.1.4.1.42.2.27.8.5.1";

const USER_ATTRS: &[&str] = &[
    "uid",
    "entryUUID",
    "mail",
    "givenName",
    "sn",
    "o",
    "telephoneNumber",
    "postalAddress",
    "oauth2Provider",
    "oauth2Uid",
    "oauth2OrgId",
];

const ORG_ATTRS: &[&str] = &["cn", "o", "ou", "businessCategory", "orgUniqueId", "member"];

/// One configured LDAP source.
pub struct LdapDirectory {
    config: DirectorySourceConfig,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(config: DirectorySourceConfig, timeout: Duration) -> Self {
        LdapDirectory { config, timeout }
    }

    pub fn source_name(&self) -> &str {
        &self.config.name
    }

    fn users_base(&self) -> String {
        format!("{},{}", self.config.users_rdn, self.config.base_dn)
    }

    fn roles_base(&self) -> String {
        format!("{},{}", self.config.roles_rdn, self.config.base_dn)
    }

    fn orgs_base(&self) -> String {
        format!("{},{}", self.config.orgs_rdn, self.config.base_dn)
    }

    fn user_dn(&self, username: &str) -> String {
        format!("uid={},{}", ldap_escape(username), self.users_base())
    }

    fn role_dn(&self, role: &str) -> String {
        format!("cn={},{}", ldap_escape(role), self.roles_base())
    }

    fn org_dn(&self, id: &str) -> String {
        format!("cn={},{}", ldap_escape(id), self.orgs_base())
    }

    /// Open a connection; the caller binds as needed.
    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        drive!(conn);
        ldap.with_timeout(self.timeout);
        Ok(ldap)
    }

    /// Open a connection bound as the configured administrator.
    async fn connect_admin(&self) -> Result<Ldap, DirectoryError> {
        let mut ldap = self.connect().await?;
        ldap.simple_bind(&self.config.admin_dn, &self.config.admin_password)
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(|_| DirectoryError::Operation("administrative bind rejected".into()))?;
        Ok(ldap)
    }

    /// Run an operation with one retry on transient unavailability.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, DirectoryError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, DirectoryError>>,
    {
        match op().await {
            Err(DirectoryError::Unavailable(first)) => {
                debug!(error = %first, "directory connection lost, retrying once");
                op().await
            }
            other => other,
        }
    }

    async fn search_users(&self, filter: &str) -> Result<Vec<User>, DirectoryError> {
        self.with_retry(|| async {
            let mut ldap = self.connect_admin().await?;
            let (entries, _) = ldap
                .search(&self.users_base(), Scope::Subtree, filter, USER_ATTRS)
                .await
                .map_err(map_ldap_err)?
                .success()
                .map_err(map_ldap_err)?;
            let _ = ldap.unbind().await;
            Ok(entries
                .into_iter()
                .map(|e| entry_to_user(SearchEntry::construct(e)))
                .collect())
        })
        .await
    }

    async fn search_orgs(&self, filter: &str) -> Result<Vec<Organization>, DirectoryError> {
        self.with_retry(|| async {
            let mut ldap = self.connect_admin().await?;
            let (entries, _) = ldap
                .search(&self.orgs_base(), Scope::Subtree, filter, ORG_ATTRS)
                .await
                .map_err(map_ldap_err)?
                .success()
                .map_err(map_ldap_err)?;
            let _ = ldap.unbind().await;
            Ok(entries
                .into_iter()
                .map(|e| entry_to_org(SearchEntry::construct(e)))
                .collect())
        })
        .await
    }

    /// Role names the user is a member of.
    ///
    /// Active Directory carries memberships on the entry (`memberOf`);
    /// everything else is a search over the role subtree with the
    /// configured filter.
    async fn authorities_of(&self, ldap: &mut Ldap, user_dn: &str) -> Result<Vec<String>, DirectoryError> {
        if self.config.active_directory {
            let (entries, _) = ldap
                .search(user_dn, Scope::Base, "(objectClass=*)", vec!["memberOf"])
                .await
                .map_err(map_ldap_err)?
                .success()
                .map_err(map_ldap_err)?;
            return Ok(entries
                .into_iter()
                .next()
                .map(SearchEntry::construct)
                .and_then(|e| e.attrs.get("memberOf").cloned())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|dn| {
                    dn.split(',')
                        .next()
                        .and_then(|rdn| rdn.strip_prefix("CN=").or_else(|| rdn.strip_prefix("cn=")))
                        .map(str::to_string)
                })
                .collect());
        }

        let filter = self
            .config
            .role_search_filter
            .replace("{0}", &ldap_escape(user_dn));
        let (entries, _) = ldap
            .search(&self.roles_base(), Scope::Subtree, &filter, vec!["cn"])
            .await
            .map_err(map_ldap_err)?
            .success()
            .map_err(map_ldap_err)?;
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                SearchEntry::construct(e)
                    .attrs
                    .get("cn")
                    .and_then(|v| v.first().cloned())
            })
            .collect())
    }

    async fn add_member(&self, dn: &str, member_dn: &str) -> Result<(), DirectoryError> {
        let mut ldap = self.connect_admin().await?;
        let outcome = ldap
            .modify(
                dn,
                vec![Mod::Add("member", HashSet::from([member_dn]))],
            )
            .await
            .map_err(map_ldap_err)?;
        let _ = ldap.unbind().await;
        match outcome.rc {
            // attributeOrValueExists: already a member, which is fine
            0 | 20 => Ok(()),
            rc => Err(DirectoryError::Operation(format!(
                "member add on {dn} failed (rc={rc})"
            ))),
        }
    }
}

#[async_trait]
impl DirectoryStore for LdapDirectory {
    async fn bind(&self, username: &str, password: &str) -> Result<BindOutcome, DirectoryError> {
        // resolve the entry DN through the configured filter, then bind as it
        let filter = self
            .config
            .user_search_filter
            .replace("{0}", &ldap_escape(username));

        self.with_retry(|| async {
            let mut ldap = self.connect_admin().await?;
            let (entries, _) = ldap
                .search(&self.users_base(), Scope::Subtree, &filter, vec!["uid"])
                .await
                .map_err(map_ldap_err)?
                .success()
                .map_err(map_ldap_err)?;
            let entry = entries
                .into_iter()
                .next()
                .map(SearchEntry::construct)
                .ok_or(DirectoryError::InvalidCredentials)?;
            let dn = entry.dn.clone();

            let mut user_conn = self.connect().await?;
            let result = user_conn
                .simple_bind(&dn, password)
                .await
                .map_err(map_ldap_err)?;
            if result.rc != 0 {
                let _ = user_conn.unbind().await;
                return Err(DirectoryError::InvalidCredentials);
            }
            let (warn, remaining_days) = expiry_warning(&result.ctrls);
            let _ = user_conn.unbind().await;

            let authorities = self.authorities_of(&mut ldap, &dn).await?;
            let _ = ldap.unbind().await;

            Ok(BindOutcome {
                dn,
                username: username.to_string(),
                authorities,
                warn,
                remaining_days,
            })
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        let filter = format!("(uid={})", ldap_escape(username));
        let mut users = self.search_users(&filter).await?;
        if users.is_empty() {
            return Ok(None);
        }
        let mut user = users.remove(0);
        // roles come from the role tree, not the entry
        let mut ldap = self.connect_admin().await?;
        user.roles = self.authorities_of(&mut ldap, &self.user_dn(username)).await?;
        let _ = ldap.unbind().await;
        Ok(Some(user))
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<User>, DirectoryError> {
        if email.is_empty() {
            return Ok(Vec::new());
        }
        let filter = format!("(mail={})", ldap_escape(email));
        self.search_users(&filter).await
    }

    async fn find_by_external_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, DirectoryError> {
        let filter = format!(
            "(&(oauth2Provider={})(oauth2Uid={}))",
            ldap_escape(provider),
            ldap_escape(uid)
        );
        Ok(self.search_users(&filter).await?.into_iter().next())
    }

    async fn create_user(&self, user: &User) -> Result<(), DirectoryError> {
        if self.find_by_username(&user.username).await?.is_some() {
            return Err(DirectoryError::DuplicateUsername(user.username.clone()));
        }
        if !self.find_by_email(&user.email).await?.is_empty() {
            return Err(DirectoryError::DuplicateEmail(user.email.clone()));
        }

        let cn = if user.full_name().is_empty() {
            user.username.clone()
        } else {
            user.full_name()
        };
        let sn = if user.last_name.is_empty() {
            user.username.clone()
        } else {
            user.last_name.clone()
        };

        let mut attrs: Vec<(&str, HashSet<&str>)> = vec![
            (
                "objectClass",
                HashSet::from(["top", "person", "organizationalPerson", "inetOrgPerson", "georchestraUser"]),
            ),
            ("uid", HashSet::from([user.username.as_str()])),
            ("cn", HashSet::from([cn.as_str()])),
            ("sn", HashSet::from([sn.as_str()])),
        ];
        for (attr, value) in [
            ("mail", &user.email),
            ("givenName", &user.first_name),
            ("o", &user.organization),
            ("telephoneNumber", &user.telephone_number),
            ("postalAddress", &user.postal_address),
            ("oauth2Provider", &user.external_provider),
            ("oauth2Uid", &user.external_uid),
            ("oauth2OrgId", &user.external_org_id),
        ] {
            if !value.is_empty() {
                attrs.push((attr, HashSet::from([value.as_str()])));
            }
        }

        self.with_retry(|| {
            let attrs = attrs.clone();
            async move {
                let mut ldap = self.connect_admin().await?;
                let outcome = ldap
                    .add(&self.user_dn(&user.username), attrs)
                    .await
                    .map_err(map_ldap_err)?;
                let _ = ldap.unbind().await;
                match outcome.rc {
                    0 => Ok(()),
                    // entryAlreadyExists: lost a race with another writer
                    68 => Err(DirectoryError::DuplicateUsername(user.username.clone())),
                    rc => Err(DirectoryError::Operation(format!(
                        "user add failed (rc={rc})"
                    ))),
                }
            }
        })
        .await
    }

    async fn ensure_roles(&self, roles: &[String], username: &str) -> Result<(), DirectoryError> {
        let member_dn = self.user_dn(username);
        let mut wanted: Vec<&str> = roles
            .iter()
            .map(String::as_str)
            .filter(|r| !r.starts_with("ROLE_"))
            .collect();
        if !wanted.contains(&"USER") {
            wanted.push("USER");
        }

        for role in wanted {
            let role_dn = self.role_dn(role);
            let mut ldap = self.connect_admin().await?;
            let outcome = ldap
                .add(
                    &role_dn,
                    vec![
                        ("objectClass", HashSet::from(["top", "groupOfMembers"])),
                        ("cn", HashSet::from([role])),
                        ("member", HashSet::from([member_dn.as_str()])),
                    ],
                )
                .await
                .map_err(map_ldap_err)?;
            let _ = ldap.unbind().await;
            match outcome.rc {
                0 => {}
                // exists: just add the membership
                68 => self.add_member(&role_dn, &member_dn).await?,
                rc => {
                    return Err(DirectoryError::Operation(format!(
                        "role entry {role} failed (rc={rc})"
                    )))
                }
            }
        }
        Ok(())
    }

    async fn ensure_org(&self, user: &User) -> Result<Option<Organization>, DirectoryError> {
        if user.organization.is_empty() && user.external_org_id.is_empty() {
            return Ok(None);
        }
        let existing = if !user.external_org_id.is_empty() {
            self.find_org_by_external_uid(&user.external_org_id).await?
        } else {
            self.find_org(&user.organization).await?
        };

        let id = match existing {
            Some(org) => org.id,
            None => {
                let id = if user.organization.is_empty() {
                    user.external_org_id.clone()
                } else {
                    user.organization.clone()
                };
                let mut attrs: Vec<(&str, HashSet<&str>)> = vec![
                    (
                        "objectClass",
                        HashSet::from(["top", "organization", "georchestraOrg"]),
                    ),
                    ("cn", HashSet::from([id.as_str()])),
                    ("o", HashSet::from([id.as_str()])),
                    ("businessCategory", HashSet::from(["Other"])),
                ];
                if !user.external_org_id.is_empty() {
                    attrs.push(("orgUniqueId", HashSet::from([user.external_org_id.as_str()])));
                }
                let mut ldap = self.connect_admin().await?;
                let outcome = ldap
                    .add(&self.org_dn(&id), attrs)
                    .await
                    .map_err(map_ldap_err)?;
                let _ = ldap.unbind().await;
                if outcome.rc != 0 && outcome.rc != 68 {
                    return Err(DirectoryError::Operation(format!(
                        "org add failed (rc={})",
                        outcome.rc
                    )));
                }
                id
            }
        };

        self.add_member(&self.org_dn(&id), &self.user_dn(&user.username))
            .await?;
        self.find_org(&id).await
    }

    async fn unlink_org(&self, org_id: &str, username: &str) -> Result<(), DirectoryError> {
        let member_dn = self.user_dn(username);
        let mut ldap = self.connect_admin().await?;
        let outcome = ldap
            .modify(
                &self.org_dn(org_id),
                vec![Mod::Delete("member", HashSet::from([member_dn.as_str()]))],
            )
            .await
            .map_err(map_ldap_err)?;
        let _ = ldap.unbind().await;
        match outcome.rc {
            // noSuchAttribute / noSuchObject: not a member, nothing to do
            0 | 16 | 32 => Ok(()),
            rc => Err(DirectoryError::Operation(format!(
                "member removal on {org_id} failed (rc={rc})"
            ))),
        }
    }

    async fn find_org(&self, id: &str) -> Result<Option<Organization>, DirectoryError> {
        let filter = format!("(cn={})", ldap_escape(id));
        Ok(self.search_orgs(&filter).await?.into_iter().next())
    }

    async fn find_org_by_external_uid(
        &self,
        uid: &str,
    ) -> Result<Option<Organization>, DirectoryError> {
        if uid.is_empty() {
            return Ok(None);
        }
        let filter = format!("(orgUniqueId={})", ldap_escape(uid));
        Ok(self.search_orgs(&filter).await?.into_iter().next())
    }

    async fn delete_user(&self, username: &str) -> Result<(), DirectoryError> {
        let mut ldap = self.connect_admin().await?;
        let outcome = ldap
            .delete(&self.user_dn(username))
            .await
            .map_err(map_ldap_err)?;
        let _ = ldap.unbind().await;
        match outcome.rc {
            0 | 32 => Ok(()),
            rc => {
                warn!(username, rc, "rollback delete failed");
                Err(DirectoryError::Operation(format!(
                    "user delete failed (rc={rc})"
                )))
            }
        }
    }
}

fn map_ldap_err(err: ldap3::LdapError) -> DirectoryError {
    match err {
        ldap3::LdapError::LdapResult { result } => match result.rc {
            49 => DirectoryError::InvalidCredentials,
            68 => DirectoryError::DuplicateUsername(result.text),
            rc => DirectoryError::Operation(format!("rc={rc}: {}", result.text)),
        },
        other => DirectoryError::Unavailable(other.to_string()),
    }
}

fn attr(entry: &SearchEntry, name: &str) -> String {
    entry
        .attrs
        .get(name)
        .and_then(|v| v.first())
        .cloned()
        .unwrap_or_default()
}

fn entry_to_user(entry: SearchEntry) -> User {
    let username = attr(&entry, "uid");
    let id = {
        let uuid = attr(&entry, "entryUUID");
        if uuid.is_empty() {
            username.clone()
        } else {
            uuid
        }
    };
    User {
        id,
        username,
        email: attr(&entry, "mail"),
        first_name: attr(&entry, "givenName"),
        last_name: attr(&entry, "sn"),
        organization: attr(&entry, "o"),
        telephone_number: attr(&entry, "telephoneNumber"),
        postal_address: attr(&entry, "postalAddress"),
        external_provider: attr(&entry, "oauth2Provider"),
        external_uid: attr(&entry, "oauth2Uid"),
        external_org_id: attr(&entry, "oauth2OrgId"),
        ..Default::default()
    }
}

fn entry_to_org(entry: SearchEntry) -> Organization {
    Organization {
        id: attr(&entry, "cn"),
        name: attr(&entry, "o"),
        short_name: attr(&entry, "ou"),
        org_type: {
            let t = attr(&entry, "businessCategory");
            if t.is_empty() {
                "Other".into()
            } else {
                t
            }
        },
        external_uid: attr(&entry, "orgUniqueId"),
        members: entry
            .attrs
            .get("member")
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|dn| {
                dn.split(',')
                    .next()
                    .and_then(|rdn| rdn.strip_prefix("uid="))
                    .map(str::to_string)
            })
            .collect(),
    }
}

/// Extract the password-expiry warning from the bind response controls.
///
/// The ppolicy response value is a BER sequence whose warning choice
/// (context tag 0) wraps `timeBeforeExpiration` (context tag 0, integer
/// seconds). Only that shape is recognized; anything else reads as no
/// warning.
fn expiry_warning(controls: &[ldap3::controls::Control]) -> (bool, Option<String>) {
    for control in controls {
        let raw: &RawControl = &control.1;
        if raw.ctype != PPOLICY_OID {
            continue;
        }
        let Some(val) = &raw.val else { continue };
        if let Some(seconds) = parse_ppolicy_expiry_seconds(val) {
            let days = (seconds / 86_400).to_string();
            return (true, Some(days));
        }
        return (true, None);
    }
    (false, None)
}

fn parse_ppolicy_expiry_seconds(val: &[u8]) -> Option<u64> {
    // SEQUENCE { [0] warning { [0] timeBeforeExpiration INTEGER } ... }
    if val.len() < 4 || val[0] != 0x30 {
        return None;
    }
    let mut i = 2;
    while i + 1 < val.len() {
        let tag = val[i];
        let len = val[i + 1] as usize;
        let content = val.get(i + 2..i + 2 + len)?;
        if tag == 0xA0 && content.len() >= 2 && content[0] == 0x80 {
            let int_len = content[1] as usize;
            let bytes = content.get(2..2 + int_len)?;
            let mut seconds: u64 = 0;
            for b in bytes {
                seconds = (seconds << 8) | u64::from(*b);
            }
            return Some(seconds);
        }
        i += 2 + len;
    }
    None
}
