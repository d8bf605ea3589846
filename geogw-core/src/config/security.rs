use std::collections::BTreeMap;

use serde::Deserialize;

/// Contents of `security.yaml`: authentication sources and account
/// provisioning policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SecurityFile {
    /// Directory sources, keyed by name. Evaluated in key order for form
    /// logins.
    #[serde(default)]
    pub directory: BTreeMap<String, DirectorySourceConfig>,
    #[serde(default)]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub preauth: PreAuthConfig,
    /// Create unknown externally-authenticated users in the directory.
    #[serde(default)]
    pub create_non_existing_users: bool,
    /// Organization assigned to provisioned users that carry none.
    #[serde(default)]
    pub default_organization: String,
    /// Where `/logout` sends the browser once the session is gone.
    #[serde(default = "default_logout_url")]
    pub logout_url: String,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub rabbitmq: RabbitMqConfig,
}

fn default_logout_url() -> String {
    "/".to_string()
}

impl Default for SecurityFile {
    fn default() -> Self {
        SecurityFile {
            directory: BTreeMap::new(),
            oidc: OidcConfig::default(),
            preauth: PreAuthConfig::default(),
            create_non_existing_users: false,
            default_organization: String::new(),
            logout_url: default_logout_url(),
            timeouts: TimeoutsConfig::default(),
            rabbitmq: RabbitMqConfig::default(),
        }
    }
}

/// One directory (LDAP) authentication source.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DirectorySourceConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// Extended schema: organizations and their members are first-class
    /// entries. Only extended sources take part in account provisioning.
    #[serde(default)]
    pub extended: bool,
    pub url: String,
    pub base_dn: String,
    #[serde(default = "default_users_rdn")]
    pub users_rdn: String,
    #[serde(default = "default_user_search_filter")]
    pub user_search_filter: String,
    #[serde(default = "default_roles_rdn")]
    pub roles_rdn: String,
    #[serde(default = "default_role_search_filter")]
    pub role_search_filter: String,
    /// Extended sources only.
    #[serde(default = "default_orgs_rdn")]
    pub orgs_rdn: String,
    /// Extended sources only.
    #[serde(default = "default_pending_orgs_rdn")]
    pub pending_orgs_rdn: String,
    #[serde(default)]
    pub admin_dn: String,
    #[serde(default)]
    pub admin_password: String,
    /// Active Directory quirk mode (bind by userPrincipalName).
    #[serde(default)]
    pub active_directory: bool,
}

fn default_users_rdn() -> String {
    "ou=users".into()
}
fn default_user_search_filter() -> String {
    "(uid={0})".into()
}
fn default_roles_rdn() -> String {
    "ou=roles".into()
}
fn default_role_search_filter() -> String {
    "(member={0})".into()
}
fn default_orgs_rdn() -> String {
    "ou=orgs".into()
}
fn default_pending_orgs_rdn() -> String {
    "ou=pendingorgs".into()
}

/// OIDC client configuration: registrations plus the general claim mapping
/// and an optional outbound HTTP proxy.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OidcConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Externally visible base URL of this gateway, used to build redirect
    /// URIs (e.g. `https://geo.example.org`).
    #[serde(default)]
    pub external_url: String,
    #[serde(default)]
    pub proxy: OutboundProxyConfig,
    /// General (provider-independent) non-standard claim mapping.
    #[serde(default)]
    pub claims: ClaimMappingConfig,
    /// Provider registrations, keyed by registration id.
    #[serde(default)]
    pub providers: BTreeMap<String, OidcProviderConfig>,
}

/// One OIDC provider registration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OidcProviderConfig {
    #[serde(skip)]
    pub registration_id: String,
    #[serde(default)]
    pub enabled: bool,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub issuer: String,
    pub authorization_uri: String,
    pub token_uri: String,
    #[serde(default)]
    pub userinfo_uri: String,
    #[serde(default)]
    pub jwks_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Provider session termination endpoint. When set, `/logout` redirects
    /// there with a `post_logout_redirect_uri`.
    #[serde(default)]
    pub end_session_uri: String,
    /// Look existing accounts up by email instead of (provider, uid).
    #[serde(default)]
    pub search_email: bool,
    /// Provider-specific claim mapping, overrides the general one.
    #[serde(default)]
    pub claims: ClaimMappingConfig,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".into(), "profile".into(), "email".into()]
}

/// Outbound HTTP proxy for all provider traffic.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OutboundProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Non-standard claim mapping: JSON-path lists per user field plus the role
/// extraction policy. An empty path list leaves the field to the next lower
/// layer (provider mapping falls back to general, general to standard OIDC).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClaimMappingConfig {
    #[serde(default)]
    pub id: ClaimPathConfig,
    #[serde(default)]
    pub email: ClaimPathConfig,
    #[serde(default)]
    pub given_name: ClaimPathConfig,
    #[serde(default)]
    pub family_name: ClaimPathConfig,
    #[serde(default)]
    pub organization: ClaimPathConfig,
    #[serde(default)]
    pub organization_uid: ClaimPathConfig,
    #[serde(default)]
    pub roles: RoleClaimConfig,
}

/// JSON-path expressions for one field; the first non-empty extraction wins.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClaimPathConfig {
    #[serde(default)]
    pub path: Vec<String>,
}

/// Role extraction policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RoleClaimConfig {
    pub path: Vec<String>,
    /// Uppercase extracted role names.
    pub uppercase: bool,
    /// Strip diacritics, collapse whitespace to `_`, drop everything outside
    /// `[A-Za-z0-9_]`.
    pub normalize: bool,
    /// Prepend extracted roles to the roles already granted; `false`
    /// replaces them.
    pub append: bool,
}

impl Default for RoleClaimConfig {
    fn default() -> Self {
        RoleClaimConfig {
            path: Vec::new(),
            uppercase: true,
            normalize: true,
            append: true,
        }
    }
}

/// Pre-authentication via trusted fronting-proxy headers.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PreAuthConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Timeouts for every suspending boundary, in seconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct TimeoutsConfig {
    pub directory_secs: u64,
    pub oidc_secs: u64,
    pub upstream_secs: u64,
    pub broker_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            directory_secs: 5,
            oidc_secs: 10,
            upstream_secs: 30,
            broker_secs: 5,
        }
    }
}

/// Message broker connection for account-creation events.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RabbitMqConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        RabbitMqConfig {
            enabled: false,
            host: "localhost".into(),
            port: 5672,
            user: "guest".into(),
            password: "guest".into(),
            vhost: "/".into(),
        }
    }
}
