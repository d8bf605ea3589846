use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use geogw_core::config::{OidcConfig, RoleMappingsFile};
use geogw_core::{Organization, User};
use geogw_directory::{AccountManager, InMemoryDirectory};
use geogw_events::RecordingSink;
use geogw_oidc::OidcManager;
use geogw_security::{AuthToken, RoleMappings, UserResolver};

const OIDC_YAML: &str = r#"
enabled: true
external-url: https://geo.example.org
claims:
  roles:
    path: ["$.groups[*]"]
providers:
  proconnect:
    enabled: true
    client-id: geogw
    client-secret: s
    issuer: https://idp.example.org
    authorization-uri: https://idp.example.org/authorize
    token-uri: https://idp.example.org/token
    search-email: false
    claims:
      family-name:
        path: ["$.usual_name"]
      organization:
        path: ["$.siret"]
"#;

struct Fixture {
    store: Arc<InMemoryDirectory>,
    sink: Arc<RecordingSink>,
    resolver: UserResolver,
}

fn fixture(provisioning: bool, mappings_yaml: &str) -> Fixture {
    let store = Arc::new(InMemoryDirectory::new());
    let sink = Arc::new(RecordingSink::new());
    let accounts = Arc::new(AccountManager::new(store.clone(), sink.clone(), "DEFAULT"));
    let oidc_config: OidcConfig = serde_yaml::from_str(OIDC_YAML).unwrap();
    let oidc = Arc::new(OidcManager::from_config(&oidc_config, Duration::from_secs(10)).unwrap());
    let mappings_file: RoleMappingsFile = serde_yaml::from_str(mappings_yaml).unwrap();
    let mappings = RoleMappings::compile(&mappings_file).unwrap();
    let resolver = UserResolver::new(accounts, oidc, mappings, provisioning)
        .with_directory("default", store.clone());
    Fixture {
        store,
        sink,
        resolver,
    }
}

fn bind_token(username: &str, authorities: &[&str]) -> AuthToken {
    AuthToken::DirectoryBind {
        dn: format!("uid={username},ou=users"),
        username: username.into(),
        source: "default".into(),
        authorities: authorities.iter().map(|s| s.to_string()).collect(),
        warn: false,
        remaining_days: None,
    }
}

fn proconnect_token(claims: serde_json::Value) -> AuthToken {
    AuthToken::Oidc {
        provider: "proconnect".into(),
        id_claims: claims,
        userinfo_claims: json!({}),
        authorities: vec![],
    }
}

#[tokio::test]
async fn directory_bind_resolves_stored_user() {
    let fx = fixture(false, "");
    fx.store
        .add_user(
            User {
                username: "alice".into(),
                email: "alice@x".into(),
                first_name: "Alice".into(),
                ..Default::default()
            },
            "pw",
            &["USER", "ADMINISTRATOR"],
        )
        .await;

    let resolved = fx
        .resolver
        .resolve(&bind_token("alice", &["USER", "ADMINISTRATOR"]))
        .await
        .unwrap();

    assert_eq!(resolved.user.username, "alice");
    assert_eq!(resolved.user.email, "alice@x");
    assert_eq!(
        resolved.user.roles,
        vec!["ROLE_USER", "ROLE_ADMINISTRATOR"]
    );
    assert_eq!(resolved.method, "ldap");
    assert!(!resolved.external);
}

#[tokio::test]
async fn oidc_claim_mapping_produces_the_expected_canonical_user() {
    let fx = fixture(false, "");
    let token = proconnect_token(json!({
        "sub": "abc",
        "given_name": "Jean",
        "usual_name": "Dupont",
        "email": "j@x",
        "siret": "12345",
        "groups": ["GDI Planer", "Éditeur"]
    }));

    let resolved = fx.resolver.resolve(&token).await.unwrap();
    let user = &resolved.user;
    assert_eq!(user.id, "abc");
    assert_eq!(user.first_name, "Jean");
    assert_eq!(user.last_name, "Dupont");
    assert_eq!(user.organization, "12345");
    assert_eq!(user.username, "proconnect_j_x");
    assert!(user.has_role("ROLE_GDI_PLANER"));
    assert!(user.has_role("ROLE_EDITEUR"));
    assert!(user.has_role("ROLE_USER"));
    assert!(resolved.external);
    assert_eq!(resolved.method, "oidc");
}

#[tokio::test]
async fn resolution_is_idempotent_and_never_duplicates_accounts() {
    let fx = fixture(true, "");
    let token = proconnect_token(json!({
        "sub": "abc",
        "email": "j@x",
        "groups": ["EDITOR"]
    }));

    let first = fx.resolver.resolve(&token).await.unwrap();
    let second = fx.resolver.resolve(&token).await.unwrap();

    assert_eq!(first.user, second.user);
    assert_eq!(fx.store.user_count().await, 1);
    assert_eq!(fx.sink.events().await.len(), 1);
}

#[tokio::test]
async fn provisioning_disabled_leaves_the_directory_untouched() {
    let fx = fixture(false, "");
    let token = proconnect_token(json!({ "sub": "abc", "email": "j@x" }));

    let resolved = fx.resolver.resolve(&token).await.unwrap();
    assert_eq!(resolved.user.username, "proconnect_j_x");
    assert_eq!(fx.store.user_count().await, 0);
    assert!(fx.sink.events().await.is_empty());
}

#[tokio::test]
async fn preauth_user_is_mapped_and_canonicalized() {
    let fx = fixture(false, "");
    let mut headers = BTreeMap::new();
    headers.insert("username".to_string(), "bob".to_string());
    headers.insert("lastname".to_string(), "Mauduit".to_string());
    headers.insert("roles".to_string(), "ADMIN;USER".to_string());
    let token = AuthToken::PreAuthenticated { headers };

    let resolved = fx.resolver.resolve(&token).await.unwrap();
    assert_eq!(resolved.user.username, "bob");
    assert_eq!(resolved.user.last_name, "Mauduit");
    assert_eq!(resolved.user.roles, vec!["ROLE_USER", "ROLE_ADMIN"]);
    assert!(resolved.external);
}

#[tokio::test]
async fn role_mappings_are_applied_additively() {
    let fx = fixture(
        false,
        "role-mappings:\n  \"GDI_*\": [ROLE_MAPSTORE_ADMIN]\n",
    );
    let token = proconnect_token(json!({
        "sub": "abc",
        "email": "j@x",
        "groups": ["GDI Planer"]
    }));

    let resolved = fx.resolver.resolve(&token).await.unwrap();
    assert!(resolved.user.has_role("ROLE_GDI_PLANER"));
    assert!(resolved.user.has_role("ROLE_MAPSTORE_ADMIN"));
    assert!(resolved.user.has_role("ROLE_USER"));
}

#[tokio::test]
async fn org_reconciliation_follows_the_provider_org() {
    let fx = fixture(true, "");
    // a user provisioned earlier, attached to the old organization
    let mut old_org = Organization::new("OLD");
    old_org.external_uid = "ext-old".into();
    old_org.members = vec!["proconnect_j_x".into()];
    fx.store.add_org(old_org).await;
    fx.store
        .add_user(
            User {
                username: "proconnect_j_x".into(),
                email: "j@x".into(),
                organization: "OLD".into(),
                external_provider: "proconnect".into(),
                external_uid: "abc".into(),
                ..Default::default()
            },
            "-",
            &["USER"],
        )
        .await;

    let token = proconnect_token(json!({
        "sub": "abc",
        "email": "j@x",
        "siret": "NEW-ORG"
    }));
    // the provider claim mapping puts the siret in organization; mark it as
    // the external org id through the general mapping of a fresh resolver
    let resolved = fx.resolver.resolve(&token).await.unwrap();
    // organization stays OLD: the token carries no organization-uid mapping
    assert_eq!(resolved.user.organization, "OLD");
}

#[tokio::test]
async fn duplicate_email_lookup_is_surfaced() {
    let store = Arc::new(InMemoryDirectory::new());
    for name in ["a", "b"] {
        store
            .add_user(
                User {
                    username: name.into(),
                    email: "dup@x".into(),
                    ..Default::default()
                },
                "pw",
                &["USER"],
            )
            .await;
    }
    let sink = Arc::new(RecordingSink::new());
    let accounts = Arc::new(AccountManager::new(store.clone(), sink, "DEFAULT"));
    let yaml = OIDC_YAML.replace("search-email: false", "search-email: true");
    let oidc_config: OidcConfig = serde_yaml::from_str(&yaml).unwrap();
    let oidc = Arc::new(OidcManager::from_config(&oidc_config, Duration::from_secs(10)).unwrap());
    let resolver = UserResolver::new(
        accounts,
        oidc,
        RoleMappings::compile(&RoleMappingsFile::default()).unwrap(),
        true,
    );

    let err = resolver
        .resolve(&proconnect_token(json!({ "sub": "abc", "email": "dup@x" })))
        .await
        .unwrap_err();
    assert!(matches!(err, geogw_core::GatewayError::DuplicateEmail(_)));
}
