//! Gateway assembly: build every component from the loaded configuration,
//! wire the per-request layer stack, and serve.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_sessions::cookie::SameSite;
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tracing::{info, warn};

use geogw_core::config::DatadirConfig;
use geogw_core::mdc::MdcLayer;
use geogw_core::{GatewayError, RequestIdLayer};
use geogw_directory::{AccountManager, DirectoryStore, InMemoryDirectory, LdapDirectory};
use geogw_events::{EventSink, NoopSink};
use geogw_oidc::OidcManager;
use geogw_security::{AccessRuleEngine, RoleMappings, UserResolver};

use crate::forward::Forwarder;
use crate::pages::ErrorPages;
use crate::routes::RouteTable;
use crate::{auth, handlers, proxy};

/// Everything the request pipeline needs, shared behind one `Arc`.
pub struct Gateway {
    pub config: DatadirConfig,
    pub routes: RouteTable,
    pub rules: AccessRuleEngine,
    pub accounts: Arc<AccountManager>,
    pub resolver: UserResolver,
    pub oidc: Arc<OidcManager>,
    pub forwarder: Forwarder,
    pub pages: ErrorPages,
    /// Directory sources usable for form login, in configuration order.
    pub binders: Vec<(String, Arc<dyn DirectoryStore>)>,
}

impl Gateway {
    pub fn builder(config: DatadirConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            store_override: None,
            events_override: None,
        }
    }

    pub fn preauth_enabled(&self) -> bool {
        self.config.security.preauth.enabled
    }

    pub fn logout_url(&self) -> &str {
        &self.config.security.logout_url
    }
}

pub struct GatewayBuilder {
    config: DatadirConfig,
    store_override: Option<Arc<dyn DirectoryStore>>,
    events_override: Option<Arc<dyn EventSink>>,
}

impl GatewayBuilder {
    /// Replace the directory backend (tests use the in-memory fake).
    pub fn with_store(mut self, store: Arc<dyn DirectoryStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Replace the event sink (tests use the recording fake).
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events_override = Some(events);
        self
    }

    pub async fn build(self) -> Result<Arc<Gateway>, GatewayError> {
        let config = self.config;
        let timeouts = &config.security.timeouts;

        let events: Arc<dyn EventSink> = match self.events_override {
            Some(events) => events,
            None if config.security.rabbitmq.enabled => {
                match geogw_events::rabbitmq::RabbitMqSink::connect(
                    &config.security.rabbitmq,
                    Duration::from_secs(timeouts.broker_secs),
                )
                .await
                {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        warn!(error = %e, "message broker unreachable, events disabled");
                        Arc::new(NoopSink)
                    }
                }
            }
            None => Arc::new(NoopSink),
        };

        let mut binders: Vec<(String, Arc<dyn DirectoryStore>)> = Vec::new();
        let accounts_store: Arc<dyn DirectoryStore> = match self.store_override {
            Some(store) => {
                let names: Vec<String> = config
                    .enabled_directories()
                    .map(|d| d.name.clone())
                    .collect();
                if names.is_empty() {
                    binders.push(("default".to_string(), store.clone()));
                } else {
                    for name in names {
                        binders.push((name, store.clone()));
                    }
                }
                store
            }
            None => {
                let directory_timeout = Duration::from_secs(timeouts.directory_secs);
                let mut provisioning_store: Option<Arc<dyn DirectoryStore>> = None;
                for source in config.enabled_directories() {
                    let store: Arc<dyn DirectoryStore> =
                        Arc::new(LdapDirectory::new(source.clone(), directory_timeout));
                    if source.extended && provisioning_store.is_none() {
                        provisioning_store = Some(store.clone());
                    }
                    binders.push((source.name.clone(), store));
                }
                provisioning_store
                    .or_else(|| binders.first().map(|(_, store)| store.clone()))
                    .unwrap_or_else(|| Arc::new(InMemoryDirectory::new()))
            }
        };

        let accounts = Arc::new(AccountManager::new(
            accounts_store,
            events,
            config.security.default_organization.clone(),
        ));

        let oidc = Arc::new(
            OidcManager::from_config(
                &config.security.oidc,
                Duration::from_secs(timeouts.oidc_secs),
            )
            .map_err(GatewayError::from)?,
        );

        let role_mappings = RoleMappings::compile(&config.role_mappings)
            .map_err(|e| GatewayError::InvalidConfiguration(e.to_string()))?;

        let mut resolver = UserResolver::new(
            accounts.clone(),
            oidc.clone(),
            role_mappings,
            config.security.create_non_existing_users,
        );
        for (name, store) in &binders {
            resolver = resolver.with_directory(name.clone(), store.clone());
        }

        let routes = RouteTable::compile(&config)?;
        let rules = AccessRuleEngine::compile(&config.gateway)
            .map_err(|e| GatewayError::InvalidConfiguration(e.to_string()))?;
        let forwarder = Forwarder::new(Duration::from_secs(timeouts.upstream_secs))?;

        info!(
            routes = routes.len(),
            directories = binders.len(),
            oidc_providers = !oidc.is_empty(),
            "gateway assembled"
        );

        Ok(Arc::new(Gateway {
            config,
            routes,
            rules,
            accounts,
            resolver,
            oidc,
            forwarder,
            pages: ErrorPages,
            binders,
        }))
    }
}

/// Assemble the full router: endpoints, proxy fallback, and the layer
/// stack (request id → diagnostic span → session → authentication).
pub fn router(gateway: Arc<Gateway>) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax);

    Router::new()
        .route(
            "/login",
            get(handlers::login_form).post(handlers::login_submit),
        )
        .route("/logout", get(handlers::logout))
        .route("/whoami", get(handlers::whoami))
        .route(
            "/login/oauth2/authorization/{registration_id}",
            get(handlers::oauth2_authorize),
        )
        .route(
            "/login/oauth2/code/{registration_id}",
            get(handlers::oauth2_callback),
        )
        .route("/actuator/health", get(handlers::health))
        .fallback(proxy::proxy)
        .layer(middleware::from_fn_with_state(
            gateway.clone(),
            auth::authenticate,
        ))
        .layer(sessions)
        .layer(MdcLayer::new(gateway.config.logging.logging.mdc.clone()))
        .layer(RequestIdLayer)
        .with_state(gateway)
}

/// Serve until a shutdown signal arrives, then drain in-flight requests.
pub async fn serve(gateway: Arc<Gateway>, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(gateway);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("gateway stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}
