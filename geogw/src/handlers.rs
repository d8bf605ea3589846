//! The gateway's own inbound endpoints: form login, logout, the
//! authorization-code flow legs, `/whoami`, and liveness.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Form, Json};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, warn};

use geogw_directory::DirectoryError;
use geogw_oidc::random_token;
use geogw_security::{AuthToken, ResolvedUser};

use crate::app::Gateway;
use crate::auth::found;
use crate::pages;
use crate::session::{self, OidcFlowState};

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub error: Option<String>,
}

/// GET /login
pub async fn login_form(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<LoginQuery>,
) -> Html<String> {
    let providers: Vec<(String, String)> = gateway
        .oidc
        .clients()
        .map(|c| {
            let id = c.registration_id().to_string();
            let href = format!("/login/oauth2/authorization/{id}");
            (id, href)
        })
        .collect();
    pages::login_page(query.error.is_some(), &providers)
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// POST /login — directory bind across the enabled sources, in order.
pub async fn login_submit(
    State(gateway): State<Arc<Gateway>>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    if form.username.is_empty() || form.password.is_empty() {
        return found("/login?error");
    }

    let mut outage: Option<DirectoryError> = None;
    for (source, store) in &gateway.binders {
        match store.bind(&form.username, &form.password).await {
            Ok(outcome) => {
                info!(username = %outcome.username, source = %source, "directory login");
                let token = AuthToken::DirectoryBind {
                    dn: outcome.dn,
                    username: outcome.username,
                    source: source.clone(),
                    authorities: outcome.authorities,
                    warn: outcome.warn,
                    remaining_days: outcome.remaining_days,
                };
                session::store_token(&session, &token).await;
                return found("/");
            }
            Err(DirectoryError::InvalidCredentials) => continue,
            Err(e) => {
                warn!(source = %source, error = %e, "directory bind failed");
                outage = Some(e);
            }
        }
    }

    match outage {
        Some(_) => gateway.pages.render(StatusCode::SERVICE_UNAVAILABLE),
        None => found("/login?error"),
    }
}

/// GET /logout — drop the session; an OIDC session with a configured
/// end-session endpoint is also terminated at the provider.
pub async fn logout(State(gateway): State<Arc<Gateway>>, session: Session) -> Response {
    let token = session::load_token(&session).await;
    session::clear(&session).await;

    if let Some(AuthToken::Oidc { provider, .. }) = token {
        if let Ok(client) = gateway.oidc.client(&provider) {
            if let Some(url) = client.end_session_url(gateway.logout_url()) {
                return found(url.as_str());
            }
        }
    }
    found(gateway.logout_url())
}

/// GET /whoami — the canonical user, or 401 for anonymous callers.
pub async fn whoami(Extension(resolved): Extension<Arc<ResolvedUser>>) -> Response {
    if resolved.user.anonymous {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(resolved.user.clone()).into_response()
}

/// GET /login/oauth2/authorization/{registration_id} — flow start.
pub async fn oauth2_authorize(
    State(gateway): State<Arc<Gateway>>,
    session: Session,
    Path(registration_id): Path<String>,
) -> Response {
    let client = match gateway.oidc.client(&registration_id) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "authorization request for unknown provider");
            return gateway.pages.render(StatusCode::NOT_FOUND);
        }
    };
    let flow = OidcFlowState {
        provider: registration_id,
        state: random_token(),
        nonce: random_token(),
    };
    let url = match client.authorize_url(&flow.state, &flow.nonce) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "authorize URL construction failed");
            return gateway.pages.render(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    session::store_flow(&session, &flow).await;
    found(url.as_str())
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// GET /login/oauth2/code/{registration_id} — the provider redirect target.
pub async fn oauth2_callback(
    State(gateway): State<Arc<Gateway>>,
    session: Session,
    Path(registration_id): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = &query.error {
        warn!(provider = %registration_id, error = %error, "provider returned an error");
        return found("/login?error");
    }

    let flow = session::take_flow(&session).await;
    let valid_state = matches!(
        (&flow, &query.state),
        (Some(flow), Some(state)) if flow.provider == registration_id && flow.state == *state
    );
    if !valid_state {
        warn!(provider = %registration_id, "authorization state mismatch");
        return found("/login?error");
    }
    let flow = flow.expect("state checked above");

    let Some(code) = query.code else {
        return found("/login?error");
    };

    let client = match gateway.oidc.client(&registration_id) {
        Ok(client) => client,
        Err(_) => return found("/login?error"),
    };

    let tokens = match client.exchange_code(&code).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(provider = %registration_id, error = %e, "token exchange failed");
            return found("/login?error");
        }
    };
    let Some(id_token) = tokens.id_token.as_deref() else {
        warn!(provider = %registration_id, "token response without an id-token");
        return found("/login?error");
    };
    let id_claims = match client.validate_id_token(id_token, Some(&flow.nonce)).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(provider = %registration_id, error = %e, "id-token rejected");
            return found("/login?error");
        }
    };
    let userinfo_claims = match client.fetch_userinfo(&tokens.access_token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(provider = %registration_id, error = %e, "userinfo failed");
            return found("/login?error");
        }
    };

    let token = AuthToken::Oidc {
        provider: registration_id.clone(),
        id_claims,
        userinfo_claims,
        authorities: Vec::new(),
    };

    // resolve eagerly so account conflicts surface here, on the login flow
    if let Err(e) = gateway.resolver.resolve(&token).await {
        warn!(provider = %registration_id, error = %e, "resolution after OIDC login failed");
        return match e {
            geogw_core::GatewayError::DuplicateEmail(_)
            | geogw_core::GatewayError::DuplicateUsername(_) => {
                gateway.pages.render(StatusCode::CONFLICT)
            }
            _ => found("/login?error"),
        };
    }

    session::store_token(&session, &token).await;
    info!(provider = %registration_id, "OIDC login");
    found("/")
}

/// GET /actuator/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP" }))
}
