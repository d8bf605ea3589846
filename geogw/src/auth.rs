//! Authentication middleware.
//!
//! Runs once per request, in source priority order: pre-auth headers from
//! the trusted fronting proxy, then the session-stored token (directory
//! bind or OIDC, established by the login endpoints), then the anonymous
//! fallback. The winning token is resolved to the canonical user exactly
//! once and cached in the request extensions.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header::LOCATION, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_sessions::Session;
use tracing::warn;

use geogw_core::mdc::MdcHandle;
use geogw_core::GatewayError;
use geogw_security::{preauth, ResolvedUser};

use crate::app::Gateway;
use crate::session;

/// A plain `302 Found` redirect.
pub fn found(location: &str) -> Response {
    let value = HeaderValue::from_str(location)
        .unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(LOCATION, value)]).into_response()
}

/// Methods that never have side effects, safe to answer with a redirect.
pub fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET
        || *method == Method::HEAD
        || *method == Method::OPTIONS
        || *method == Method::TRACE
}

/// Whether the client prefers an HTML answer.
pub fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

pub async fn authenticate(
    State(gateway): State<Arc<Gateway>>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let wants_html = accepts_html(req.headers());

    let token = match preauth::read_token(req.headers(), gateway.preauth_enabled()) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "pre-auth headers rejected");
            return failure_response(
                GatewayError::from(e),
                &method,
                wants_html,
                &gateway,
            );
        }
    };

    let token = match token {
        Some(token) => Some(token),
        None => match req.extensions().get::<Session>() {
            Some(session) => session::load_token(session).await,
            None => None,
        },
    };

    let resolved = match &token {
        Some(token) => match gateway.resolver.resolve(token).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "authentication token did not resolve");
                return failure_response(e, &method, wants_html, &gateway);
            }
        },
        None => ResolvedUser::anonymous(),
    };

    if let Some(mdc) = req.extensions().get::<MdcHandle>() {
        mdc.record_user(
            &resolved.user.username,
            &resolved.user.roles.join(";"),
            &resolved.user.organization,
            resolved.method,
        );
    }

    req.extensions_mut().insert(Arc::new(resolved));
    next.run(req).await
}

/// Map an authentication failure to the user-visible response: HTML
/// navigations go back to the login page (or a rendered error page for
/// account conflicts and outages), API calls get the bare status.
fn failure_response(
    err: GatewayError,
    method: &Method,
    wants_html: bool,
    gateway: &Gateway,
) -> Response {
    if wants_html && is_idempotent(method) {
        return match &err {
            GatewayError::InvalidCredentials | GatewayError::AuthenticationFailed(_) => {
                found("/login?error")
            }
            GatewayError::DuplicateUsername(_) | GatewayError::DuplicateEmail(_) => {
                gateway.pages.render(StatusCode::CONFLICT)
            }
            _ => gateway.pages.render(err.status_code()),
        };
    }
    err.into_response()
}

/// The resolved user attached by [`authenticate`]. A request that did not
/// pass through the middleware reads as anonymous.
pub fn resolved_user(req_extensions: &http::Extensions) -> Arc<ResolvedUser> {
    req_extensions
        .get::<Arc<ResolvedUser>>()
        .cloned()
        .unwrap_or_else(|| Arc::new(ResolvedUser::anonymous()))
}

