//! The proxying fallback handler.
//!
//! Everything that is not one of the gateway's own endpoints lands here:
//! route match, access decision, path filters, header projection, upstream
//! dispatch, response-side filters (cookie re-scoping, cookie affinity,
//! error-page conversion).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use geogw_core::request_id::{RequestId, REQUEST_ID_HEADER};
use geogw_security::AccessDecision;

use crate::app::Gateway;
use crate::auth::{accepts_html, found, is_idempotent, resolved_user};
use crate::forward::{upstream_failure_response, Forwarder};
use crate::headers;
use crate::routes::CompiledRoute;

pub async fn proxy(State(gateway): State<Arc<Gateway>>, req: Request) -> Response {
    let resolved = resolved_user(req.extensions());
    let route = gateway.routes.matching(&req);
    let target = route.as_deref().map(|r| r.target_uri.as_str());

    // Access control first: an unrouted but protected path must answer with
    // the denial, not a 404.
    let decision = gateway
        .rules
        .decide(req.uri().path(), target, &resolved.user);
    if decision == AccessDecision::Denied {
        return denial_response(&req, &gateway, resolved.user.anonymous);
    }

    let Some(route) = route else {
        debug!(path = %req.uri().path(), "no route matched");
        return gateway.pages.render(StatusCode::NOT_FOUND);
    };

    if route.filters.login_param_redirect
        && resolved.user.anonymous
        && is_idempotent(req.method())
        && has_login_param(&req)
    {
        return found("/login");
    }

    let convert_errors = route.filters.application_error;
    let path = route.transform_path(req.uri().path());
    let url = match Forwarder::upstream_url(&route, &path, req.uri()) {
        Ok(url) => url,
        Err(e) => return upstream_failure_response(e),
    };

    let request_id = req.extensions().get::<RequestId>().cloned();
    let method = req.method().clone();
    let wants_page = is_idempotent(&method) && accepts_html(req.headers());

    let (parts, body) = req.into_parts();
    let mut outbound_headers = parts.headers;
    headers::sanitize(&mut outbound_headers);
    let mappings = gateway.config.header_mappings_for(Some(&route.target_uri));
    if let Err(e) = headers::project(&resolved, &mappings, &mut outbound_headers) {
        return upstream_failure_response(e);
    }
    if let Some(id) = &request_id {
        if let Ok(value) = HeaderValue::from_str(&id.0) {
            outbound_headers.insert(REQUEST_ID_HEADER, value);
        }
    }

    let mut response = match gateway
        .forwarder
        .forward(method, url, outbound_headers, body)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            if convert_errors && wants_page {
                tracing::error!(error = %e, route = %route.id, "upstream request failed");
                return gateway.pages.render(StatusCode::BAD_GATEWAY);
            }
            return upstream_failure_response(e);
        }
    };

    // upstream error statuses may become locally rendered pages
    let status = response.status();
    if convert_errors && wants_page && (status.is_client_error() || status.is_server_error()) {
        debug!(%status, route = %route.id, "converting upstream error to a local page");
        return gateway.pages.render(status);
    }

    rescope_cookies(&route, &mut response);
    response.into_response()
}

fn has_login_param(req: &Request) -> bool {
    req.uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .any(|pair| pair == "login" || pair.starts_with("login="))
}

/// Denial per the access rules: 403 for an authenticated user; anonymous
/// HTML navigations go to the login page, anything else gets a 401.
fn denial_response(req: &Request, gateway: &Gateway, anonymous: bool) -> Response {
    if !anonymous {
        return if accepts_html(req.headers()) {
            gateway.pages.render(StatusCode::FORBIDDEN)
        } else {
            StatusCode::FORBIDDEN.into_response()
        };
    }
    if is_idempotent(req.method()) && accepts_html(req.headers()) {
        found("/login")
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Response-side cookie handling: re-scope backend cookies to the service
/// base path, then emit the configured affinity duplicates.
fn rescope_cookies(route: &CompiledRoute, response: &mut Response<Body>) {
    let set_cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    if set_cookies.is_empty() {
        return;
    }

    let mut rewritten: Vec<String> = Vec::with_capacity(set_cookies.len());
    for raw in &set_cookies {
        match cookie::Cookie::parse(raw.clone()) {
            Ok(mut parsed) => {
                if !route.base_path.is_empty() {
                    parsed.set_path(route.base_path.clone());
                }
                rewritten.push(parsed.to_string());
            }
            Err(_) => rewritten.push(raw.clone()),
        }
    }

    // affinity: duplicate matching cookies under the configured path
    let mut additional = Vec::new();
    for affinity in &route.filters.cookie_affinity {
        for raw in &rewritten {
            if let Ok(parsed) = cookie::Cookie::parse(raw.clone()) {
                if parsed.name() == affinity.name
                    && parsed.path() == Some(affinity.from.as_str())
                {
                    let mut duplicate = parsed.clone();
                    duplicate.set_path(affinity.to.clone());
                    additional.push(duplicate.to_string());
                }
            }
        }
    }
    rewritten.extend(additional);

    let headers = response.headers_mut();
    headers.remove(SET_COOKIE);
    for value in rewritten {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.append(SET_COOKIE, value);
        }
    }
}
