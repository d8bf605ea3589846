//! Route table: ordered predicate matching and per-route filter directives.

use std::sync::Arc;

use axum::http::{HeaderName, Method, Request};
use regex::Regex;
use url::Url;

use geogw_core::config::{DatadirConfig, FilterConfig, PredicateConfig, RouteConfig};
use geogw_core::{GatewayError, PathPattern};

/// A compiled, matchable route.
pub struct CompiledRoute {
    pub id: String,
    /// Parsed upstream base URI (scheme + authority are what matter).
    pub target: Url,
    /// Raw target string, the key into the service map.
    pub target_uri: String,
    /// Base path of the service on this gateway, derived from the first
    /// path predicate (`/analytics/**` → `/analytics`). Backend cookies are
    /// re-scoped to it.
    pub base_path: String,
    predicates: Vec<CompiledPredicate>,
    pub filters: CompiledFilters,
}

/// Route filter directives, in their compiled form.
#[derive(Default)]
pub struct CompiledFilters {
    pub rewrite_path: Option<(Regex, String)>,
    pub strip_base_path: usize,
    pub cookie_affinity: Vec<CookieAffinity>,
    pub login_param_redirect: bool,
    pub application_error: bool,
}

#[derive(Clone, Debug)]
pub struct CookieAffinity {
    pub name: String,
    pub from: String,
    pub to: String,
}

enum CompiledPredicate {
    Path(PathPattern),
    Method(Method),
    Host(PathPattern),
    Header { name: HeaderName, value: String },
    Query { name: String, value: Option<String> },
}

impl CompiledRoute {
    fn compile(config: &RouteConfig) -> Result<Self, GatewayError> {
        let target = Url::parse(&config.uri).map_err(|e| {
            GatewayError::InvalidConfiguration(format!("route '{}' uri: {e}", config.id))
        })?;

        let mut predicates = Vec::with_capacity(config.predicates.len());
        let mut base_path = String::new();
        for predicate in &config.predicates {
            predicates.push(match predicate {
                PredicateConfig::Path(pattern) => {
                    if base_path.is_empty() {
                        base_path = base_path_of(pattern);
                    }
                    CompiledPredicate::Path(PathPattern::new(pattern).map_err(|e| {
                        GatewayError::InvalidConfiguration(format!("route '{}': {e}", config.id))
                    })?)
                }
                PredicateConfig::Method(method) => CompiledPredicate::Method(
                    method.to_uppercase().parse().map_err(|_| {
                        GatewayError::InvalidConfiguration(format!(
                            "route '{}': unknown method '{method}'",
                            config.id
                        ))
                    })?,
                ),
                PredicateConfig::Host(host) => {
                    CompiledPredicate::Host(PathPattern::new(host).map_err(|e| {
                        GatewayError::InvalidConfiguration(format!("route '{}': {e}", config.id))
                    })?)
                }
                PredicateConfig::Header { name, value } => CompiledPredicate::Header {
                    name: name.parse().map_err(|_| {
                        GatewayError::InvalidConfiguration(format!(
                            "route '{}': bad header name '{name}'",
                            config.id
                        ))
                    })?,
                    value: value.clone(),
                },
                PredicateConfig::Query { name, value } => CompiledPredicate::Query {
                    name: name.clone(),
                    value: value.clone(),
                },
            });
        }

        let mut filters = CompiledFilters::default();
        for filter in &config.filters {
            match filter {
                FilterConfig::RewritePath { pattern, replacement } => {
                    let regex = Regex::new(pattern).map_err(|e| {
                        GatewayError::InvalidConfiguration(format!(
                            "route '{}' rewrite-path: {e}",
                            config.id
                        ))
                    })?;
                    filters.rewrite_path = Some((regex, replacement.clone()));
                }
                FilterConfig::StripBasePath(n) => filters.strip_base_path = *n,
                FilterConfig::CookieAffinity { name, from, to } => {
                    filters.cookie_affinity.push(CookieAffinity {
                        name: name.clone(),
                        from: from.clone(),
                        to: to.clone(),
                    })
                }
                FilterConfig::LoginParamRedirect => filters.login_param_redirect = true,
                FilterConfig::ApplicationError => filters.application_error = true,
                FilterConfig::RouteProfile(_) => {} // handled at table build
            }
        }

        Ok(CompiledRoute {
            id: config.id.clone(),
            target,
            target_uri: config.uri.clone(),
            base_path,
            predicates,
            filters,
        })
    }

    fn matches<B>(&self, req: &Request<B>) -> bool {
        self.predicates.iter().all(|predicate| match predicate {
            CompiledPredicate::Path(pattern) => pattern.matches(req.uri().path()),
            CompiledPredicate::Method(method) => req.method() == method,
            CompiledPredicate::Host(pattern) => req
                .headers()
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|host| host.split(':').next().unwrap_or(host))
                .is_some_and(|host| pattern.matches(host)),
            CompiledPredicate::Header { name, value } => req
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == value),
            CompiledPredicate::Query { name, value } => {
                query_params(req).any(|(k, v)| {
                    k == *name && value.as_deref().map_or(true, |want| v == want)
                })
            }
        })
    }

    /// Apply the path filters to a request path.
    pub fn transform_path(&self, path: &str) -> String {
        let mut path = path.to_string();
        if let Some((regex, replacement)) = &self.filters.rewrite_path {
            path = regex.replace(&path, replacement.as_str()).into_owned();
        }
        if self.filters.strip_base_path > 0 {
            let kept: Vec<&str> = path
                .split('/')
                .filter(|s| !s.is_empty())
                .skip(self.filters.strip_base_path)
                .collect();
            path = format!("/{}", kept.join("/"));
        }
        if path.is_empty() {
            path = "/".into();
        }
        path
    }
}

fn query_params<B>(req: &Request<B>) -> impl Iterator<Item = (String, String)> + '_ {
    req.uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
}

/// The pattern prefix before the first wildcard, without the trailing slash.
fn base_path_of(pattern: &str) -> String {
    let cut = pattern
        .find(['*', '?'])
        .map(|i| &pattern[..i])
        .unwrap_or(pattern);
    cut.trim_end_matches('/').to_string()
}

/// The ordered route table. First full predicate match wins.
pub struct RouteTable {
    routes: Vec<Arc<CompiledRoute>>,
}

impl RouteTable {
    /// Compile the configured routes, dropping those whose profile is not
    /// active.
    pub fn compile(config: &DatadirConfig) -> Result<Self, GatewayError> {
        let mut routes = Vec::new();
        for route in &config.routes.routes {
            let profile_ok = route.filters.iter().all(|f| match f {
                FilterConfig::RouteProfile(profile) => config.active_profiles.contains(profile),
                _ => true,
            });
            if !profile_ok {
                continue;
            }
            routes.push(Arc::new(CompiledRoute::compile(route)?));
        }
        Ok(RouteTable { routes })
    }

    pub fn matching<B>(&self, req: &Request<B>) -> Option<Arc<CompiledRoute>> {
        self.routes.iter().find(|r| r.matches(req)).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
