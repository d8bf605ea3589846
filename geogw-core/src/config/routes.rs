use serde::Deserialize;

/// Contents of `routes.yaml`: the ordered route list.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RoutesFile {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One route declaration. Routes are evaluated in file order; the first
/// route whose predicates all match wins.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RouteConfig {
    pub id: String,
    /// Upstream base URI. Also the key that ties the route to a service
    /// entry in `gateway.yaml`.
    pub uri: String,
    #[serde(default)]
    pub predicates: Vec<PredicateConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

/// Route matching predicates. All declared predicates must match.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub enum PredicateConfig {
    /// Ant-style path pattern.
    Path(String),
    /// HTTP method name, e.g. `GET`.
    Method(String),
    /// Host glob, e.g. `*.example.org`.
    Host(String),
    /// Header equality.
    Header { name: String, value: String },
    /// Query parameter presence (no value) or equality.
    Query {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
}

/// Route-scoped filter directives, applied in declared order after a match.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub enum FilterConfig {
    /// Regex rewrite of the request path before forwarding.
    RewritePath { pattern: String, replacement: String },
    /// Duplicate backend `Set-Cookie` headers from one path scope to another.
    CookieAffinity {
        name: String,
        from: String,
        to: String,
    },
    /// Drop the first `n` path segments before forwarding.
    StripBasePath(usize),
    /// Route is active only when this profile is in the active set.
    RouteProfile(String),
    /// Redirect idempotent anonymous requests carrying a `login` query
    /// parameter to the login page.
    LoginParamRedirect,
    /// Convert eligible upstream error statuses to locally rendered pages.
    ApplicationError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_file_parses() {
        let yaml = r#"
routes:
  - id: analytics
    uri: http://analytics:8080/analytics/
    predicates:
      - path: /analytics/**
      - method: GET
      - host: "*.example.org"
      - header: { name: X-Client, value: web }
      - query: { name: debug }
    filters:
      - rewrite-path: { pattern: "/analytics/(?<rest>.*)", replacement: "/$rest" }
      - strip-base-path: 1
      - cookie-affinity: { name: JSESSIONID, from: /analytics, to: / }
      - route-profile: docker
      - login-param-redirect
      - application-error
"#;
        let file: RoutesFile = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(yaml),
        )
        .unwrap();
        assert_eq!(file.routes.len(), 1);
        let route = &file.routes[0];
        assert_eq!(route.predicates.len(), 5);
        assert_eq!(route.filters.len(), 6);
        assert!(matches!(
            route.predicates[0],
            PredicateConfig::Path(ref p) if p == "/analytics/**"
        ));
        assert!(matches!(route.filters[1], FilterConfig::StripBasePath(1)));
        assert!(matches!(route.filters[5], FilterConfig::ApplicationError));
    }
}
