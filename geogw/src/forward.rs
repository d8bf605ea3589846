//! Upstream forwarding: build the outbound request, stream both bodies.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, Uri};
use axum::response::IntoResponse;

use geogw_core::GatewayError;

use crate::routes::CompiledRoute;

/// Hop-by-hop headers, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Build the shared upstream client. Redirects are relayed to the
    /// caller, never followed here; the read timeout bounds how long a
    /// silent backend can hold a request.
    pub fn new(read_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidConfiguration(format!("upstream client: {e}")))?;
        Ok(Forwarder { client })
    }

    /// Compose the upstream URL: the route target's scheme and authority,
    /// the (filtered) request path, and the original query string.
    pub fn upstream_url(route: &CompiledRoute, path: &str, uri: &Uri) -> Result<url::Url, GatewayError> {
        let mut url = route.target.clone();
        url.set_path(path);
        url.set_query(uri.query());
        Ok(url)
    }

    /// Issue the upstream request, streaming the inbound body out and the
    /// upstream body back. Dropping the returned future (client
    /// disconnect) aborts the upstream call.
    pub async fn forward(
        &self,
        method: Method,
        url: url::Url,
        headers: HeaderMap,
        body: Body,
    ) -> Result<Response<Body>, GatewayError> {
        let mut outbound = HeaderMap::with_capacity(headers.len());
        for (name, value) in &headers {
            let lower = name.as_str();
            if HOP_BY_HOP.contains(&lower) || lower == "host" || lower == "content-length" {
                continue;
            }
            outbound.append(name.clone(), value.clone());
        }

        let request = self
            .client
            .request(method.clone(), url)
            .headers(outbound)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));

        let upstream = request
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamError(e.to_string()))?;

        let status = upstream.status();
        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if HOP_BY_HOP.contains(&name.as_str()) {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| GatewayError::UpstreamError(e.to_string()))
    }
}

/// Build the gateway-side error response for a failed forward.
pub fn upstream_failure_response(err: GatewayError) -> Response<Body> {
    tracing::error!(error = %err, "upstream request failed");
    let (parts, body) = err.into_response().into_parts();
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteTable;
    use geogw_core::config::DatadirConfig;

    #[test]
    fn upstream_url_keeps_authority_and_swaps_path() {
        let config = DatadirConfig {
            routes: serde_yaml::with::singleton_map_recursive::deserialize(
                serde_yaml::Deserializer::from_str(
                    "routes:\n  - id: svc\n    uri: http://backend:8080/svc/\n    predicates:\n      - path: /svc/**\n",
                ),
            )
            .unwrap(),
            ..Default::default()
        };
        let table = RouteTable::compile(&config).unwrap();
        let req = axum::http::Request::builder()
            .uri("/svc/foo?a=1&b=2")
            .body(axum::body::Body::empty())
            .unwrap();
        let route = table.matching(&req).unwrap();

        let url = Forwarder::upstream_url(&route, "/svc/foo", req.uri()).unwrap();
        assert_eq!(url.as_str(), "http://backend:8080/svc/foo?a=1&b=2");
    }
}
