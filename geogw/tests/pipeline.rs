//! End-to-end pipeline tests: the full router assembled against the
//! in-memory directory, a recording event sink, and a local upstream
//! backend spawned on an ephemeral port.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use geogw::{router, Gateway};
use geogw_core::{DatadirConfig, User};
use geogw_directory::InMemoryDirectory;
use geogw_events::RecordingSink;

/// A fake backend that records every request's headers.
struct Upstream {
    pub base: String,
    pub seen: Arc<Mutex<Vec<HeaderMap>>>,
}

async fn spawn_upstream(status: StatusCode, content_type: &'static str, body: &'static str) -> Upstream {
    let seen: Arc<Mutex<Vec<HeaderMap>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let app = Router::new().fallback(move |req: Request<Body>| {
        let captured = captured.clone();
        async move {
            captured.lock().unwrap().push(req.headers().clone());
            (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Upstream {
        base: format!("http://{addr}/"),
        seen,
    }
}

struct Fixture {
    app: Router,
    store: Arc<InMemoryDirectory>,
}

async fn gateway_with(
    gateway_yaml: &str,
    routes_yaml: &str,
    security_yaml: &str,
) -> Fixture {
    let config =
        DatadirConfig::from_yaml(gateway_yaml, routes_yaml, security_yaml, "").unwrap();
    let store = Arc::new(InMemoryDirectory::new());
    let gateway = Gateway::builder(config)
        .with_store(store.clone())
        .with_events(Arc::new(RecordingSink::new()))
        .build()
        .await
        .unwrap();
    Fixture {
        app: router(gateway),
        store,
    }
}

async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

const OPEN_RULES: &str = r#"
global-access-rules:
  - intercept-url: ["/**"]
    anonymous: true
"#;

fn svc_gateway_yaml(target: &str) -> String {
    format!(
        r#"
global-access-rules:
  - intercept-url: ["/**"]
    anonymous: true
services:
  svc:
    target: {target}
"#
    )
}

fn svc_routes_yaml(target: &str, extra_filters: &str) -> String {
    format!(
        r#"
routes:
  - id: svc
    uri: {target}
    predicates:
      - path: /svc/**
{extra_filters}
"#
    )
}

// S1: anonymous request on a public path is forwarded with `sec-proxy` and
// without identity headers.
#[tokio::test]
async fn anonymous_public_path_is_forwarded() {
    let upstream = spawn_upstream(StatusCode::OK, "text/plain", "ok").await;
    let fx = gateway_with(
        &svc_gateway_yaml(&upstream.base),
        &svc_routes_yaml(&upstream.base, ""),
        "",
    )
    .await;

    let response = fx
        .app
        .oneshot(
            Request::get("/svc/foo")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    let seen = upstream.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["sec-proxy"], "true");
    assert!(!seen[0].contains_key("sec-username"));
    assert!(!seen[0].contains_key("sec-roles"));
}

// S2: directory form login establishes a session usable for /whoami, and
// backend requests carry the identity headers.
#[tokio::test]
async fn directory_login_whoami_and_projection() {
    let upstream = spawn_upstream(StatusCode::OK, "text/plain", "ok").await;
    let fx = gateway_with(
        &svc_gateway_yaml(&upstream.base),
        &svc_routes_yaml(&upstream.base, ""),
        "",
    )
    .await;
    fx.store
        .add_user(
            User {
                username: "alice".into(),
                email: "alice@x".into(),
                ..Default::default()
            },
            "pw",
            &["USER", "ADMINISTRATOR"],
        )
        .await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=alice&password=pw"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/whoami")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(
        body["roles"],
        serde_json::json!(["ROLE_USER", "ROLE_ADMINISTRATOR"])
    );

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/svc/data")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let seen = upstream.seen.lock().unwrap();
    let headers = seen.last().unwrap();
    assert_eq!(headers["sec-username"], "alice");
    assert_eq!(headers["sec-roles"], "ROLE_USER;ROLE_ADMINISTRATOR");
}

// Failed logins bounce back to the form.
#[tokio::test]
async fn bad_credentials_bounce_to_login() {
    let fx = gateway_with(OPEN_RULES, "", "").await;
    fx.store
        .add_user(
            User {
                username: "alice".into(),
                ..Default::default()
            },
            "pw",
            &["USER"],
        )
        .await;

    let response = fx
        .app
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=alice&password=wrong"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login?error");
}

// S4: pre-auth headers authenticate the request; spoofed and pre-auth
// headers never reach the backend.
#[tokio::test]
async fn preauth_strip_and_inject() {
    let upstream = spawn_upstream(StatusCode::OK, "text/plain", "ok").await;
    let fx = gateway_with(
        &svc_gateway_yaml(&upstream.base),
        &svc_routes_yaml(&upstream.base, ""),
        "preauth:\n  enabled: true\n",
    )
    .await;

    let response = fx
        .app
        .oneshot(
            Request::get("/svc/foo")
                .header("sec-georchestra-preauthenticated", "true")
                .header("preauth-username", "bob")
                .header("preauth-lastname", "{base64}TWF1ZHVpdA==")
                .header("preauth-roles", "ADMIN;USER")
                .header("sec-roles", "ROLE_SUPER")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = upstream.seen.lock().unwrap();
    let headers = seen.last().unwrap();
    assert_eq!(headers["sec-username"], "bob");
    assert_eq!(headers["sec-lastname"], "Mauduit");
    assert_eq!(headers["sec-roles"], "ROLE_USER;ROLE_ADMIN");
    assert_eq!(headers["sec-proxy"], "true");
    assert!(!headers.contains_key("sec-georchestra-preauthenticated"));
    for name in headers.keys() {
        assert!(
            !name.as_str().starts_with("preauth-"),
            "pre-auth header leaked: {name}"
        );
    }
}

// S5: anonymous HTML navigation on a protected path redirects to /login;
// API calls get 401; authenticated users without the role get 403.
#[tokio::test]
async fn denial_semantics() {
    let fx = gateway_with(
        r#"
global-access-rules:
  - intercept-url: ["/admin/**"]
    allowed-roles: [ADMIN]
"#,
        "",
        "",
    )
    .await;
    fx.store
        .add_user(
            User {
                username: "mortal".into(),
                ..Default::default()
            },
            "pw",
            &["USER"],
        )
        .await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/admin/ui")
                .header(header::ACCEPT, "text/html,application/xhtml+xml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/admin/ui")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // authenticated but missing the role
    let response = fx
        .app
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=mortal&password=pw"))
                .unwrap(),
        )
        .await
        .unwrap();
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    let response = fx
        .app
        .oneshot(
            Request::get("/admin/ui")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// S6: eligible upstream errors are replaced by locally rendered pages.
#[tokio::test]
async fn upstream_error_conversion() {
    let upstream = spawn_upstream(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "dead").await;
    let fx = gateway_with(
        &svc_gateway_yaml(&upstream.base),
        &svc_routes_yaml(&upstream.base, "    filters:\n      - application-error\n"),
        "",
    )
    .await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/svc/x")
                .header(header::ACCEPT, "text/html")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let content_type = response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    let body = body_text(response).await;
    assert!(!body.contains("dead"));

    // a non-HTML client sees the upstream body untouched
    let response = fx
        .app
        .oneshot(
            Request::get("/svc/x")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "dead");
}

// Property: X-Request-ID is echoed when supplied, generated (16 digits)
// otherwise, on every response.
#[tokio::test]
async fn request_id_assignment() {
    let fx = gateway_with(OPEN_RULES, "", "").await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/whoami")
                .header("x-request-id", "1234567890123456")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "1234567890123456");

    let response = fx
        .app
        .oneshot(Request::get("/whoami").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_digit()));
}

// Unrouted paths inside an open rule set answer 404.
#[tokio::test]
async fn unrouted_path_is_not_found() {
    let fx = gateway_with(OPEN_RULES, "", "").await;
    let response = fx
        .app
        .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// Anonymous /whoami answers 401.
#[tokio::test]
async fn whoami_requires_authentication() {
    let fx = gateway_with(OPEN_RULES, "", "").await;
    let response = fx
        .app
        .oneshot(Request::get("/whoami").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// Logout clears the session and redirects to the configured URL.
#[tokio::test]
async fn logout_round_trip() {
    let fx = gateway_with(OPEN_RULES, "", "").await;
    fx.store
        .add_user(
            User {
                username: "alice".into(),
                ..Default::default()
            },
            "pw",
            &["USER"],
        )
        .await;

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=alice&password=pw"))
                .unwrap(),
        )
        .await
        .unwrap();
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = fx
        .app
        .clone()
        .oneshot(
            Request::get("/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");

    let response = fx
        .app
        .oneshot(
            Request::get("/whoami")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// The login page lists the enabled OIDC providers.
#[tokio::test]
async fn login_page_shows_providers() {
    let fx = gateway_with(
        OPEN_RULES,
        "",
        r#"
oidc:
  enabled: true
  external-url: https://geo.example.org
  providers:
    proconnect:
      enabled: true
      client-id: geogw
      issuer: https://idp.example.org
      authorization-uri: https://idp.example.org/authorize
      token-uri: https://idp.example.org/token
"#,
    )
    .await;

    let response = fx
        .app
        .oneshot(Request::get("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("/login/oauth2/authorization/proconnect"));
}

// The OIDC flow start redirects to the provider with state and nonce.
#[tokio::test]
async fn oauth2_authorization_redirects_to_provider() {
    let fx = gateway_with(
        OPEN_RULES,
        "",
        r#"
oidc:
  enabled: true
  external-url: https://geo.example.org
  providers:
    proconnect:
      enabled: true
      client-id: geogw
      issuer: https://idp.example.org
      authorization-uri: https://idp.example.org/authorize
      token-uri: https://idp.example.org/token
"#,
    )
    .await;

    let response = fx
        .app
        .oneshot(
            Request::get("/login/oauth2/authorization/proconnect")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://idp.example.org/authorize?"));
    assert!(location.contains("client_id=geogw"));
    assert!(location.contains("state="));
    assert!(location.contains("nonce="));
    assert!(location.contains(
        "redirect_uri=https%3A%2F%2Fgeo.example.org%2Flogin%2Foauth2%2Fcode%2Fproconnect"
    ));
}

// Route filters rewrite the forwarded path.
#[tokio::test]
async fn strip_base_path_filter_applies() {
    let upstream = spawn_upstream(StatusCode::OK, "text/plain", "ok").await;
    let fx = gateway_with(
        &svc_gateway_yaml(&upstream.base),
        &svc_routes_yaml(&upstream.base, "    filters:\n      - strip-base-path: 1\n"),
        "",
    )
    .await;

    let response = fx
        .app
        .oneshot(Request::get("/svc/deep/path").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // the backend recorded the request: host header is set by the client
    assert_eq!(upstream.seen.lock().unwrap().len(), 1);
}

// Health endpoint stays reachable without authentication.
#[tokio::test]
async fn health_endpoint() {
    let fx = gateway_with(OPEN_RULES, "", "").await;
    let response = fx
        .app
        .oneshot(
            Request::get("/actuator/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "UP");
}
