use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Gateway error taxonomy.
///
/// Every suspending step in the pipeline returns one of these kinds instead
/// of panicking or unwinding. The pipeline coordinator selects the
/// user-visible response; clients never see internal detail (that goes to the
/// logs, correlated by request id).
#[derive(Debug)]
pub enum GatewayError {
    /// Wrong username/password at the authentication layer.
    InvalidCredentials,
    /// An OIDC or pre-auth flow broke down.
    AuthenticationFailed(String),
    /// The access-rule engine denied the request.
    AccessDenied,
    /// Account provisioning hit an existing username.
    DuplicateUsername(String),
    /// Account provisioning (or lookup) hit more than one account for an email.
    DuplicateEmail(String),
    /// The directory could not be reached.
    DirectoryUnavailable(String),
    /// The message broker could not be reached.
    BrokerUnavailable(String),
    /// The upstream backend failed or could not be reached.
    UpstreamError(String),
    /// Startup-time configuration problem. Fatal.
    InvalidConfiguration(String),
}

impl GatewayError {
    /// Message safe to show a client. Internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::InvalidCredentials => "Invalid credentials",
            GatewayError::AuthenticationFailed(_) => "Authentication failed",
            GatewayError::AccessDenied => "Access denied",
            GatewayError::DuplicateUsername(_) => "An account with this username already exists",
            GatewayError::DuplicateEmail(_) => "An account with this email already exists",
            GatewayError::DirectoryUnavailable(_)
            | GatewayError::BrokerUnavailable(_)
            | GatewayError::UpstreamError(_) => "Service temporarily unavailable",
            GatewayError::InvalidConfiguration(_) => "Invalid configuration",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AccessDenied => StatusCode::FORBIDDEN,
            GatewayError::DuplicateUsername(_) | GatewayError::DuplicateEmail(_) => {
                StatusCode::CONFLICT
            }
            GatewayError::DirectoryUnavailable(_) | GatewayError::UpstreamError(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::BrokerUnavailable(_) | GatewayError::InvalidConfiguration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::InvalidCredentials => write!(f, "invalid credentials"),
            GatewayError::AuthenticationFailed(msg) => write!(f, "authentication failed: {msg}"),
            GatewayError::AccessDenied => write!(f, "access denied"),
            GatewayError::DuplicateUsername(name) => write!(f, "duplicate username: {name}"),
            GatewayError::DuplicateEmail(email) => write!(f, "duplicate email: {email}"),
            GatewayError::DirectoryUnavailable(msg) => write!(f, "directory unavailable: {msg}"),
            GatewayError::BrokerUnavailable(msg) => write!(f, "broker unavailable: {msg}"),
            GatewayError::UpstreamError(msg) => write!(f, "upstream error: {msg}"),
            GatewayError::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.public_message() });
        (self.status_code(), Json(body)).into_response()
    }
}
