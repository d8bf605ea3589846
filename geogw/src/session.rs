//! Session-backed authentication state.
//!
//! Sessions are in-process (memory store, sticky affinity at the load
//! balancer); the session carries the serialized [`AuthToken`] plus the
//! transient authorization-code flow state.

use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::warn;

use geogw_security::AuthToken;

const AUTH_TOKEN_KEY: &str = "geogw.auth-token";
const OIDC_FLOW_KEY: &str = "geogw.oidc-flow";

/// In-flight authorization-code flow data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OidcFlowState {
    pub provider: String,
    pub state: String,
    pub nonce: String,
}

pub async fn store_token(session: &Session, token: &AuthToken) {
    if let Err(e) = session.insert(AUTH_TOKEN_KEY, token).await {
        warn!(error = %e, "session write failed");
    }
}

pub async fn load_token(session: &Session) -> Option<AuthToken> {
    session.get::<AuthToken>(AUTH_TOKEN_KEY).await.ok().flatten()
}

pub async fn store_flow(session: &Session, flow: &OidcFlowState) {
    if let Err(e) = session.insert(OIDC_FLOW_KEY, flow).await {
        warn!(error = %e, "session write failed");
    }
}

/// Take the flow state, clearing it; each state value is single-use.
pub async fn take_flow(session: &Session) -> Option<OidcFlowState> {
    session
        .remove::<OidcFlowState>(OIDC_FLOW_KEY)
        .await
        .ok()
        .flatten()
}

/// Terminate the session.
pub async fn clear(session: &Session) {
    if let Err(e) = session.flush().await {
        warn!(error = %e, "session flush failed");
    }
}
