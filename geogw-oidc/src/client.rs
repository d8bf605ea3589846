//! Authorization-code flow client.
//!
//! One [`OidcClient`] per enabled provider registration, built once at
//! startup and shared. All outbound calls go through a single reqwest client
//! that honors the configured timeout and the optional HTTP proxy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use geogw_core::config::{OidcConfig, OidcProviderConfig};

use crate::claims::ClaimsExtractor;
use crate::error::OidcError;
use crate::jwks::JwksCache;

/// Response of the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// A random URL-safe token for `state` / `nonce` round-trips.
pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub struct OidcClient {
    config: OidcProviderConfig,
    http: reqwest::Client,
    jwks: Option<JwksCache>,
    extractor: ClaimsExtractor,
    external_url: String,
}

impl OidcClient {
    fn new(
        config: OidcProviderConfig,
        general: &geogw_core::config::ClaimMappingConfig,
        http: reqwest::Client,
        external_url: String,
    ) -> Result<Self, OidcError> {
        let extractor = ClaimsExtractor::new(general, &config)?;
        let jwks = if config.jwks_uri.is_empty() {
            None
        } else {
            Some(JwksCache::new(config.jwks_uri.clone(), http.clone()))
        };
        Ok(OidcClient {
            config,
            http,
            jwks,
            extractor,
            external_url,
        })
    }

    pub fn registration_id(&self) -> &str {
        &self.config.registration_id
    }

    pub fn config(&self) -> &OidcProviderConfig {
        &self.config
    }

    pub fn claims_extractor(&self) -> &ClaimsExtractor {
        &self.extractor
    }

    /// The redirect URI registered with the provider for this gateway.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}/login/oauth2/code/{}",
            self.external_url.trim_end_matches('/'),
            self.config.registration_id
        )
    }

    /// Authorization endpoint URL carrying `state` and `nonce`.
    pub fn authorize_url(&self, state: &str, nonce: &str) -> Result<Url, OidcError> {
        let mut url = Url::parse(&self.config.authorization_uri)
            .map_err(|e| OidcError::TokenExchangeFailed(format!("authorization-uri: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.redirect_uri())
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
        let redirect_uri = self.redirect_uri();
        let response = self
            .http
            .post(&self.config.token_uri)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OidcError::TokenExchangeFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| OidcError::TokenExchangeFailed(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| OidcError::TokenExchangeFailed(format!("token response: {e}")))
    }

    /// Validate the id-token signature and standard claims, returning the
    /// claim set.
    pub async fn validate_id_token(
        &self,
        raw: &str,
        expected_nonce: Option<&str>,
    ) -> Result<Value, OidcError> {
        let header =
            decode_header(raw).map_err(|e| OidcError::InvalidIdToken(e.to_string()))?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(OidcError::InvalidIdToken(format!(
                "disallowed algorithm {:?}",
                header.alg
            )));
        }
        let jwks = self
            .jwks
            .as_ref()
            .ok_or_else(|| OidcError::InvalidIdToken("provider has no jwks-uri".into()))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| OidcError::InvalidIdToken("id-token header has no kid".into()))?;
        let key = jwks.decoding_key(kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.client_id]);
        let data = decode::<Value>(raw, &key, &validation)
            .map_err(|e| OidcError::InvalidIdToken(e.to_string()))?;

        if let Some(nonce) = expected_nonce {
            let claim = data.claims.get("nonce").and_then(Value::as_str);
            if claim != Some(nonce) {
                return Err(OidcError::InvalidIdToken("nonce mismatch".into()));
            }
        }
        debug!(provider = %self.config.registration_id, "id-token validated");
        Ok(data.claims)
    }

    /// Fetch the userinfo claims.
    ///
    /// Some providers answer `application/jwt` instead of JSON; the payload
    /// is then decoded without a second signature check — the id-token from
    /// the same issuer has already been verified.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<Value, OidcError> {
        if self.config.userinfo_uri.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        let response = self
            .http
            .get(&self.config.userinfo_uri)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OidcError::UserinfoFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| OidcError::UserinfoFailed(e.to_string()))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("application/jwt") {
            let body = response
                .text()
                .await
                .map_err(|e| OidcError::UserinfoFailed(e.to_string()))?;
            decode_unverified(body.trim())
        } else {
            response
                .json()
                .await
                .map_err(|e| OidcError::UserinfoFailed(format!("userinfo body: {e}")))
        }
    }

    /// Provider end-session URL with the local post-logout redirect.
    /// Best-effort: a malformed configuration logs and yields `None`, and
    /// logout proceeds locally.
    pub fn end_session_url(&self, post_logout_redirect_uri: &str) -> Option<Url> {
        if self.config.end_session_uri.is_empty() {
            return None;
        }
        match Url::parse(&self.config.end_session_uri) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("post_logout_redirect_uri", post_logout_redirect_uri)
                    .append_pair("client_id", &self.config.client_id);
                Some(url)
            }
            Err(e) => {
                warn!(provider = %self.config.registration_id, error = %e, "end-session-uri unusable");
                None
            }
        }
    }
}

/// Decode a JWT payload without signature verification.
fn decode_unverified(token: &str) -> Result<Value, OidcError> {
    jsonwebtoken::dangerous::insecure_decode::<Value>(token)
        .map(|data| data.claims)
        .map_err(|e| OidcError::UserinfoFailed(format!("jwt userinfo: {e}")))
}

/// All configured providers, keyed by registration id.
pub struct OidcManager {
    clients: BTreeMap<String, Arc<OidcClient>>,
}

impl OidcManager {
    /// Build clients for every enabled provider. Fails on unusable claim
    /// mappings or proxy configuration, which is fatal at startup.
    pub fn from_config(config: &OidcConfig, timeout: Duration) -> Result<Self, OidcError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if config.proxy.enabled {
            let mut proxy = reqwest::Proxy::all(format!(
                "http://{}:{}",
                config.proxy.host, config.proxy.port
            ))
            .map_err(|e| OidcError::InvalidClaimConfiguration(format!("proxy: {e}")))?;
            if !config.proxy.username.is_empty() {
                proxy = proxy.basic_auth(&config.proxy.username, &config.proxy.password);
            }
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| OidcError::InvalidClaimConfiguration(format!("http client: {e}")))?;

        let mut clients = BTreeMap::new();
        if config.enabled {
            for (id, provider) in config.providers.iter().filter(|(_, p)| p.enabled) {
                let mut provider = provider.clone();
                // the map key is the registration id
                provider.registration_id = id.clone();
                let client = OidcClient::new(
                    provider,
                    &config.claims,
                    http.clone(),
                    config.external_url.clone(),
                )?;
                clients.insert(id.clone(), Arc::new(client));
            }
        }
        Ok(OidcManager { clients })
    }

    pub fn client(&self, registration_id: &str) -> Result<&Arc<OidcClient>, OidcError> {
        self.clients
            .get(registration_id)
            .ok_or_else(|| OidcError::UnknownProvider(registration_id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<OidcClient>> {
        self.clients.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(yaml: &str) -> OidcManager {
        let config: OidcConfig = serde_yaml::from_str(yaml).unwrap();
        OidcManager::from_config(&config, Duration::from_secs(10)).unwrap()
    }

    const BASE: &str = r#"
enabled: true
external-url: https://geo.example.org/
providers:
  idp:
    enabled: true
    client-id: geogw
    client-secret: secret
    issuer: https://idp.example.org
    authorization-uri: https://idp.example.org/authorize
    token-uri: https://idp.example.org/token
    end-session-uri: https://idp.example.org/logout
"#;

    #[test]
    fn authorize_url_carries_the_flow_parameters() {
        let manager = manager(BASE);
        let client = manager.client("idp").unwrap();
        let url = client.authorize_url("st4te", "n0nce").unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "geogw");
        assert_eq!(
            query["redirect_uri"],
            "https://geo.example.org/login/oauth2/code/idp"
        );
        assert_eq!(query["scope"], "openid profile email");
        assert_eq!(query["state"], "st4te");
        assert_eq!(query["nonce"], "n0nce");
    }

    #[test]
    fn end_session_url_carries_post_logout_redirect() {
        let manager = manager(BASE);
        let client = manager.client("idp").unwrap();
        let url = client.end_session_url("https://geo.example.org/").unwrap();
        assert!(url.as_str().starts_with("https://idp.example.org/logout?"));
        let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(query["post_logout_redirect_uri"], "https://geo.example.org/");
    }

    #[test]
    fn disabled_providers_are_not_registered() {
        let manager = manager(
            r#"
enabled: true
external-url: https://geo.example.org
providers:
  off:
    enabled: false
    client-id: x
    issuer: i
    authorization-uri: a
    token-uri: t
"#,
        );
        assert!(manager.is_empty());
        assert!(matches!(
            manager.client("off"),
            Err(OidcError::UnknownProvider(_))
        ));
    }

    #[test]
    fn random_tokens_are_distinct() {
        assert_ne!(random_token(), random_token());
        assert_eq!(random_token().len(), 32);
    }

    #[test]
    fn unverified_decode_reads_jwt_payload() {
        // header {"alg":"none"} variants are rejected by jsonwebtoken, so use
        // a syntactically RS256 token with a garbage signature.
        let header = base64url(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = base64url(br#"{"sub":"abc","email":"j@x"}"#);
        let token = format!("{header}.{payload}.c2ln");
        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims["sub"], "abc");
        assert_eq!(claims["email"], "j@x");
    }

    fn base64url(data: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
    }
}
