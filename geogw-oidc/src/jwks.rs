//! Per-provider JWKS cache.
//!
//! Keys are fetched lazily on first use and kept for a TTL; an unknown `kid`
//! forces a refresh, throttled by a minimum interval so a flood of bad
//! tokens cannot hammer the provider.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::error::OidcError;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// The JWK fields needed to rebuild an RSA decoding key.
/// `DecodingKey` is not `Clone`, so the raw components are cached instead.
#[derive(Clone, Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

struct CacheState {
    keys: HashMap<String, Jwk>,
    last_refresh: Option<Instant>,
    last_attempt: Option<Instant>,
}

pub struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
}

impl JwksCache {
    pub fn new(jwks_uri: impl Into<String>, http: reqwest::Client) -> Self {
        JwksCache {
            jwks_uri: jwks_uri.into(),
            http,
            state: RwLock::new(CacheState {
                keys: HashMap::new(),
                last_refresh: None,
                last_attempt: None,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Decoding key for a `kid`, refreshing the cache when it is stale or
    /// the key is unknown.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, OidcError> {
        {
            let state = self.state.read().await;
            if let Some(jwk) = state.keys.get(kid) {
                if !stale(state.last_refresh) {
                    return to_decoding_key(jwk);
                }
            }
        }

        self.refresh_throttled().await?;

        let state = self.state.read().await;
        state
            .keys
            .get(kid)
            .ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
            .and_then(to_decoding_key)
    }

    async fn refresh_throttled(&self) -> Result<(), OidcError> {
        let _guard = self.refresh_lock.lock().await;
        {
            let state = self.state.read().await;
            if let Some(attempt) = state.last_attempt {
                if attempt.elapsed() < MIN_REFRESH_INTERVAL {
                    return Ok(());
                }
            }
        }
        {
            let mut state = self.state.write().await;
            state.last_attempt = Some(Instant::now());
        }

        let document: JwksDocument = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::JwksFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| OidcError::JwksFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| OidcError::JwksFetch(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in document.keys {
            if let Some(kid) = jwk.kid.clone() {
                keys.insert(kid, jwk);
            }
        }

        let mut state = self.state.write().await;
        state.keys = keys;
        state.last_refresh = Some(Instant::now());
        Ok(())
    }
}

fn stale(last_refresh: Option<Instant>) -> bool {
    match last_refresh {
        None => true,
        Some(ts) => ts.elapsed() >= CACHE_TTL,
    }
}

fn to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, OidcError> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_deref()
                .ok_or_else(|| OidcError::JwksFetch("RSA key missing 'n'".into()))?;
            let e = jwk
                .e
                .as_deref()
                .ok_or_else(|| OidcError::JwksFetch("RSA key missing 'e'".into()))?;
            DecodingKey::from_rsa_components(n, e)
                .map_err(|err| OidcError::JwksFetch(format!("unusable RSA key: {err}")))
        }
        other => Err(OidcError::JwksFetch(format!("unsupported key type: {other}"))),
    }
}
