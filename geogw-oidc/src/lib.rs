//! OIDC relying-party support for the gateway.
//!
//! [`client`] drives the authorization-code flow (authorize URL, token
//! exchange, userinfo, end-session); [`claims`] maps provider claims to the
//! canonical user model through configurable JSON-path expressions;
//! [`jwks`] caches provider signing keys for id-token validation.

pub mod claims;
pub mod client;
pub mod error;
pub mod jwks;

pub use claims::{merge_claims, normalize_role, slug_username, ClaimsExtractor};
pub use client::{random_token, OidcClient, OidcManager, TokenResponse};
pub use error::OidcError;
pub use jwks::JwksCache;
