//! Authentication unification for the gateway.
//!
//! The three authentication sources (directory bind, OIDC, trusted pre-auth
//! headers) each produce an [`AuthToken`]; the [`UserResolver`] maps any
//! token to one canonical [`geogw_core::User`]; the [`AccessRuleEngine`]
//! decides whether that user may pass.

pub mod mapping;
pub mod preauth;
pub mod resolver;
pub mod rules;
pub mod token;

pub use mapping::RoleMappings;
pub use preauth::{PreAuthError, PREAUTH_GATE_HEADER, PREAUTH_PREFIX};
pub use resolver::{ResolvedUser, UserResolver};
pub use rules::{AccessDecision, AccessRuleEngine};
pub use token::AuthToken;
