//! Directory access for the gateway.
//!
//! Three layers: the [`DirectoryStore`] trait describing the storage-specific
//! operations, the LDAP implementation in [`ldap`], and the
//! [`AccountManager`] that owns all mutations (get-or-create with rollback,
//! organization reconciliation) under a single reader-writer lock.

pub mod accounts;
pub mod error;
pub mod ldap;
pub mod store;

pub use accounts::{AccountManager, LookupKey};
pub use error::DirectoryError;
pub use ldap::LdapDirectory;
pub use store::{BindOutcome, DirectoryStore, InMemoryDirectory};
