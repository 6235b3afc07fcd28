//! Client identity: which certificate authenticates the control connection,
//! and where the catalogue-issued token pair is persisted.

mod selector;
mod store;

pub use selector::{read_not_after, select_identity, select_identity_at, Identity, IdentityKind, TOKEN_GRACE_SECS};
pub use store::{write_owner_read_only, TokenStore};

#[cfg(test)]
#[path = "identity_tests.rs"]
mod identity_tests;
