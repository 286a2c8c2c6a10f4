//! # habsync-keycloak
//!
//! [`habsync_reconciler::IdentityDirectory`] implemented over the Keycloak
//! admin REST API.
//!
//! The adapter logs in with the password grant of the `admin-cli` client on
//! the login realm and administers another realm with the resulting token.
//! HTTP failures map to the shared error taxonomy: 409 is a `Conflict`, 404
//! a `NotFound`, any other 4xx `Rejected`, and 5xx or connection failures
//! `Transport`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod directory;
pub mod representation;

pub use client::{Credentials, status_error};
pub use directory::KeycloakDirectory;
