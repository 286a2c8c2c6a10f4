#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # habsync
//!
//! Keeps an identity directory and a kanban board system in line with a
//! declared user stock.
//!
//! This library holds the glue of the `habsync` binary and re-exports the
//! workspace crates for convenience.

pub use habsync_config;
pub use habsync_core;
pub use habsync_keycloak;
pub use habsync_reconciler;

pub mod backends;
pub mod cli;
pub mod commands;
pub mod input;
pub mod logging;
