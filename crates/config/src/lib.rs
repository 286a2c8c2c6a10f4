//! # habsync-config
//!
//! Layered, validated configuration.
//!
//! Loading reads the main TOML file, every `*.toml` of the `config.d/`
//! directory next to it (sorted by name), then an optional override file,
//! and merges them in that order. The merged document is validated once
//! into a typed [`Config`]; validation reports every problem it finds.
//!
//! ```toml
//! [stock]
//! desired_state = "users.yaml"
//! role_clients = ["signauxfaibles"]
//!
//! [directory]
//! kind = "keycloak"
//! url = "https://auth.example.org"
//! realm = "signauxfaibles"
//! username = "kc-admin"
//! password = "secret"
//!
//! [boards]
//! kind = "snapshot"
//! path = "boards.json"
//! admin = "signaux.faibles"
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod load;
pub mod log;
pub mod raw;
pub mod schema;

pub use error::{ConfigError, Problem, Result};
pub use load::{DEFAULT_CONFIG_FILE, DROP_IN_DIR, config_files, load};
pub use log::{LogConfig, LogFormat, LogLevel};
pub use schema::{
    BoardsConfig, BoardsSource, Config, DirectoryConfig, DirectorySource, KeycloakConfig, StockConfig,
};
