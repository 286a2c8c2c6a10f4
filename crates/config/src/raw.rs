//! Configuration document as written, before validation.
//!
//! Every field is optional so a partial drop-in file deserializes on its own
//! and missing values are reported by validation with their field path.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub log: RawLog,
    #[serde(default)]
    pub stock: RawStock,
    pub directory: Option<RawDirectory>,
    pub boards: Option<RawBoards>,
    #[serde(default)]
    pub clients: Vec<toml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLog {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStock {
    pub desired_state: Option<PathBuf>,
    pub role_clients: Option<Vec<String>>,
    pub account_client: Option<String>,
    pub max_changes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDirectory {
    pub kind: Option<String>,
    pub url: Option<String>,
    pub realm: Option<String>,
    pub login_realm: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub path: Option<PathBuf>,
    pub protected_users: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBoards {
    pub kind: Option<String>,
    pub path: Option<PathBuf>,
    pub admin: Option<String>,
    pub scope: Option<String>,
    pub slug_domain_regexp: Option<String>,
}

/// One `[[clients]]` entry. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawClient {
    pub client_id: Option<String>,
    pub name: Option<String>,
    pub root_url: Option<String>,
    pub admin_url: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub web_origins: Option<Vec<String>>,
    pub public_client: Option<bool>,
    pub bearer_only: Option<bool>,
    pub service_accounts_enabled: Option<bool>,
    pub direct_access_grants_enabled: Option<bool>,
    pub implicit_flow_enabled: Option<bool>,
    pub authorization_services_enabled: Option<bool>,
    pub attributes: Option<BTreeMap<String, String>>,
}
