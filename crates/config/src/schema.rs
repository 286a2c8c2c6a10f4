//! Validated configuration.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use habsync_core::Username;
use habsync_reconciler::{ClientSpec, ReconcilerConfig};
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, Problem, Result};
use crate::log::{LogConfig, LogFormat, LogLevel};
use crate::raw::{RawBoards, RawClient, RawConfig, RawDirectory, RawLog, RawStock};

pub const DEFAULT_MAX_CHANGES: usize = 100;
pub const DEFAULT_ACCOUNT_CLIENT: &str = "account";
pub const DEFAULT_BOARD_SCOPE: &str = "wekan";

/// `[stock]` section: where the desired state comes from and what it manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    pub desired_state: PathBuf,
    pub role_clients: Vec<String>,
    pub account_client: String,
    pub max_changes: usize,
}

/// Keycloak admin API access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakConfig {
    pub url: Url,
    pub realm: String,
    /// Realm the admin account logs into, `master` unless set.
    pub login_realm: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySource {
    Keycloak(KeycloakConfig),
    Snapshot { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub source: DirectorySource,
    /// Accounts never touched by the lifecycle diff.
    pub protected_users: BTreeSet<Username>,
}

#[derive(Debug, Clone)]
pub enum BoardsSource {
    Snapshot { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct BoardsConfig {
    pub source: BoardsSource,
    pub admin: Username,
    pub scope: String,
    /// Boards whose slug matches are domain boards; all boards when unset.
    pub slug_domain: Option<Regex>,
}

/// The whole validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub stock: StockConfig,
    pub directory: Option<DirectoryConfig>,
    pub boards: Option<BoardsConfig>,
    pub clients: Vec<ClientSpec>,
}

impl Config {
    /// Validate a merged raw document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` listing every problem found.
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut problems = Vec::new();

        let log = validate_log(raw.log, &mut problems);
        let stock = validate_stock(raw.stock, &mut problems);
        let directory = raw
            .directory
            .and_then(|d| validate_directory(d, &mut problems));
        let boards = raw.boards.and_then(|b| validate_boards(b, &mut problems));
        let clients = validate_clients(raw.clients, &mut problems);

        if directory.is_none() && boards.is_none() && problems.is_empty() {
            problems.push(Problem::new(
                "directory",
                "neither [directory] nor [boards] is configured",
            ));
        }

        match (problems.is_empty(), stock) {
            (true, Some(stock)) => Ok(Self {
                log,
                stock,
                directory,
                boards,
                clients,
            }),
            _ => Err(ConfigError::Invalid { problems }),
        }
    }

    /// Settings the reconciliation pipeline runs with.
    #[must_use]
    pub fn reconciler_config(&self, dry_run: bool) -> ReconcilerConfig {
        let defaults = ReconcilerConfig::default();
        ReconcilerConfig {
            role_clients: self.stock.role_clients.clone(),
            account_client: self.stock.account_client.clone(),
            protected_users: self
                .directory
                .as_ref()
                .map(|d| d.protected_users.clone())
                .unwrap_or_default(),
            board_scope: self
                .boards
                .as_ref()
                .map_or(defaults.board_scope, |b| b.scope.clone()),
            board_admin: self
                .boards
                .as_ref()
                .map_or(defaults.board_admin, |b| b.admin.clone()),
            max_changes: self.stock.max_changes,
            dry_run,
            clients: self.clients.clone(),
        }
    }
}

fn validate_log(raw: RawLog, problems: &mut Vec<Problem>) -> LogConfig {
    let level = raw
        .level
        .map(|l| l.parse::<LogLevel>())
        .transpose()
        .unwrap_or_else(|p| {
            problems.push(p);
            None
        })
        .unwrap_or_default();
    let format = raw
        .format
        .map(|f| f.parse::<LogFormat>())
        .transpose()
        .unwrap_or_else(|p| {
            problems.push(p);
            None
        })
        .unwrap_or_default();
    LogConfig {
        level,
        format,
        file: raw.file,
    }
}

fn validate_stock(raw: RawStock, problems: &mut Vec<Problem>) -> Option<StockConfig> {
    let desired_state = required(raw.desired_state, "stock.desired_state", problems);

    let max_changes = match raw.max_changes {
        None => Some(DEFAULT_MAX_CHANGES),
        Some(n) if n > 0 => usize::try_from(n).ok(),
        Some(_) => None,
    };
    if max_changes.is_none() {
        problems.push(Problem::new("stock.max_changes", "must be greater than 0"));
    }

    let role_clients = raw.role_clients.unwrap_or_default();
    for (i, client) in role_clients.iter().enumerate() {
        if client.trim().is_empty() {
            problems.push(Problem::new(format!("stock.role_clients[{i}]"), "must not be empty"));
        }
    }

    Some(StockConfig {
        desired_state: desired_state?,
        role_clients,
        account_client: raw
            .account_client
            .unwrap_or_else(|| DEFAULT_ACCOUNT_CLIENT.to_string()),
        max_changes: max_changes?,
    })
}

fn validate_directory(raw: RawDirectory, problems: &mut Vec<Problem>) -> Option<DirectoryConfig> {
    let mut protected_users: BTreeSet<Username> = raw
        .protected_users
        .unwrap_or_default()
        .iter()
        .map(Username::new)
        .collect();

    let source = match raw.kind.as_deref() {
        Some("keycloak") => {
            let url = required(raw.url, "directory.url", problems).and_then(|u| match Url::parse(&u) {
                Ok(url) => Some(url),
                Err(e) => {
                    problems.push(Problem::new("directory.url", format!("'{u}' is not a valid url: {e}")));
                    None
                }
            });
            let realm = required(raw.realm, "directory.realm", problems);
            let username = required(raw.username, "directory.username", problems);
            let password = required(raw.password, "directory.password", problems);
            let (url, realm, username, password) = (url?, realm?, username?, password?);
            protected_users.insert(Username::new(&username));
            DirectorySource::Keycloak(KeycloakConfig {
                url,
                realm,
                login_realm: raw.login_realm.unwrap_or_else(|| "master".to_string()),
                username,
                password,
            })
        }
        Some("snapshot") => DirectorySource::Snapshot {
            path: required(raw.path, "directory.path", problems)?,
        },
        Some(other) => {
            problems.push(Problem::new(
                "directory.kind",
                format!("unknown kind '{other}', expected keycloak or snapshot"),
            ));
            return None;
        }
        None => {
            problems.push(Problem::new("directory.kind", "is required"));
            return None;
        }
    };

    Some(DirectoryConfig {
        source,
        protected_users,
    })
}

fn validate_boards(raw: RawBoards, problems: &mut Vec<Problem>) -> Option<BoardsConfig> {
    let source = match raw.kind.as_deref() {
        Some("snapshot") => required(raw.path, "boards.path", problems).map(|path| BoardsSource::Snapshot { path }),
        Some(other) => {
            problems.push(Problem::new(
                "boards.kind",
                format!("unknown kind '{other}', expected snapshot"),
            ));
            None
        }
        None => {
            problems.push(Problem::new("boards.kind", "is required"));
            None
        }
    };
    let admin = required(raw.admin, "boards.admin", problems)
        .map(Username::new)
        .filter(|admin| {
            let blank = admin.is_empty();
            if blank {
                problems.push(Problem::new("boards.admin", "must not be empty"));
            }
            !blank
        });
    let slug_domain = match raw.slug_domain_regexp.map(|r| Regex::new(&r)).transpose() {
        Ok(regex) => Some(regex),
        Err(e) => {
            problems.push(Problem::new("boards.slug_domain_regexp", e.to_string()));
            None
        }
    };

    Some(BoardsConfig {
        source: source?,
        admin: admin?,
        scope: raw
            .scope
            .unwrap_or_else(|| DEFAULT_BOARD_SCOPE.to_string()),
        slug_domain: slug_domain?,
    })
}

fn validate_clients(raw: Vec<toml::Value>, problems: &mut Vec<Problem>) -> Vec<ClientSpec> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .enumerate()
        .filter_map(|(i, value)| {
            let field = format!("clients[{i}]");
            let client = match RawClient::deserialize(value) {
                Ok(client) => client,
                Err(e) => {
                    problems.push(Problem::new(field, e.to_string()));
                    return None;
                }
            };
            let client_id = client
                .client_id
                .clone()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty());
            let Some(client_id) = client_id else {
                problems.push(Problem::new(format!("{field}.client_id"), "is required"));
                return None;
            };
            if !seen.insert(client_id.clone()) {
                problems.push(Problem::new(
                    format!("{field}.client_id"),
                    format!("client '{client_id}' is defined twice"),
                ));
                return None;
            }
            for (name, url) in [("root_url", &client.root_url), ("admin_url", &client.admin_url)] {
                if let Some(url) = url {
                    if let Err(e) = Url::parse(url) {
                        problems.push(Problem::new(
                            format!("{field}.{name}"),
                            format!("'{url}' is not a valid url: {e}"),
                        ));
                    }
                }
            }
            Some(client_spec(client_id, client))
        })
        .collect()
}

fn client_spec(client_id: String, raw: RawClient) -> ClientSpec {
    ClientSpec {
        client_id,
        name: raw.name,
        root_url: raw.root_url,
        admin_url: raw.admin_url,
        redirect_uris: raw.redirect_uris,
        web_origins: raw.web_origins,
        public_client: raw.public_client,
        bearer_only: raw.bearer_only,
        service_accounts_enabled: raw.service_accounts_enabled,
        direct_access_grants_enabled: raw.direct_access_grants_enabled,
        implicit_flow_enabled: raw.implicit_flow_enabled,
        authorization_services_enabled: raw.authorization_services_enabled,
        attributes: raw.attributes,
    }
}

fn required<T>(value: Option<T>, field: &str, problems: &mut Vec<Problem>) -> Option<T> {
    if value.is_none() {
        problems.push(Problem::new(field, "is required"));
    }
    value
}
