//! Desired state declaration.
//!
//! A [`DesiredState`] is built once per run from the records produced by the
//! external parser and never mutated afterwards. Derived views (scope
//! selection, administrator injection) are new values.

use std::collections::{BTreeMap, BTreeSet};

use habsync_core::{BoardSlug, Error, Result, Username};
use serde::{Deserialize, Serialize};

/// One user as produced by the desired-state parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredUserRecord {
    /// Username, usually the email address.
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub given_name: String,
    /// Target systems the user participates in.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Directory client name to role names.
    #[serde(default)]
    pub roles: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub boards: BTreeSet<String>,
    #[serde(default)]
    pub taskforces: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// A user that should exist in the administered systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredUser {
    pub username: Username,
    pub email: String,
    pub surname: String,
    pub given_name: String,
    pub scopes: BTreeSet<String>,
    pub roles: BTreeMap<String, BTreeSet<String>>,
    pub boards: BTreeSet<BoardSlug>,
    pub taskforces: BTreeSet<String>,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DesiredUser {
    /// A user carrying nothing but a key and a scope.
    pub fn new(username: impl AsRef<str>) -> Self {
        let username = Username::new(username);
        Self {
            email: username.as_str().to_string(),
            username,
            surname: String::new(),
            given_name: String::new(),
            scopes: BTreeSet::new(),
            roles: BTreeMap::new(),
            boards: BTreeSet::new(),
            taskforces: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_names(mut self, given_name: impl Into<String>, surname: impl Into<String>) -> Self {
        self.given_name = given_name.into();
        self.surname = surname.into();
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, client: impl Into<String>, role: impl Into<String>) -> Self {
        self.roles.entry(client.into()).or_default().insert(role.into());
        self
    }

    #[must_use]
    pub fn with_board(mut self, slug: impl Into<String>) -> Self {
        self.boards.insert(BoardSlug::new(slug.into()));
        self
    }

    #[must_use]
    pub fn with_taskforce(mut self, name: impl Into<String>) -> Self {
        self.taskforces.insert(name.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(key.into(), values);
        self
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Roles wanted on a directory client, empty when none are declared.
    #[must_use]
    pub fn roles_for(&self, client: &str) -> BTreeSet<String> {
        self.roles.get(client).cloned().unwrap_or_default()
    }

    /// Board account full name, `SURNAME Given`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.surname.to_uppercase(), self.given_name)
            .trim()
            .to_string()
    }

    /// Board account initials, first letters of given name and surname.
    #[must_use]
    pub fn initials(&self) -> String {
        self.given_name
            .chars()
            .take(1)
            .chain(self.surname.chars().take(1))
            .collect::<String>()
            .to_uppercase()
    }
}

impl TryFrom<DesiredUserRecord> for DesiredUser {
    type Error = Error;

    fn try_from(record: DesiredUserRecord) -> Result<Self> {
        let username = Username::new(&record.username);
        if username.is_empty() {
            return Err(Error::invalid_input("desired user without username"));
        }
        let email = record
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| username.as_str().to_string());
        let boards = record
            .boards
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .map(BoardSlug::new)
            .collect();

        Ok(Self {
            username,
            email,
            surname: record.surname.trim().to_string(),
            given_name: record.given_name.trim().to_string(),
            scopes: record.scopes,
            roles: record.roles,
            boards,
            taskforces: record.taskforces,
            attributes: record.attributes,
        })
    }
}

/// Immutable mapping from normalized username to desired user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    users: BTreeMap<Username, DesiredUser>,
}

impl DesiredState {
    /// Create a new empty desired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the state from parsed records.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a record without username or when two
    /// records normalize to the same key.
    pub fn from_records(records: impl IntoIterator<Item = DesiredUserRecord>) -> Result<Self> {
        records
            .into_iter()
            .map(DesiredUser::try_from)
            .try_fold(Self::new(), |state, user| state.with_user(user?))
    }

    /// Add a user, rejecting duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the key is already declared.
    pub fn with_user(mut self, user: DesiredUser) -> Result<Self> {
        if self.users.contains_key(&user.username) {
            return Err(Error::invalid_input(format!(
                "user '{}' is declared twice",
                user.username
            )));
        }
        self.users.insert(user.username.clone(), user);
        Ok(self)
    }

    /// Users participating in the system tagged `scope`.
    #[must_use]
    pub fn select_scope(&self, scope: &str) -> Self {
        Self {
            users: self
                .users
                .iter()
                .filter(|(_, user)| user.has_scope(scope))
                .map(|(name, user)| (name.clone(), user.clone()))
                .collect(),
        }
    }

    /// Copy of this state where the board administrator is a desired user of
    /// `scope`, whatever the input declared.
    #[must_use]
    pub fn with_board_admin(&self, admin: &Username, scope: &str) -> Self {
        let mut users = self.users.clone();
        let entry = users
            .entry(admin.clone())
            .or_insert_with(|| DesiredUser::new(admin.as_str()));
        entry.scopes.insert(scope.to_string());
        Self { users }
    }

    #[must_use]
    pub fn get(&self, username: &Username) -> Option<&DesiredUser> {
        self.users.get(username)
    }

    #[must_use]
    pub fn contains(&self, username: &Username) -> bool {
        self.users.contains_key(username)
    }

    pub fn users(&self) -> impl Iterator<Item = &DesiredUser> {
        self.users.values()
    }

    pub fn usernames(&self) -> impl Iterator<Item = &Username> {
        self.users.keys()
    }

    /// All role names wanted on a directory client.
    #[must_use]
    pub fn roles_for(&self, client: &str) -> BTreeSet<String> {
        self.users
            .values()
            .filter_map(|user| user.roles.get(client))
            .flatten()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
