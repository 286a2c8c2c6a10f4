//! Identity-directory collaborator contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use habsync_core::{ClientId, Outcome, Result, UserId, Username};
use serde::{Deserialize, Serialize};

/// A user account as read from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    /// Assigned by the directory, never changes once created.
    pub id: UserId,
    pub username: Username,
    pub enabled: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Account to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDirectoryUser {
    pub username: Username,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub enabled: bool,
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Fields rewritten by a single user update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFields {
    pub first_name: String,
    pub last_name: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl UserFields {
    /// Whether `user` already carries these fields.
    #[must_use]
    pub fn matches(&self, user: &DirectoryUser) -> bool {
        self.first_name == user.first_name
            && self.last_name == user.last_name
            && self.attributes == user.attributes
    }
}

/// A role, unique by (client, name) within the realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirectoryRole {
    pub client: ClientId,
    pub name: String,
}

/// Application registered in the directory.
///
/// Every `None` leaves the corresponding setting as the directory has it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub client_id: String,
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

impl ClientSpec {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Apply every setting defined here on top of `base`.
    #[must_use]
    pub fn overlay(&self, base: &Self) -> Self {
        Self {
            client_id: self.client_id.clone(),
            name: self.name.clone().or_else(|| base.name.clone()),
            root_url: self.root_url.clone().or_else(|| base.root_url.clone()),
            admin_url: self.admin_url.clone().or_else(|| base.admin_url.clone()),
            redirect_uris: self
                .redirect_uris
                .clone()
                .or_else(|| base.redirect_uris.clone()),
            web_origins: self.web_origins.clone().or_else(|| base.web_origins.clone()),
            public_client: self.public_client.or(base.public_client),
            bearer_only: self.bearer_only.or(base.bearer_only),
            service_accounts_enabled: self
                .service_accounts_enabled
                .or(base.service_accounts_enabled),
            direct_access_grants_enabled: self
                .direct_access_grants_enabled
                .or(base.direct_access_grants_enabled),
            implicit_flow_enabled: self.implicit_flow_enabled.or(base.implicit_flow_enabled),
            authorization_services_enabled: self
                .authorization_services_enabled
                .or(base.authorization_services_enabled),
            attributes: self.attributes.clone().or_else(|| base.attributes.clone()),
        }
    }
}

/// Operations the reconcilers consume from the identity directory.
///
/// Errors follow the shared taxonomy: a duplicate email on creation is a
/// `Conflict`, an unknown client a `NoSuchClient`, an unreachable directory
/// a `Transport` failure.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>>;

    async fn create_user(&self, user: &NewDirectoryUser) -> Result<UserId>;

    async fn update_user(&self, id: &UserId, fields: &UserFields) -> Result<()>;

    async fn set_enabled(&self, id: &UserId, enabled: bool) -> Result<()>;

    async fn list_client_roles(&self, client: &ClientId) -> Result<Vec<DirectoryRole>>;

    async fn list_user_roles(&self, user: &UserId, client: &ClientId) -> Result<Vec<DirectoryRole>>;

    /// Define a new role on a client.
    async fn create_role(&self, client: &ClientId, name: &str) -> Result<()>;

    async fn grant_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()>;

    async fn revoke_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()>;

    /// Resolve a human-readable client name to its internal id.
    async fn resolve_client_id(&self, client_name: &str) -> Result<ClientId>;

    /// Create the client when missing, update it otherwise.
    async fn save_client(&self, client: &ClientSpec) -> Result<Outcome>;
}
