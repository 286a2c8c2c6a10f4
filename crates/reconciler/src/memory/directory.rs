use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use habsync_core::{ClientId, EntityKind, Error, Outcome, Result, UserId, Username};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Faults, new_id, read_snapshot, write_snapshot};
use crate::directory::{ClientSpec, DirectoryRole, DirectoryUser, IdentityDirectory, NewDirectoryUser, UserFields};

/// A client and the roles defined on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotClient {
    pub id: ClientId,
    pub spec: ClientSpec,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub clients: Vec<SnapshotClient>,
    /// User id to client id to granted roles.
    #[serde(default)]
    pub role_mappings: BTreeMap<UserId, BTreeMap<ClientId, BTreeSet<String>>>,
}

impl DirectorySnapshot {
    fn client(&self, id: &ClientId) -> Result<&SnapshotClient> {
        self.clients
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::no_such_client(id.as_str()))
    }

    fn user_mut(&mut self, id: &UserId) -> Result<&mut DirectoryUser> {
        self.users
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::User, id.as_str()))
    }

    fn has_user(&self, id: &UserId) -> bool {
        self.users.iter().any(|u| &u.id == id)
    }
}

/// In-memory identity directory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectorySnapshot>,
    faults: Faults,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            faults: Faults::default(),
        }
    }

    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a snapshot.
    pub async fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_snapshot(read_snapshot(path).await?))
    }

    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        write_snapshot(path, &*self.state.read().await).await
    }

    pub async fn snapshot(&self) -> DirectorySnapshot {
        self.state.read().await.clone()
    }

    /// Make `operation` fail with `error`, for every key or only `key`.
    pub async fn inject_failure(&self, operation: &'static str, key: Option<&str>, error: Error) {
        self.faults.arm(operation, key.map(str::to_string), error).await;
    }

    pub async fn clear_failures(&self) {
        self.faults.clear().await;
    }

    pub async fn seed_client(&self, name: &str) -> ClientId {
        let id = ClientId::new(new_id());
        self.state.write().await.clients.push(SnapshotClient {
            id: id.clone(),
            spec: ClientSpec::new(name),
            roles: BTreeSet::new(),
        });
        id
    }

    pub async fn seed_user(&self, username: &str, enabled: bool) -> UserId {
        let id = UserId::new(new_id());
        let username = Username::new(username);
        self.state.write().await.users.push(DirectoryUser {
            id: id.clone(),
            email: Some(username.as_str().to_string()),
            username,
            enabled,
            first_name: String::new(),
            last_name: String::new(),
            attributes: BTreeMap::new(),
        });
        id
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
        self.faults.check("list_users", "").await?;
        Ok(self.state.read().await.users.clone())
    }

    async fn create_user(&self, user: &NewDirectoryUser) -> Result<UserId> {
        self.faults.check("create_user", user.username.as_str()).await?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.users.iter().find(|u| {
            u.username == user.username
                || u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(&user.email))
        }) {
            return Err(Error::conflict(
                EntityKind::User,
                user.email.clone(),
                Some(existing.id.to_string()),
            ));
        }
        let id = UserId::new(new_id());
        state.users.push(DirectoryUser {
            id: id.clone(),
            username: user.username.clone(),
            enabled: user.enabled,
            email: Some(user.email.clone()),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            attributes: user.attributes.clone(),
        });
        Ok(id)
    }

    async fn update_user(&self, id: &UserId, fields: &UserFields) -> Result<()> {
        self.faults.check("update_user", id.as_str()).await?;
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        user.first_name.clone_from(&fields.first_name);
        user.last_name.clone_from(&fields.last_name);
        user.attributes.clone_from(&fields.attributes);
        Ok(())
    }

    async fn set_enabled(&self, id: &UserId, enabled: bool) -> Result<()> {
        self.faults.check("set_enabled", id.as_str()).await?;
        self.state.write().await.user_mut(id)?.enabled = enabled;
        Ok(())
    }

    async fn list_client_roles(&self, client: &ClientId) -> Result<Vec<DirectoryRole>> {
        self.faults.check("list_client_roles", client.as_str()).await?;
        let state = self.state.read().await;
        Ok(state
            .client(client)?
            .roles
            .iter()
            .map(|name| DirectoryRole {
                client: client.clone(),
                name: name.clone(),
            })
            .collect())
    }

    async fn list_user_roles(&self, user: &UserId, client: &ClientId) -> Result<Vec<DirectoryRole>> {
        self.faults.check("list_user_roles", user.as_str()).await?;
        let state = self.state.read().await;
        state.client(client)?;
        if !state.has_user(user) {
            return Err(Error::not_found(EntityKind::User, user.as_str()));
        }
        Ok(state
            .role_mappings
            .get(user)
            .and_then(|clients| clients.get(client))
            .into_iter()
            .flatten()
            .map(|name| DirectoryRole {
                client: client.clone(),
                name: name.clone(),
            })
            .collect())
    }

    async fn create_role(&self, client: &ClientId, name: &str) -> Result<()> {
        self.faults.check("create_role", name).await?;
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .iter_mut()
            .find(|c| &c.id == client)
            .ok_or_else(|| Error::no_such_client(client.as_str()))?;
        if !entry.roles.insert(name.to_string()) {
            return Err(Error::duplicate_role(entry.spec.client_id.clone(), name));
        }
        Ok(())
    }

    async fn grant_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()> {
        self.faults.check("grant_role", role).await?;
        let mut state = self.state.write().await;
        if !state.client(client)?.roles.contains(role) {
            return Err(Error::not_found(EntityKind::Role, role));
        }
        if !state.has_user(user) {
            return Err(Error::not_found(EntityKind::User, user.as_str()));
        }
        state
            .role_mappings
            .entry(user.clone())
            .or_default()
            .entry(client.clone())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    async fn revoke_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()> {
        self.faults.check("revoke_role", role).await?;
        let mut state = self.state.write().await;
        state.client(client)?;
        if let Some(roles) = state
            .role_mappings
            .get_mut(user)
            .and_then(|clients| clients.get_mut(client))
        {
            roles.remove(role);
        }
        Ok(())
    }

    async fn resolve_client_id(&self, client_name: &str) -> Result<ClientId> {
        self.faults.check("resolve_client_id", client_name).await?;
        self.state
            .read()
            .await
            .clients
            .iter()
            .find(|c| c.spec.client_id == client_name)
            .map(|c| c.id.clone())
            .ok_or_else(|| Error::no_such_client(client_name))
    }

    async fn save_client(&self, client: &ClientSpec) -> Result<Outcome> {
        self.faults.check("save_client", &client.client_id).await?;
        let mut state = self.state.write().await;
        match state
            .clients
            .iter_mut()
            .find(|c| c.spec.client_id == client.client_id)
        {
            Some(existing) => {
                let merged = client.overlay(&existing.spec);
                let changed = merged != existing.spec;
                existing.spec = merged;
                Ok(Outcome::from_changed(changed))
            }
            None => {
                state.clients.push(SnapshotClient {
                    id: ClientId::new(new_id()),
                    spec: client.clone(),
                    roles: BTreeSet::new(),
                });
                Ok(Outcome::Changed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_create_user_conflicts_on_email() {
        let directory = InMemoryDirectory::new();
        let existing = directory.seed_user("jane@x.org", true).await;

        let result = directory
            .create_user(&NewDirectoryUser {
                username: Username::new("jane.doe@x.org"),
                email: "JANE@x.org".into(),
                first_name: String::new(),
                last_name: String::new(),
                enabled: true,
                attributes: BTreeMap::new(),
            })
            .await;

        assert_eq!(
            result,
            Err(Error::conflict(EntityKind::User, "JANE@x.org", Some(existing.to_string())))
        );
    }

    #[tokio::test]
    async fn test_create_role_twice_is_duplicate() {
        let directory = InMemoryDirectory::new();
        let client = directory.seed_client("app").await;
        directory.create_role(&client, "reader").await.unwrap();

        let result = directory.create_role(&client, "reader").await;

        assert_eq!(result, Err(Error::duplicate_role("app", "reader")));
    }

    #[tokio::test]
    async fn test_save_client_is_idempotent() {
        let directory = InMemoryDirectory::new();
        let spec = ClientSpec {
            root_url: Some("https://app".into()),
            ..ClientSpec::new("app")
        };

        assert_eq!(directory.save_client(&spec).await.unwrap(), Outcome::Changed);
        assert_eq!(directory.save_client(&spec).await.unwrap(), Outcome::Unchanged);
    }

    #[tokio::test]
    async fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.json");
        let directory = InMemoryDirectory::new();
        directory.seed_user("a@x.org", false).await;

        directory.save(&path).await.unwrap();
        let loaded = InMemoryDirectory::load(&path).await.unwrap();

        assert_eq!(loaded.snapshot().await, directory.snapshot().await);
    }

    #[tokio::test]
    async fn test_injected_failure_targets_one_key() {
        let directory = InMemoryDirectory::new();
        let client = directory.seed_client("app").await;
        directory
            .inject_failure("create_role", Some("broken"), Error::rejected("create role", "nope"))
            .await;

        assert!(directory.create_role(&client, "broken").await.is_err());
        assert!(directory.create_role(&client, "fine").await.is_ok());
    }
}
