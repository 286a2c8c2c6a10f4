//! [`IdentityDirectory`] over the Keycloak admin API.

use std::time::Duration;

use async_trait::async_trait;
use habsync_core::{ClientId, EntityKind, Error, Outcome, Result, UserId};
use habsync_reconciler::{
    ClientSpec, DirectoryRole, DirectoryUser, IdentityDirectory, NewDirectoryUser, UserFields,
};
use reqwest::{Method, header};
use tracing::{debug, info, warn};

use crate::client::{AdminClient, Credentials, Target};
use crate::representation::{ClientRepresentation, RoleRepresentation, UserRepresentation};

/// Users fetched per page.
const PAGE_SIZE: usize = 100;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity directory backed by one Keycloak realm.
#[derive(Debug)]
pub struct KeycloakDirectory {
    client: AdminClient,
}

impl KeycloakDirectory {
    /// # Errors
    ///
    /// Returns `InvalidInput` when the HTTP client cannot be built.
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_timeout(credentials, DEFAULT_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` when the HTTP client cannot be built.
    pub fn with_timeout(credentials: Credentials, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: AdminClient::new(credentials, timeout)?,
        })
    }

    async fn client_representation(&self, id: &ClientId, client_name: &str) -> Result<ClientRepresentation> {
        self.client
            .get_json(
                self.client.admin_url(&["clients", id.as_str()])?,
                &[],
                Target::new("get client", EntityKind::Client, client_name),
            )
            .await
    }

    async fn role(&self, client: &ClientId, name: &str) -> Result<RoleRepresentation> {
        self.client
            .get_json(
                self.client.admin_url(&["clients", client.as_str(), "roles", name])?,
                &[],
                Target::new("get role", EntityKind::Role, name),
            )
            .await
    }

    /// Id of the account already holding `email`, for conflict reports.
    async fn holder_of(&self, email: &str) -> Option<String> {
        let url = self.client.admin_url(&["users"]).ok()?;
        let found: Result<Vec<UserRepresentation>> = self
            .client
            .get_json(
                url,
                &[("email", email), ("exact", "true")],
                Target::new("find user", EntityKind::User, email),
            )
            .await;
        found.ok()?.into_iter().find_map(|u| u.id)
    }
}

/// Id Keycloak puts at the end of the `Location` header of a creation.
fn created_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl IdentityDirectory for KeycloakDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
        let url = self.client.admin_url(&["users"])?;
        let max = PAGE_SIZE.to_string();
        let mut users = Vec::new();
        let mut first = 0_usize;

        loop {
            let offset = first.to_string();
            let page: Vec<UserRepresentation> = self
                .client
                .get_json(
                    url.clone(),
                    &[
                        ("first", offset.as_str()),
                        ("max", max.as_str()),
                        ("briefRepresentation", "false"),
                    ],
                    Target::new("list users", EntityKind::User, "*"),
                )
                .await?;
            let fetched = page.len();
            users.extend(page.into_iter().filter_map(UserRepresentation::into_user));
            if fetched < PAGE_SIZE {
                break;
            }
            first = first.saturating_add(fetched);
        }

        debug!(count = users.len(), "listed keycloak users");
        Ok(users)
    }

    async fn create_user(&self, user: &NewDirectoryUser) -> Result<UserId> {
        let body = UserRepresentation::from(user);
        let result = self
            .client
            .call(
                Method::POST,
                self.client.admin_url(&["users"])?,
                &[],
                Some(&body),
                Target::new("create user", EntityKind::User, user.username.as_str()),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(Error::Conflict { kind, key, .. }) => {
                let existing_id = self.holder_of(&user.email).await;
                return Err(Error::conflict(kind, key, existing_id));
            }
            Err(e) => return Err(e),
        };

        match created_id(&response) {
            Some(id) => Ok(UserId::new(id)),
            None => {
                // No location header, look the account up.
                warn!(username = %user.username, "created user without location header");
                self.list_users()
                    .await?
                    .into_iter()
                    .find(|u| u.username == user.username)
                    .map(|u| u.id)
                    .ok_or_else(|| Error::not_found(EntityKind::User, user.username.as_str()))
            }
        }
    }

    async fn update_user(&self, id: &UserId, fields: &UserFields) -> Result<()> {
        self.client
            .call(
                Method::PUT,
                self.client.admin_url(&["users", id.as_str()])?,
                &[],
                Some(&UserRepresentation::from(fields)),
                Target::new("update user", EntityKind::User, id.as_str()),
            )
            .await
            .map(drop)
    }

    async fn set_enabled(&self, id: &UserId, enabled: bool) -> Result<()> {
        let body = UserRepresentation {
            enabled: Some(enabled),
            ..UserRepresentation::default()
        };
        self.client
            .call(
                Method::PUT,
                self.client.admin_url(&["users", id.as_str()])?,
                &[],
                Some(&body),
                Target::new("set user enabled", EntityKind::User, id.as_str()),
            )
            .await
            .map(drop)
    }

    async fn list_client_roles(&self, client: &ClientId) -> Result<Vec<DirectoryRole>> {
        let roles: Vec<RoleRepresentation> = self
            .client
            .get_json(
                self.client.admin_url(&["clients", client.as_str(), "roles"])?,
                &[],
                Target::new("list client roles", EntityKind::Client, client.as_str()),
            )
            .await?;
        Ok(roles.into_iter().map(|r| r.into_role(client)).collect())
    }

    async fn list_user_roles(&self, user: &UserId, client: &ClientId) -> Result<Vec<DirectoryRole>> {
        let roles: Vec<RoleRepresentation> = self
            .client
            .get_json(
                self.client.admin_url(&[
                    "users",
                    user.as_str(),
                    "role-mappings",
                    "clients",
                    client.as_str(),
                ])?,
                &[],
                Target::new("list user roles", EntityKind::User, user.as_str()),
            )
            .await?;
        Ok(roles.into_iter().map(|r| r.into_role(client)).collect())
    }

    async fn create_role(&self, client: &ClientId, name: &str) -> Result<()> {
        let result = self
            .client
            .call(
                Method::POST,
                self.client.admin_url(&["clients", client.as_str(), "roles"])?,
                &[],
                Some(&RoleRepresentation::named(name)),
                Target::new("create role", EntityKind::Role, name),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::Conflict { .. }) => Err(Error::duplicate_role(client.as_str(), name)),
            Err(Error::NotFound { .. }) => Err(Error::no_such_client(client.as_str())),
            Err(e) => Err(e),
        }
    }

    async fn grant_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()> {
        let role = self.role(client, role).await?;
        self.client
            .call(
                Method::POST,
                self.client.admin_url(&[
                    "users",
                    user.as_str(),
                    "role-mappings",
                    "clients",
                    client.as_str(),
                ])?,
                &[],
                Some(&vec![role]),
                Target::new("grant role", EntityKind::User, user.as_str()),
            )
            .await
            .map(drop)
    }

    async fn revoke_role(&self, user: &UserId, client: &ClientId, role: &str) -> Result<()> {
        let role = self.role(client, role).await?;
        self.client
            .call(
                Method::DELETE,
                self.client.admin_url(&[
                    "users",
                    user.as_str(),
                    "role-mappings",
                    "clients",
                    client.as_str(),
                ])?,
                &[],
                Some(&vec![role]),
                Target::new("revoke role", EntityKind::User, user.as_str()),
            )
            .await
            .map(drop)
    }

    async fn resolve_client_id(&self, client_name: &str) -> Result<ClientId> {
        let clients: Vec<ClientRepresentation> = self
            .client
            .get_json(
                self.client.admin_url(&["clients"])?,
                &[("clientId", client_name)],
                Target::new("find client", EntityKind::Client, client_name),
            )
            .await?;
        clients
            .into_iter()
            .find(|c| c.client_id == client_name)
            .and_then(|c| c.id)
            .map(ClientId::new)
            .ok_or_else(|| Error::not_found(EntityKind::Client, client_name))
    }

    async fn save_client(&self, spec: &ClientSpec) -> Result<Outcome> {
        let target = Target::new("save client", EntityKind::Client, &spec.client_id);

        match self.resolve_client_id(&spec.client_id).await {
            Ok(id) => {
                let current = self.client_representation(&id, &spec.client_id).await?;
                let current_spec = current.to_spec();
                let wanted = spec.overlay(&current_spec);
                if wanted == current_spec {
                    debug!(client = %spec.client_id, "client already up to date");
                    return Ok(Outcome::Unchanged);
                }
                self.client
                    .call(
                        Method::PUT,
                        self.client.admin_url(&["clients", id.as_str()])?,
                        &[],
                        Some(&ClientRepresentation::from_spec(Some(id.to_string()), &wanted)),
                        target,
                    )
                    .await?;
                info!(client = %spec.client_id, "updated client");
                Ok(Outcome::Changed)
            }
            Err(Error::NotFound { .. }) => {
                self.client
                    .call(
                        Method::POST,
                        self.client.admin_url(&["clients"])?,
                        &[],
                        Some(&ClientRepresentation::from_spec(None, spec)),
                        target,
                    )
                    .await?;
                info!(client = %spec.client_id, "created client");
                Ok(Outcome::Changed)
            }
            Err(e) => Err(e),
        }
    }
}
