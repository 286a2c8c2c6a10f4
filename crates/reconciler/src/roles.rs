//! Per-user, per-client role convergence in the identity directory.
//!
//! Grants and revokes are best effort: one failing role is recorded and the
//! remaining roles of the batch are still submitted. A user's field update
//! is all-or-nothing and gates the role pass of that user.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{ClientId, Error, Result, ResultExt, UserId, Username};
use tracing::{debug, info, warn};

use crate::desired::DesiredUser;
use crate::directory::{DirectoryUser, IdentityDirectory, UserFields};
use crate::intersect::intersect;
use crate::report::StageReport;
use crate::stage::{Stage, StageContext, StageName};

/// Roles to grant and revoke for one user on one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDiff {
    pub grant: Vec<String>,
    pub revoke: Vec<String>,
}

impl RoleDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }
}

/// Compare a user's current roles with the desired ones.
pub fn diff_roles<C, D>(current: C, desired: D) -> RoleDiff
where
    C: IntoIterator<Item = String>,
    D: IntoIterator<Item = String>,
{
    let split = intersect(current, desired);
    RoleDiff {
        grant: split.only_desired,
        revoke: split.only_current,
    }
}

/// A directory client resolved to its internal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedClient {
    pub name: String,
    pub id: ClientId,
}

/// Resolve a client name; a missing client is foundational.
///
/// # Errors
///
/// Returns `NoSuchClient` when the directory does not know the client.
pub async fn resolve_client(directory: &dyn IdentityDirectory, name: &str) -> Result<ManagedClient> {
    match directory.resolve_client_id(name).await {
        Ok(id) => Ok(ManagedClient {
            name: name.to_string(),
            id,
        }),
        Err(Error::NotFound { .. }) => Err(Error::no_such_client(name)),
        Err(e) => Err(e),
    }
}

/// # Errors
///
/// Fails on the first client that cannot be resolved.
pub async fn resolve_clients(
    directory: &dyn IdentityDirectory,
    names: &[String],
) -> Result<Vec<ManagedClient>> {
    let mut clients = Vec::with_capacity(names.len());
    for name in names {
        clients.push(resolve_client(directory, name).await?);
    }
    Ok(clients)
}

/// Applies role diffs against the directory.
pub struct RoleReconciler<'a> {
    directory: &'a dyn IdentityDirectory,
}

impl<'a> RoleReconciler<'a> {
    pub fn new(directory: &'a dyn IdentityDirectory) -> Self {
        Self { directory }
    }

    /// Define a brand-new role on a client.
    ///
    /// # Errors
    ///
    /// `NoSuchClient` when the client cannot be resolved, `DuplicateRole`
    /// when the role is already defined.
    pub async fn create_role(&self, client_name: &str, role: &str) -> Result<()> {
        let client = resolve_client(self.directory, client_name).await?;
        let existing = self.directory.list_client_roles(&client.id).await?;
        if existing.iter().any(|r| r.name == role) {
            return Err(Error::duplicate_role(client_name, role));
        }
        self.directory.create_role(&client.id, role).await?;
        info!(client = client_name, role, "created client role");
        Ok(())
    }

    /// Submit every grant, then every revoke, each on its own.
    ///
    /// # Errors
    ///
    /// Only foundational failures stop the batch.
    pub async fn apply(
        &self,
        user_id: &UserId,
        username: &Username,
        client: &ManagedClient,
        diff: &RoleDiff,
        report: &mut StageReport,
    ) -> Result<()> {
        for role in &diff.grant {
            match self
                .directory
                .grant_role(user_id, &client.id, role)
                .await
                .entity_scoped()?
            {
                Ok(()) => {
                    info!(username = %username, client = %client.name, role = %role, "granted role");
                    report.record_change();
                }
                Err(e) => {
                    warn!(username = %username, client = %client.name, role = %role, error = %e, "failed to grant role");
                    report.record_failure(format!("{username}/{}/{role}", client.name), "grant role", e);
                }
            }
        }
        for role in &diff.revoke {
            match self
                .directory
                .revoke_role(user_id, &client.id, role)
                .await
                .entity_scoped()?
            {
                Ok(()) => {
                    info!(username = %username, client = %client.name, role = %role, "revoked role");
                    report.record_change();
                }
                Err(e) => {
                    warn!(username = %username, client = %client.name, role = %role, error = %e, "failed to revoke role");
                    report.record_failure(format!("{username}/{}/{role}", client.name), "revoke role", e);
                }
            }
        }
        Ok(())
    }

    /// Grant a freshly created user the roles it is declared with.
    ///
    /// # Errors
    ///
    /// Only foundational failures are returned.
    pub async fn grant_desired(
        &self,
        user_id: &UserId,
        desired: &DesiredUser,
        clients: &[ManagedClient],
        report: &mut StageReport,
    ) -> Result<()> {
        for client in clients {
            let diff = diff_roles(Vec::new(), desired.roles_for(&client.name));
            self.apply(user_id, &desired.username, client, &diff, report)
                .await?;
        }
        Ok(())
    }

    /// Revoke every role the user holds on `client`.
    ///
    /// # Errors
    ///
    /// Only foundational failures are returned.
    pub async fn revoke_all(
        &self,
        user_id: &UserId,
        username: &Username,
        client: &ManagedClient,
        report: &mut StageReport,
    ) -> Result<()> {
        let current = match self
            .directory
            .list_user_roles(user_id, &client.id)
            .await
            .entity_scoped()?
        {
            Ok(roles) => roles,
            Err(e) => {
                report.record_failure(format!("{username}/{}", client.name), "list user roles", e);
                return Ok(());
            }
        };
        let diff = diff_roles(current.into_iter().map(|r| r.name), Vec::new());
        self.apply(user_id, username, client, &diff, report).await
    }

    /// Converge names, attributes and roles of one existing user.
    ///
    /// The account-management client is always fully revoked.
    ///
    /// # Errors
    ///
    /// Only foundational failures are returned.
    pub async fn converge_user(
        &self,
        user: &DirectoryUser,
        desired: &DesiredUser,
        clients: &[ManagedClient],
        account_client: &ManagedClient,
        report: &mut StageReport,
    ) -> Result<()> {
        let fields = UserFields {
            first_name: desired.given_name.clone(),
            last_name: desired.surname.clone(),
            attributes: desired.attributes.clone(),
        };
        if !fields.matches(user) {
            match self
                .directory
                .update_user(&user.id, &fields)
                .await
                .entity_scoped()?
            {
                Ok(()) => {
                    info!(username = %user.username, "updated user name and attributes");
                    report.record_change();
                }
                Err(e) => {
                    warn!(username = %user.username, error = %e, "failed to update user, skipping its roles");
                    report.record_failure(user.username.to_string(), "update user", e);
                    return Ok(());
                }
            }
        }

        for client in clients {
            let current = match self
                .directory
                .list_user_roles(&user.id, &client.id)
                .await
                .entity_scoped()?
            {
                Ok(roles) => roles,
                Err(e) => {
                    report.record_failure(format!("{}/{}", user.username, client.name), "list user roles", e);
                    continue;
                }
            };
            let diff = diff_roles(
                current.into_iter().map(|r| r.name),
                desired.roles_for(&client.name),
            );
            if diff.is_empty() {
                report.record_unchanged();
                continue;
            }
            debug!(username = %user.username, client = %client.name, grant = ?diff.grant, revoke = ?diff.revoke, "role diff");
            self.apply(&user.id, &user.username, client, &diff, report)
                .await?;
        }

        self.revoke_all(&user.id, &user.username, account_client, report)
            .await
    }
}

/// Creates every role the desired state names on a managed client.
pub struct DirectoryRolesStage {
    directory: Arc<dyn IdentityDirectory>,
}

impl DirectoryRolesStage {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Stage for DirectoryRolesStage {
    fn name(&self) -> StageName {
        StageName::DirectoryRoles
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let roles = RoleReconciler::new(self.directory.as_ref());

        for client in resolve_clients(self.directory.as_ref(), &ctx.config.role_clients).await? {
            let existing: BTreeSet<String> = self
                .directory
                .list_client_roles(&client.id)
                .await?
                .into_iter()
                .map(|r| r.name)
                .collect();
            let wanted = ctx.desired.roles_for(&client.name);
            let missing = intersect(existing, wanted).only_desired;

            if missing.is_empty() {
                report.record_unchanged();
            }
            for role in missing {
                ctx.cancel.check()?;
                match roles.create_role(&client.name, &role).await.entity_scoped()? {
                    Ok(()) => report.record_change(),
                    Err(e) => {
                        warn!(client = %client.name, role = %role, error = %e, "failed to create role");
                        report.record_failure(format!("{}/{role}", client.name), "create role", e);
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Converges fields and roles of every desired user already in the directory.
pub struct DirectoryUserRolesStage {
    directory: Arc<dyn IdentityDirectory>,
}

impl DirectoryUserRolesStage {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Stage for DirectoryUserRolesStage {
    fn name(&self) -> StageName {
        StageName::DirectoryUserRoles
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let directory = self.directory.as_ref();
        let clients = resolve_clients(directory, &ctx.config.role_clients).await?;
        let account_client = resolve_client(directory, &ctx.config.account_client).await?;
        let roles = RoleReconciler::new(directory);

        let users = directory.list_users().await?;
        for user in users
            .iter()
            .filter(|u| !ctx.config.protected_users.contains(&u.username))
        {
            let Some(desired) = ctx.desired.get(&user.username) else {
                continue;
            };
            ctx.cancel.check()?;
            roles
                .converge_user(user, desired, &clients, &account_client, &mut report)
                .await?;
        }

        if report.changes == 0 && report.failures.is_empty() {
            info!("directory roles already converged");
        }
        Ok(report)
    }
}
