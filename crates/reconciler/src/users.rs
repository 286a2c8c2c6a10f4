//! Account lifecycle: create, enable and disable.
//!
//! The same reconciler drives both target systems through [`AccountTarget`].
//! Accounts are never deleted; disabling keeps the record and its id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{Error, Outcome, Result, ResultExt, UserId, Username};
use tracing::{debug, error, info, warn};

use crate::boards::{BoardSystem, BoardUser, NewBoardUser};
use crate::cancel::CancelFlag;
use crate::desired::{DesiredState, DesiredUser};
use crate::directory::{DirectoryUser, IdentityDirectory, NewDirectoryUser};
use crate::intersect::intersect;
use crate::report::StageReport;
use crate::roles::{ManagedClient, RoleReconciler, resolve_client, resolve_clients};
use crate::stage::{Stage, StageContext, StageName};

/// Lifecycle view of an account in either target system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: UserId,
    pub username: Username,
    pub enabled: bool,
    pub emails: Vec<String>,
    pub display_name: String,
}

impl From<&DirectoryUser> for Account {
    fn from(user: &DirectoryUser) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            enabled: user.enabled,
            emails: user.email.iter().cloned().collect(),
            display_name: format!("{} {}", user.first_name, user.last_name)
                .trim()
                .to_string(),
        }
    }
}

impl From<&BoardUser> for Account {
    fn from(user: &BoardUser) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            enabled: !user.login_disabled,
            emails: user.emails.clone(),
            display_name: user.full_name.clone(),
        }
    }
}

/// Accounts to create, enable and disable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecyclePlan {
    pub to_create: Vec<Username>,
    pub to_enable: Vec<Username>,
    pub to_disable: Vec<Username>,
}

impl LifecyclePlan {
    /// Diff desired usernames against the managed accounts of a system.
    pub fn compute<'a, D, C>(desired: D, current: C) -> Self
    where
        D: IntoIterator<Item = &'a Username>,
        C: IntoIterator<Item = &'a Username>,
    {
        let split = intersect(current.into_iter().cloned(), desired.into_iter().cloned());
        Self {
            to_create: split.only_desired,
            to_enable: split.both,
            to_disable: split.only_current,
        }
    }
}

/// A system whose accounts follow the desired state.
#[async_trait]
pub trait AccountTarget: Send + Sync {
    /// Name used in logs and errors.
    fn system(&self) -> &'static str;

    /// Accounts taking part in the lifecycle diff.
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Every account holding `email`, managed or not.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn create(&self, user: &DesiredUser) -> Result<UserId>;

    async fn enable(&self, account: &Account) -> Result<Outcome>;

    async fn disable(&self, account: &Account) -> Result<Outcome>;

    /// Runs after a successful creation.
    async fn on_created(&self, _id: &UserId, _user: &DesiredUser, _report: &mut StageReport) -> Result<()> {
        Ok(())
    }

    /// Runs for every account of the disable list.
    async fn on_disabled(&self, _account: &Account, _report: &mut StageReport) -> Result<()> {
        Ok(())
    }
}

/// Applies a [`LifecyclePlan`]: create, then enable, then disable.
pub struct UserLifecycleReconciler<'a> {
    target: &'a dyn AccountTarget,
    max_changes: usize,
    cancel: &'a CancelFlag,
}

impl<'a> UserLifecycleReconciler<'a> {
    pub fn new(target: &'a dyn AccountTarget, max_changes: usize, cancel: &'a CancelFlag) -> Self {
        Self {
            target,
            max_changes,
            cancel,
        }
    }

    /// # Errors
    ///
    /// `TooManyChanges` before any mutation when the plan exceeds the
    /// threshold; foundational collaborator failures.
    pub async fn reconcile(&self, desired: &DesiredState, report: &mut StageReport) -> Result<LifecyclePlan> {
        let system = self.target.system();
        let accounts = self.target.accounts().await?;
        let by_name: BTreeMap<&Username, &Account> =
            accounts.iter().map(|a| (&a.username, a)).collect();
        let plan = LifecyclePlan::compute(desired.usernames(), by_name.keys().copied());

        let disabling = plan
            .to_disable
            .iter()
            .filter(|name| by_name.get(name).is_some_and(|a| a.enabled))
            .count();
        let planned = plan.to_create.len().saturating_add(disabling);
        info!(
            system,
            create = plan.to_create.len(),
            enable = plan.to_enable.len(),
            disable = disabling,
            "account plan"
        );
        if planned > self.max_changes {
            error!(system, planned, max = self.max_changes, "too many account changes, nothing applied");
            return Err(Error::TooManyChanges {
                target: system.to_string(),
                planned,
                max: self.max_changes,
            });
        }

        for username in &plan.to_create {
            let Some(user) = desired.get(username) else {
                continue;
            };
            self.cancel.check()?;
            match self.target.create(user).await.entity_scoped()? {
                Ok(id) => {
                    info!(system, username = %username, id = %id, "created account");
                    report.record_change();
                    self.target.on_created(&id, user, report).await?;
                }
                Err(e @ Error::Conflict { .. }) => {
                    self.remediate_conflict(user, &e).await?;
                    report.record_failure(username.to_string(), "create account", e);
                }
                Err(e) => {
                    warn!(system, username = %username, error = %e, "failed to create account");
                    report.record_failure(username.to_string(), "create account", e);
                }
            }
        }

        for username in &plan.to_enable {
            let Some(account) = by_name.get(username) else {
                continue;
            };
            self.cancel.check()?;
            match self.target.enable(account).await.entity_scoped()? {
                Ok(Outcome::Changed) => {
                    info!(system, username = %username, "enabled account");
                    report.record_change();
                }
                Ok(Outcome::Unchanged) => report.record_unchanged(),
                Err(e) => {
                    warn!(system, username = %username, error = %e, "failed to enable account");
                    report.record_failure(username.to_string(), "enable account", e);
                }
            }
        }

        for username in &plan.to_disable {
            let Some(account) = by_name.get(username) else {
                continue;
            };
            self.cancel.check()?;
            match self.target.disable(account).await.entity_scoped()? {
                Ok(outcome) => {
                    if outcome.is_changed() {
                        info!(system, username = %username, "disabled account");
                    }
                    report.record_outcome(outcome);
                    self.target.on_disabled(account, report).await?;
                }
                Err(e) => {
                    warn!(system, username = %username, error = %e, "failed to disable account");
                    report.record_failure(username.to_string(), "disable account", e);
                }
            }
        }

        Ok(plan)
    }

    /// Log what an operator needs to fix a creation blocked by another account.
    async fn remediate_conflict(&self, user: &DesiredUser, cause: &Error) -> Result<()> {
        let system = self.target.system();
        let existing = match self.target.find_by_email(&user.email).await.entity_scoped()? {
            Ok(existing) => existing,
            Err(e) => {
                debug!(system, email = %user.email, error = %e, "lookup of the conflicting account failed");
                None
            }
        };

        let Some(existing) = existing else {
            error!(
                system,
                username = %user.username,
                email = %user.email,
                error = %cause,
                "account creation conflicts with an account that could not be found, check it by hand"
            );
            return Ok(());
        };

        let mut diffs = Vec::new();
        if existing.username != user.username {
            diffs.push(format!("username: '{}' -> '{}'", existing.username, user.username));
        }
        let wanted_name = format!("{} {}", user.given_name, user.surname).trim().to_string();
        if !wanted_name.is_empty() && existing.display_name != wanted_name {
            diffs.push(format!("name: '{}' -> '{}'", existing.display_name, wanted_name));
        }
        if !existing.enabled {
            diffs.push("enabled: false -> true".to_string());
        }

        error!(
            system,
            username = %user.username,
            email = %user.email,
            existing_id = %existing.id,
            existing_username = %existing.username,
            diffs = ?diffs,
            "email already used by another account, creation skipped; rename '{}' to '{}' or free the email, then run again",
            existing.username,
            user.username
        );
        Ok(())
    }
}

/// Directory accounts, minus the protected ones.
pub struct DirectoryAccounts<'a> {
    directory: &'a dyn IdentityDirectory,
    protected: &'a BTreeSet<Username>,
    clients: Vec<ManagedClient>,
    account_client: ManagedClient,
}

impl<'a> DirectoryAccounts<'a> {
    pub fn new(
        directory: &'a dyn IdentityDirectory,
        protected: &'a BTreeSet<Username>,
        clients: Vec<ManagedClient>,
        account_client: ManagedClient,
    ) -> Self {
        Self {
            directory,
            protected,
            clients,
            account_client,
        }
    }
}

#[async_trait]
impl AccountTarget for DirectoryAccounts<'_> {
    fn system(&self) -> &'static str {
        "directory"
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .directory
            .list_users()
            .await?
            .iter()
            .filter(|u| !self.protected.contains(&u.username))
            .map(Account::from)
            .collect())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .directory
            .list_users()
            .await?
            .iter()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .map(Account::from))
    }

    async fn create(&self, user: &DesiredUser) -> Result<UserId> {
        self.directory
            .create_user(&NewDirectoryUser {
                username: user.username.clone(),
                email: user.email.clone(),
                first_name: user.given_name.clone(),
                last_name: user.surname.clone(),
                enabled: true,
                attributes: user.attributes.clone(),
            })
            .await
    }

    async fn enable(&self, account: &Account) -> Result<Outcome> {
        if account.enabled {
            return Ok(Outcome::Unchanged);
        }
        self.directory.set_enabled(&account.id, true).await?;
        Ok(Outcome::Changed)
    }

    async fn disable(&self, account: &Account) -> Result<Outcome> {
        if !account.enabled {
            return Ok(Outcome::Unchanged);
        }
        self.directory.set_enabled(&account.id, false).await?;
        Ok(Outcome::Changed)
    }

    async fn on_created(&self, id: &UserId, user: &DesiredUser, report: &mut StageReport) -> Result<()> {
        RoleReconciler::new(self.directory)
            .grant_desired(id, user, &self.clients, report)
            .await
    }

    async fn on_disabled(&self, account: &Account, report: &mut StageReport) -> Result<()> {
        let roles = RoleReconciler::new(self.directory);
        for client in self.clients.iter().chain([&self.account_client]) {
            roles
                .revoke_all(&account.id, &account.username, client, report)
                .await?;
        }
        Ok(())
    }
}

/// Genuine board accounts.
pub struct BoardAccounts<'a> {
    boards: &'a dyn BoardSystem,
    admin: &'a Username,
}

impl<'a> BoardAccounts<'a> {
    pub fn new(boards: &'a dyn BoardSystem, admin: &'a Username) -> Self {
        Self { boards, admin }
    }
}

#[async_trait]
impl AccountTarget for BoardAccounts<'_> {
    fn system(&self) -> &'static str {
        "boards"
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .boards
            .list_users()
            .await?
            .iter()
            .filter(|u| u.is_genuine(self.admin))
            .map(Account::from)
            .collect())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .boards
            .list_users()
            .await?
            .iter()
            .find(|u| u.emails.iter().any(|e| e.eq_ignore_ascii_case(email)))
            .map(Account::from))
    }

    async fn create(&self, user: &DesiredUser) -> Result<UserId> {
        self.boards
            .insert_user(&NewBoardUser {
                username: user.username.clone(),
                email: user.email.clone(),
                full_name: user.full_name(),
                initials: user.initials(),
            })
            .await
    }

    async fn enable(&self, account: &Account) -> Result<Outcome> {
        self.boards.enable_user(&account.id).await
    }

    async fn disable(&self, account: &Account) -> Result<Outcome> {
        self.boards.disable_user(&account.id).await
    }
}

/// Creates, enables and disables directory accounts.
pub struct DirectoryUsersStage {
    directory: Arc<dyn IdentityDirectory>,
}

impl DirectoryUsersStage {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Stage for DirectoryUsersStage {
    fn name(&self) -> StageName {
        StageName::DirectoryUsers
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let directory = self.directory.as_ref();
        let clients = resolve_clients(directory, &ctx.config.role_clients).await?;
        let account_client = resolve_client(directory, &ctx.config.account_client).await?;
        let target = DirectoryAccounts::new(directory, &ctx.config.protected_users, clients, account_client);

        UserLifecycleReconciler::new(&target, ctx.config.max_changes, ctx.cancel)
            .reconcile(ctx.desired, &mut report)
            .await?;
        Ok(report)
    }
}

/// Creates, enables and disables genuine board accounts.
pub struct BoardUsersStage {
    boards: Arc<dyn BoardSystem>,
}

impl BoardUsersStage {
    pub fn new(boards: Arc<dyn BoardSystem>) -> Self {
        Self { boards }
    }
}

#[async_trait]
impl Stage for BoardUsersStage {
    fn name(&self) -> StageName {
        StageName::BoardUsers
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let target = BoardAccounts::new(self.boards.as_ref(), &ctx.config.board_admin);

        UserLifecycleReconciler::new(&target, ctx.config.max_changes, ctx.cancel)
            .reconcile(ctx.desired, &mut report)
            .await?;
        Ok(report)
    }
}
