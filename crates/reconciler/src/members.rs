//! Board membership convergence.
//!
//! Membership records are only ever activated or deactivated, never deleted.
//! The board administrator is an active member and board admin everywhere.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{BoardSlug, EntityKind, Error, Outcome, Result, ResultExt, UserId, Username};
use tracing::{debug, info, warn};

use crate::boards::{Board, BoardSystem, BoardUser};
use crate::desired::DesiredState;
use crate::intersect::intersect;
use crate::report::StageReport;
use crate::stage::{Stage, StageContext, StageName};

/// Desired usernames per board slug.
pub type BoardMembers = BTreeMap<BoardSlug, BTreeSet<Username>>;

/// Group desired users by the boards they list.
///
/// Every board in `existing` gets an entry, empty when nobody lists it, so
/// its stale members still get deactivated.
pub fn infer_board_members(desired: &DesiredState, existing: &[Board]) -> BoardMembers {
    let mut members: BoardMembers = existing
        .iter()
        .map(|board| (board.slug.clone(), BTreeSet::new()))
        .collect();
    for user in desired.users() {
        for slug in &user.boards {
            members
                .entry(slug.clone())
                .or_default()
                .insert(user.username.clone());
        }
    }
    members
}

/// Copy of `members` with `admin` desired on every board.
#[must_use]
pub fn with_mandatory_admin(members: &BoardMembers, admin: &Username) -> BoardMembers {
    members
        .iter()
        .map(|(slug, users)| {
            let mut users = users.clone();
            users.insert(admin.clone());
            (slug.clone(), users)
        })
        .collect()
}

/// Members to mark active and inactive on one board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDiff {
    /// Kept and new members; re-activates deactivated ones.
    pub activate: Vec<UserId>,
    pub deactivate: Vec<UserId>,
}

pub fn diff_members<C, D>(current: C, desired: D) -> MemberDiff
where
    C: IntoIterator<Item = UserId>,
    D: IntoIterator<Item = UserId>,
{
    let split = intersect(current, desired);
    MemberDiff {
        activate: split.both.into_iter().chain(split.only_desired).collect(),
        deactivate: split.only_current,
    }
}

/// Converges the membership of boards against desired usernames.
pub struct BoardMembershipReconciler<'a> {
    boards: &'a dyn BoardSystem,
    admin: &'a BoardUser,
    genuine: HashMap<&'a UserId, &'a BoardUser>,
    by_name: HashMap<&'a Username, &'a BoardUser>,
}

impl<'a> BoardMembershipReconciler<'a> {
    /// # Errors
    ///
    /// `NotFound` when the administrator has no account; no board can be
    /// converged without it.
    pub fn new(boards: &'a dyn BoardSystem, users: &'a [BoardUser], admin: &Username) -> Result<Self> {
        let genuine: HashMap<&UserId, &BoardUser> = users
            .iter()
            .filter(|u| u.is_genuine(admin))
            .map(|u| (&u.id, u))
            .collect();
        let by_name: HashMap<&Username, &BoardUser> = users
            .iter()
            .filter(|u| u.is_genuine(admin))
            .map(|u| (&u.username, u))
            .collect();
        let admin = by_name
            .get(admin)
            .copied()
            .ok_or_else(|| Error::not_found(EntityKind::User, admin.as_str()))?;

        Ok(Self {
            boards,
            admin,
            genuine,
            by_name,
        })
    }

    /// Converge one board; entity-level failures land in `report`.
    ///
    /// # Errors
    ///
    /// Foundational collaborator failures.
    pub async fn reconcile_board(
        &self,
        board: &Board,
        desired: &BTreeSet<Username>,
        report: &mut StageReport,
    ) -> Result<()> {
        let current = board
            .members
            .iter()
            .filter(|m| m.is_active && self.genuine.contains_key(&m.user_id))
            .map(|m| m.user_id.clone());
        let wanted = desired.iter().filter_map(|name| match self.by_name.get(name) {
            Some(user) => Some(user.id.clone()),
            None => {
                debug!(board = %board.slug, username = %name, "desired member has no board account yet");
                None
            }
        });
        let diff = diff_members(current, wanted);

        for user in &diff.activate {
            let outcome = self.boards.ensure_active_member(&board.id, user).await;
            self.record(board, user, "activate member", outcome, report)?;
        }
        for user in &diff.deactivate {
            let outcome = self.boards.ensure_inactive_member(&board.id, user).await;
            self.record(board, user, "deactivate member", outcome, report)?;
        }

        match self
            .boards
            .ensure_board_admin(&board.id, &self.admin.id)
            .await
            .entity_scoped()?
        {
            Ok(Outcome::Changed) => {
                info!(board = %board.slug, admin = %self.admin.username, "granted board admin");
                report.record_change();
            }
            Ok(Outcome::Unchanged) => report.record_unchanged(),
            Err(e) => {
                warn!(board = %board.slug, error = %e, "failed to grant board admin");
                report.record_failure(board.slug.to_string(), "grant board admin", e);
            }
        }
        Ok(())
    }

    fn record(
        &self,
        board: &Board,
        user: &UserId,
        operation: &'static str,
        outcome: Result<Outcome>,
        report: &mut StageReport,
    ) -> Result<()> {
        let username = self
            .genuine
            .get(user)
            .map_or_else(|| user.to_string(), |u| u.username.to_string());
        match outcome.entity_scoped()? {
            Ok(Outcome::Changed) => {
                info!(board = %board.slug, username = %username, operation, "membership changed");
                report.record_change();
            }
            Ok(Outcome::Unchanged) => report.record_unchanged(),
            Err(e) => {
                warn!(board = %board.slug, username = %username, operation, error = %e, "membership change failed");
                report.record_failure(format!("{}/{username}", board.slug), operation, e);
            }
        }
        Ok(())
    }
}

/// Converges membership of every domain board and every board a user lists.
pub struct BoardMembersStage {
    boards: Arc<dyn BoardSystem>,
}

impl BoardMembersStage {
    pub fn new(boards: Arc<dyn BoardSystem>) -> Self {
        Self { boards }
    }
}

#[async_trait]
impl Stage for BoardMembersStage {
    fn name(&self) -> StageName {
        StageName::BoardMembers
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let system = self.boards.as_ref();
        let users = system.list_users().await?;
        let reconciler = BoardMembershipReconciler::new(system, &users, &ctx.config.board_admin)?;

        let domain = system.list_domain_boards().await?;
        let members = with_mandatory_admin(
            &infer_board_members(ctx.desired, &domain),
            &ctx.config.board_admin,
        );
        let by_slug: BTreeMap<&BoardSlug, &Board> = domain.iter().map(|b| (&b.slug, b)).collect();

        for (slug, wanted) in &members {
            ctx.cancel.check()?;
            let fetched;
            let board = match by_slug.get(slug) {
                Some(board) => *board,
                None => match system.get_board(slug).await.entity_scoped()? {
                    Ok(board) => {
                        fetched = board;
                        &fetched
                    }
                    Err(e) => {
                        warn!(board = %slug, error = %e, "listed board not found");
                        report.record_failure(slug.to_string(), "resolve board", e);
                        continue;
                    }
                },
            };
            reconciler.reconcile_board(board, wanted, &mut report).await?;
        }
        Ok(report)
    }
}
