//! Read-only inventory of natively managed board accounts.

use std::sync::Arc;

use async_trait::async_trait;
use habsync_core::{BoardSlug, Result, Username};
use itertools::Itertools;
use tracing::warn;

use crate::boards::{Board, BoardSystem, BoardUser};
use crate::report::StageReport;
use crate::stage::{Stage, StageContext, StageName};

/// Board holding card templates; its members are irrelevant.
const TEMPLATES_BOARD: &str = "templates";

/// An enabled account the reconcilers never manage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeAccount {
    pub username: Username,
    /// Boards where the account is an active member.
    pub boards: Vec<BoardSlug>,
}

#[must_use]
pub fn native_inventory(users: &[BoardUser], boards: &[Board], admin: &Username) -> Vec<NativeAccount> {
    users
        .iter()
        .filter(|u| !u.is_genuine(admin) && !u.login_disabled)
        .map(|u| NativeAccount {
            username: u.username.clone(),
            boards: boards
                .iter()
                .filter(|b| b.slug.as_str() != TEMPLATES_BOARD && b.is_active_member(&u.id))
                .map(|b| b.slug.clone())
                .collect(),
        })
        .collect()
}

pub struct NativeAccountAuditStage {
    boards: Arc<dyn BoardSystem>,
}

impl NativeAccountAuditStage {
    pub fn new(boards: Arc<dyn BoardSystem>) -> Self {
        Self { boards }
    }
}

#[async_trait]
impl Stage for NativeAccountAuditStage {
    fn name(&self) -> StageName {
        StageName::NativeAccountAudit
    }

    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport> {
        let mut report = StageReport::new(self.name());
        let users = self.boards.list_users().await?;
        let boards = self.boards.list_domain_boards().await?;

        for account in native_inventory(&users, &boards, &ctx.config.board_admin) {
            let boards = account.boards.iter().join(", ");
            warn!(username = %account.username, boards = %boards, "natively managed account is enabled");
            report.record_unchanged();
        }
        Ok(report)
    }
}
