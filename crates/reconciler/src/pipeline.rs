//! Ordered stage pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use habsync_core::Username;
use tracing::{info, warn};

use crate::audit::NativeAccountAuditStage;
use crate::boards::BoardSystem;
use crate::cancel::CancelFlag;
use crate::clients::DirectoryClientsStage;
use crate::desired::DesiredState;
use crate::directory::{ClientSpec, IdentityDirectory};
use crate::dry_run::{DryRunBoards, DryRunDirectory};
use crate::error::{PipelineError, Result};
use crate::members::BoardMembersStage;
use crate::report::RunReport;
use crate::roles::{DirectoryRolesStage, DirectoryUserRolesStage};
use crate::stage::{Stage, StageContext, StageName};
use crate::taskforce::{AddMissingRulesStage, RemoveExtraRulesStage};
use crate::users::{BoardUsersStage, DirectoryUsersStage};

/// Configuration for the reconcilers.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Directory clients whose roles are managed.
    pub role_clients: Vec<String>,
    /// Self-service client on which every role is revoked.
    pub account_client: String,
    /// Directory accounts never touched by the lifecycle diff.
    pub protected_users: BTreeSet<Username>,
    /// Scope tag selecting board-system users.
    pub board_scope: String,
    /// Board-system administrator, member and admin of every board.
    pub board_admin: Username,
    /// Maximum account creations plus disables accepted in one stage.
    pub max_changes: usize,
    /// Plan and log without mutating anything.
    pub dry_run: bool,
    /// Client definitions saved before any role stage.
    pub clients: Vec<ClientSpec>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            role_clients: Vec::new(),
            account_client: "account".to_string(),
            protected_users: BTreeSet::new(),
            board_scope: "wekan".to_string(),
            board_admin: Username::new("admin"),
            max_changes: 100,
            dry_run: false,
            clients: Vec::new(),
        }
    }
}

/// Stages run strictly in order against fresh collaborator state.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    config: ReconcilerConfig,
    cancel: CancelFlag,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Pipeline restricted to the two taskforce rule stages.
    #[must_use]
    pub fn taskforce(boards: Arc<dyn BoardSystem>, config: ReconcilerConfig, cancel: CancelFlag) -> Self {
        let boards = wrap_boards(boards, config.dry_run);
        Self {
            stages: vec![
                Box::new(AddMissingRulesStage::new(Arc::clone(&boards))),
                Box::new(RemoveExtraRulesStage::new(boards)),
            ],
            config,
            cancel,
        }
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run every stage.
    ///
    /// # Errors
    ///
    /// Returns the first foundational failure with the partial report.
    pub async fn run(&self, desired: &DesiredState) -> Result<RunReport> {
        self.run_until(desired, None).await
    }

    /// Run stages up to and including `last`.
    ///
    /// # Errors
    ///
    /// `StageNotInPipeline` when `last` is not one of this pipeline's stages,
    /// otherwise as [`Pipeline::run`].
    pub async fn stop_after(&self, desired: &DesiredState, last: StageName) -> Result<RunReport> {
        if !self.stage_names().contains(&last) {
            return Err(PipelineError::StageNotInPipeline { stage: last });
        }
        self.run_until(desired, Some(last)).await
    }

    async fn run_until(&self, desired: &DesiredState, last: Option<StageName>) -> Result<RunReport> {
        let board_view = desired
            .select_scope(&self.config.board_scope)
            .with_board_admin(&self.config.board_admin, &self.config.board_scope);
        let mut report = RunReport::start();

        info!(
            run_id = %report.run_id,
            users = desired.len(),
            board_users = board_view.len(),
            dry_run = self.config.dry_run,
            "starting reconciliation"
        );

        for stage in &self.stages {
            let name = stage.name();
            let ctx = StageContext {
                desired: if name.targets_boards() { &board_view } else { desired },
                config: &self.config,
                cancel: &self.cancel,
            };

            let outcome = match self.cancel.check() {
                Ok(()) => stage.run(&ctx).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(stage_report) => {
                    info!(
                        stage = %name,
                        changes = stage_report.changes,
                        unchanged = stage_report.unchanged,
                        failures = stage_report.failures.len(),
                        "stage finished"
                    );
                    report.push(stage_report);
                }
                Err(e) => {
                    warn!(stage = %name, error = %e, "stage aborted");
                    report.finish();
                    return Err(PipelineError::stage_failed(name, e, report));
                }
            }

            if last == Some(name) {
                info!(stage = %name, "stopping after requested stage");
                break;
            }
        }

        report.finish();
        if report.is_converged() {
            info!("system converged");
        } else {
            info!(
                changes = report.changes(),
                failures = report.failures().count(),
                "reconciliation complete"
            );
        }
        Ok(report)
    }
}

fn wrap_directory(directory: Arc<dyn IdentityDirectory>, dry_run: bool) -> Arc<dyn IdentityDirectory> {
    if dry_run {
        Arc::new(DryRunDirectory::new(directory))
    } else {
        directory
    }
}

fn wrap_boards(boards: Arc<dyn BoardSystem>, dry_run: bool) -> Arc<dyn BoardSystem> {
    if dry_run {
        Arc::new(DryRunBoards::new(boards))
    } else {
        boards
    }
}

/// Builder for Pipeline.
pub struct PipelineBuilder {
    directory: Option<Arc<dyn IdentityDirectory>>,
    boards: Option<Arc<dyn BoardSystem>>,
    config: ReconcilerConfig,
    cancel: CancelFlag,
}

impl PipelineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            directory: None,
            boards: None,
            config: ReconcilerConfig::default(),
            cancel: CancelFlag::new(),
        }
    }

    /// Set the identity directory; adds the directory stages.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the board system; adds the board stages.
    #[must_use]
    pub fn with_boards(mut self, boards: Arc<dyn BoardSystem>) -> Self {
        self.boards = Some(boards);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cancellation flag with the caller.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enable/disable dry run.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.config.dry_run = enabled;
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Fails when no collaborator was given.
    pub fn build(self) -> Result<Pipeline> {
        if self.directory.is_none() && self.boards.is_none() {
            return Err(PipelineError::invalid_config(
                "an identity directory or a board system is required",
            ));
        }

        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        if let Some(directory) = self.directory {
            let directory = wrap_directory(directory, self.config.dry_run);
            stages.push(Box::new(DirectoryClientsStage::new(Arc::clone(&directory))));
            stages.push(Box::new(DirectoryRolesStage::new(Arc::clone(&directory))));
            stages.push(Box::new(DirectoryUsersStage::new(Arc::clone(&directory))));
            stages.push(Box::new(DirectoryUserRolesStage::new(directory)));
        }
        if let Some(boards) = self.boards {
            let boards = wrap_boards(boards, self.config.dry_run);
            stages.push(Box::new(NativeAccountAuditStage::new(Arc::clone(&boards))));
            stages.push(Box::new(BoardUsersStage::new(Arc::clone(&boards))));
            stages.push(Box::new(BoardMembersStage::new(Arc::clone(&boards))));
            stages.push(Box::new(AddMissingRulesStage::new(Arc::clone(&boards))));
            stages.push(Box::new(RemoveExtraRulesStage::new(boards)));
        }

        Ok(Pipeline {
            stages,
            config: self.config,
            cancel: self.cancel,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::memory::{InMemoryBoards, InMemoryDirectory};

    #[test]
    fn test_build_requires_a_collaborator() {
        let result = Pipeline::builder().build();
        assert!(matches!(result, Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_stage_order_with_both_collaborators() {
        let pipeline = Pipeline::builder()
            .with_directory(Arc::new(InMemoryDirectory::new()))
            .with_boards(Arc::new(InMemoryBoards::new()))
            .build()
            .unwrap();

        assert_eq!(pipeline.stage_names(), StageName::ALL.to_vec());
    }

    #[test]
    fn test_board_only_pipeline() {
        let pipeline = Pipeline::builder()
            .with_boards(Arc::new(InMemoryBoards::new()))
            .build()
            .unwrap();

        let names = pipeline.stage_names();
        assert_eq!(names.first(), Some(&StageName::NativeAccountAudit));
        assert_eq!(names.len(), 5);
    }

    #[tokio::test]
    async fn test_stop_after_unknown_stage() {
        // GIVEN: the taskforce pipeline
        let pipeline = Pipeline::taskforce(
            Arc::new(InMemoryBoards::new()),
            ReconcilerConfig::default(),
            CancelFlag::new(),
        );

        // WHEN: asking to stop after a directory stage
        let result = pipeline
            .stop_after(&DesiredState::new(), StageName::DirectoryUsers)
            .await;

        // THEN: the request is refused before anything runs
        assert!(matches!(
            result,
            Err(PipelineError::StageNotInPipeline { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let pipeline = Pipeline::builder()
            .with_boards(Arc::new(InMemoryBoards::new()))
            .with_cancel(cancel)
            .build()
            .unwrap();

        let err = pipeline.run(&DesiredState::new()).await.err().unwrap();

        match err {
            PipelineError::StageFailed { stage, source, report } => {
                assert_eq!(stage, StageName::NativeAccountAudit);
                assert_eq!(source, habsync_core::Error::Cancelled);
                assert!(report.stages.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
