//! Desired-state reconciliation of an identity directory and a board system.
//!
//! Every reconciler follows the same loop:
//!
//! - **Desired State**: users, roles, boards and taskforces to enforce
//! - **Current State**: read fresh from the collaborator at stage entry
//! - **Diff**: three-way set comparison ([`intersect`])
//! - **Apply**: idempotent mutations, each reported as `Changed` or `Unchanged`
//!
//! # Stages
//!
//! Stages run strictly in order, see [`StageName`]:
//!
//! - directory: clients, roles, users, user roles
//! - board system: native account audit, users, members, taskforce rules
//!
//! Re-running the pipeline is the retry mechanism: a converged system yields
//! a report without changes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use habsync_reconciler::{DesiredState, InMemoryBoards, Pipeline, ReconcilerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::builder()
//!         .with_boards(Arc::new(InMemoryBoards::new()))
//!         .with_config(ReconcilerConfig::default())
//!         .build()
//!         .unwrap();
//!
//!     let report = pipeline.run(&DesiredState::new()).await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod audit;
pub mod boards;
pub mod cancel;
pub mod clients;
pub mod desired;
pub mod directory;
pub mod dry_run;
pub mod error;
pub mod intersect;
pub mod members;
pub mod memory;
pub mod pipeline;
pub mod report;
pub mod roles;
pub mod stage;
pub mod taskforce;
pub mod users;

// Re-export main types
pub use audit::{NativeAccount, NativeAccountAuditStage, native_inventory};
pub use boards::{AuthMethod, AutomationRule, Board, BoardLabel, BoardMember, BoardSystem, BoardUser, Card, NewBoardUser};
pub use cancel::CancelFlag;
pub use clients::DirectoryClientsStage;
pub use desired::{DesiredState, DesiredUser, DesiredUserRecord};
pub use directory::{ClientSpec, DirectoryRole, DirectoryUser, IdentityDirectory, NewDirectoryUser, UserFields};
pub use dry_run::{DryRunBoards, DryRunDirectory};
pub use error::{PipelineError, Result};
pub use intersect::{Intersection, intersect};
pub use members::{BoardMembersStage, BoardMembershipReconciler, MemberDiff, diff_members, infer_board_members, with_mandatory_admin};
pub use memory::{BoardsSnapshot, DirectorySnapshot, InMemoryBoards, InMemoryDirectory, SnapshotClient};
pub use pipeline::{Pipeline, PipelineBuilder, ReconcilerConfig};
pub use report::{EntityFailure, RunReport, StageReport};
pub use roles::{DirectoryRolesStage, DirectoryUserRolesStage, ManagedClient, RoleDiff, RoleReconciler, diff_roles};
pub use stage::{Stage, StageContext, StageName};
pub use taskforce::{AddMissingRulesStage, RemoveExtraRulesStage, RuleKey, implied_rules};
pub use users::{
    Account, AccountTarget, BoardAccounts, BoardUsersStage, DirectoryAccounts, DirectoryUsersStage, LifecyclePlan,
    UserLifecycleReconciler,
};
