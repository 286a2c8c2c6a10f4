//! Convergence stages.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use habsync_core::{Error, Result};

use crate::cancel::CancelFlag;
use crate::desired::DesiredState;
use crate::pipeline::ReconcilerConfig;
use crate::report::StageReport;

/// Stages in execution order.
///
/// The declaration order is the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageName {
    DirectoryClients,
    DirectoryRoles,
    DirectoryUsers,
    DirectoryUserRoles,
    NativeAccountAudit,
    BoardUsers,
    BoardMembers,
    AddMissingRulesAndCardMembership,
    RemoveExtraRulesAndCardMembership,
}

impl StageName {
    pub const ALL: [Self; 9] = [
        Self::DirectoryClients,
        Self::DirectoryRoles,
        Self::DirectoryUsers,
        Self::DirectoryUserRoles,
        Self::NativeAccountAudit,
        Self::BoardUsers,
        Self::BoardMembers,
        Self::AddMissingRulesAndCardMembership,
        Self::RemoveExtraRulesAndCardMembership,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DirectoryClients => "directory-clients",
            Self::DirectoryRoles => "directory-roles",
            Self::DirectoryUsers => "directory-users",
            Self::DirectoryUserRoles => "directory-user-roles",
            Self::NativeAccountAudit => "native-account-audit",
            Self::BoardUsers => "board-users",
            Self::BoardMembers => "board-members",
            Self::AddMissingRulesAndCardMembership => "add-missing-rules-and-card-membership",
            Self::RemoveExtraRulesAndCardMembership => "remove-extra-rules-and-card-membership",
        }
    }

    /// Board-system stages see the scoped desired state.
    #[must_use]
    pub const fn targets_boards(self) -> bool {
        matches!(
            self,
            Self::NativeAccountAudit
                | Self::BoardUsers
                | Self::BoardMembers
                | Self::AddMissingRulesAndCardMembership
                | Self::RemoveExtraRulesAndCardMembership
        )
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.trim())
            .ok_or_else(|| Error::invalid_input(format!("unknown stage '{s}'")))
    }
}

/// Read-only inputs shared by every stage of a run.
pub struct StageContext<'a> {
    pub desired: &'a DesiredState,
    pub config: &'a ReconcilerConfig,
    pub cancel: &'a CancelFlag,
}

/// One idempotent convergence step.
///
/// A stage reads fresh state from its collaborator on entry, so it never
/// depends on what an earlier stage kept in memory, and running it twice in a
/// row changes nothing the second time.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// # Errors
    ///
    /// Returns foundational failures only; entity-level failures are
    /// recorded in the report.
    async fn run(&self, ctx: &StageContext<'_>) -> Result<StageReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in StageName::ALL {
            assert_eq!(stage.as_str().parse::<StageName>().ok(), Some(stage));
        }
    }

    #[test]
    fn test_declaration_order_is_pipeline_order() {
        assert!(StageName::DirectoryUserRoles < StageName::BoardMembers);
        assert!(StageName::BoardMembers < StageName::AddMissingRulesAndCardMembership);
        assert!(
            StageName::AddMissingRulesAndCardMembership
                < StageName::RemoveExtraRulesAndCardMembership
        );
    }

    #[test]
    fn test_unknown_stage() {
        assert!("nope".parse::<StageName>().is_err());
    }
}
