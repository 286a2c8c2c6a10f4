//! Error types for the reconciler crate.

use habsync_core::Error as CoreError;
use thiserror::Error;

use crate::report::RunReport;
use crate::stage::StageName;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline error types.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage hit a foundational failure; stages after it did not run.
    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: StageName,
        #[source]
        source: CoreError,
        /// What ran up to and including the failing stage.
        report: Box<RunReport>,
    },
    /// `stop_after` named a stage this pipeline does not contain.
    #[error("stage '{stage}' is not part of this pipeline")]
    StageNotInPipeline { stage: StageName },
    /// Neither collaborator was configured.
    #[error("invalid pipeline: {reason}")]
    InvalidConfig { reason: String },
}

impl PipelineError {
    /// Create a stage failed error.
    pub fn stage_failed(stage: StageName, source: CoreError, report: RunReport) -> Self {
        Self::StageFailed {
            stage,
            source,
            report: Box::new(report),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Partial report of a failed run.
    #[must_use]
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::StageFailed { report, .. } => Some(report),
            Self::StageNotInPipeline { .. } | Self::InvalidConfig { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::stage_failed(
            StageName::DirectoryRoles,
            CoreError::no_such_client("signauxfaibles"),
            RunReport::start(),
        );
        assert!(err.to_string().contains("directory-roles"));
        assert!(err.to_string().contains("signauxfaibles"));
        assert!(err.report().is_some());
    }

    #[test]
    fn test_stage_not_in_pipeline() {
        let err = PipelineError::StageNotInPipeline {
            stage: StageName::BoardUsers,
        };
        assert!(err.to_string().contains("board-users"));
        assert!(err.report().is_none());
    }
}
