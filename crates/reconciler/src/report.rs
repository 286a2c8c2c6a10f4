//! Run reports.
//!
//! Entity-level failures never stop a stage; they land here so an operator
//! sees every entity left unconverged.

use std::fmt;

use chrono::{DateTime, Utc};
use habsync_core::{Error, Outcome};
use ulid::Ulid;

use crate::stage::StageName;

/// A failure scoped to one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// What was being converged, e.g. a username or `board/label`.
    pub entity: String,
    pub operation: &'static str,
    pub error: Error,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.entity, self.operation, self.error)
    }
}

/// What one stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageName,
    /// Mutations that changed a target system.
    pub changes: usize,
    /// Convergence checks that found nothing to do.
    pub unchanged: usize,
    pub failures: Vec<EntityFailure>,
}

impl StageReport {
    pub const fn new(stage: StageName) -> Self {
        Self {
            stage,
            changes: 0,
            unchanged: 0,
            failures: Vec::new(),
        }
    }

    pub const fn record_change(&mut self) {
        self.changes = self.changes.saturating_add(1);
    }

    pub const fn record_unchanged(&mut self) {
        self.unchanged = self.unchanged.saturating_add(1);
    }

    pub const fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Changed => self.record_change(),
            Outcome::Unchanged => self.record_unchanged(),
        }
    }

    pub fn record_failure(&mut self, entity: impl Into<String>, operation: &'static str, error: Error) {
        self.failures.push(EntityFailure {
            entity: entity.into(),
            operation,
            error,
        });
    }

    /// Nothing changed and nothing failed.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.changes == 0 && self.failures.is_empty()
    }
}

/// Aggregated report of a pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    #[must_use]
    pub fn start() -> Self {
        Self {
            run_id: Ulid::new(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, stage: StageReport) {
        self.stages.push(stage);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub fn stage(&self, name: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    #[must_use]
    pub fn changes(&self) -> usize {
        self.stages
            .iter()
            .fold(0usize, |acc, s| acc.saturating_add(s.changes))
    }

    pub fn failures(&self) -> impl Iterator<Item = (StageName, &EntityFailure)> {
        self.stages
            .iter()
            .flat_map(|s| s.failures.iter().map(move |f| (s.stage, f)))
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.stages.iter().any(|s| !s.failures.is_empty())
    }

    /// Every stage converged without touching anything.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.stages.iter().all(StageReport::is_converged)
    }
}
