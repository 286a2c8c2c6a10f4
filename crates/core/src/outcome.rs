//! Result of an idempotent mutation.

use serde::{Deserialize, Serialize};

/// Whether an `ensure`-style call changed the target system.
///
/// `Unchanged` is a successful convergence, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Changed,
    Unchanged,
}

impl Outcome {
    /// `Changed` when `changed` is true.
    #[must_use]
    pub const fn from_changed(changed: bool) -> Self {
        if changed { Self::Changed } else { Self::Unchanged }
    }

    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }

    /// `Changed` if either side changed.
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        Self::from_changed(self.is_changed() || other.is_changed())
    }
}
