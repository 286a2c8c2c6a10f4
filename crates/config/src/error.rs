//! Configuration errors.
//!
//! Reading and parsing stop at the first broken file. Validation never does:
//! every problem of the merged document ends up in [`ConfigError::Invalid`].

use std::fmt;
use std::path::PathBuf;

use itertools::Itertools;
use thiserror::Error;

/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One validation problem, located by its dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub field: String,
    pub message: String,
}

impl Problem {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config file '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration:\n  {}", .problems.iter().join("\n  "))]
    Invalid { problems: Vec<Problem> },
}

impl ConfigError {
    /// Create a read error.
    pub fn read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Problems found by validation, empty for read and parse errors.
    #[must_use]
    pub fn problems(&self) -> &[Problem] {
        match self {
            Self::Invalid { problems } => problems,
            Self::Read { .. } | Self::Parse { .. } => &[],
        }
    }
}
