//! Error taxonomy shared by the reconcilers and their collaborators.
//!
//! Errors split in two families. Entity-level errors (`NotFound` of a label,
//! `Conflict`, `Rejected`) only concern the entity being converged and never
//! stop a run. Everything else is foundational and halts the current stage.

use std::fmt;

use thiserror::Error;

/// Kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Client,
    Role,
    Board,
    Label,
    Card,
    Rule,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::Client => "client",
            Self::Role => "role",
            Self::Board => "board",
            Self::Label => "label",
            Self::Card => "card",
            Self::Rule => "rule",
        };
        f.write_str(name)
    }
}

/// Error returned by collaborators and reconcilers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: EntityKind, key: String },

    #[error("{kind} '{key}' conflicts with an existing account")]
    Conflict {
        kind: EntityKind,
        key: String,
        existing_id: Option<String>,
    },

    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("{operation} failed: {reason}")]
    Transport { operation: String, reason: String },

    #[error("role '{role}' already exists on client '{client}'")]
    DuplicateRole { client: String, role: String },

    #[error("no such client: {client}")]
    NoSuchClient { client: String },

    #[error("{planned} account changes planned on {target}, more than the {max} accepted")]
    TooManyChanges {
        target: String,
        planned: usize,
        max: usize,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create a conflict error, optionally naming the account already holding the key.
    pub fn conflict(kind: EntityKind, key: impl Into<String>, existing_id: Option<String>) -> Self {
        Self::Conflict {
            kind,
            key: key.into(),
            existing_id,
        }
    }

    /// Create a rejected call error.
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport failure.
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate role error.
    pub fn duplicate_role(client: impl Into<String>, role: impl Into<String>) -> Self {
        Self::DuplicateRole {
            client: client.into(),
            role: role.into(),
        }
    }

    /// Create a missing client error.
    pub fn no_such_client(client: impl Into<String>) -> Self {
        Self::NoSuchClient {
            client: client.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Whether the error only concerns one entity, so the run may go on.
    ///
    /// A missing client is never entity-level: every user of the run depends on it.
    #[must_use]
    pub const fn is_entity_level(&self) -> bool {
        match self {
            Self::NotFound { kind, .. } => !matches!(kind, EntityKind::Client),
            Self::Conflict { .. } | Self::Rejected { .. } | Self::DuplicateRole { .. } => true,
            Self::Transport { .. }
            | Self::NoSuchClient { .. }
            | Self::TooManyChanges { .. }
            | Self::Cancelled
            | Self::InvalidInput { .. } => false,
        }
    }
}
