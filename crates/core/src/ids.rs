//! Typed identifiers.
//!
//! Every identifier handed out by a collaborator is opaque: habsync never
//! parses or builds one, it only compares and forwards them.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    /// Identifier assigned by either system to a user account.
    UserId
);
opaque_id!(
    /// Internal identifier of a directory client (not its human-readable name).
    ClientId
);
opaque_id!(BoardId);
opaque_id!(
    /// Human-readable board key used in the desired state.
    BoardSlug
);
opaque_id!(LabelId);
opaque_id!(CardId);
opaque_id!(RuleId);

/// Case-normalized account key (username or email).
///
/// Construction trims and lowercases, so two spellings of the same address
/// always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Username {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Username {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_username_is_normalized() {
        assert_eq!(Username::new("  Jane.Doe@Example.ORG "), Username::new("jane.doe@example.org"));
        assert_eq!(Username::new("ADMIN").as_str(), "admin");
    }

    #[test]
    fn test_username_deserializes_normalized() {
        let name: Username = serde_json::from_str("\"Bob@Example.org\"").unwrap();
        assert_eq!(name.as_str(), "bob@example.org");
    }

    #[test]
    fn test_opaque_id_is_transparent() {
        let id = BoardId::new("b1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"b1\"");
        assert_eq!(id.to_string(), "b1");
    }
}
