//! Error types for the resolution engine.

use std::fmt;
use thiserror::Error;

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A user known to the membership store.
    User,
    /// A role catalog entry.
    Role,
    /// A role or permission group.
    Group,
    /// A (corp, app) token version record.
    Token,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::User => "User",
            EntityKind::Role => "Role",
            EntityKind::Group => "Group",
            EntityKind::Token => "Token",
        };
        f.write_str(label)
    }
}

/// The main error type for resolution and group management operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The referenced user, role, group or token does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    /// An entity with the same identity already exists.
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: EntityKind, id: String },

    /// The entity is locked and the operation is not permitted on it.
    #[error("{kind} '{id}' is locked")]
    Locked { kind: EntityKind, id: String },

    /// A role key's corp/app does not match the scope of the operation.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Malformed input: role key, filter, demand or blank required field.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The group is still referenced by at least one user.
    #[error("Group '{group}' is still assigned to {users} user(s)")]
    ReferentialConflict { group: String, users: usize },

    /// Storage collaborator failure, already translated to text.
    #[error("Storage operation failed: {0}")]
    Storage(String),

    /// Serialization error while sealing or opening a token payload.
    #[cfg(feature = "persistence")]
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn already_exists(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn locked(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::Locked {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Stable label for the error kind, used as a metrics key.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::Locked { .. } => "locked",
            Error::SecurityViolation(_) => "security_violation",
            Error::Validation(_) => "validation",
            Error::ReferentialConflict { .. } => "referential_conflict",
            Error::Storage(_) => "storage",
            #[cfg(feature = "persistence")]
            Error::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::not_found(EntityKind::Group, "admins");
        assert_eq!(err.to_string(), "Group 'admins' not found");
        assert_eq!(err.kind_label(), "not_found");

        let err = Error::ReferentialConflict {
            group: "admins".to_string(),
            users: 2,
        };
        assert_eq!(err.to_string(), "Group 'admins' is still assigned to 2 user(s)");
    }
}
