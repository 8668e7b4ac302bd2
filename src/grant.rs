//! Value types flowing through resolution: scopes, active grants and demands.

use crate::{
    error::{Error, Result},
    permission::PermissionSet,
    role_key::{RoleKey, WILDCARD, normalize_segment},
};
use std::fmt;

/// A validated `(corp, app)` pair that every group, membership and token is
/// scoped to. An empty `app` is only meaningful for corp-scoped tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct Scope {
    corp: String,
    app: String,
}

impl Scope {
    /// Create a scope, normalizing both segments.
    pub fn new(corp: &str, app: &str) -> Result<Self> {
        Ok(Self {
            corp: normalize_segment(corp, "corp", false)?,
            app: normalize_segment(app, "app", false)?,
        })
    }

    /// Create a corp-scoped scope with an empty app.
    pub fn corp_only(corp: &str) -> Result<Self> {
        Ok(Self {
            corp: normalize_segment(corp, "corp", false)?,
            app: String::new(),
        })
    }

    pub fn corp(&self) -> &str {
        &self.corp
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn is_corp_scoped(&self) -> bool {
        self.app.is_empty()
    }

    /// True if the key lies within this scope.
    pub fn contains(&self, key: &RoleKey) -> bool {
        key.belongs_to(&self.corp, &self.app)
    }

    /// Fail with `SecurityViolation` unless the key lies within this scope.
    pub fn ensure_contains(&self, key: &RoleKey) -> Result<()> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!(
                "Role '{key}' does not belong to {self}"
            )))
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.app.is_empty() {
            write!(f, "{}", self.corp)
        } else {
            write!(f, "{}.{}", self.corp, self.app)
        }
    }
}

/// An active `(RoleKey, PermissionSet)` pair held by a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct Grant {
    pub key: RoleKey,
    pub permissions: PermissionSet,
}

impl Grant {
    pub fn new(key: RoleKey, permissions: PermissionSet) -> Self {
        Self { key, permissions }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.permissions)
    }
}

/// A required `(RoleKey, PermissionSet)` pair.
///
/// Demands are always concrete: no wildcard segment and at least one verb.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(try_from = "RawDemand"))]
pub struct Demand {
    key: RoleKey,
    permissions: PermissionSet,
}

/// Wire shape of a demand before validation.
#[cfg(feature = "persistence")]
#[derive(serde::Deserialize)]
struct RawDemand {
    key: RoleKey,
    permissions: PermissionSet,
}

#[cfg(feature = "persistence")]
impl TryFrom<RawDemand> for Demand {
    type Error = Error;

    fn try_from(raw: RawDemand) -> Result<Self> {
        Demand::new(raw.key, raw.permissions)
    }
}

impl Demand {
    /// Create a demand, rejecting `None` permissions and wildcard segments.
    pub fn new(key: RoleKey, permissions: PermissionSet) -> Result<Self> {
        let demand = Self { key, permissions };
        demand.validate()?;
        Ok(demand)
    }

    /// Parse a demand from a role key string and a permission wire value.
    pub fn parse(key: &str, permissions: &str) -> Result<Self> {
        Self::new(RoleKey::parse(key)?, PermissionSet::parse(permissions)?)
    }

    pub fn key(&self) -> &RoleKey {
        &self.key
    }

    pub fn permissions(&self) -> PermissionSet {
        self.permissions
    }

    /// The same demand with a reduced permission mask.
    pub(crate) fn with_permissions(&self, permissions: PermissionSet) -> Self {
        Self {
            key: self.key.clone(),
            permissions,
        }
    }

    /// Check the demand invariants.
    pub fn validate(&self) -> Result<()> {
        if self.permissions.is_none() {
            return Err(Error::validation(format!(
                "Demand for '{}' requires no permission",
                self.key
            )));
        }
        if self.key.has_wildcard() {
            return Err(Error::validation(format!(
                "Demand for '{}' cannot contain the wildcard '{WILDCARD}'",
                self.key
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.permissions)
    }
}
