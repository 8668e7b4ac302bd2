//! Role catalog entries and the per-group records that grant them.

use crate::{grant::Grant, permission::PermissionSet, role_key::RoleKey};
use std::{collections::HashMap, fmt::Debug};
use uuid::Uuid;

/// The canonical definition of a role, independent of any group.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct Role {
    /// Unique identifier for the catalog entry.
    id: String,
    /// The hierarchical key this role is known by.
    key: RoleKey,
    /// Optional description of the role.
    description: Option<String>,
    /// Metadata associated with the role.
    metadata: HashMap<String, String>,
    /// Locked roles are excluded from resolution but kept for audit.
    locked: bool,
}

impl Role {
    /// Create a new unlocked catalog entry.
    pub fn new(key: RoleKey) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key,
            description: None,
            metadata: HashMap::new(),
            locked: false,
        }
    }

    /// Get the role's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &RoleKey {
        &self.key
    }

    /// Set the role's description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Set metadata for this role.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get metadata value for a key.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock this role.
    pub fn lock(mut self) -> Self {
        self.locked = true;
        self
    }
}

/// A record a group holds for one role key.
///
/// `RoleGroup` and `PermissionGroup` differ only in the record type they
/// hold; both go through this trait so aggregation treats them alike.
pub trait GroupRecord: Clone + Debug + Send + Sync {
    /// Create a fresh unlocked record.
    fn from_grant(key: RoleKey, permissions: PermissionSet) -> Self;

    fn key(&self) -> &RoleKey;

    fn permissions(&self) -> PermissionSet;

    fn set_permissions(&mut self, permissions: PermissionSet);

    /// Record-level lock flag.
    fn is_locked(&self) -> bool;

    fn env(&self) -> &str;

    fn tenant(&self) -> &str;

    fn to_grant(&self) -> Grant {
        Grant::new(self.key().clone(), self.permissions())
    }
}

/// A role granted to a role group, with denormalized env/tenant for filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct RoleRecord {
    key: RoleKey,
    permissions: PermissionSet,
    locked: bool,
    env: String,
    tenant: String,
}

impl RoleRecord {
    pub fn new(key: RoleKey, permissions: PermissionSet) -> Self {
        let env = key.env().to_string();
        let tenant = key.tenant().to_string();
        Self {
            key,
            permissions,
            locked: false,
            env,
            tenant,
        }
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Lock this record.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

impl GroupRecord for RoleRecord {
    fn from_grant(key: RoleKey, permissions: PermissionSet) -> Self {
        Self::new(key, permissions)
    }

    fn key(&self) -> &RoleKey {
        &self.key
    }

    fn permissions(&self) -> PermissionSet {
        self.permissions
    }

    fn set_permissions(&mut self, permissions: PermissionSet) {
        self.permissions = permissions;
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn env(&self) -> &str {
        &self.env
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }
}

/// A permission granted to a permission group.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct PermissionRecord {
    key: RoleKey,
    permissions: PermissionSet,
    locked: bool,
}

impl PermissionRecord {
    pub fn new(key: RoleKey, permissions: PermissionSet) -> Self {
        Self {
            key,
            permissions,
            locked: false,
        }
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}

impl GroupRecord for PermissionRecord {
    fn from_grant(key: RoleKey, permissions: PermissionSet) -> Self {
        Self::new(key, permissions)
    }

    fn key(&self) -> &RoleKey {
        &self.key
    }

    fn permissions(&self) -> PermissionSet {
        self.permissions
    }

    fn set_permissions(&mut self, permissions: PermissionSet) {
        self.permissions = permissions;
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn env(&self) -> &str {
        self.key.env()
    }

    fn tenant(&self) -> &str {
        self.key.tenant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_catalog_entry() {
        let key = RoleKey::parse("acme.crm.prod.t1.leads").unwrap();
        let mut role = Role::new(key.clone())
            .with_description("Lead management")
            .with_metadata("owner", "sales");

        assert_eq!(role.key(), &key);
        assert_eq!(role.description(), Some("Lead management"));
        assert_eq!(role.metadata("owner"), Some("sales"));
        assert!(!role.is_locked());

        role.set_locked(true);
        assert!(role.is_locked());
    }

    #[test]
    fn test_role_record_denormalizes_segments() {
        let key = RoleKey::parse("acme.crm.*.t1.leads").unwrap();
        let record = RoleRecord::new(key, PermissionSet::VIEW);

        assert_eq!(record.env(), "*");
        assert_eq!(record.tenant(), "t1");
        assert!(!record.is_locked());
        assert!(record.clone().locked().is_locked());
        assert_eq!(record.to_grant().permissions, PermissionSet::VIEW);
    }
}
