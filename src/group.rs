//! Named, lockable, scope-bound bundles of role records.

use crate::{
    aggregator::merge_grants,
    error::{Error, Result},
    grant::{Grant, Scope},
    role::{GroupRecord, PermissionRecord, RoleRecord},
    role_key::RoleKey,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A group of role records. A role key appears at most once per group.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct Group<R> {
    id: String,
    name: String,
    scope: Scope,
    locked: bool,
    records: BTreeMap<RoleKey, R>,
}

/// Group holding [`RoleRecord`]s.
pub type RoleGroup = Group<RoleRecord>;

/// Group holding [`PermissionRecord`]s.
pub type PermissionGroup = Group<PermissionRecord>;

impl<R: GroupRecord> Group<R> {
    /// Create an empty, unlocked group.
    pub fn new(name: &str, scope: Scope) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Group name cannot be blank"));
        }
        if scope.is_corp_scoped() {
            return Err(Error::validation(format!(
                "Group '{name}' must be scoped to an application"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            scope,
            locked: false,
            records: BTreeMap::new(),
        })
    }

    /// Create a group seeded with the union of the sources' records.
    ///
    /// Every source must share the new group's scope.
    pub fn copy_from(name: &str, scope: Scope, sources: &[&Group<R>]) -> Result<Self> {
        let mut group = Self::new(name, scope)?;

        if let Some(foreign) = sources.iter().find(|source| source.scope != group.scope) {
            return Err(Error::SecurityViolation(format!(
                "Cannot copy group '{}' of {} into {}",
                foreign.name, foreign.scope, group.scope
            )));
        }

        let merged = merge_grants(
            sources
                .iter()
                .flat_map(|source| source.records.values().map(GroupRecord::to_grant)),
        );
        group.records = merged
            .into_iter()
            .map(|grant| (grant.key.clone(), R::from_grant(grant.key, grant.permissions)))
            .collect();

        Ok(group)
    }

    /// Rebuild a group from persisted parts.
    ///
    /// Records holding no permission are dropped. A record outside `scope`
    /// fails the whole call with a security violation.
    pub fn from_parts(
        id: impl Into<String>,
        name: &str,
        scope: Scope,
        locked: bool,
        records: impl IntoIterator<Item = R>,
    ) -> Result<Self> {
        let mut group = Self::new(name, scope)?;
        group.id = id.into();
        group.locked = locked;

        let mut kept = BTreeMap::new();
        for record in records {
            group.scope.ensure_contains(record.key())?;
            if !record.permissions().is_none() {
                kept.insert(record.key().clone(), record);
            }
        }
        group.records = kept;
        Ok(group)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn corp(&self) -> &str {
        self.scope.corp()
    }

    pub fn app(&self) -> &str {
        self.scope.app()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Change the group's display name. Uniqueness within the scope is the
    /// store's concern.
    pub fn rename(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Group name cannot be blank"));
        }
        self.name = name.to_string();
        Ok(())
    }

    /// Records in key order.
    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }

    pub fn record(&self, key: &RoleKey) -> Option<&R> {
        self.records.get(key)
    }

    /// Records as plain grants, in key order.
    pub fn grants(&self) -> Vec<Grant> {
        self.records.values().map(GroupRecord::to_grant).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn records_map(&self) -> &BTreeMap<RoleKey, R> {
        &self.records
    }

    /// Swap in a complete record set. Callers build the snapshot first so a
    /// failed mutation never leaves a half-applied group.
    pub fn replace_records(&mut self, records: BTreeMap<RoleKey, R>) {
        self.records = records;
    }

    /// Mutable access to a record, used to toggle record-level locks.
    pub fn record_mut(&mut self, key: &RoleKey) -> Option<&mut R> {
        self.records.get_mut(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionSet;

    fn scope() -> Scope {
        Scope::new("acme", "crm").unwrap()
    }

    fn group_with(name: &str, grants: &[(&str, PermissionSet)]) -> RoleGroup {
        let mut group = RoleGroup::new(name, scope()).unwrap();
        let records = grants
            .iter()
            .map(|(key, perms)| {
                let key = RoleKey::parse(key).unwrap();
                (key.clone(), RoleRecord::new(key, *perms))
            })
            .collect();
        group.replace_records(records);
        group
    }

    #[test]
    fn test_group_creation() {
        let group = RoleGroup::new("  sales ", scope()).unwrap();
        assert_eq!(group.name(), "sales");
        assert_eq!(group.corp(), "acme");
        assert_eq!(group.app(), "crm");
        assert!(group.is_empty());
        assert!(!group.is_locked());

        assert!(RoleGroup::new(" ", scope()).is_err());
        assert!(RoleGroup::new("sales", Scope::corp_only("acme").unwrap()).is_err());
    }

    #[test]
    fn test_copy_from_unions_records() {
        let a = group_with(
            "a",
            &[
                ("acme.crm.prod.t1.leads", PermissionSet::VIEW),
                ("acme.crm.prod.t1.deals", PermissionSet::ADD),
            ],
        );
        let b = group_with("b", &[("acme.crm.prod.t1.leads", PermissionSet::EDIT)]);

        let copy = RoleGroup::copy_from("c", scope(), &[&a, &b]).unwrap();
        assert_eq!(copy.len(), 2);

        let leads = RoleKey::parse("acme.crm.prod.t1.leads").unwrap();
        assert_eq!(
            copy.record(&leads).unwrap().permissions(),
            PermissionSet::VIEW | PermissionSet::EDIT
        );
    }

    #[test]
    fn test_copy_from_rejects_foreign_scope() {
        let foreign = PermissionGroup::new("ops", Scope::new("acme", "billing").unwrap()).unwrap();
        let result = PermissionGroup::copy_from("c", scope(), &[&foreign]);
        assert!(matches!(result, Err(Error::SecurityViolation(_))));
    }

    #[test]
    fn test_from_parts_prunes_empty_records() {
        let leads = RoleKey::parse("acme.crm.prod.t1.leads").unwrap();
        let deals = RoleKey::parse("acme.crm.prod.t1.deals").unwrap();
        let group = RoleGroup::from_parts(
            "g-1",
            "sales",
            scope(),
            true,
            [
                RoleRecord::new(leads.clone(), PermissionSet::VIEW),
                RoleRecord::new(deals.clone(), PermissionSet::NONE),
            ],
        )
        .unwrap();

        assert_eq!(group.id(), "g-1");
        assert!(group.is_locked());
        assert_eq!(group.len(), 1);
        assert!(group.record(&leads).is_some());
        assert!(group.record(&deals).is_none());
    }

    #[test]
    fn test_from_parts_rejects_foreign_records() {
        let foreign = RoleKey::parse("acme.billing.prod.t1.invoices").unwrap();
        let result = RoleGroup::from_parts(
            "g-1",
            "sales",
            scope(),
            false,
            [RoleRecord::new(foreign, PermissionSet::FULL)],
        );
        assert!(matches!(result, Err(Error::SecurityViolation(_))));
    }
}
