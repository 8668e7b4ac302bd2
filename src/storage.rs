//! Storage collaborator for roles, groups, memberships and token versions.
//!
//! The engine never talks to a database directly. Whatever persists its data
//! implements [`Storage`] and translates its own failures into [`Error`]
//! before returning. Uniqueness checks and group writes happen inside the
//! store, so callers sharing one store never overwrite each other's changes.

use crate::{
    error::{EntityKind, Error, Result},
    grant::Scope,
    group::RoleGroup,
    role::{GroupRecord, Role, RoleRecord},
    role_key::RoleKey,
    token::TokenInfo,
    user::User,
};
use dashmap::{DashMap, mapref::entry::Entry};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Computes a group's next record set from its current state.
///
/// Returning `Ok(None)` leaves the records untouched; an error aborts the
/// update without writing anything.
pub type RecordUpdate<'a> = dyn FnMut(&RoleGroup) -> Result<Option<Vec<RoleRecord>>> + Send + 'a;

/// Trait for storing and retrieving engine data.
pub trait Storage: Send + Sync {
    /// Store a new catalog role; `AlreadyExists` if the key is taken.
    fn store_role(&mut self, role: Role) -> Result<()>;

    /// Find a catalog role by key.
    fn find_role(&self, key: &RoleKey) -> Result<Option<Role>>;

    /// Overwrite an existing catalog role.
    fn update_role(&mut self, role: Role) -> Result<()>;

    /// Store a new user; `AlreadyExists` if the id is taken.
    fn store_user(&mut self, user: User) -> Result<()>;

    fn find_user(&self, id: &str) -> Result<Option<User>>;

    /// Store a new group; `AlreadyExists` if its scope already has a group
    /// of that name.
    fn store_group(&mut self, group: RoleGroup) -> Result<()>;

    /// Find a group by name within a scope.
    fn find_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>>;

    /// Rename a group, keeping names unique within its scope.
    fn rename_group(&mut self, group_id: &str, new_name: &str) -> Result<()>;

    /// Set a group's lock flag without touching its records.
    fn set_group_locked(&mut self, group_id: &str, locked: bool) -> Result<()>;

    /// Delete a group and return whether it existed.
    fn delete_group(&mut self, group_id: &str) -> Result<bool>;

    /// Replace a group's records with the set `update` computes from the
    /// current group, as one atomic step. Returns the record count afterwards.
    fn update_group_records(&mut self, group_id: &str, update: &mut RecordUpdate<'_>)
    -> Result<usize>;

    /// Atomically replace a group's records, returning the new record count.
    fn replace_group_records(&mut self, group_id: &str, records: Vec<RoleRecord>) -> Result<usize> {
        let mut records = Some(records);
        self.update_group_records(group_id, &mut |_| Ok(records.take()))
    }

    /// Groups of `scope` the user belongs to, locked ones included.
    fn find_user_groups(&self, user_id: &str, scope: &Scope) -> Result<Vec<RoleGroup>>;

    /// Whether the user belongs to any group of `corp`.
    fn has_corp_membership(&self, user_id: &str, corp: &str) -> Result<bool>;

    /// Add a membership and return whether it was new.
    fn add_membership(&mut self, user_id: &str, group_id: &str) -> Result<bool>;

    /// Remove a membership and return whether it existed.
    fn remove_membership(&mut self, user_id: &str, group_id: &str) -> Result<bool>;

    /// Number of users referencing a group.
    fn group_member_count(&self, group_id: &str) -> Result<usize>;

    /// Increment the persistent token version, creating it at 1.
    fn increase_token_version(&mut self, scope: &Scope) -> Result<u64>;

    /// The persistent version, if one was ever issued.
    fn token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>>;
}

/// Key a record set by role key.
pub(crate) fn record_snapshot(records: Vec<RoleRecord>) -> BTreeMap<RoleKey, RoleRecord> {
    records
        .into_iter()
        .map(|record| (record.key().clone(), record))
        .collect()
}

/// In-memory storage implementation using DashMap for thread safety.
///
/// Clones share the same maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    roles: Arc<DashMap<RoleKey, Role>>,
    users: Arc<DashMap<String, User>>,
    groups: Arc<DashMap<String, RoleGroup>>,
    /// (scope, name) -> group id
    group_names: Arc<DashMap<(Scope, String), String>>,
    /// user id -> group ids
    memberships: Arc<DashMap<String, HashSet<String>>>,
    token_versions: Arc<DashMap<Scope, u64>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Clear all stored data.
    pub fn clear(&mut self) {
        self.roles.clear();
        self.users.clear();
        self.groups.clear();
        self.group_names.clear();
        self.memberships.clear();
        self.token_versions.clear();
    }
}

impl Storage for MemoryStorage {
    fn store_role(&mut self, role: Role) -> Result<()> {
        match self.roles.entry(role.key().clone()) {
            Entry::Occupied(_) => Err(Error::already_exists(EntityKind::Role, role.key().canonical())),
            Entry::Vacant(slot) => {
                slot.insert(role);
                Ok(())
            }
        }
    }

    fn find_role(&self, key: &RoleKey) -> Result<Option<Role>> {
        Ok(self.roles.get(key).map(|r| r.clone()))
    }

    fn update_role(&mut self, role: Role) -> Result<()> {
        match self.roles.get_mut(role.key()) {
            Some(mut existing) => {
                *existing = role;
                Ok(())
            }
            None => Err(Error::not_found(EntityKind::Role, role.key().canonical())),
        }
    }

    fn store_user(&mut self, user: User) -> Result<()> {
        match self.users.entry(user.id().to_string()) {
            Entry::Occupied(_) => Err(Error::already_exists(EntityKind::User, user.id())),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    fn store_group(&mut self, group: RoleGroup) -> Result<()> {
        if self.groups.contains_key(group.id()) {
            return Err(Error::already_exists(EntityKind::Group, group.id()));
        }

        // The name slot stays locked until the group is in place.
        match self
            .group_names
            .entry((group.scope().clone(), group.name().to_string()))
        {
            Entry::Occupied(_) => Err(Error::already_exists(EntityKind::Group, group.name())),
            Entry::Vacant(slot) => {
                slot.insert(group.id().to_string());
                self.groups.insert(group.id().to_string(), group);
                Ok(())
            }
        }
    }

    fn find_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>> {
        let Some(id) = self
            .group_names
            .get(&(scope.clone(), name.to_string()))
            .map(|id| id.value().clone())
        else {
            return Ok(None);
        };
        Ok(self.groups.get(&id).map(|group| group.clone()))
    }

    fn rename_group(&mut self, group_id: &str, new_name: &str) -> Result<()> {
        let scope = self
            .groups
            .get(group_id)
            .map(|group| group.scope().clone())
            .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;

        let new_name = new_name.trim();
        let previous = match self.group_names.entry((scope.clone(), new_name.to_string())) {
            Entry::Occupied(slot) if slot.get() == group_id => return Ok(()),
            Entry::Occupied(_) => return Err(Error::already_exists(EntityKind::Group, new_name)),
            Entry::Vacant(slot) => {
                let mut group = self
                    .groups
                    .get_mut(group_id)
                    .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;
                let previous = group.name().to_string();
                group.rename(new_name)?;
                slot.insert(group_id.to_string());
                previous
            }
        };

        self.group_names
            .remove_if(&(scope, previous), |_, id| id == group_id);
        Ok(())
    }

    fn set_group_locked(&mut self, group_id: &str, locked: bool) -> Result<()> {
        let mut group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;
        group.set_locked(locked);
        Ok(())
    }

    fn delete_group(&mut self, group_id: &str) -> Result<bool> {
        let Some((_, group)) = self.groups.remove(group_id) else {
            return Ok(false);
        };
        self.group_names.remove_if(
            &(group.scope().clone(), group.name().to_string()),
            |_, id| id == group_id,
        );
        Ok(true)
    }

    fn update_group_records(
        &mut self,
        group_id: &str,
        update: &mut RecordUpdate<'_>,
    ) -> Result<usize> {
        let mut group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;

        if let Some(records) = update(group.value())? {
            group.replace_records(record_snapshot(records));
        }
        Ok(group.len())
    }

    fn find_user_groups(&self, user_id: &str, scope: &Scope) -> Result<Vec<RoleGroup>> {
        let Some(group_ids) = self.memberships.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut groups: Vec<RoleGroup> = group_ids
            .iter()
            .filter_map(|id| self.groups.get(id).map(|g| g.clone()))
            .filter(|group| group.scope() == scope)
            .collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(groups)
    }

    fn has_corp_membership(&self, user_id: &str, corp: &str) -> Result<bool> {
        Ok(self.memberships.get(user_id).is_some_and(|group_ids| {
            group_ids.iter().any(|id| {
                self.groups
                    .get(id)
                    .is_some_and(|group| group.corp() == corp)
            })
        }))
    }

    fn add_membership(&mut self, user_id: &str, group_id: &str) -> Result<bool> {
        Ok(self
            .memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(group_id.to_string()))
    }

    fn remove_membership(&mut self, user_id: &str, group_id: &str) -> Result<bool> {
        let mut removed = false;
        if let Some(mut group_ids) = self.memberships.get_mut(user_id) {
            removed = group_ids.remove(group_id);
            if group_ids.is_empty() {
                drop(group_ids);
                self.memberships.remove(user_id);
            }
        }
        Ok(removed)
    }

    fn group_member_count(&self, group_id: &str) -> Result<usize> {
        Ok(self
            .memberships
            .iter()
            .filter(|entry| entry.value().contains(group_id))
            .count())
    }

    fn increase_token_version(&mut self, scope: &Scope) -> Result<u64> {
        let version = self
            .token_versions
            .entry(scope.clone())
            .and_modify(|v| *v += 1)
            .or_insert(TokenInfo::INITIAL_VERSION);
        Ok(*version)
    }

    fn token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>> {
        Ok(self
            .token_versions
            .get(scope)
            .map(|v| TokenInfo::new(scope.clone(), *v)))
    }
}
