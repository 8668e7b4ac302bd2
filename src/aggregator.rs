//! Group-based grant aggregation.
//!
//! [`GroupAggregator`] turns the groups a user belongs to into a deduplicated
//! set of active grants for one scope, and applies role mutations to a group
//! as a single replace-by-snapshot step.
//!
//! Everything here is a pure computation over data already fetched by the
//! caller; storage access lives in [`crate::core`] and [`crate::async_support`].

#[cfg(feature = "audit")]
use log::debug;

use crate::{
    error::{Error, Result},
    grant::{Grant, Scope},
    group::Group,
    permission::PermissionSet,
    role::{GroupRecord, Role},
    role_key::{RoleKey, WILDCARD, normalize_segment},
};
use std::collections::{BTreeMap, HashMap};

/// Lock state of catalog roles, as seen by the aggregator.
pub trait RoleCatalog {
    /// `Some(locked)` for a known role, `None` if the catalog has no entry.
    fn lock_state(&self, key: &RoleKey) -> Option<bool>;
}

impl RoleCatalog for HashMap<RoleKey, Role> {
    fn lock_state(&self, key: &RoleKey) -> Option<bool> {
        self.get(key).map(Role::is_locked)
    }
}

impl RoleCatalog for [Role] {
    fn lock_state(&self, key: &RoleKey) -> Option<bool> {
        self.iter()
            .find(|role| role.key() == key)
            .map(Role::is_locked)
    }
}

/// Union grants by role key, OR-ing permission bits of duplicates.
///
/// `None` grants are dropped. The result is ordered by role key.
pub fn merge_grants<I>(grants: I) -> Vec<Grant>
where
    I: IntoIterator<Item = Grant>,
{
    let mut merged: BTreeMap<RoleKey, PermissionSet> = BTreeMap::new();
    for grant in grants {
        if grant.permissions.is_none() {
            continue;
        }
        *merged.entry(grant.key).or_default() |= grant.permissions;
    }

    merged
        .into_iter()
        .map(|(key, permissions)| Grant::new(key, permissions))
        .collect()
}

/// Optional env/tenant filters for [`GroupAggregator::active_grants`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantFilter {
    env: Option<String>,
    tenant: Option<String>,
}

impl GrantFilter {
    /// No filtering.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a filter, rejecting wildcard values.
    pub fn new(env: Option<&str>, tenant: Option<&str>) -> Result<Self> {
        Ok(Self {
            env: env.map(|e| normalize_filter(e, "env")).transpose()?,
            tenant: tenant.map(|t| normalize_filter(t, "tenant")).transpose()?,
        })
    }

    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// A stored value passes if it equals the filter or is itself a wildcard.
    fn admits<R: GroupRecord>(&self, record: &R) -> bool {
        let passes = |filter: &Option<String>, value: &str| match filter {
            Some(wanted) => value == wanted || value == WILDCARD,
            None => true,
        };
        passes(&self.env, record.env()) && passes(&self.tenant, record.tenant())
    }
}

fn normalize_filter(raw: &str, name: &str) -> Result<String> {
    let value = normalize_segment(raw, &format!("{name} filter"), true)?;
    if value == WILDCARD {
        return Err(Error::validation(format!(
            "The {name} filter cannot be the wildcard '{WILDCARD}'"
        )));
    }
    Ok(value)
}

/// A batch of changes to one group's records.
#[derive(Debug, Clone, Default)]
pub struct GroupMutation {
    additions: Vec<Grant>,
    revocations: Vec<Grant>,
    clear_all: bool,
}

impl GroupMutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the grant's bits into the record for its key, creating it if needed.
    pub fn add(mut self, grant: Grant) -> Self {
        self.additions.push(grant);
        self
    }

    pub fn add_all(mut self, grants: impl IntoIterator<Item = Grant>) -> Self {
        self.additions.extend(grants);
        self
    }

    /// Clear the grant's bits from the record for its key.
    pub fn revoke(mut self, grant: Grant) -> Self {
        self.revocations.push(grant);
        self
    }

    pub fn revoke_all(mut self, grants: impl IntoIterator<Item = Grant>) -> Self {
        self.revocations.extend(grants);
        self
    }

    /// Remove every record before additions and revocations apply.
    pub fn clear_all(mut self) -> Self {
        self.clear_all = true;
        self
    }

    pub fn additions(&self) -> &[Grant] {
        &self.additions
    }

    pub fn revocations(&self) -> &[Grant] {
        &self.revocations
    }

    pub fn clears_all(&self) -> bool {
        self.clear_all
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.revocations.is_empty() && !self.clear_all
    }
}

/// Outcome of [`GroupAggregator::mutate_group_roles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupChange {
    /// Records in the group after the mutation.
    pub records: usize,
    /// Records removed, either cleared or revoked down to `None`.
    pub removed: usize,
    /// Whether the record set differs from before.
    pub changed: bool,
}

/// Stateless aggregation over groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupAggregator;

impl GroupAggregator {
    /// Collect the deduplicated active grants for `scope` from `groups`.
    ///
    /// Groups of other scopes and locked groups are skipped. A record is
    /// dropped if it, its catalog role or its group is locked, or if the
    /// catalog has no entry for it. Remaining records are filtered by env and
    /// tenant and merged by role key with a bitwise OR. The result is ordered
    /// by role key.
    pub fn active_grants<R, C>(
        groups: &[Group<R>],
        catalog: &C,
        scope: &Scope,
        filter: &GrantFilter,
    ) -> Vec<Grant>
    where
        R: GroupRecord,
        C: RoleCatalog + ?Sized,
    {
        let candidates = groups
            .iter()
            .filter(|group| group.scope() == scope && !group.is_locked())
            .flat_map(|group| group.records())
            .filter(|record| !record.is_locked())
            .filter(|record| matches!(catalog.lock_state(record.key()), Some(false)))
            .filter(|record| filter.admits(*record))
            .map(GroupRecord::to_grant);

        let grants = merge_grants(candidates);

        #[cfg(feature = "audit")]
        debug!(
            "Resolved {} active grant(s) in {scope} from {} group(s)",
            grants.len(),
            groups.len()
        );

        grants
    }

    /// Apply a mutation to `group` atomically.
    ///
    /// Every addition must belong to the group's scope and carry at least one
    /// verb; any violation fails the whole call before the group is touched.
    /// Records revoked down to `None` are removed rather than stored.
    pub fn mutate_group_roles<R: GroupRecord>(
        group: &mut Group<R>,
        mutation: &GroupMutation,
    ) -> Result<GroupChange> {
        for addition in mutation.additions() {
            group.scope().ensure_contains(&addition.key)?;
            if addition.permissions.is_none() {
                return Err(Error::validation(format!(
                    "Cannot grant '{}' with no permission",
                    addition.key
                )));
            }
        }

        let before = group.records_map();
        let mut next = if mutation.clears_all() {
            BTreeMap::new()
        } else {
            before.clone()
        };

        for addition in mutation.additions() {
            next.entry(addition.key.clone())
                .and_modify(|record: &mut R| {
                    record.set_permissions(record.permissions().grant(addition.permissions))
                })
                .or_insert_with(|| R::from_grant(addition.key.clone(), addition.permissions));
        }

        for revocation in mutation.revocations() {
            let emptied = match next.get_mut(&revocation.key) {
                Some(record) => {
                    record.set_permissions(record.permissions().revoke(revocation.permissions));
                    record.permissions().is_none()
                }
                None => false,
            };
            if emptied {
                next.remove(&revocation.key);
            }
        }

        let removed = before.keys().filter(|key| !next.contains_key(*key)).count();
        let changed = before.len() != next.len()
            || before.iter().any(|(key, record)| {
                next.get(key)
                    .is_none_or(|updated| updated.permissions() != record.permissions())
            });

        let change = GroupChange {
            records: next.len(),
            removed,
            changed,
        };
        group.replace_records(next);
        Ok(change)
    }
}
