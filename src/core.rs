//! Controller-facing authorization service.
//!
//! [`AuthorizationService`] wires the pure resolution pieces to a [`Storage`]
//! collaborator. It owns the shared token version cache and metrics, and is
//! the synchronous entry point for:
//!
//! - role catalog and user registration,
//! - group lifecycle and membership,
//! - active grant resolution, access checks and missing-permission queries,
//! - group role mutations,
//! - token version issuance and freshness checks.
//!
//! Every operation validates its input before touching storage, so a failed
//! call never leaves partial writes behind.

#[cfg(feature = "audit")]
use log::{info, warn};

use crate::{
    aggregator::{GrantFilter, GroupAggregator, GroupChange, GroupMutation},
    error::{EntityKind, Error, Result},
    evaluator::AccessEvaluator,
    grant::{Demand, Grant, Scope},
    group::RoleGroup,
    metrics::AuthzMetrics,
    role::{GroupRecord, Role, RoleRecord},
    role_key::RoleKey,
    storage::{MemoryStorage, Storage},
    token::{CacheMissPolicy, TokenFreshness, TokenInfo, TokenIssuer, TokenVersionCache},
    user::User,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "persistence")]
use crate::token::{PayloadCipher, open_token, seal_token};

/// Configuration for the authorization services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Whether to consult the token version cache before storage.
    pub enable_token_cache: bool,
    /// What a token check does when the cache has no entry.
    pub cache_miss_policy: CacheMissPolicy,
    /// Whether to enable audit logging.
    pub enable_audit: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enable_token_cache: true,
            cache_miss_policy: CacheMissPolicy::FetchThrough,
            enable_audit: true,
        }
    }
}

impl ServiceConfig {
    pub(crate) fn token_issuer(&self, cache: Arc<TokenVersionCache>) -> TokenIssuer {
        let issuer = TokenIssuer::new(cache, self.cache_miss_policy);
        if self.enable_token_cache {
            issuer
        } else {
            issuer.without_cache()
        }
    }

    #[cfg(feature = "audit")]
    pub(crate) fn audit(&self, args: fmt::Arguments<'_>) {
        if self.enable_audit {
            info!("{args}");
        }
    }

    #[cfg(not(feature = "audit"))]
    pub(crate) fn audit(&self, _args: fmt::Arguments<'_>) {}

    #[cfg(feature = "audit")]
    pub(crate) fn audit_warn(&self, args: fmt::Arguments<'_>) {
        if self.enable_audit {
            warn!("{args}");
        }
    }

    #[cfg(not(feature = "audit"))]
    pub(crate) fn audit_warn(&self, _args: fmt::Arguments<'_>) {}
}

/// Groups and memberships are bound to an application; only token versions
/// may be corp-scoped.
pub(crate) fn require_app_scope(scope: &Scope) -> Result<()> {
    if scope.is_corp_scoped() {
        return Err(Error::validation(format!("{scope} names no application")));
    }
    Ok(())
}

/// Every demand must target `scope`.
pub(crate) fn ensure_demands_in_scope(scope: &Scope, demands: &[Demand]) -> Result<()> {
    demands
        .iter()
        .try_for_each(|demand| scope.ensure_contains(demand.key()))
}

/// Every addition must lie in `scope` and name an unlocked catalog role.
pub(crate) fn ensure_grantable(
    scope: &Scope,
    additions: &[Grant],
    catalog: &HashMap<RoleKey, Role>,
) -> Result<()> {
    for grant in additions {
        scope.ensure_contains(&grant.key)?;
        match catalog.get(&grant.key) {
            None => return Err(Error::not_found(EntityKind::Role, grant.key.canonical())),
            Some(role) if role.is_locked() => {
                return Err(Error::locked(EntityKind::Role, grant.key.canonical()));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Record update applying `mutation` to whatever the group holds when the
/// store runs it. The outcome is written to `change`.
pub(crate) fn mutation_update<'a>(
    mutation: &'a GroupMutation,
    change: &'a mut Option<GroupChange>,
) -> impl FnMut(&RoleGroup) -> Result<Option<Vec<RoleRecord>>> + Send + 'a {
    move |current| {
        let mut next = current.clone();
        let outcome = GroupAggregator::mutate_group_roles(&mut next, mutation)?;
        *change = Some(outcome);
        Ok(outcome.changed.then(|| next.records().cloned().collect()))
    }
}

/// The outcome a store reported back through [`mutation_update`].
pub(crate) fn applied(change: Option<GroupChange>, group: &RoleGroup) -> Result<GroupChange> {
    change.ok_or_else(|| {
        Error::Storage(format!("Store skipped the update of group '{}'", group.name()))
    })
}

/// Distinct role keys referenced by `groups`.
pub(crate) fn referenced_keys(groups: &[RoleGroup]) -> BTreeSet<RoleKey> {
    groups
        .iter()
        .flat_map(|group| group.records())
        .map(|record| record.key().clone())
        .collect()
}

/// The synchronous authorization service.
pub struct AuthorizationService<S = MemoryStorage>
where
    S: Storage,
{
    storage: S,
    config: ServiceConfig,
    issuer: TokenIssuer,
    metrics: Arc<AuthzMetrics>,
}

impl AuthorizationService<MemoryStorage> {
    /// Create a service with default configuration and memory storage.
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    /// Create a service with custom configuration and memory storage.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::with_storage(MemoryStorage::new(), config)
    }
}

impl Default for AuthorizationService<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> AuthorizationService<S>
where
    S: Storage,
{
    /// Create a service over custom storage.
    pub fn with_storage(storage: S, config: ServiceConfig) -> Self {
        let metrics = Arc::new(AuthzMetrics::new());
        let cache = Arc::new(TokenVersionCache::with_metrics(Arc::clone(&metrics)));
        let issuer = config.token_issuer(cache);
        Self {
            storage,
            config,
            issuer,
            metrics,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn metrics(&self) -> &Arc<AuthzMetrics> {
        &self.metrics
    }

    pub fn token_cache(&self) -> &Arc<TokenVersionCache> {
        self.issuer.cache()
    }

    // Role catalog

    /// Register a new catalog role.
    pub fn register_role(&mut self, role: Role) -> Result<()> {
        let key = role.key().canonical();
        self.storage.store_role(role)?;
        self.config.audit(format_args!("Role '{key}' registered"));
        Ok(())
    }

    pub fn get_role(&self, key: &RoleKey) -> Result<Option<Role>> {
        self.storage.find_role(key)
    }

    /// Lock or unlock a catalog role. Locked roles drop out of every user's
    /// active grants and cannot be granted to groups.
    pub fn set_role_locked(&mut self, key: &RoleKey, locked: bool) -> Result<()> {
        let mut role = self
            .storage
            .find_role(key)?
            .ok_or_else(|| Error::not_found(EntityKind::Role, key.canonical()))?;
        role.set_locked(locked);
        self.storage.update_role(role)?;

        self.config.audit(format_args!(
            "Role '{key}' {}",
            if locked { "locked" } else { "unlocked" }
        ));
        Ok(())
    }

    // Users

    pub fn register_user(&mut self, user: User) -> Result<()> {
        let id = user.id().to_string();
        self.storage.store_user(user)?;
        self.config.audit(format_args!("User '{id}' registered"));
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.storage.find_user(id)
    }

    fn require_user(&self, id: &str) -> Result<User> {
        self.storage
            .find_user(id)?
            .ok_or_else(|| Error::not_found(EntityKind::User, id))
    }

    // Group lifecycle

    /// Create a group, optionally seeded with the union of existing groups.
    ///
    /// Every source group must already exist in the same scope.
    pub fn create_group(
        &mut self,
        scope: &Scope,
        name: &str,
        copy_from: &[&str],
    ) -> Result<RoleGroup> {
        require_app_scope(scope)?;
        let sources = copy_from
            .iter()
            .map(|source| self.require_group(scope, source))
            .collect::<Result<Vec<_>>>()?;
        let group = if sources.is_empty() {
            RoleGroup::new(name, scope.clone())?
        } else {
            let refs: Vec<&RoleGroup> = sources.iter().collect();
            RoleGroup::copy_from(name, scope.clone(), &refs)?
        };

        self.storage.store_group(group.clone())?;
        self.config.audit(format_args!(
            "Group '{}' created in {scope} with {} record(s)",
            group.name(),
            group.len()
        ));
        Ok(group)
    }

    pub fn get_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>> {
        self.storage.find_group(scope, name.trim())
    }

    fn require_group(&self, scope: &Scope, name: &str) -> Result<RoleGroup> {
        self.storage
            .find_group(scope, name.trim())?
            .ok_or_else(|| Error::not_found(EntityKind::Group, name.trim()))
    }

    /// Rename a group. Names stay unique within the scope.
    pub fn rename_group(&mut self, scope: &Scope, name: &str, new_name: &str) -> Result<()> {
        let group = self.require_group(scope, name)?;
        self.storage.rename_group(group.id(), new_name)?;

        self.config.audit(format_args!(
            "Group '{}' renamed to '{}' in {scope}",
            group.name(),
            new_name.trim()
        ));
        Ok(())
    }

    /// Toggle the group lock. Content is unaffected.
    pub fn set_group_locked(&mut self, scope: &Scope, name: &str, locked: bool) -> Result<()> {
        let group = self.require_group(scope, name)?;
        self.storage.set_group_locked(group.id(), locked)?;

        self.config.audit(format_args!(
            "Group '{}' {} in {scope}",
            name.trim(),
            if locked { "locked" } else { "unlocked" }
        ));
        Ok(())
    }

    /// Delete a group no user references any longer.
    pub fn delete_group(&mut self, scope: &Scope, name: &str) -> Result<()> {
        let group = self.require_group(scope, name)?;
        let users = self.storage.group_member_count(group.id())?;
        if users > 0 {
            return Err(Error::ReferentialConflict {
                group: group.name().to_string(),
                users,
            });
        }

        self.storage.delete_group(group.id())?;
        self.config
            .audit(format_args!("Group '{}' deleted from {scope}", group.name()));
        Ok(())
    }

    // Membership

    /// Add a user to groups of one scope. Returns the number of new memberships.
    pub fn add_user_to_groups(
        &mut self,
        user_id: &str,
        scope: &Scope,
        group_names: &[&str],
    ) -> Result<usize> {
        self.require_user(user_id)?;
        let groups = self.require_groups(scope, group_names)?;

        let mut added = 0;
        for group in &groups {
            if self.storage.add_membership(user_id, group.id())? {
                added += 1;
            }
        }

        self.config.audit(format_args!(
            "User '{user_id}' added to {added} group(s) in {scope}"
        ));
        Ok(added)
    }

    /// Remove a user from groups of one scope. Returns the number removed.
    pub fn remove_user_from_groups(
        &mut self,
        user_id: &str,
        scope: &Scope,
        group_names: &[&str],
    ) -> Result<usize> {
        self.require_user(user_id)?;
        let groups = self.require_groups(scope, group_names)?;

        let mut removed = 0;
        for group in &groups {
            if self.storage.remove_membership(user_id, group.id())? {
                removed += 1;
            }
        }

        self.config.audit(format_args!(
            "User '{user_id}' removed from {removed} group(s) in {scope}"
        ));
        Ok(removed)
    }

    fn require_groups(&self, scope: &Scope, names: &[&str]) -> Result<Vec<RoleGroup>> {
        require_app_scope(scope)?;
        names
            .iter()
            .map(|name| self.require_group(scope, name))
            .collect()
    }

    // Resolution

    /// Deduplicated active grants of a user in `scope`, ordered by role key.
    pub fn get_active_roles(
        &self,
        user_id: &str,
        scope: &Scope,
        env: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<Vec<Grant>> {
        let result = GrantFilter::new(env, tenant)
            .and_then(|filter| self.resolve_grants(user_id, scope, &filter));
        self.observe(result)
    }

    fn resolve_grants(&self, user_id: &str, scope: &Scope, filter: &GrantFilter) -> Result<Vec<Grant>> {
        require_app_scope(scope)?;
        self.require_user(user_id)?;
        if !self.storage.has_corp_membership(user_id, scope.corp())? {
            return Err(Error::NotFound {
                kind: EntityKind::User,
                id: format!("{user_id} in corp {}", scope.corp()),
            });
        }

        let groups = self.storage.find_user_groups(user_id, scope)?;
        let mut catalog = HashMap::new();
        for key in referenced_keys(&groups) {
            if let Some(role) = self.storage.find_role(&key)? {
                catalog.insert(key, role);
            }
        }

        self.metrics.record_grant_resolution();
        Ok(GroupAggregator::active_grants(&groups, &catalog, scope, filter))
    }

    /// Whether the user's active grants in `scope` cover `demand`.
    pub fn has_permission(&self, user_id: &str, demand: &Demand, scope: &Scope) -> Result<bool> {
        let started = Instant::now();
        let result = self.check_permission(user_id, demand, scope);

        if let Ok(granted) = result {
            self.metrics.record_permission_check(started.elapsed(), granted);
            if !granted {
                self.config.audit_warn(format_args!(
                    "Access denied: user '{user_id}' lacks {demand}"
                ));
            }
        }
        self.observe(result)
    }

    fn check_permission(&self, user_id: &str, demand: &Demand, scope: &Scope) -> Result<bool> {
        demand.validate()?;
        ensure_demands_in_scope(scope, std::slice::from_ref(demand))?;
        let grants = self.resolve_grants(user_id, scope, &GrantFilter::none())?;
        Ok(AccessEvaluator::has_permission(&grants, demand))
    }

    /// The part of each demand the user's active grants do not cover.
    pub fn get_missing_roles(
        &self,
        user_id: &str,
        demands: &[Demand],
        scope: &Scope,
    ) -> Result<Vec<Demand>> {
        let result = demands
            .iter()
            .try_for_each(Demand::validate)
            .and_then(|()| ensure_demands_in_scope(scope, demands))
            .and_then(|()| self.resolve_grants(user_id, scope, &GrantFilter::none()))
            .and_then(|grants| AccessEvaluator::missing(&grants, demands));

        if result.is_ok() {
            self.metrics.record_missing_query();
        }
        self.observe(result)
    }

    // Group role mutations

    /// Grant catalog roles to a group, merging bits into existing records.
    pub fn add_roles_to_group(
        &mut self,
        scope: &Scope,
        group_name: &str,
        grants: &[Grant],
    ) -> Result<GroupChange> {
        let mutation = GroupMutation::new().add_all(grants.iter().cloned());
        let result = self.apply_mutation(scope, group_name, &mutation);
        self.observe(result)
    }

    /// Revoke bits from a group's records, dropping records left with none.
    pub fn delete_roles_from_group(
        &mut self,
        scope: &Scope,
        group_name: &str,
        revocations: &[Grant],
    ) -> Result<GroupChange> {
        let mutation = GroupMutation::new().revoke_all(revocations.iter().cloned());
        let result = self.apply_mutation(scope, group_name, &mutation);
        self.observe(result)
    }

    /// Remove every record from a group. Succeeds on an empty group.
    pub fn delete_all_roles_from_group(
        &mut self,
        scope: &Scope,
        group_name: &str,
    ) -> Result<GroupChange> {
        let mutation = GroupMutation::new().clear_all();
        let result = self.apply_mutation(scope, group_name, &mutation);
        self.observe(result)
    }

    /// Apply an arbitrary mutation as one replace-by-snapshot step.
    pub fn mutate_group(
        &mut self,
        scope: &Scope,
        group_name: &str,
        mutation: &GroupMutation,
    ) -> Result<GroupChange> {
        let result = self.apply_mutation(scope, group_name, mutation);
        self.observe(result)
    }

    fn apply_mutation(
        &mut self,
        scope: &Scope,
        group_name: &str,
        mutation: &GroupMutation,
    ) -> Result<GroupChange> {
        let group = self.require_group(scope, group_name)?;

        let mut catalog = HashMap::new();
        for grant in mutation.additions() {
            scope.ensure_contains(&grant.key)?;
            if let Some(role) = self.storage.find_role(&grant.key)? {
                catalog.insert(grant.key.clone(), role);
            }
        }
        ensure_grantable(scope, mutation.additions(), &catalog)?;

        let mut change = None;
        self.storage
            .update_group_records(group.id(), &mut mutation_update(mutation, &mut change))?;
        let change = applied(change, &group)?;

        self.metrics.record_group_mutation();
        self.config.audit(format_args!(
            "Group '{}' in {scope}: {} addition(s), {} revocation(s){}, {} record(s) now",
            group.name(),
            mutation.additions().len(),
            mutation.revocations().len(),
            if mutation.clears_all() { ", cleared" } else { "" },
            change.records
        ));
        Ok(change)
    }

    // Token versions

    /// Increase the token version of `scope`, invalidating earlier tokens.
    pub fn issue_token_version(&mut self, scope: &Scope) -> Result<TokenInfo> {
        let info = self.issuer.issue(&mut self.storage, scope)?;
        self.metrics.record_token_issuance();
        self.config
            .audit(format_args!("Token version {} issued for {scope}", info.version));
        Ok(info)
    }

    /// Issue a new version and seal it into an encrypted payload.
    #[cfg(feature = "persistence")]
    pub fn issue_sealed_token<C: PayloadCipher + ?Sized>(
        &mut self,
        scope: &Scope,
        cipher: &C,
    ) -> Result<Vec<u8>> {
        let info = self.issue_token_version(scope)?;
        seal_token(&info, cipher)
    }

    /// The persistent version of `scope`, bypassing the cache.
    pub fn current_token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>> {
        self.storage.token_version(scope)
    }

    /// Compare a presented version with the current one.
    pub fn check_token(&self, scope: &Scope, presented: u64) -> Result<TokenFreshness> {
        let result = self.issuer.check(&self.storage, scope, presented);
        if let Ok(TokenFreshness::Stale { current, .. }) = result {
            self.config.audit_warn(format_args!(
                "Stale token for {scope}: version {presented}, current {current}"
            ));
        }
        self.observe(result)
    }

    /// Open a sealed token and check the version it carries.
    #[cfg(feature = "persistence")]
    pub fn check_sealed_token<C: PayloadCipher + ?Sized>(
        &self,
        sealed: &[u8],
        cipher: &C,
    ) -> Result<TokenFreshness> {
        let payload = self.observe(open_token(sealed, cipher))?;
        self.check_token(&payload.info.scope, payload.info.version)
    }

    /// Drop the cached version of `scope` so the next check reads storage.
    pub fn invalidate_token_cache(&self, scope: &Scope) -> Option<TokenInfo> {
        let cleared = self.issuer.cache().clear(scope);
        self.config
            .audit(format_args!("Token cache entry for {scope} invalidated"));
        cleared
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        result.inspect_err(|e| {
            self.metrics.record_error(e.kind_label());
            if matches!(e, Error::SecurityViolation(_)) {
                self.config.audit_warn(format_args!("{e}"));
            }
        })
    }
}
