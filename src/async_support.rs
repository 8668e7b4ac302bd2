//! Async support for the authorization service (requires 'async' feature).
//!
//! [`AsyncAuthorizationService`] mirrors every operation of
//! [`AuthorizationService`](crate::core::AuthorizationService) over an
//! [`AsyncStorage`] collaborator. Cancellation is left to the collaborator;
//! no timeouts or retries are added here.

use crate::{
    aggregator::{GrantFilter, GroupAggregator, GroupChange, GroupMutation},
    core::{
        ServiceConfig, applied, ensure_demands_in_scope, ensure_grantable, mutation_update,
        referenced_keys, require_app_scope,
    },
    error::{EntityKind, Error, Result},
    evaluator::AccessEvaluator,
    grant::{Demand, Grant, Scope},
    group::RoleGroup,
    metrics::AuthzMetrics,
    role::Role,
    role_key::RoleKey,
    storage::{RecordUpdate, Storage, record_snapshot},
    token::{TokenFreshness, TokenInfo, TokenIssuer, TokenVersionCache},
    user::User,
};
use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::Arc,
    time::Instant,
};
use tokio::sync::{Mutex, RwLock};

#[cfg(feature = "persistence")]
use crate::token::{PayloadCipher, open_token, seal_token};

/// Async storage collaborator.
///
/// Methods take `&self` so one store can serve many tasks at once;
/// implementations synchronize internally.
#[async_trait::async_trait]
pub trait AsyncStorage: Send + Sync {
    /// Store a new catalog role; `AlreadyExists` if the key is taken.
    async fn store_role(&self, role: Role) -> Result<()>;

    async fn find_role(&self, key: &RoleKey) -> Result<Option<Role>>;

    async fn update_role(&self, role: Role) -> Result<()>;

    /// Catalog entries for `keys`; unknown keys are left out.
    async fn find_roles(&self, keys: &[RoleKey]) -> Result<HashMap<RoleKey, Role>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(role) = self.find_role(key).await? {
                found.insert(key.clone(), role);
            }
        }
        Ok(found)
    }

    /// Store a new user; `AlreadyExists` if the id is taken.
    async fn store_user(&self, user: User) -> Result<()>;

    async fn find_user(&self, id: &str) -> Result<Option<User>>;

    /// Store a new group; `AlreadyExists` if its scope already has a group
    /// of that name. The check and the insert are one step.
    async fn store_group(&self, group: RoleGroup) -> Result<()>;

    async fn find_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>>;

    /// Rename a group, keeping names unique within its scope.
    async fn rename_group(&self, group_id: &str, new_name: &str) -> Result<()>;

    /// Set a group's lock flag without touching its records.
    async fn set_group_locked(&self, group_id: &str, locked: bool) -> Result<()>;

    async fn delete_group(&self, group_id: &str) -> Result<bool>;

    /// Replace a group's records with the set `update` computes from the
    /// current group, under the store's own lock.
    async fn update_group_records(
        &self,
        group_id: &str,
        update: &mut RecordUpdate<'_>,
    ) -> Result<usize>;

    async fn find_user_groups(&self, user_id: &str, scope: &Scope) -> Result<Vec<RoleGroup>>;

    async fn has_corp_membership(&self, user_id: &str, corp: &str) -> Result<bool>;

    async fn add_membership(&self, user_id: &str, group_id: &str) -> Result<bool>;

    async fn remove_membership(&self, user_id: &str, group_id: &str) -> Result<bool>;

    async fn group_member_count(&self, group_id: &str) -> Result<usize>;

    /// Read-modify-write of the persistent version under the store's own lock.
    async fn increase_token_version(&self, scope: &Scope) -> Result<u64>;

    async fn token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    roles: HashMap<RoleKey, Role>,
    users: HashMap<String, User>,
    groups: HashMap<String, RoleGroup>,
    memberships: HashMap<String, HashSet<String>>,
    token_versions: HashMap<Scope, u64>,
}

impl MemoryState {
    /// Whether another group of `scope` already uses `name`.
    fn name_taken(&self, scope: &Scope, name: &str, group_id: &str) -> bool {
        self.groups
            .values()
            .any(|group| group.id() != group_id && group.scope() == scope && group.name() == name)
    }
}

/// Async memory storage implementation.
#[derive(Debug, Default, Clone)]
pub struct AsyncMemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl AsyncMemoryStorage {
    /// Create a new async memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored roles.
    pub async fn role_count(&self) -> usize {
        self.state.read().await.roles.len()
    }

    /// Clear all stored data.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }
}

#[async_trait::async_trait]
impl AsyncStorage for AsyncMemoryStorage {
    async fn store_role(&self, role: Role) -> Result<()> {
        let mut state = self.state.write().await;
        match state.roles.entry(role.key().clone()) {
            Entry::Occupied(_) => Err(Error::already_exists(EntityKind::Role, role.key().canonical())),
            Entry::Vacant(slot) => {
                slot.insert(role);
                Ok(())
            }
        }
    }

    async fn find_role(&self, key: &RoleKey) -> Result<Option<Role>> {
        Ok(self.state.read().await.roles.get(key).cloned())
    }

    async fn update_role(&self, role: Role) -> Result<()> {
        let mut state = self.state.write().await;
        match state.roles.get_mut(role.key()) {
            Some(existing) => {
                *existing = role;
                Ok(())
            }
            None => Err(Error::not_found(EntityKind::Role, role.key().canonical())),
        }
    }

    async fn find_roles(&self, keys: &[RoleKey]) -> Result<HashMap<RoleKey, Role>> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| state.roles.get(key).map(|role| (key.clone(), role.clone())))
            .collect())
    }

    async fn store_user(&self, user: User) -> Result<()> {
        let mut state = self.state.write().await;
        match state.users.entry(user.id().to_string()) {
            Entry::Occupied(_) => Err(Error::already_exists(EntityKind::User, user.id())),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn store_group(&self, group: RoleGroup) -> Result<()> {
        let mut state = self.state.write().await;
        if state.groups.contains_key(group.id()) {
            return Err(Error::already_exists(EntityKind::Group, group.id()));
        }
        if state.name_taken(group.scope(), group.name(), group.id()) {
            return Err(Error::already_exists(EntityKind::Group, group.name()));
        }

        state.groups.insert(group.id().to_string(), group);
        Ok(())
    }

    async fn find_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>> {
        Ok(self
            .state
            .read()
            .await
            .groups
            .values()
            .find(|group| group.scope() == scope && group.name() == name)
            .cloned())
    }

    async fn rename_group(&self, group_id: &str, new_name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let scope = state
            .groups
            .get(group_id)
            .map(|group| group.scope().clone())
            .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;

        let new_name = new_name.trim();
        if state.name_taken(&scope, new_name, group_id) {
            return Err(Error::already_exists(EntityKind::Group, new_name));
        }
        match state.groups.get_mut(group_id) {
            Some(group) => group.rename(new_name),
            None => Err(Error::not_found(EntityKind::Group, group_id)),
        }
    }

    async fn set_group_locked(&self, group_id: &str, locked: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;
        group.set_locked(locked);
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<bool> {
        Ok(self.state.write().await.groups.remove(group_id).is_some())
    }

    async fn update_group_records(
        &self,
        group_id: &str,
        update: &mut RecordUpdate<'_>,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found(EntityKind::Group, group_id))?;

        if let Some(records) = update(&*group)? {
            group.replace_records(record_snapshot(records));
        }
        Ok(group.len())
    }

    async fn find_user_groups(&self, user_id: &str, scope: &Scope) -> Result<Vec<RoleGroup>> {
        let state = self.state.read().await;
        let Some(group_ids) = state.memberships.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut groups: Vec<RoleGroup> = group_ids
            .iter()
            .filter_map(|id| state.groups.get(id))
            .filter(|group| group.scope() == scope)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(groups)
    }

    async fn has_corp_membership(&self, user_id: &str, corp: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.memberships.get(user_id).is_some_and(|group_ids| {
            group_ids
                .iter()
                .filter_map(|id| state.groups.get(id))
                .any(|group| group.corp() == corp)
        }))
    }

    async fn add_membership(&self, user_id: &str, group_id: &str) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(group_id.to_string()))
    }

    async fn remove_membership(&self, user_id: &str, group_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(group_ids) = state.memberships.get_mut(user_id) else {
            return Ok(false);
        };

        let removed = group_ids.remove(group_id);
        if group_ids.is_empty() {
            state.memberships.remove(user_id);
        }
        Ok(removed)
    }

    async fn group_member_count(&self, group_id: &str) -> Result<usize> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .values()
            .filter(|group_ids| group_ids.contains(group_id))
            .count())
    }

    async fn increase_token_version(&self, scope: &Scope) -> Result<u64> {
        let mut state = self.state.write().await;
        let version = state
            .token_versions
            .entry(scope.clone())
            .and_modify(|v| *v += 1)
            .or_insert(TokenInfo::INITIAL_VERSION);
        Ok(*version)
    }

    async fn token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>> {
        Ok(self
            .state
            .read()
            .await
            .token_versions
            .get(scope)
            .map(|v| TokenInfo::new(scope.clone(), *v)))
    }
}

/// Adapter exposing a synchronous [`Storage`] as an [`AsyncStorage`].
pub struct AsyncStorageAdapter<S>
where
    S: Storage + Send + Sync,
{
    storage: Arc<Mutex<S>>,
}

impl<S> AsyncStorageAdapter<S>
where
    S: Storage + Send + Sync,
{
    /// Create a new async storage adapter.
    pub fn new(storage: S) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
        }
    }
}

impl<S> Default for AsyncStorageAdapter<S>
where
    S: Storage + Send + Sync + Default,
{
    fn default() -> Self {
        Self::new(S::default())
    }
}

#[async_trait::async_trait]
impl<S> AsyncStorage for AsyncStorageAdapter<S>
where
    S: Storage + Send + Sync,
{
    async fn store_role(&self, role: Role) -> Result<()> {
        self.storage.lock().await.store_role(role)
    }

    async fn find_role(&self, key: &RoleKey) -> Result<Option<Role>> {
        self.storage.lock().await.find_role(key)
    }

    async fn update_role(&self, role: Role) -> Result<()> {
        self.storage.lock().await.update_role(role)
    }

    async fn store_user(&self, user: User) -> Result<()> {
        self.storage.lock().await.store_user(user)
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        self.storage.lock().await.find_user(id)
    }

    async fn store_group(&self, group: RoleGroup) -> Result<()> {
        self.storage.lock().await.store_group(group)
    }

    async fn find_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>> {
        self.storage.lock().await.find_group(scope, name)
    }

    async fn rename_group(&self, group_id: &str, new_name: &str) -> Result<()> {
        self.storage.lock().await.rename_group(group_id, new_name)
    }

    async fn set_group_locked(&self, group_id: &str, locked: bool) -> Result<()> {
        self.storage.lock().await.set_group_locked(group_id, locked)
    }

    async fn delete_group(&self, group_id: &str) -> Result<bool> {
        self.storage.lock().await.delete_group(group_id)
    }

    async fn update_group_records(
        &self,
        group_id: &str,
        update: &mut RecordUpdate<'_>,
    ) -> Result<usize> {
        self.storage
            .lock()
            .await
            .update_group_records(group_id, update)
    }

    async fn find_user_groups(&self, user_id: &str, scope: &Scope) -> Result<Vec<RoleGroup>> {
        self.storage.lock().await.find_user_groups(user_id, scope)
    }

    async fn has_corp_membership(&self, user_id: &str, corp: &str) -> Result<bool> {
        self.storage.lock().await.has_corp_membership(user_id, corp)
    }

    async fn add_membership(&self, user_id: &str, group_id: &str) -> Result<bool> {
        self.storage.lock().await.add_membership(user_id, group_id)
    }

    async fn remove_membership(&self, user_id: &str, group_id: &str) -> Result<bool> {
        self.storage.lock().await.remove_membership(user_id, group_id)
    }

    async fn group_member_count(&self, group_id: &str) -> Result<usize> {
        self.storage.lock().await.group_member_count(group_id)
    }

    async fn increase_token_version(&self, scope: &Scope) -> Result<u64> {
        self.storage.lock().await.increase_token_version(scope)
    }

    async fn token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>> {
        self.storage.lock().await.token_version(scope)
    }
}

/// Async authorization service over an [`AsyncStorage`] collaborator.
///
/// Cheap to clone; clones share storage, token cache and metrics.
pub struct AsyncAuthorizationService<S>
where
    S: AsyncStorage,
{
    storage: Arc<S>,
    config: ServiceConfig,
    issuer: TokenIssuer,
    metrics: Arc<AuthzMetrics>,
}

impl<S: AsyncStorage> Clone for AsyncAuthorizationService<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
            issuer: self.issuer.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S> AsyncAuthorizationService<S>
where
    S: AsyncStorage,
{
    /// Create a new async service.
    pub fn new(storage: S, config: ServiceConfig) -> Self {
        let metrics = Arc::new(AuthzMetrics::new());
        let cache = Arc::new(TokenVersionCache::with_metrics(Arc::clone(&metrics)));
        let issuer = config.token_issuer(cache);
        Self {
            storage: Arc::new(storage),
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

    /// Register a new catalog role.
    pub async fn register_role(&self, role: Role) -> Result<()> {
        let key = role.key().canonical();
        self.storage.store_role(role).await?;
        self.config.audit(format_args!("Role '{key}' registered"));
        Ok(())
    }

    pub async fn get_role(&self, key: &RoleKey) -> Result<Option<Role>> {
        self.storage.find_role(key).await
    }

    pub async fn set_role_locked(&self, key: &RoleKey, locked: bool) -> Result<()> {
        let mut role = self
            .storage
            .find_role(key)
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Role, key.canonical()))?;
        role.set_locked(locked);
        self.storage.update_role(role).await?;

        self.config.audit(format_args!(
            "Role '{key}' {}",
            if locked { "locked" } else { "unlocked" }
        ));
        Ok(())
    }

    pub async fn register_user(&self, user: User) -> Result<()> {
        let id = user.id().to_string();
        self.storage.store_user(user).await?;
        self.config.audit(format_args!("User '{id}' registered"));
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.storage.find_user(id).await
    }

    async fn require_user(&self, id: &str) -> Result<User> {
        self.storage
            .find_user(id)
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::User, id))
    }

    /// Create a group, optionally seeded with the union of existing groups.
    pub async fn create_group(
        &self,
        scope: &Scope,
        name: &str,
        copy_from: &[&str],
    ) -> Result<RoleGroup> {
        require_app_scope(scope)?;
        let sources = self.require_groups(scope, copy_from).await?;
        let group = if sources.is_empty() {
            RoleGroup::new(name, scope.clone())?
        } else {
            let refs: Vec<&RoleGroup> = sources.iter().collect();
            RoleGroup::copy_from(name, scope.clone(), &refs)?
        };

        self.storage.store_group(group.clone()).await?;
        self.config.audit(format_args!(
            "Group '{}' created in {scope} with {} record(s)",
            group.name(),
            group.len()
        ));
        Ok(group)
    }

    pub async fn get_group(&self, scope: &Scope, name: &str) -> Result<Option<RoleGroup>> {
        self.storage.find_group(scope, name.trim()).await
    }

    async fn require_group(&self, scope: &Scope, name: &str) -> Result<RoleGroup> {
        self.storage
            .find_group(scope, name.trim())
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Group, name.trim()))
    }

    async fn require_groups(&self, scope: &Scope, names: &[&str]) -> Result<Vec<RoleGroup>> {
        require_app_scope(scope)?;
        let mut groups = Vec::with_capacity(names.len());
        for name in names {
            groups.push(self.require_group(scope, name).await?);
        }
        Ok(groups)
    }

    pub async fn rename_group(&self, scope: &Scope, name: &str, new_name: &str) -> Result<()> {
        let group = self.require_group(scope, name).await?;
        self.storage.rename_group(group.id(), new_name).await?;

        self.config.audit(format_args!(
            "Group '{}' renamed to '{}' in {scope}",
            group.name(),
            new_name.trim()
        ));
        Ok(())
    }

    /// Toggle the group lock. Records written concurrently are kept.
    pub async fn set_group_locked(&self, scope: &Scope, name: &str, locked: bool) -> Result<()> {
        let group = self.require_group(scope, name).await?;
        self.storage.set_group_locked(group.id(), locked).await?;

        self.config.audit(format_args!(
            "Group '{}' {} in {scope}",
            name.trim(),
            if locked { "locked" } else { "unlocked" }
        ));
        Ok(())
    }

    pub async fn delete_group(&self, scope: &Scope, name: &str) -> Result<()> {
        let group = self.require_group(scope, name).await?;
        let users = self.storage.group_member_count(group.id()).await?;
        if users > 0 {
            return Err(Error::ReferentialConflict {
                group: group.name().to_string(),
                users,
            });
        }

        self.storage.delete_group(group.id()).await?;
        self.config
            .audit(format_args!("Group '{}' deleted from {scope}", group.name()));
        Ok(())
    }

    pub async fn add_user_to_groups(
        &self,
        user_id: &str,
        scope: &Scope,
        group_names: &[&str],
    ) -> Result<usize> {
        self.require_user(user_id).await?;
        let groups = self.require_groups(scope, group_names).await?;

        let mut added = 0;
        for group in &groups {
            if self.storage.add_membership(user_id, group.id()).await? {
                added += 1;
            }
        }

        self.config.audit(format_args!(
            "User '{user_id}' added to {added} group(s) in {scope}"
        ));
        Ok(added)
    }

    pub async fn remove_user_from_groups(
        &self,
        user_id: &str,
        scope: &Scope,
        group_names: &[&str],
    ) -> Result<usize> {
        self.require_user(user_id).await?;
        let groups = self.require_groups(scope, group_names).await?;

        let mut removed = 0;
        for group in &groups {
            if self.storage.remove_membership(user_id, group.id()).await? {
                removed += 1;
            }
        }

        self.config.audit(format_args!(
            "User '{user_id}' removed from {removed} group(s) in {scope}"
        ));
        Ok(removed)
    }

    /// Deduplicated active grants of a user in `scope`, ordered by role key.
    pub async fn get_active_roles(
        &self,
        user_id: &str,
        scope: &Scope,
        env: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<Vec<Grant>> {
        let result = match GrantFilter::new(env, tenant) {
            Ok(filter) => self.resolve_grants(user_id, scope, &filter).await,
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    async fn resolve_grants(
        &self,
        user_id: &str,
        scope: &Scope,
        filter: &GrantFilter,
    ) -> Result<Vec<Grant>> {
        require_app_scope(scope)?;
        self.require_user(user_id).await?;
        if !self.storage.has_corp_membership(user_id, scope.corp()).await? {
            return Err(Error::NotFound {
                kind: EntityKind::User,
                id: format!("{user_id} in corp {}", scope.corp()),
            });
        }

        let groups = self.storage.find_user_groups(user_id, scope).await?;
        let keys: Vec<RoleKey> = referenced_keys(&groups).into_iter().collect();
        let catalog = self.storage.find_roles(&keys).await?;

        self.metrics.record_grant_resolution();
        Ok(GroupAggregator::active_grants(&groups, &catalog, scope, filter))
    }

    /// Whether the user's active grants in `scope` cover `demand`.
    pub async fn has_permission(
        &self,
        user_id: &str,
        demand: &Demand,
        scope: &Scope,
    ) -> Result<bool> {
        let started = Instant::now();
        let result = self.check_permission(user_id, demand, scope).await;

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

    async fn check_permission(&self, user_id: &str, demand: &Demand, scope: &Scope) -> Result<bool> {
        demand.validate()?;
        ensure_demands_in_scope(scope, std::slice::from_ref(demand))?;
        let grants = self.resolve_grants(user_id, scope, &GrantFilter::none()).await?;
        Ok(AccessEvaluator::has_permission(&grants, demand))
    }

    /// The part of each demand the user's active grants do not cover.
    pub async fn get_missing_roles(
        &self,
        user_id: &str,
        demands: &[Demand],
        scope: &Scope,
    ) -> Result<Vec<Demand>> {
        let result = self.compute_missing(user_id, demands, scope).await;
        if result.is_ok() {
            self.metrics.record_missing_query();
        }
        self.observe(result)
    }

    async fn compute_missing(
        &self,
        user_id: &str,
        demands: &[Demand],
        scope: &Scope,
    ) -> Result<Vec<Demand>> {
        demands.iter().try_for_each(Demand::validate)?;
        ensure_demands_in_scope(scope, demands)?;
        let grants = self.resolve_grants(user_id, scope, &GrantFilter::none()).await?;
        AccessEvaluator::missing(&grants, demands)
    }

    pub async fn add_roles_to_group(
        &self,
        scope: &Scope,
        group_name: &str,
        grants: &[Grant],
    ) -> Result<GroupChange> {
        let mutation = GroupMutation::new().add_all(grants.iter().cloned());
        self.mutate_group(scope, group_name, &mutation).await
    }

    pub async fn delete_roles_from_group(
        &self,
        scope: &Scope,
        group_name: &str,
        revocations: &[Grant],
    ) -> Result<GroupChange> {
        let mutation = GroupMutation::new().revoke_all(revocations.iter().cloned());
        self.mutate_group(scope, group_name, &mutation).await
    }

    /// Remove every record from a group. Succeeds on an empty group.
    pub async fn delete_all_roles_from_group(
        &self,
        scope: &Scope,
        group_name: &str,
    ) -> Result<GroupChange> {
        self.mutate_group(scope, group_name, &GroupMutation::new().clear_all())
            .await
    }

    /// Apply an arbitrary mutation as one replace-by-snapshot step.
    pub async fn mutate_group(
        &self,
        scope: &Scope,
        group_name: &str,
        mutation: &GroupMutation,
    ) -> Result<GroupChange> {
        let result = self.apply_mutation(scope, group_name, mutation).await;
        self.observe(result)
    }

    async fn apply_mutation(
        &self,
        scope: &Scope,
        group_name: &str,
        mutation: &GroupMutation,
    ) -> Result<GroupChange> {
        let group = self.require_group(scope, group_name).await?;

        let keys = mutation
            .additions()
            .iter()
            .map(|grant| scope.ensure_contains(&grant.key).map(|()| grant.key.clone()))
            .collect::<Result<Vec<_>>>()?;
        let catalog = self.storage.find_roles(&keys).await?;
        ensure_grantable(scope, mutation.additions(), &catalog)?;

        let mut change = None;
        self.storage
            .update_group_records(group.id(), &mut mutation_update(mutation, &mut change))
            .await?;
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

    /// Increase the token version of `scope`, invalidating earlier tokens.
    pub async fn issue_token_version(&self, scope: &Scope) -> Result<TokenInfo> {
        let version = self.storage.increase_token_version(scope).await?;
        let info = TokenInfo::new(scope.clone(), version);
        self.issuer.publish(info.clone());

        self.metrics.record_token_issuance();
        self.config
            .audit(format_args!("Token version {version} issued for {scope}"));
        Ok(info)
    }

    #[cfg(feature = "persistence")]
    pub async fn issue_sealed_token<C: PayloadCipher + ?Sized>(
        &self,
        scope: &Scope,
        cipher: &C,
    ) -> Result<Vec<u8>> {
        let info = self.issue_token_version(scope).await?;
        seal_token(&info, cipher)
    }

    pub async fn current_token_version(&self, scope: &Scope) -> Result<Option<TokenInfo>> {
        self.storage.token_version(scope).await
    }

    /// Compare a presented version with the current one.
    pub async fn check_token(&self, scope: &Scope, presented: u64) -> Result<TokenFreshness> {
        let result = match self.issuer.check_cached(scope, presented) {
            Some(freshness) => Ok(freshness),
            None => match self.storage.token_version(scope).await {
                Ok(stored) => self.issuer.check_fetched(scope, presented, stored),
                Err(e) => Err(e),
            },
        };

        if let Ok(TokenFreshness::Stale { current, .. }) = result {
            self.config.audit_warn(format_args!(
                "Stale token for {scope}: version {presented}, current {current}"
            ));
        }
        self.observe(result)
    }

    #[cfg(feature = "persistence")]
    pub async fn check_sealed_token<C: PayloadCipher + ?Sized>(
        &self,
        sealed: &[u8],
        cipher: &C,
    ) -> Result<TokenFreshness> {
        let payload = self.observe(open_token(sealed, cipher))?;
        self.check_token(&payload.info.scope, payload.info.version)
            .await
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

/// Async service builder for easy configuration.
pub struct AsyncAuthorizationServiceBuilder<S>
where
    S: AsyncStorage,
{
    config: ServiceConfig,
    storage: Option<S>,
}

impl<S> AsyncAuthorizationServiceBuilder<S>
where
    S: AsyncStorage + Default,
{
    /// Create a new builder with default storage.
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
            storage: None,
        }
    }
}

impl<S> Default for AsyncAuthorizationServiceBuilder<S>
where
    S: AsyncStorage + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> AsyncAuthorizationServiceBuilder<S>
where
    S: AsyncStorage,
{
    /// Create a new builder with custom storage.
    pub fn with_storage(storage: S) -> Self {
        Self {
            config: ServiceConfig::default(),
            storage: Some(storage),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable the token version cache.
    pub fn enable_token_cache(mut self, enabled: bool) -> Self {
        self.config.enable_token_cache = enabled;
        self
    }

    pub fn cache_miss_policy(mut self, policy: crate::token::CacheMissPolicy) -> Self {
        self.config.cache_miss_policy = policy;
        self
    }

    /// Enable or disable audit logging.
    pub fn enable_audit(mut self, enabled: bool) -> Self {
        self.config.enable_audit = enabled;
        self
    }

    /// Build the async service.
    pub fn build(self) -> AsyncAuthorizationService<S>
    where
        S: Default,
    {
        let storage = self.storage.unwrap_or_default();
        AsyncAuthorizationService::new(storage, self.config)
    }

    /// Build the async service with provided storage.
    pub fn build_with_storage(self, storage: S) -> AsyncAuthorizationService<S> {
        AsyncAuthorizationService::new(storage, self.config)
    }
}
