//! Token version tracking.
//!
//! Every `(corp, app)` pair owns a monotonically increasing version number.
//! Authorization tokens carry the version they were issued under; bumping the
//! version invalidates all earlier tokens at once. [`TokenVersionCache`] keeps
//! the latest known versions in memory so validation can skip the store.

#[cfg(feature = "audit")]
use log::{debug, info};

use crate::{
    error::{EntityKind, Error, Result},
    grant::Scope,
    metrics::AuthzMetrics,
    storage::Storage,
};
#[cfg(feature = "persistence")]
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{cmp::Ordering, sync::Arc};

/// The current token version of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct TokenInfo {
    pub scope: Scope,
    pub version: u64,
}

impl TokenInfo {
    /// Version assigned on first issuance.
    pub const INITIAL_VERSION: u64 = 1;

    pub fn new(scope: Scope, version: u64) -> Self {
        Self { scope, version }
    }

    pub fn corp(&self) -> &str {
        self.scope.corp()
    }

    /// Empty for corp-scoped tokens.
    pub fn app(&self) -> &str {
        self.scope.app()
    }
}

/// What to do when the cache holds no version for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMissPolicy {
    /// Read the persistent version and populate the cache.
    #[default]
    FetchThrough,
    /// Accept the presented version without consulting the store.
    TrustOnColdStart,
}

/// Outcome of comparing a presented token version with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFreshness {
    /// The token carries the current version.
    Current,
    /// The token was issued before the latest version bump.
    Stale { presented: u64, current: u64 },
    /// The token claims a version newer than the one known.
    Ahead { presented: u64, current: u64 },
}

impl TokenFreshness {
    /// Compare a presented version against the authoritative one.
    pub fn evaluate(presented: u64, current: u64) -> Self {
        match presented.cmp(&current) {
            Ordering::Equal => TokenFreshness::Current,
            Ordering::Less => TokenFreshness::Stale { presented, current },
            Ordering::Greater => TokenFreshness::Ahead { presented, current },
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, TokenFreshness::Current)
    }
}

/// Concurrent cache of token versions keyed by scope.
///
/// Each operation is atomic for its key; nothing is promised across keys.
/// `push` overwrites unconditionally, so callers must only push versions
/// they have just read or written in the store.
#[derive(Debug)]
pub struct TokenVersionCache {
    entries: DashMap<Scope, TokenInfo>,
    metrics: Arc<AuthzMetrics>,
}

impl Default for TokenVersionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenVersionCache {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(AuthzMetrics::new()))
    }

    /// Create a cache reporting hits and misses into shared metrics.
    pub fn with_metrics(metrics: Arc<AuthzMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            metrics,
        }
    }

    /// Insert or overwrite the entry for `info.scope`.
    pub fn push(&self, info: TokenInfo) {
        self.entries.insert(info.scope.clone(), info);
    }

    /// The cached version, or `None` if nothing is cached.
    ///
    /// `None` means "unknown", never "version 0".
    pub fn get(&self, scope: &Scope) -> Option<TokenInfo> {
        match self.entries.get(scope) {
            Some(entry) => {
                self.metrics.record_cache_hit();
                Some(entry.value().clone())
            }
            None => {
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    /// Remove the entry for `scope`, returning what was cached.
    pub fn clear(&self, scope: &Scope) -> Option<TokenInfo> {
        self.entries.remove(scope).map(|(_, info)| info)
    }

    /// Remove the corp-scoped entry and every app entry of `corp`.
    pub fn clear_corp(&self, corp: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|scope, _| scope.corp() != corp);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Issues token versions and checks presented versions for freshness.
///
/// The persistent version lives in storage; the issuer keeps the shared
/// [`TokenVersionCache`] in step with it. The sync entry points take the
/// storage directly, while the async service drives the same steps through
/// [`TokenIssuer::publish`], [`TokenIssuer::check_cached`] and
/// [`TokenIssuer::check_fetched`].
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    cache: Arc<TokenVersionCache>,
    miss_policy: CacheMissPolicy,
    use_cache: bool,
}

impl TokenIssuer {
    pub fn new(cache: Arc<TokenVersionCache>, miss_policy: CacheMissPolicy) -> Self {
        Self {
            cache,
            miss_policy,
            use_cache: true,
        }
    }

    /// Bypass the cache entirely and always read the store.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn cache(&self) -> &Arc<TokenVersionCache> {
        &self.cache
    }

    pub fn miss_policy(&self) -> CacheMissPolicy {
        self.miss_policy
    }

    /// Increase the persistent version of `scope` and publish it.
    pub fn issue<S: Storage + ?Sized>(&self, storage: &mut S, scope: &Scope) -> Result<TokenInfo> {
        let version = storage.increase_token_version(scope)?;
        let info = TokenInfo::new(scope.clone(), version);
        self.publish(info.clone());
        Ok(info)
    }

    /// Replace superseded cache entries with a freshly increased version.
    ///
    /// A corp-scoped version supersedes every entry of the corp; an app
    /// version only its own. Returns the number of entries dropped.
    pub fn publish(&self, info: TokenInfo) -> usize {
        if !self.use_cache {
            return 0;
        }

        let cleared = if info.scope.is_corp_scoped() {
            self.cache.clear_corp(info.corp())
        } else {
            usize::from(self.cache.clear(&info.scope).is_some())
        };

        #[cfg(feature = "audit")]
        info!(
            "Token version {} published for {} ({cleared} cache entr(ies) superseded)",
            info.version, info.scope
        );

        self.cache.push(info);
        cleared
    }

    /// Check a presented version for `scope`, reading the store when needed.
    pub fn check<S: Storage + ?Sized>(
        &self,
        storage: &S,
        scope: &Scope,
        presented: u64,
    ) -> Result<TokenFreshness> {
        if let Some(freshness) = self.check_cached(scope, presented) {
            return Ok(freshness);
        }
        let stored = storage.token_version(scope)?;
        self.check_fetched(scope, presented, stored)
    }

    /// Answer from the cache alone, or `None` if the store must be read.
    ///
    /// A presented version ahead of the cached one always goes to the store,
    /// since another instance may have issued it.
    pub fn check_cached(&self, scope: &Scope, presented: u64) -> Option<TokenFreshness> {
        if !self.use_cache {
            return None;
        }

        match self.cache.get(scope) {
            Some(cached) => match TokenFreshness::evaluate(presented, cached.version) {
                TokenFreshness::Ahead { .. } => None,
                freshness => Some(freshness),
            },
            None => match self.miss_policy {
                CacheMissPolicy::TrustOnColdStart => Some(TokenFreshness::Current),
                CacheMissPolicy::FetchThrough => None,
            },
        }
    }

    /// Evaluate against a version read from the store and cache it.
    pub fn check_fetched(
        &self,
        scope: &Scope,
        presented: u64,
        stored: Option<TokenInfo>,
    ) -> Result<TokenFreshness> {
        let info = stored.ok_or_else(|| Error::not_found(EntityKind::Token, scope.to_string()))?;
        let freshness = TokenFreshness::evaluate(presented, info.version);

        #[cfg(feature = "audit")]
        debug!("Token version {presented} for {scope} checked against store: {freshness:?}");

        if self.use_cache {
            self.cache.push(info);
        }
        Ok(freshness)
    }
}

/// Opaque encryption collaborator used only by token issuance.
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// The plaintext sealed into an issued token.
#[cfg(feature = "persistence")]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenPayload {
    pub info: TokenInfo,
    pub issued_at: DateTime<Utc>,
}

/// Serialize `info` and encrypt it with `cipher`.
#[cfg(feature = "persistence")]
pub fn seal_token<C: PayloadCipher + ?Sized>(info: &TokenInfo, cipher: &C) -> Result<Vec<u8>> {
    let payload = TokenPayload {
        info: info.clone(),
        issued_at: Utc::now(),
    };
    let plaintext = serde_json::to_vec(&payload)?;
    cipher.encrypt(&plaintext)
}

/// Decrypt and deserialize a sealed token.
#[cfg(feature = "persistence")]
pub fn open_token<C: PayloadCipher + ?Sized>(sealed: &[u8], cipher: &C) -> Result<TokenPayload> {
    let plaintext = cipher.decrypt(sealed)?;
    Ok(serde_json::from_slice(&plaintext)?)
}
