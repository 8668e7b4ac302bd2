//! Counters for resolution, access checks and the token cache.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters shared by the services and the token cache.
#[derive(Debug, Default)]
pub struct AuthzMetrics {
    permission_checks: AtomicU64,
    permission_denials: AtomicU64,
    grant_resolutions: AtomicU64,
    missing_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    group_mutations: AtomicU64,
    token_issuances: AtomicU64,
    /// Slowest check seen per latency bucket.
    check_latency: DashMap<&'static str, Duration>,
    error_counts: DashMap<&'static str, AtomicU64>,
}

impl AuthzMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `has_permission` evaluation and its outcome.
    pub fn record_permission_check(&self, duration: Duration, granted: bool) {
        self.permission_checks.fetch_add(1, Ordering::Relaxed);
        if !granted {
            self.permission_denials.fetch_add(1, Ordering::Relaxed);
        }

        self.check_latency
            .entry(latency_bucket(duration))
            .and_modify(|slowest| {
                if duration > *slowest {
                    *slowest = duration;
                }
            })
            .or_insert(duration);
    }

    pub fn record_grant_resolution(&self) {
        self.grant_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_query(&self) {
        self.missing_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_mutation(&self) {
        self.group_mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_issuance(&self) {
        self.token_issuances.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error under its kind label.
    pub fn record_error(&self, kind: &'static str) {
        self.error_counts
            .entry(kind)
            .and_modify(|count| {
                count.fetch_add(1, Ordering::Relaxed);
            })
            .or_insert_with(|| AtomicU64::new(1));
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time copy of every counter.
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            permission_checks: self.permission_checks.load(Ordering::Relaxed),
            permission_denials: self.permission_denials.load(Ordering::Relaxed),
            grant_resolutions: self.grant_resolutions.load(Ordering::Relaxed),
            missing_queries: self.missing_queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_ratio: self.cache_hit_ratio(),
            group_mutations: self.group_mutations.load(Ordering::Relaxed),
            token_issuances: self.token_issuances.load(Ordering::Relaxed),
            slowest_checks: self
                .check_latency
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            error_counts: self
                .error_counts
                .iter()
                .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.permission_checks,
            &self.permission_denials,
            &self.grant_resolutions,
            &self.missing_queries,
            &self.cache_hits,
            &self.cache_misses,
            &self.group_mutations,
            &self.token_issuances,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.check_latency.clear();
        self.error_counts.clear();
    }
}

fn latency_bucket(duration: Duration) -> &'static str {
    match duration.as_micros() {
        0..=99 => "0-99μs",
        100..=999 => "100-999μs",
        1000..=9999 => "1-9ms",
        10000..=99999 => "10-99ms",
        100000..=999999 => "100-999ms",
        _ => "1s+",
    }
}

/// Summary of metrics.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub permission_checks: u64,
    pub permission_denials: u64,
    pub grant_resolutions: u64,
    pub missing_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub group_mutations: u64,
    pub token_issuances: u64,
    pub slowest_checks: HashMap<&'static str, Duration>,
    pub error_counts: HashMap<&'static str, u64>,
}
