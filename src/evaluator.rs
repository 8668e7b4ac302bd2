//! Wildcard-aware access evaluation.
//!
//! A grant matches a demand when corp and app are equal and, at each of env,
//! tenant and module, the grant's segment equals the demand's or is `*`.
//! Sub-modules must match position by position unless the grant's module is
//! itself a wildcard, in which case they are ignored.

#[cfg(feature = "audit")]
use log::debug;

use crate::{
    error::Result,
    grant::{Demand, Grant},
    permission::PermissionSet,
    role_key::{Level, RoleKey, WILDCARD},
};

/// Stateless evaluator over a set of active grants.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessEvaluator;

impl AccessEvaluator {
    /// True if `grant` matches `demand` on every non-permission segment.
    pub fn matches_scope(grant: &RoleKey, demand: &RoleKey) -> bool {
        if grant.corp() != demand.corp() || grant.app() != demand.app() {
            return false;
        }

        let levels_match = Level::ALL.iter().all(|level| {
            grant.is_wildcard_at(*level) || grant.segment(*level) == demand.segment(*level)
        });
        if !levels_match {
            return false;
        }

        if grant.is_wildcard_at(Level::Module) {
            return true;
        }

        let (granted, demanded) = (grant.sub_modules(), demand.sub_modules());
        granted.len() == demanded.len()
            && granted
                .iter()
                .zip(demanded)
                .all(|(g, d)| g == WILDCARD || g == d)
    }

    /// True if `grant` matches the demand's key and holds every demanded verb.
    ///
    /// A demand requiring nothing is never covered.
    pub fn covers(grant: &Grant, demand: &Demand) -> bool {
        !demand.permissions().is_none()
            && Self::matches_scope(&grant.key, demand.key())
            && grant.permissions.contains(demand.permissions())
    }

    /// True if any single grant covers the demand.
    pub fn has_permission(grants: &[Grant], demand: &Demand) -> bool {
        grants.iter().any(|grant| Self::covers(grant, demand))
    }

    /// Union of the bits held by every grant whose key matches the demand.
    pub fn covered_permissions(grants: &[Grant], demand: &Demand) -> PermissionSet {
        grants
            .iter()
            .filter(|grant| Self::matches_scope(&grant.key, demand.key()))
            .fold(PermissionSet::NONE, |acc, grant| acc | grant.permissions)
    }

    /// Reduce each demand to the bits not yet covered by `grants`.
    ///
    /// Coverage is unioned across all matching grants, so `View` from one
    /// grant and `Edit` from another together satisfy `View | Edit`. Demands
    /// that are fully covered are omitted. Fails if any demand requires no
    /// permission or carries a wildcard.
    pub fn missing(grants: &[Grant], demands: &[Demand]) -> Result<Vec<Demand>> {
        for demand in demands {
            demand.validate()?;
        }

        let missing: Vec<Demand> = demands
            .iter()
            .filter_map(|demand| {
                let remainder = demand
                    .permissions()
                    .revoke(Self::covered_permissions(grants, demand));
                (!remainder.is_none()).then(|| demand.with_permissions(remainder))
            })
            .collect();

        #[cfg(feature = "audit")]
        debug!(
            "{} of {} demand(s) not fully covered by {} grant(s)",
            missing.len(),
            demands.len(),
            grants.len()
        );

        Ok(missing)
    }
}
