//! Property-based testing for the resolution engine.
//!
//! This module uses the `proptest` crate to check the permission algebra,
//! role key normalization, wildcard coverage and aggregation invariants under
//! a wide variety of inputs.

#[cfg(test)]
mod tests {
    use crate::{
        aggregator::{GrantFilter, GroupAggregator, GroupMutation, merge_grants},
        evaluator::AccessEvaluator,
        grant::{Demand, Grant, Scope},
        group::RoleGroup,
        permission::{self, PermissionSet},
        role::{GroupRecord, Role},
        role_key::RoleKey,
    };
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// Generate any defined permission mask, `None` included.
    fn permission_strategy() -> impl Strategy<Value = PermissionSet> {
        (0u32..=PermissionSet::FULL.bits()).prop_map(PermissionSet::from_bits_truncate)
    }

    /// Generate a non-empty permission mask.
    fn some_permission_strategy() -> impl Strategy<Value = PermissionSet> {
        (1u32..=PermissionSet::FULL.bits()).prop_map(PermissionSet::from_bits_truncate)
    }

    /// Generate a valid concrete segment.
    fn segment_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-z0-9][a-z0-9-]{0,11}").unwrap()
    }

    /// Generate a segment that may be a wildcard.
    fn grant_segment_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => segment_strategy(),
            1 => Just("*".to_string()),
        ]
    }

    /// Generate a concrete key in `c.a` with up to two sub-modules.
    fn concrete_key_strategy() -> impl Strategy<Value = RoleKey> {
        (
            segment_strategy(),
            segment_strategy(),
            segment_strategy(),
            prop::collection::vec(segment_strategy(), 0..=2),
        )
            .prop_map(|(env, tenant, module, subs)| {
                RoleKey::build("c", "a", &env, &tenant, &module, subs).unwrap()
            })
    }

    fn small_key_strategy() -> impl Strategy<Value = RoleKey> {
        (0usize..4, 0usize..3).prop_map(|(m, t)| {
            RoleKey::new("c", "a", "e", &format!("t{t}"), &format!("m{m}")).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_grant_then_revoke(p in permission_strategy(), q in permission_strategy()) {
            let result = p.grant(q).revoke(q);
            prop_assert!(result.intersection(q).is_none());
            prop_assert_eq!(result, p.revoke(q));
        }

        #[test]
        fn prop_identities(p in permission_strategy()) {
            prop_assert_eq!(p.revoke(PermissionSet::NONE), p);
            prop_assert_eq!(PermissionSet::NONE.grant(p), p);
            prop_assert!(permission::contains(p, PermissionSet::NONE));
            prop_assert!(permission::contains(p, p));
        }

        #[test]
        fn prop_free_functions_fold(
            base in permission_strategy(),
            others in prop::collection::vec(permission_strategy(), 0..5),
        ) {
            let union = others.iter().fold(PermissionSet::NONE, |acc, p| acc | *p);
            prop_assert_eq!(permission::grant(base, &others), base | union);
            prop_assert_eq!(permission::revoke(base, &others), base.revoke(union));
        }

        #[test]
        fn prop_permission_wire_form_parses_back(p in some_permission_strategy()) {
            let parsed = PermissionSet::parse(&p.to_string()).unwrap();
            prop_assert_eq!(parsed, p);
        }

        #[test]
        fn prop_role_key_canonical_form(
            corp in segment_strategy(),
            app in segment_strategy(),
            env in grant_segment_strategy(),
            tenant in grant_segment_strategy(),
            module in grant_segment_strategy(),
            subs in prop::collection::vec(segment_strategy(), 0..3),
        ) {
            let key = RoleKey::build(&corp, &app, &env, &tenant, &module, &subs).unwrap();
            let reparsed = RoleKey::parse(&key.canonical()).unwrap();
            prop_assert_eq!(&reparsed, &key);
            prop_assert_eq!(reparsed.canonical(), key.canonical());

            let shouted = RoleKey::parse(&key.canonical().to_uppercase()).unwrap();
            prop_assert_eq!(shouted, key);
        }

        #[test]
        fn prop_wildcard_grant_covers_any_env(
            env in segment_strategy(),
            verb in prop::sample::select(PermissionSet::VERBS.to_vec()),
        ) {
            let crud = Grant::new(RoleKey::parse("c.a.*.t.m").unwrap(), PermissionSet::CRUD);
            let demand = Demand::new(RoleKey::new("c", "a", &env, "t", "m").unwrap(), verb.1).unwrap();
            prop_assert_eq!(
                AccessEvaluator::covers(&crud, &demand),
                PermissionSet::CRUD.contains(verb.1)
            );

            let other_module = Demand::new(RoleKey::new("c", "a", &env, "t", "m2").unwrap(), verb.1).unwrap();
            prop_assert!(!AccessEvaluator::covers(&crud, &other_module));
        }

        #[test]
        fn prop_full_wildcard_grant_matches_every_concrete_key(key in concrete_key_strategy()) {
            let grant = RoleKey::parse("c.a.*.*.*").unwrap();
            prop_assert!(AccessEvaluator::matches_scope(&grant, &key));
            prop_assert!(AccessEvaluator::matches_scope(&key, &key));
        }

        #[test]
        fn prop_missing_is_exact_remainder(
            granted in permission_strategy(),
            demanded in some_permission_strategy(),
        ) {
            let key = RoleKey::parse("c.a.e.t.m").unwrap();
            let grants = vec![Grant::new(key.clone(), granted)];
            let demand = Demand::new(key, demanded).unwrap();

            let missing = AccessEvaluator::missing(&grants, &[demand.clone()]).unwrap();
            let remainder = demanded.revoke(granted);
            if remainder.is_none() {
                prop_assert!(missing.is_empty());
                prop_assert!(AccessEvaluator::has_permission(&grants, &demand));
            } else {
                prop_assert_eq!(missing.len(), 1);
                prop_assert_eq!(missing[0].permissions(), remainder);
            }
        }

        #[test]
        fn prop_merge_has_unique_keys_and_preserves_bits(
            grants in prop::collection::vec((small_key_strategy(), permission_strategy()), 0..20),
        ) {
            let grants: Vec<Grant> = grants.into_iter().map(|(k, p)| Grant::new(k, p)).collect();
            let merged = merge_grants(grants.clone());

            for window in merged.windows(2) {
                prop_assert!(window[0].key < window[1].key);
            }
            for grant in &merged {
                let expected = grants
                    .iter()
                    .filter(|g| g.key == grant.key)
                    .fold(PermissionSet::NONE, |acc, g| acc | g.permissions);
                prop_assert_eq!(grant.permissions, expected);
                prop_assert!(!grant.permissions.is_none());
            }
        }

        #[test]
        fn prop_active_grants_deduplicate_across_groups(
            first in prop::collection::vec((small_key_strategy(), some_permission_strategy()), 0..8),
            second in prop::collection::vec((small_key_strategy(), some_permission_strategy()), 0..8),
        ) {
            let scope = Scope::new("c", "a").unwrap();
            let build = |name: &str, grants: &[(RoleKey, PermissionSet)]| {
                let mut group = RoleGroup::new(name, scope.clone()).unwrap();
                let mutation = GroupMutation::new()
                    .add_all(grants.iter().map(|(k, p)| Grant::new(k.clone(), *p)));
                GroupAggregator::mutate_group_roles(&mut group, &mutation).unwrap();
                group
            };
            let groups = vec![build("g1", &first), build("g2", &second)];

            let catalog: HashMap<RoleKey, Role> = first
                .iter()
                .chain(&second)
                .map(|(k, _)| (k.clone(), Role::new(k.clone())))
                .collect();

            let grants = GroupAggregator::active_grants(&groups, &catalog, &scope, &GrantFilter::none());
            let expected = merge_grants(
                groups.iter().flat_map(|g| g.records().map(GroupRecord::to_grant)),
            );
            prop_assert_eq!(grants, expected);
        }
    }
}
