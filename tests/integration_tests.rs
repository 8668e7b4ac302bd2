//! End-to-end scenarios through the authorization service.

use scoped_rbac::{
    AuthorizationService, CacheMissPolicy, Demand, EntityKind, Error, Grant, GroupRecord,
    MemoryStorage, PermissionSet, Role, RoleKey, Scope, ServiceConfig, Storage, TokenFreshness,
    TokenInfo, TokenVersionCache, User,
};

fn scope() -> Scope {
    Scope::new("c", "a").unwrap()
}

fn key(s: &str) -> RoleKey {
    RoleKey::parse(s).unwrap()
}

fn grant(s: &str, permissions: PermissionSet) -> Grant {
    Grant::new(key(s), permissions)
}

/// A service with a small catalog, one user in two groups.
fn setup(catalog: &[&str]) -> AuthorizationService {
    let mut service = AuthorizationService::new();
    for k in catalog {
        service.register_role(Role::new(key(k))).unwrap();
    }
    service.register_user(User::new("u1").unwrap()).unwrap();
    service.create_group(&scope(), "g1", &[]).unwrap();
    service.create_group(&scope(), "g2", &[]).unwrap();
    service
        .add_user_to_groups("u1", &scope(), &["g1", "g2"])
        .unwrap();
    service
}

#[test]
fn test_wildcard_coverage_through_groups() {
    let mut service = setup(&["c.a.*.t.m"]);
    service
        .add_roles_to_group(&scope(), "g1", &[grant("c.a.*.t.m", PermissionSet::CRUD)])
        .unwrap();

    for env in ["prod", "dev", "qa-2"] {
        let demand = Demand::new(RoleKey::new("c", "a", env, "t", "m").unwrap(), PermissionSet::EDIT)
            .unwrap();
        assert!(service.has_permission("u1", &demand, &scope()).unwrap());
    }

    let other_module = Demand::parse("c.a.e.t.m2", "Edit").unwrap();
    assert!(!service.has_permission("u1", &other_module, &scope()).unwrap());
}

#[test]
fn test_deduplication_across_groups() {
    let mut service = setup(&["c.a.e.t.m1"]);
    service
        .add_roles_to_group(&scope(), "g1", &[grant("c.a.e.t.m1", PermissionSet::ADD)])
        .unwrap();
    service
        .add_roles_to_group(&scope(), "g2", &[grant("c.a.e.t.m1", PermissionSet::EDIT)])
        .unwrap();

    let grants = service.get_active_roles("u1", &scope(), None, None).unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].key, key("c.a.e.t.m1"));
    assert_eq!(grants[0].permissions, PermissionSet::ADD | PermissionSet::EDIT);
}

#[test]
fn test_missing_delta() {
    let mut service = setup(&["c.a.e.t.m"]);
    service
        .add_roles_to_group(&scope(), "g1", &[grant("c.a.e.t.m", PermissionSet::VIEW)])
        .unwrap();

    let demands = vec![Demand::parse("c.a.e.t.m", "View, Edit").unwrap()];
    let missing = service.get_missing_roles("u1", &demands, &scope()).unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].key(), &key("c.a.e.t.m"));
    assert_eq!(missing[0].permissions(), PermissionSet::EDIT);

    service
        .add_roles_to_group(&scope(), "g2", &[grant("c.a.e.t.m", PermissionSet::EDIT)])
        .unwrap();
    assert!(service
        .get_missing_roles("u1", &demands, &scope())
        .unwrap()
        .is_empty());
}

#[test]
fn test_lock_exclusion_and_restore() {
    let mut service = setup(&["c.a.e.t.m1", "c.a.e.t.m2"]);
    service
        .add_roles_to_group(
            &scope(),
            "g1",
            &[grant("c.a.e.t.m1", PermissionSet::VIEW), grant("c.a.e.t.m2", PermissionSet::VIEW)],
        )
        .unwrap();

    service.set_role_locked(&key("c.a.e.t.m1"), true).unwrap();
    let grants = service.get_active_roles("u1", &scope(), None, None).unwrap();
    assert_eq!(grants, vec![grant("c.a.e.t.m2", PermissionSet::VIEW)]);

    service.set_role_locked(&key("c.a.e.t.m1"), false).unwrap();
    assert_eq!(service.get_active_roles("u1", &scope(), None, None).unwrap().len(), 2);

    service.set_group_locked(&scope(), "g1", true).unwrap();
    assert!(service.get_active_roles("u1", &scope(), None, None).unwrap().is_empty());

    // Locking never touches content.
    assert_eq!(service.get_group(&scope(), "g1").unwrap().unwrap().len(), 2);
}

#[test]
fn test_revocation_prunes_and_clear_is_idempotent() {
    let mut service = setup(&["c.a.e.t.m"]);
    service
        .add_roles_to_group(&scope(), "g1", &[grant("c.a.e.t.m", PermissionSet::VIEW)])
        .unwrap();

    service
        .delete_roles_from_group(&scope(), "g1", &[grant("c.a.e.t.m", PermissionSet::VIEW)])
        .unwrap();
    let group = service.get_group(&scope(), "g1").unwrap().unwrap();
    assert!(group.record(&key("c.a.e.t.m")).is_none());

    let first = service.delete_all_roles_from_group(&scope(), "g1").unwrap();
    let second = service.delete_all_roles_from_group(&scope(), "g1").unwrap();
    assert_eq!(first, second);
    assert_eq!(second.records, 0);
}

#[test]
fn test_env_and_tenant_filters() {
    let mut service = setup(&["c.a.prod.t1.m", "c.a.dev.t1.m", "c.a.*.t2.m"]);
    service
        .add_roles_to_group(
            &scope(),
            "g1",
            &[
                grant("c.a.prod.t1.m", PermissionSet::VIEW),
                grant("c.a.dev.t1.m", PermissionSet::VIEW),
                grant("c.a.*.t2.m", PermissionSet::VIEW),
            ],
        )
        .unwrap();

    let prod = service
        .get_active_roles("u1", &scope(), Some("prod"), None)
        .unwrap();
    let keys: Vec<String> = prod.iter().map(|g| g.key.canonical()).collect();
    assert_eq!(keys, ["c.a.*.t2.m", "c.a.prod.t1.m"]);

    let t2 = service
        .get_active_roles("u1", &scope(), Some("dev"), Some("t2"))
        .unwrap();
    assert_eq!(t2, vec![grant("c.a.*.t2.m", PermissionSet::VIEW)]);
}

#[test]
fn test_group_copy_from_and_lifecycle() {
    let mut service = setup(&["c.a.e.t.m1", "c.a.e.t.m2"]);
    service
        .add_roles_to_group(&scope(), "g1", &[grant("c.a.e.t.m1", PermissionSet::VIEW)])
        .unwrap();
    service
        .add_roles_to_group(
            &scope(),
            "g2",
            &[grant("c.a.e.t.m1", PermissionSet::EDIT), grant("c.a.e.t.m2", PermissionSet::ADD)],
        )
        .unwrap();

    let copy = service.create_group(&scope(), "merged", &["g1", "g2"]).unwrap();
    assert_eq!(copy.len(), 2);
    assert_eq!(
        copy.record(&key("c.a.e.t.m1")).map(GroupRecord::permissions),
        Some(PermissionSet::VIEW | PermissionSet::EDIT)
    );

    // Unreferenced groups can be deleted, referenced ones cannot.
    service.delete_group(&scope(), "merged").unwrap();
    assert!(matches!(
        service.delete_group(&scope(), "g1"),
        Err(Error::ReferentialConflict { .. })
    ));
    assert!(matches!(
        service.delete_group(&scope(), "merged"),
        Err(Error::NotFound { kind: EntityKind::Group, .. })
    ));
}

#[test]
fn test_token_cache_scenario() {
    let cache = TokenVersionCache::new();
    cache.push(TokenInfo::new(scope(), 5));
    assert_eq!(cache.get(&scope()).unwrap().version, 5);
    cache.push(TokenInfo::new(scope(), 6));
    assert_eq!(cache.get(&scope()).unwrap().version, 6);
    cache.clear(&scope());
    assert!(cache.get(&scope()).is_none());
}

#[test]
fn test_token_issuance_invalidates_earlier_tokens() {
    let mut service = setup(&[]);
    let first = service.issue_token_version(&scope()).unwrap();
    assert!(service.check_token(&scope(), first.version).unwrap().is_current());

    let second = service.issue_token_version(&scope()).unwrap();
    assert_eq!(
        service.check_token(&scope(), first.version).unwrap(),
        TokenFreshness::Stale {
            presented: first.version,
            current: second.version
        }
    );
    assert_eq!(
        service.current_token_version(&scope()).unwrap(),
        Some(second)
    );
}

#[test]
fn test_cache_miss_policies() {
    let mut storage = MemoryStorage::new();
    storage.increase_token_version(&scope()).unwrap();
    storage.increase_token_version(&scope()).unwrap();

    let trusting = AuthorizationService::with_storage(
        storage.clone(),
        ServiceConfig {
            cache_miss_policy: CacheMissPolicy::TrustOnColdStart,
            ..ServiceConfig::default()
        },
    );
    assert!(trusting.check_token(&scope(), 1).unwrap().is_current());

    let fetching = AuthorizationService::with_storage(storage, ServiceConfig::default());
    assert!(!fetching.check_token(&scope(), 1).unwrap().is_current());
    assert_eq!(fetching.token_cache().get(&scope()).unwrap().version, 2);
}

#[cfg(feature = "persistence")]
#[test]
fn test_sealed_token_round_trip() {
    use scoped_rbac::{PayloadCipher, Result};

    struct Xor(u8);

    impl PayloadCipher for Xor {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
        }
    }

    let mut service = setup(&[]);
    let sealed = service.issue_sealed_token(&scope(), &Xor(0x5a)).unwrap();
    assert!(service.check_sealed_token(&sealed, &Xor(0x5a)).unwrap().is_current());

    service.issue_token_version(&scope()).unwrap();
    assert!(!service.check_sealed_token(&sealed, &Xor(0x5a)).unwrap().is_current());
}
