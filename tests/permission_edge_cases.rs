//! Edge cases of the permission algebra, role key parsing and matching.

use scoped_rbac::{
    AccessEvaluator, Demand, Error, Grant, Level, PermissionSet, RoleKey,
    permission::{contains, grant, revoke},
};

fn key(s: &str) -> RoleKey {
    RoleKey::parse(s).unwrap()
}

#[test]
fn test_composites() {
    assert_eq!(
        PermissionSet::CRUD,
        PermissionSet::ADD | PermissionSet::VIEW | PermissionSet::EDIT | PermissionSet::DELETE
    );
    assert!(PermissionSet::FULL.contains(PermissionSet::CRUD));
    assert!(!PermissionSet::CRUD.contains(PermissionSet::ADMIN));
    assert_eq!(PermissionSet::FULL.to_string(), "Full");
    assert_eq!(PermissionSet::CRUD.to_string(), "Crud");
    assert_eq!(PermissionSet::NONE.to_string(), "None");
}

#[test]
fn test_free_functions() {
    let base = PermissionSet::VIEW;
    assert_eq!(grant(base, &[]), base);
    assert_eq!(
        grant(base, &[PermissionSet::ADD, PermissionSet::EDIT]),
        PermissionSet::ADD | PermissionSet::VIEW | PermissionSet::EDIT
    );
    assert_eq!(revoke(PermissionSet::CRUD, &[PermissionSet::CRUD]), PermissionSet::NONE);
    assert!(contains(PermissionSet::CRUD, PermissionSet::EDIT));
    assert!(!contains(PermissionSet::VIEW, PermissionSet::CRUD));
}

#[test]
fn test_permission_wire_form() {
    assert_eq!(PermissionSet::parse("crud").unwrap(), PermissionSet::CRUD);
    assert_eq!(
        PermissionSet::parse(" View | Edit ").unwrap(),
        PermissionSet::VIEW | PermissionSet::EDIT
    );
    assert!(matches!(PermissionSet::parse("Read"), Err(Error::Validation(_))));
    assert!(matches!(PermissionSet::parse(""), Err(Error::Validation(_))));
    assert!(PermissionSet::from_bits(1 << 9).is_err());
    assert_eq!(PermissionSet::from_bits_truncate(u32::MAX), PermissionSet::FULL);
}

#[test]
fn test_role_key_normalization() {
    let parsed = key("  ACME.Crm.Prod.EU.Deals:Emea  ");
    assert_eq!(parsed.canonical(), "acme.crm.prod.eu.deals:emea");
    assert_eq!(parsed.sub_modules(), ["emea"]);
    assert_eq!(parsed, RoleKey::build("acme", "crm", "prod", "eu", "deals", ["EMEA"]).unwrap());
}

#[test]
fn test_role_key_rejections() {
    for bad in [
        "acme.crm.prod.eu",
        "acme.crm.prod.eu.deals.extra",
        "acme.crm.prod..deals",
        "acme.crm.prod.eu.de_als",
        "acme.crm.prod.eu.deals:",
        "",
    ] {
        assert!(
            matches!(RoleKey::parse(bad), Err(Error::Validation(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_wildcard_levels() {
    let k = key("c.a.*.t.*");
    assert!(k.is_wildcard_at(Level::Env));
    assert!(!k.is_wildcard_at(Level::Tenant));
    assert!(k.is_wildcard_at(Level::Module));
    assert!(k.has_wildcard());
    assert!(!key("c.a.e.t.m").has_wildcard());
}

#[test]
fn test_sub_module_matching() {
    let exact = Grant::new(key("c.a.e.t.m:x:y"), PermissionSet::VIEW);
    let positional = Grant::new(key("c.a.e.t.m:*:y"), PermissionSet::VIEW);
    let module_wildcard = Grant::new(key("c.a.e.t.*"), PermissionSet::VIEW);

    let demand = Demand::parse("c.a.e.t.m:x:y", "View").unwrap();
    let shorter = Demand::parse("c.a.e.t.m:x", "View").unwrap();

    assert!(AccessEvaluator::covers(&exact, &demand));
    assert!(AccessEvaluator::covers(&positional, &demand));
    assert!(AccessEvaluator::covers(&module_wildcard, &demand));
    assert!(!AccessEvaluator::covers(&exact, &shorter));
    assert!(AccessEvaluator::covers(&module_wildcard, &shorter));
}

#[test]
fn test_union_across_grants_for_missing() {
    let grants = vec![
        Grant::new(key("c.a.*.t.m"), PermissionSet::VIEW),
        Grant::new(key("c.a.e.*.m"), PermissionSet::EDIT),
    ];
    let demand = Demand::parse("c.a.e.t.m", "View, Edit").unwrap();

    // No single grant covers both verbs, but together they do.
    assert!(!AccessEvaluator::has_permission(&grants, &demand));
    assert!(AccessEvaluator::missing(&grants, &[demand]).unwrap().is_empty());
}

#[test]
fn test_missing_rejects_none_demand() {
    // A demand built for another purpose and then emptied cannot sneak through.
    let result = Demand::new(key("c.a.e.t.m"), PermissionSet::NONE);
    assert!(result.is_err());
}
