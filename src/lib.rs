//! # Scoped RBAC
//!
//! A role/permission resolution engine for a family of multi-tenant
//! applications. Every grantable capability is named by a hierarchical
//! [`RoleKey`] (`corp.app.env.tenant.module` plus optional sub-modules) and
//! carries a [`PermissionSet`] bitmask of verbs. Users gain capabilities only
//! through named, lockable groups.
//!
//! ## Features
//!
//! - Role key parsing, normalization and wildcard matching at env, tenant and module
//! - Bit-flag permission algebra with `Crud` and `Full` composites
//! - Group aggregation with lock exclusion and union deduplication
//! - Access checks and "missing permission" queries
//! - A concurrent token version cache for revalidating issued tokens
//! - Sync and async (`async` feature) storage-backed services
//! - Serde support for role keys, permissions and groups (`persistence` feature)
//! - Audit logging through the `log` facade (`audit` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use scoped_rbac::{
//!     AuthorizationService, Demand, Grant, PermissionSet, Role, RoleKey, Scope, User,
//! };
//!
//! let mut service = AuthorizationService::new();
//! let crm = Scope::new("acme", "crm")?;
//!
//! // Catalog roles, a user and a group
//! let deals = RoleKey::parse("acme.crm.*.eu.deals")?;
//! service.register_role(Role::new(deals.clone()))?;
//! service.register_user(User::new("alice")?)?;
//! service.create_group(&crm, "sales", &[])?;
//! service.add_user_to_groups("alice", &crm, &["sales"])?;
//!
//! // Grant the group Crud on deals in every environment
//! service.add_roles_to_group(&crm, "sales", &[Grant::new(deals, PermissionSet::CRUD)])?;
//!
//! // Check access
//! let demand = Demand::parse("acme.crm.prod.eu.deals", "Edit")?;
//! assert!(service.has_permission("alice", &demand, &crm)?);
//!
//! let demand = Demand::parse("acme.crm.prod.eu.deals", "Full")?;
//! let missing = service.get_missing_roles("alice", &[demand], &crm)?;
//! assert_eq!(missing[0].permissions(), PermissionSet::ADMIN);
//! # Ok::<(), scoped_rbac::Error>(())
//! ```
//!
//! ## Audit Logging
//!
//! When the `audit` feature is enabled, the services log security events
//! using the standard Rust logging framework. To enable logging:
//!
//! ```rust
//! use scoped_rbac::init_audit_logger;
//!
//! // Initialize logging (must be called early in program execution)
//! init_audit_logger();
//!
//! // Configure log level through RUST_LOG environment variable:
//! // RUST_LOG=info,scoped_rbac=debug
//! ```
//!
//! The following events are logged:
//! - Role, user and group registration, renames, lock toggles and deletion
//! - Group role additions, revocations and clears
//! - Membership changes
//! - Token version issuance and cache invalidation
//! - Access denials, stale tokens and security violations (at warn level)
//! - Grant resolution details (at debug level)

/// Initialize `env_logger` for audit output. Safe to call more than once.
#[cfg(feature = "audit")]
pub fn init_audit_logger() {
    let _ = env_logger::try_init();
}

pub mod aggregator;
pub mod core;
pub mod error;
pub mod evaluator;
pub mod grant;
pub mod group;
pub mod metrics;
pub mod permission;
pub mod property_tests;
pub mod role;
pub mod role_key;
pub mod storage;
pub mod token;
pub mod user;

#[cfg(feature = "async")]
pub mod async_support;

// Re-export main types for convenience
pub use crate::{
    aggregator::{GrantFilter, GroupAggregator, GroupChange, GroupMutation, RoleCatalog, merge_grants},
    core::{AuthorizationService, ServiceConfig},
    error::{EntityKind, Error, Result},
    evaluator::AccessEvaluator,
    grant::{Demand, Grant, Scope},
    group::{Group, PermissionGroup, RoleGroup},
    metrics::{AuthzMetrics, MetricsSummary},
    permission::PermissionSet,
    role::{GroupRecord, PermissionRecord, Role, RoleRecord},
    role_key::{Level, RoleKey, WILDCARD},
    storage::{MemoryStorage, RecordUpdate, Storage},
    token::{
        CacheMissPolicy, PayloadCipher, TokenFreshness, TokenInfo, TokenIssuer,
        TokenVersionCache,
    },
    user::User,
};

#[cfg(feature = "persistence")]
pub use crate::token::{TokenPayload, open_token, seal_token};

#[cfg(feature = "async")]
pub use crate::async_support::{
    AsyncAuthorizationService, AsyncAuthorizationServiceBuilder, AsyncMemoryStorage,
    AsyncStorage, AsyncStorageAdapter,
};
