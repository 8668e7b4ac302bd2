//! Hierarchical role identifiers.
//!
//! A role key names a grantable capability as
//! `corp.app.env.tenant.module[:sub1:sub2...]`. `corp` and `app` are mandatory
//! literals; `env`, `tenant` and `module` may each be the wildcard `*`.
//! Every segment is lowercase alphanumerics plus `-`.

use crate::error::{Error, Result};
use std::fmt;

/// Token that matches any value at the env, tenant or module level.
pub const WILDCARD: &str = "*";

/// Separates the five scalar segments of a role key.
pub const SEGMENT_DELIMITER: char = '.';

/// Separates the module from each sub-module.
pub const SUB_MODULE_DELIMITER: char = ':';

const SCALAR_SEGMENTS: usize = 5;

/// A hierarchy level that may hold a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Env,
    Tenant,
    Module,
}

impl Level {
    /// All wildcard-capable levels, outermost first.
    pub const ALL: [Level; 3] = [Level::Env, Level::Tenant, Level::Module];

    fn label(self) -> &'static str {
        match self {
            Level::Env => "env",
            Level::Tenant => "tenant",
            Level::Module => "module",
        }
    }
}

/// A normalized hierarchical role identifier.
///
/// Two keys are equal iff their canonical strings are equal; segments cannot
/// contain either delimiter, so field-wise equality and ordering coincide with
/// the canonical form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleKey {
    corp: String,
    app: String,
    env: String,
    tenant: String,
    module: String,
    sub_modules: Vec<String>,
}

impl RoleKey {
    /// Parse a key from its wire form.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (head, tail) = match trimmed.split_once(SUB_MODULE_DELIMITER) {
            Some((head, tail)) => (head, Some(tail)),
            None => (trimmed, None),
        };

        let segments: Vec<&str> = head.split(SEGMENT_DELIMITER).collect();
        if segments.len() < SCALAR_SEGMENTS {
            return Err(Error::validation(format!(
                "Role key '{trimmed}' has {} segment(s), expected {SCALAR_SEGMENTS}",
                segments.len()
            )));
        }
        if segments.len() > SCALAR_SEGMENTS {
            return Err(Error::validation(format!(
                "Role key '{trimmed}' has more than {SCALAR_SEGMENTS} segments"
            )));
        }

        let sub_modules: Vec<&str> = match tail {
            Some(tail) => tail.split(SUB_MODULE_DELIMITER).collect(),
            None => Vec::new(),
        };

        Self::build(
            segments[0],
            segments[1],
            segments[2],
            segments[3],
            segments[4],
            sub_modules,
        )
    }

    /// Build a key without sub-modules.
    pub fn new(corp: &str, app: &str, env: &str, tenant: &str, module: &str) -> Result<Self> {
        Self::build(corp, app, env, tenant, module, std::iter::empty::<&str>())
    }

    /// Build a key from its components, normalizing case and whitespace.
    pub fn build<I, T>(
        corp: &str,
        app: &str,
        env: &str,
        tenant: &str,
        module: &str,
        sub_modules: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let sub_modules = sub_modules
            .into_iter()
            .map(|sub| normalize_segment(sub.as_ref(), "sub-module", true))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            corp: normalize_segment(corp, "corp", false)?,
            app: normalize_segment(app, "app", false)?,
            env: normalize_segment(env, Level::Env.label(), true)?,
            tenant: normalize_segment(tenant, Level::Tenant.label(), true)?,
            module: normalize_segment(module, Level::Module.label(), true)?,
            sub_modules,
        })
    }

    /// Deterministic serialization used as storage key and wire identifier.
    pub fn canonical(&self) -> String {
        let mut out = [
            self.corp.as_str(),
            self.app.as_str(),
            self.env.as_str(),
            self.tenant.as_str(),
            self.module.as_str(),
        ]
        .join(".");
        for sub in &self.sub_modules {
            out.push(SUB_MODULE_DELIMITER);
            out.push_str(sub);
        }
        out
    }

    pub fn corp(&self) -> &str {
        &self.corp
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn sub_modules(&self) -> &[String] {
        &self.sub_modules
    }

    /// The segment stored at a wildcard-capable level.
    pub fn segment(&self, level: Level) -> &str {
        match level {
            Level::Env => &self.env,
            Level::Tenant => &self.tenant,
            Level::Module => &self.module,
        }
    }

    pub fn is_wildcard_at(&self, level: Level) -> bool {
        self.segment(level) == WILDCARD
    }

    /// True if any level or sub-module is a wildcard.
    pub fn has_wildcard(&self) -> bool {
        Level::ALL.iter().any(|level| self.is_wildcard_at(*level))
            || self.sub_modules.iter().any(|sub| sub == WILDCARD)
    }

    /// True if the key's corp and app match the given (already normalized) scope.
    pub fn belongs_to(&self, corp: &str, app: &str) -> bool {
        self.corp == corp && self.app == app
    }
}

/// Normalize one segment: trim, lowercase, then validate the character set.
pub(crate) fn normalize_segment(raw: &str, name: &str, allow_wildcard: bool) -> Result<String> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        return Err(Error::validation(format!("Role key {name} cannot be blank")));
    }
    if value == WILDCARD {
        if allow_wildcard {
            return Ok(value);
        }
        return Err(Error::validation(format!(
            "Role key {name} cannot be a wildcard"
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(Error::validation(format!(
            "Role key {name} '{value}' contains disallowed character '{bad}'"
        )));
    }
    Ok(value)
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl fmt::Debug for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoleKey({})", self.canonical())
    }
}

impl std::str::FromStr for RoleKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(feature = "persistence")]
mod serde_impl {
    use super::RoleKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for RoleKey {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.canonical())
        }
    }

    impl<'de> Deserialize<'de> for RoleKey {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let value = String::deserialize(deserializer)?;
            RoleKey::parse(&value).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_key() {
        let key = RoleKey::parse("acme.billing.prod.eu.invoices").unwrap();
        assert_eq!(key.corp(), "acme");
        assert_eq!(key.app(), "billing");
        assert_eq!(key.env(), "prod");
        assert_eq!(key.tenant(), "eu");
        assert_eq!(key.module(), "invoices");
        assert!(key.sub_modules().is_empty());
        assert_eq!(key.canonical(), "acme.billing.prod.eu.invoices");
    }

    #[test]
    fn test_parse_sub_modules() {
        let key = RoleKey::parse("acme.billing.prod.eu.invoices:export:pdf").unwrap();
        assert_eq!(key.sub_modules(), ["export", "pdf"]);
        assert_eq!(key.canonical(), "acme.billing.prod.eu.invoices:export:pdf");
    }

    #[test]
    fn test_normalization() {
        let key = RoleKey::build(" ACME ", "Billing", "Prod", "*", "Invoices", ["Export"]).unwrap();
        assert_eq!(key.canonical(), "acme.billing.prod.*.invoices:export");
        assert_eq!(key, RoleKey::parse("ACME.billing.PROD.*.invoices:EXPORT").unwrap());
    }

    #[test]
    fn test_wildcards() {
        let key = RoleKey::parse("acme.billing.*.eu.*").unwrap();
        assert!(key.is_wildcard_at(Level::Env));
        assert!(!key.is_wildcard_at(Level::Tenant));
        assert!(key.is_wildcard_at(Level::Module));
        assert!(key.has_wildcard());

        let concrete = RoleKey::parse("acme.billing.prod.eu.invoices").unwrap();
        assert!(!concrete.has_wildcard());
    }

    #[test]
    fn test_invalid_keys() {
        let invalid = [
            "",
            "acme.billing.prod.eu",
            "acme.billing.prod.eu.invoices.extra",
            "*.billing.prod.eu.invoices",
            "acme.*.prod.eu.invoices",
            "acme..prod.eu.invoices",
            "acme.billing.prod.eu.in voices",
            "acme.billing.prod.eu.invoices_v2",
            "acme.billing.prod.eu.invoices:",
            "acme.billing.prod.eu.invoices:a::b",
        ];

        for raw in invalid {
            assert!(
                matches!(RoleKey::parse(raw), Err(Error::Validation(_))),
                "should reject '{raw}'"
            );
        }
    }

    #[test]
    fn test_round_trip() {
        let key = RoleKey::build("acme", "crm", "*", "t-1", "leads", ["import", "*"]).unwrap();
        assert_eq!(RoleKey::parse(&key.canonical()).unwrap(), key);
        assert_eq!(key.to_string().parse::<RoleKey>().unwrap(), key);
    }

    #[test]
    fn test_belongs_to() {
        let key = RoleKey::parse("acme.crm.prod.t1.leads").unwrap();
        assert!(key.belongs_to("acme", "crm"));
        assert!(!key.belongs_to("acme", "billing"));
    }
}
