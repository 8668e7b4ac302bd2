//! Bit-flag permission algebra.
//!
//! A [`PermissionSet`] is a plain integer bitmask over the verbs `Add`, `View`,
//! `Edit`, `Delete` and the administrative `Admin` bit. Granting and revoking are
//! pure bit arithmetic and never fail; only parsing from the wire form can.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

/// A bitmask of granted verbs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PermissionSet(u32);

impl PermissionSet {
    /// No verbs at all. Never stored as a grant.
    pub const NONE: Self = Self(0);
    pub const ADD: Self = Self(1);
    pub const VIEW: Self = Self(1 << 1);
    pub const EDIT: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);
    /// Administrative bit, only reachable through `FULL`.
    pub const ADMIN: Self = Self(1 << 4);
    /// `Add | View | Edit | Delete`.
    pub const CRUD: Self = Self(Self::ADD.0 | Self::VIEW.0 | Self::EDIT.0 | Self::DELETE.0);
    /// Every defined bit.
    pub const FULL: Self = Self(Self::CRUD.0 | Self::ADMIN.0);

    /// Single verbs in canonical order.
    pub const VERBS: [(&'static str, PermissionSet); 5] = [
        ("Add", Self::ADD),
        ("View", Self::VIEW),
        ("Edit", Self::EDIT),
        ("Delete", Self::DELETE),
        ("Admin", Self::ADMIN),
    ];

    /// Named composites, checked before falling back to a verb list.
    const NAMED: [(&'static str, PermissionSet); 3] = [
        ("None", Self::NONE),
        ("Crud", Self::CRUD),
        ("Full", Self::FULL),
    ];

    /// Raw bits of the mask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build a mask from raw bits, rejecting undefined bits.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::FULL.0 != 0 {
            return Err(Error::validation(format!(
                "Permission bits {bits:#x} contain undefined verbs"
            )));
        }
        Ok(Self(bits))
    }

    /// Build a mask from raw bits, dropping undefined bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::FULL.0)
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// `self | other`.
    pub const fn grant(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self & !other`.
    pub const fn revoke(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True when every bit of `required` is set in `self`.
    pub const fn contains(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    /// Bits set in both masks.
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Single verbs set in this mask, in canonical order.
    pub fn verbs(self) -> impl Iterator<Item = (&'static str, PermissionSet)> {
        Self::VERBS
            .into_iter()
            .filter(move |(_, verb)| self.contains(*verb))
    }

    /// Parse the verb-name wire form, e.g. `"Crud"`, `"View"` or `"Add, Edit"`.
    ///
    /// Names are case-insensitive and may be separated by `,` or `|`.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::validation("Permission value cannot be empty"));
        }

        let mut mask = Self::NONE;
        for token in trimmed.split([',', '|']) {
            let token = token.trim();
            let verb = Self::NAMED
                .iter()
                .chain(Self::VERBS.iter())
                .find(|(name, _)| name.eq_ignore_ascii_case(token))
                .map(|(_, verb)| *verb)
                .ok_or_else(|| {
                    Error::validation(format!("Unrecognized permission verb '{token}'"))
                })?;
            mask = mask.grant(verb);
        }
        Ok(mask)
    }
}

/// `base | OR(additions)`.
pub fn grant(base: PermissionSet, additions: &[PermissionSet]) -> PermissionSet {
    additions.iter().fold(base, |acc, p| acc.grant(*p))
}

/// `base & !OR(removals)`.
pub fn revoke(base: PermissionSet, removals: &[PermissionSet]) -> PermissionSet {
    base.revoke(grant(PermissionSet::NONE, removals))
}

/// `(mask & required) == required`.
pub fn contains(mask: PermissionSet, required: PermissionSet) -> bool {
    mask.contains(required)
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((name, _)) = Self::NAMED
            .iter()
            .chain(Self::VERBS.iter())
            .find(|(_, mask)| mask == self)
        {
            return f.write_str(name);
        }

        let names: Vec<&str> = self.verbs().map(|(name, _)| name).collect();
        f.write_str(&names.join(", "))
    }
}

impl fmt::Debug for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermissionSet({self})")
    }
}

impl std::str::FromStr for PermissionSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl BitOr for PermissionSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.grant(rhs)
    }
}

impl BitOrAssign for PermissionSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.grant(rhs);
    }
}

impl BitAnd for PermissionSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl Sub for PermissionSet {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.revoke(rhs)
    }
}

impl Not for PermissionSet {
    type Output = Self;

    fn not(self) -> Self {
        Self::FULL.revoke(self)
    }
}

#[cfg(feature = "persistence")]
mod serde_impl {
    use super::PermissionSet;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for PermissionSet {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for PermissionSet {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let value = String::deserialize(deserializer)?;
            PermissionSet::parse(&value).map_err(serde::de::Error::custom)
        }
    }
}
