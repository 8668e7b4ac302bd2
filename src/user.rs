//! Users that receive grants through group membership.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// A user known to the membership store.
///
/// Users hold no roles directly; everything they can do comes from the
/// groups they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct User {
    /// Unique identifier for the user.
    id: String,
    /// Display name for the user.
    display_name: Option<String>,
    /// Additional attributes for the user.
    attributes: HashMap<String, String>,
}

impl User {
    /// Create a user, rejecting a blank id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::validation("User id cannot be blank"));
        }

        Ok(Self {
            id,
            display_name: None,
            attributes: HashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Display name if set, otherwise the id.
    pub fn effective_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}
