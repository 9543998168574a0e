//! Delegated authority and scope containment
//!
//! A scope names a resource and the actions granted on it. Both are
//! capability patterns:
//!
//! - Exact: `"payments/read"`
//! - Wildcard: `"payments/*"` (anything starting with `payments/`)
//! - Prefix: `"payments/"`
//!
//! A child scope is contained in its parent when the parent's resource
//! pattern covers the child's resource pattern and every child action is
//! covered by some parent action. Equality is containment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityPattern(String);

impl CapabilityPattern {
    /// Create a new pattern
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Pattern text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn wildcard_prefix(&self) -> Option<&str> {
        if let Some(prefix) = self.0.strip_suffix('*') {
            Some(prefix)
        } else if self.0.ends_with('/') {
            Some(&self.0)
        } else {
            None
        }
    }

    /// Check if a concrete capability matches this pattern
    pub fn matches(&self, capability: &str) -> bool {
        match self.wildcard_prefix() {
            Some(prefix) => capability.starts_with(prefix),
            None => capability == self.0,
        }
    }

    /// Check if everything this pattern grants is also granted by `parent`
    pub fn is_subset_of(&self, parent: &CapabilityPattern) -> bool {
        match parent.wildcard_prefix() {
            // A wildcard child under a wildcard parent must start with the
            // parent prefix, so the child can only grant less.
            Some(prefix) => self.0.starts_with(prefix),
            None => self.0 == parent.0,
        }
    }
}

impl fmt::Display for CapabilityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Authority carried by a credential or delegation grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Resource the actions apply to
    pub resource: CapabilityPattern,
    /// Granted actions
    #[serde(default)]
    pub actions: Vec<CapabilityPattern>,
}

impl Scope {
    /// Create a scope
    pub fn new<I, A>(resource: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            resource: CapabilityPattern::new(resource),
            actions: actions
                .into_iter()
                .map(|a| CapabilityPattern::new(a))
                .collect(),
        }
    }

    /// Child actions not covered by any action of `self`
    pub fn uncovered_actions<'a>(&self, child: &'a Scope) -> Vec<&'a CapabilityPattern> {
        child
            .actions
            .iter()
            .filter(|action| !self.actions.iter().any(|p| action.is_subset_of(p)))
            .collect()
    }

    /// Containment check; `Err` explains what the child adds
    pub fn contains(&self, child: &Scope) -> Result<(), String> {
        if !child.resource.is_subset_of(&self.resource) {
            return Err(format!(
                "resource '{}' is outside delegated resource '{}'",
                child.resource, self.resource
            ));
        }

        let extra = self.uncovered_actions(child);
        if !extra.is_empty() {
            let extra: Vec<&str> = extra.iter().map(|a| a.as_str()).collect();
            return Err(format!(
                "actions {:?} exceed delegated actions {:?}",
                extra,
                self.actions.iter().map(|a| a.as_str()).collect::<Vec<_>>()
            ));
        }

        Ok(())
    }

    /// Boolean form of [`Scope::contains`]
    pub fn is_superset_of(&self, child: &Scope) -> bool {
        self.contains(child).is_ok()
    }

    /// Check if a concrete action on a concrete resource is granted
    pub fn permits(&self, resource: &str, action: &str) -> bool {
        self.resource.matches(resource) && self.actions.iter().any(|a| a.matches(action))
    }
}
