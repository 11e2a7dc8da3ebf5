//! Per-session attribute storage with change tracking.
//!
//! Attributes are grouped (typically one group per authentication module) and
//! read or written through a [`SessionDetail`] view. Any write that changes the
//! stored state marks the whole [`SessionDetails`] as changed, so the owner knows
//! to persist it.
//!
//! The engines are stateless and never hold a `SessionDetails`. Applications
//! embedding them keep one per session next to the tokens they hand out, and
//! write it back to their own store whenever [`SessionDetails::is_changed`] is
//! set. It serializes without the change flag.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDetails {
    groups: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(skip)]
    changed: bool,
}

impl SessionDetails {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writable view of one attribute group.
    pub fn detail(&mut self, group: impl Into<String>) -> SessionDetail<'_> {
        SessionDetail {
            details: self,
            group: group.into(),
        }
    }

    #[must_use]
    pub fn get(&self, group: &str, name: &str) -> Option<&Value> {
        self.groups.get(group).and_then(|attributes| attributes.get(name))
    }

    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Mark the current state as persisted.
    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

pub struct SessionDetail<'a> {
    details: &'a mut SessionDetails,
    group: String,
}

impl SessionDetail<'_> {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.details.get(&self.group, name)
    }

    /// Store `value` under `name`, or remove it when `value` is `None`.
    ///
    /// Writing the current value, or removing an absent one, leaves the session
    /// unchanged.
    pub fn set(&mut self, name: &str, value: Option<Value>) {
        let changed = match value {
            Some(value) => {
                let attributes = self.details.groups.entry(self.group.clone()).or_default();
                if attributes.get(name) == Some(&value) {
                    false
                } else {
                    attributes.insert(name.to_string(), value);
                    true
                }
            }
            None => {
                let removed = self
                    .details
                    .groups
                    .get_mut(&self.group)
                    .and_then(|attributes| attributes.remove(name))
                    .is_some();
                if self
                    .details
                    .groups
                    .get(&self.group)
                    .is_some_and(BTreeMap::is_empty)
                {
                    self.details.groups.remove(&self.group);
                }
                removed
            }
        };

        if changed {
            self.details.changed = true;
        }
    }
}
