//! Tag reconciliation.
//!
//! A pure set difference between the tags a resource carries and the tags
//! it should carry; a step's translate turns the delta into tag/untag
//! requests.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The changes needed to bring a tag set in line with the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDelta {
    /// Tags to add or overwrite.
    pub to_add: HashMap<String, String>,
    /// Tag keys to remove, sorted.
    pub to_remove: Vec<String>,
}

impl TagDelta {
    /// Whether no changes are needed.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the delta from existing tags to desired tags.
///
/// A key present in both with a different value counts as an add
/// (overwrite); a key absent from `desired` counts as a removal.
pub fn diff_tags(
    existing: &HashMap<String, String>,
    desired: &HashMap<String, String>,
) -> TagDelta {
    let to_add = desired
        .iter()
        .filter(|(key, value)| existing.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let to_remove = existing
        .keys()
        .filter(|key| !desired.contains_key(*key))
        .cloned()
        .sorted()
        .collect_vec();

    TagDelta { to_add, to_remove }
}
