//! Deep merge of context data under per-key merge policies.

use crate::types::{ContextData, MergePolicy};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Combine the policy tags of several layers, root first; nearer tags win.
pub fn combined_policies<'a, I>(layers: I) -> BTreeMap<String, MergePolicy>
where
    I: IntoIterator<Item = &'a ContextData>,
{
    let mut policies = BTreeMap::new();
    for layer in layers {
        for (path, policy) in &layer.policies {
            policies.insert(path.clone(), *policy);
        }
    }
    policies
}

/// Merge `overlay` into `base`.
///
/// Maps merge key-by-key, lists tagged `append` concatenate (base first), everything else is
/// replaced by the overlay value. `prefix` is the dotted path of `base` within the root map.
pub fn merge_values(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
    policies: &BTreeMap<String, MergePolicy>,
    prefix: &str,
) {
    for (key, incoming) in overlay {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let policy = policies.get(&path).copied().unwrap_or_default();

        match (base.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_values(existing, incoming, policies, &path);
            }
            (Some(Value::Array(existing)), Value::Array(incoming))
                if policy == MergePolicy::Append =>
            {
                existing.extend(incoming.iter().cloned());
            }
            _ => {
                base.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Merge a delegation patch into a target's data using the same rules as inheritance.
///
/// The patch plays the role of the nearer level. Its policy tags are kept on the result.
pub fn apply_patch(target: &ContextData, patch: &ContextData) -> ContextData {
    let policies = combined_policies([target, patch]);
    let mut values = target.values.clone();
    merge_values(&mut values, &patch.values, &policies, "");
    ContextData { values, policies }
}
