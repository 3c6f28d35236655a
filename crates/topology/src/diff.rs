//! Property-level diff computation

use crate::reference::DeferredToken;
use crate::types::{Properties, ResourceKind, Value};
use serde::{Deserialize, Serialize};

/// How a single attribute differs between desired and recorded state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Attribute name
    pub attribute: String,
    /// Recorded value, `None` if the attribute is new
    pub old: Option<Value>,
    /// Desired value, `None` if the attribute was removed
    pub new: Option<Value>,
    /// False if the desired value is only known after apply
    pub known: bool,
}

impl PropertyChange {
    /// Check if this change represents an addition
    pub fn is_addition(&self) -> bool {
        self.old.is_none()
    }

    /// Check if this change represents a removal
    pub fn is_removal(&self) -> bool {
        self.new.is_none()
    }
}

/// Compare desired properties against recorded ones.
///
/// Deferred tokens in `desired` are substituted through `lookup`; a token the
/// lookup cannot answer makes the attribute count as changed with
/// `known = false`. Changes come back sorted by attribute name.
pub fn diff_properties(
    desired: &Properties,
    recorded: &Properties,
    lookup: &impl Fn(&DeferredToken) -> Option<Value>,
) -> Vec<PropertyChange> {
    let mut changes = Vec::new();

    for (attribute, value) in desired {
        let old = recorded.get(attribute);
        match value.substitute_deferred(lookup) {
            Some(concrete) => {
                if old != Some(&concrete) {
                    changes.push(PropertyChange {
                        attribute: attribute.clone(),
                        old: old.cloned(),
                        new: Some(concrete),
                        known: true,
                    });
                }
            }
            None => changes.push(PropertyChange {
                attribute: attribute.clone(),
                old: old.cloned(),
                new: Some(value.clone()),
                known: false,
            }),
        }
    }

    for (attribute, value) in recorded {
        if !desired.contains_key(attribute) {
            changes.push(PropertyChange {
                attribute: attribute.clone(),
                old: Some(value.clone()),
                new: None,
                known: true,
            });
        }
    }

    changes.sort_by(|a, b| a.attribute.cmp(&b.attribute));
    changes
}

/// Decide whether a change forces replacement; returns the reason if so.
///
/// Database engine versions are special: an upgrade applies in place, a
/// downgrade (or an unknown/unparseable version) replaces.
pub fn replacement_reason(kind: ResourceKind, change: &PropertyChange) -> Option<String> {
    if kind == ResourceKind::Database && change.attribute == "engine_version" {
        return engine_version_reason(change);
    }

    if kind.replace_on_any_change() {
        return Some(format!("{kind} revisions are immutable ({} changed)", change.attribute));
    }

    if kind.is_immutable(&change.attribute) {
        let detail = if change.known { "" } else { ", known after apply" };
        return Some(format!("immutable property '{}' changed{detail}", change.attribute));
    }

    None
}

fn engine_version_reason(change: &PropertyChange) -> Option<String> {
    let old = change.old.as_ref().and_then(Value::as_str).and_then(parse_version);
    let new = change.new.as_ref().and_then(Value::as_str).and_then(parse_version);

    match (old, new) {
        (Some(old), Some(new)) if new >= old => None,
        (Some(_), Some(_)) => Some("engine_version downgrade".to_string()),
        (None, _) if change.old.is_none() => None,
        _ => Some("engine_version change cannot be compared".to_string()),
    }
}

fn parse_version(text: &str) -> Option<Vec<u64>> {
    text.split('.').map(|part| part.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;

    fn props(list: Vec<(&str, Value)>) -> Properties {
        list.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn no_lookup(_: &DeferredToken) -> Option<Value> {
        None
    }

    #[test]
    fn test_identical_properties_have_no_changes() {
        let a = props(vec![("port", Value::from(5432)), ("name", Value::from("db"))]);
        assert!(diff_properties(&a, &a.clone(), &no_lookup).is_empty());
    }

    #[test]
    fn test_added_changed_removed() {
        let desired = props(vec![("a", Value::from(1)), ("b", Value::from(2))]);
        let recorded = props(vec![("b", Value::from(3)), ("c", Value::from(4))]);

        let changes = diff_properties(&desired, &recorded, &no_lookup);
        let names: Vec<_> = changes.iter().map(|c| c.attribute.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(changes[0].is_addition());
        assert!(changes[2].is_removal());
    }

    #[test]
    fn test_deferred_resolved_through_lookup() {
        let token = DeferredToken::new(Reference::new("db", "endpoint"));
        let desired = props(vec![("host", Value::Deferred(token))]);
        let recorded = props(vec![("host", Value::from("db.local"))]);

        let same = diff_properties(&desired, &recorded, &|_| Some(Value::from("db.local")));
        assert!(same.is_empty());

        let unknown = diff_properties(&desired, &recorded, &no_lookup);
        assert_eq!(unknown.len(), 1);
        assert!(!unknown[0].known);
    }

    #[test]
    fn test_immutable_change_requires_replacement() {
        let change = PropertyChange {
            attribute: "engine".into(),
            old: Some(Value::from("postgres")),
            new: Some(Value::from("mysql")),
            known: true,
        };
        assert!(replacement_reason(ResourceKind::Database, &change).is_some());

        let mutable = PropertyChange {
            attribute: "allocated_storage".into(),
            old: Some(Value::from(10)),
            new: Some(Value::from(20)),
            known: true,
        };
        assert!(replacement_reason(ResourceKind::Database, &mutable).is_none());
    }

    #[test]
    fn test_engine_version_upgrade_vs_downgrade() {
        let change = |old: &str, new: &str| PropertyChange {
            attribute: "engine_version".into(),
            old: Some(Value::from(old)),
            new: Some(Value::from(new)),
            known: true,
        };
        assert!(replacement_reason(ResourceKind::Database, &change("14.7", "15.2")).is_none());
        assert!(replacement_reason(ResourceKind::Database, &change("14.7", "13.4")).is_some());
        assert!(replacement_reason(ResourceKind::Database, &change("14.7", "latest")).is_some());
    }

    #[test]
    fn test_task_definition_any_change_replaces() {
        let change = PropertyChange {
            attribute: "cpu".into(),
            old: Some(Value::from(512)),
            new: Some(Value::from(1024)),
            known: true,
        };
        assert!(replacement_reason(ResourceKind::TaskDefinition, &change).is_some());
    }
}
