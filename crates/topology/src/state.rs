//! Recorded stack state
//!
//! [`StackState`] is the only data that outlives an invocation: the concrete
//! property snapshot and reported outputs of every node as of the last
//! apply. The engine reads and updates it; storing it is the caller's job.

use crate::error::Result;
use crate::executor::{ApplyResult, NodeOutcome};
use crate::planner::{Action, Plan};
use crate::reference::DeferredToken;
use crate::types::{Properties, ResourceKind, Value, lookup_attribute};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the persisted state format
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Last-applied snapshot of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub kind: ResourceKind,
    /// Properties as applied, with every deferred token substituted
    #[serde(default)]
    pub properties: Properties,
    /// Attributes reported by the provider
    #[serde(default)]
    pub outputs: Properties,
    /// Producers at the time of apply; used to order deletes
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Tags as applied
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl ResourceSnapshot {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            properties: Properties::new(),
            outputs: Properties::new(),
            depends_on: Vec::new(),
            tags: BTreeMap::new(),
            applied_at: None,
        }
    }

    /// Look up an attribute: reported outputs first, then applied properties
    pub fn attribute(&self, path: &str) -> Option<Value> {
        lookup_attribute(&self.outputs, path).or_else(|| lookup_attribute(&self.properties, path))
    }
}

/// Persisted record of the last successful apply, keyed by logical id.
///
/// Unknown fields are ignored on load so newer files stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default)]
    pub stack: String,
    /// Incremented on every recorded apply
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub last_applied: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSnapshot>,
    /// Stack outputs resolved after the last apply
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

fn default_format_version() -> u32 {
    STATE_FORMAT_VERSION
}

/// Counts of state mutations performed by [`StackState::record`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub upserted: usize,
    pub removed: usize,
    pub untouched: usize,
}

impl StackState {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            stack: stack.into(),
            serial: 0,
            last_applied: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, logical_id: &str) -> Option<&ResourceSnapshot> {
        self.resources.get(logical_id)
    }

    /// Resolve a deferred token against recorded values
    pub fn lookup(&self, token: &DeferredToken) -> Option<Value> {
        self.resources
            .get(token.source())
            .and_then(|snapshot| snapshot.attribute(token.attribute()))
    }

    /// Fold an apply result into the state.
    ///
    /// Successful creates/updates/replaces are upserted, successful deletes
    /// removed. Failed and skipped nodes leave their previous entry (or its
    /// absence) untouched, so a retry plans only the unfinished subset.
    pub fn record(&mut self, plan: &Plan, result: &ApplyResult) -> RecordSummary {
        let now = Utc::now();
        let mut summary = RecordSummary::default();

        for change in &plan.changes {
            match result.get(&change.logical_id) {
                Some(NodeOutcome::Success {
                    action: Action::Delete,
                    ..
                }) => {
                    self.resources.remove(&change.logical_id);
                    summary.removed += 1;
                }
                Some(NodeOutcome::Success {
                    action: Action::NoOp,
                    ..
                }) => summary.untouched += 1,
                Some(NodeOutcome::Success {
                    properties,
                    outputs,
                    ..
                }) => {
                    self.resources.insert(
                        change.logical_id.clone(),
                        ResourceSnapshot {
                            kind: change.kind,
                            properties: properties.clone(),
                            outputs: outputs.clone(),
                            depends_on: change.depends_on.clone(),
                            tags: change.tags.clone(),
                            applied_at: Some(now),
                        },
                    );
                    summary.upserted += 1;
                }
                _ => summary.untouched += 1,
            }
        }

        self.serial += 1;
        self.last_applied = Some(now);
        self.resolve_outputs(&plan.outputs);

        log::info!(
            "recorded apply for {}: {} upserted, {} removed, serial {}",
            self.stack,
            summary.upserted,
            summary.removed,
            self.serial
        );
        summary
    }

    /// Resolve declared stack outputs against recorded values.
    ///
    /// Outputs whose producers are not recorded are dropped.
    pub fn resolve_outputs(&mut self, declared: &BTreeMap<String, Value>) {
        self.outputs = declared
            .iter()
            .filter_map(|(name, value)| {
                value
                    .substitute_deferred(&|token| self.lookup(token))
                    .map(|v| (name.clone(), v))
            })
            .collect();
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Default for StackState {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "format_version": 2,
            "stack": "erp-dev",
            "serial": 4,
            "future_field": {"anything": true},
            "resources": {
                "vpc": {"kind": "network", "outputs": {"id": "vpc-1"}, "new_thing": 1}
            }
        }"#;
        let state = StackState::from_json(json).unwrap();
        assert_eq!(state.serial, 4);
        assert_eq!(
            state.get("vpc").unwrap().attribute("id"),
            Some(Value::from("vpc-1"))
        );
    }

    #[test]
    fn test_empty_object_is_default_state() {
        let state = StackState::from_json("{}").unwrap();
        assert!(state.is_empty());
        assert_eq!(state.format_version, STATE_FORMAT_VERSION);
    }

    #[test]
    fn test_lookup_prefers_outputs() {
        let mut snapshot = ResourceSnapshot::new(ResourceKind::Database);
        snapshot
            .properties
            .insert("port".into(), Value::from(5432));
        snapshot
            .outputs
            .insert("port".into(), Value::from(6543));

        let mut state = StackState::new("erp-dev");
        state.resources.insert("db".into(), snapshot);

        let token = DeferredToken::new(Reference::new("db", "port"));
        assert_eq!(state.lookup(&token), Some(Value::from(6543)));
    }

    #[test]
    fn test_resolve_outputs_drops_unknown() {
        let mut snapshot = ResourceSnapshot::new(ResourceKind::Database);
        snapshot
            .outputs
            .insert("endpoint".into(), Value::from("db.local"));
        let mut state = StackState::new("erp-dev");
        state.resources.insert("db".into(), snapshot);

        let declared = BTreeMap::from([
            (
                "dbEndpoint".to_string(),
                Value::Deferred(DeferredToken::new(Reference::new("db", "endpoint"))),
            ),
            (
                "missing".to_string(),
                Value::Deferred(DeferredToken::new(Reference::new("ghost", "arn"))),
            ),
            ("literal".to_string(), Value::from("x")),
        ]);
        state.resolve_outputs(&declared);

        assert_eq!(state.outputs["dbEndpoint"], Value::from("db.local"));
        assert_eq!(state.outputs["literal"], Value::from("x"));
        assert!(!state.outputs.contains_key("missing"));
    }
}
