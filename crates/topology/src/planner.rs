//! Change planning - compare a synthesized document against recorded state

use crate::diff::{PropertyChange, diff_properties, replacement_reason};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::reference::DeferredToken;
use crate::state::{ResourceSnapshot, StackState};
use crate::synth::Document;
use crate::types::{Properties, ResourceKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Attribute name under which tag changes appear in a plan
pub const TAGS_ATTRIBUTE: &str = "tags";

/// Pseudo-attribute reported when a node's dependencies change. Recording it
/// keeps the dependencies in state current for delete ordering; it never
/// forces replacement.
pub const DEPENDS_ON_ATTRIBUTE: &str = "depends_on";

/// Version of the serialized plan format
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// What the provider must do for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    #[serde(rename = "noop")]
    NoOp,
}

impl Action {
    /// Whether this action needs a provider call
    pub fn is_change(&self) -> bool {
        !matches!(self, Action::NoOp)
    }

    /// Whether the node's runtime attributes are unknown until apply
    pub fn produces_new_object(&self) -> bool {
        matches!(self, Action::Create | Action::Replace)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
            Action::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

/// One planned action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub action: Action,
    /// Why the node must be replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Attribute-level changes; empty for creates, deletes and no-ops
    #[serde(default)]
    pub changed_attributes: Vec<PropertyChange>,
    /// Desired properties, possibly containing deferred tokens.
    /// For deletes, the recorded properties.
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Stack tags merged with node tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Recorded snapshot, if the node already exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<ResourceSnapshot>,
}

/// Per-action counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_op: usize,
}

impl PlanSummary {
    /// Number of nodes the provider will touch
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_op
        )
    }
}

/// Ordered list of planned actions.
///
/// Non-delete actions come first in dependency order; deletes follow with
/// dependents before their producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub format_version: u32,
    /// Stack identifier the plan was computed for
    pub stack: String,
    /// Serial of the state the plan was computed against
    pub state_serial: u64,
    pub changes: Vec<PlannedChange>,
    /// Declared stack outputs, resolved after apply
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Plan {
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::NoOp => summary.no_op += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action.is_change())
    }

    pub fn change(&self, logical_id: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.logical_id == logical_id)
    }

    /// Plan that deletes every recorded node, dependents first
    pub fn teardown(stack: impl Into<String>, state: &StackState) -> Self {
        let ids: Vec<&str> = state.resources.keys().map(String::as_str).collect();
        let changes = delete_order(state, &ids)
            .into_iter()
            .filter_map(|id| state.get(&id).map(|snapshot| delete_change(&id, snapshot)))
            .collect();

        Self {
            format_version: PLAN_FORMAT_VERSION,
            stack: stack.into(),
            state_serial: state.serial,
            changes,
            outputs: BTreeMap::new(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Compute the plan that moves `state` to `document`.
///
/// A pure function of its inputs: identical document and state always give
/// an identical plan.
pub fn plan(document: &Document, state: &StackState) -> Plan {
    // producer id -> (action, top-level attributes changing)
    let mut planned: BTreeMap<&str, (Action, BTreeSet<String>)> = BTreeMap::new();
    let mut changes = Vec::with_capacity(document.entries.len());

    for entry in &document.entries {
        let prior = state.get(&entry.logical_id);

        let (action, reason, changed_attributes) = match prior {
            None => (Action::Create, None, Vec::new()),
            Some(snapshot) if snapshot.kind != entry.kind => (
                Action::Replace,
                Some(format!("kind changed from {} to {}", snapshot.kind, entry.kind)),
                Vec::new(),
            ),
            Some(snapshot) => {
                let lookup = |token: &DeferredToken| lookup_planned(&planned, state, token);
                let mut diff = diff_properties(&entry.properties, &snapshot.properties, &lookup);
                if entry.tags != snapshot.tags {
                    diff.push(tags_change(&snapshot.tags, &entry.tags));
                }
                if let Some(change) = depends_on_change(&snapshot.depends_on, &entry.depends_on) {
                    diff.push(change);
                }
                diff.sort_by(|a, b| a.attribute.cmp(&b.attribute));
                classify(entry.kind, diff)
            }
        };

        log::debug!("{}: {}", entry.logical_id, action);

        let changed: BTreeSet<String> = changed_attributes
            .iter()
            .map(|c| c.attribute.clone())
            .collect();
        planned.insert(entry.logical_id.as_str(), (action, changed));

        changes.push(PlannedChange {
            logical_id: entry.logical_id.clone(),
            kind: entry.kind,
            action,
            reason,
            changed_attributes,
            properties: entry.properties.clone(),
            depends_on: entry.depends_on.clone(),
            tags: entry.tags.clone(),
            prior: prior.cloned(),
        });
    }

    let removed: Vec<&str> = state
        .resources
        .keys()
        .map(String::as_str)
        .filter(|id| document.entry(id).is_none())
        .collect();

    for id in delete_order(state, &removed) {
        if let Some(snapshot) = state.get(&id) {
            changes.push(delete_change(&id, snapshot));
        }
    }

    let plan = Plan {
        format_version: PLAN_FORMAT_VERSION,
        stack: document.stack.clone(),
        state_serial: state.serial,
        changes,
        outputs: document.outputs.clone(),
    };
    log::info!("plan for {}: {}", plan.stack, plan.summary());
    plan
}

fn classify(
    kind: ResourceKind,
    diff: Vec<PropertyChange>,
) -> (Action, Option<String>, Vec<PropertyChange>) {
    if diff.is_empty() {
        return (Action::NoOp, None, diff);
    }

    let reasons: Vec<String> = diff
        .iter()
        .filter(|change| change.attribute != DEPENDS_ON_ATTRIBUTE)
        .filter_map(|change| replacement_reason(kind, change))
        .collect();

    if reasons.is_empty() {
        (Action::Update, None, diff)
    } else {
        (Action::Replace, Some(reasons.join("; ")), diff)
    }
}

/// Tag changes are reported as one pseudo-attribute
fn tags_change(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> PropertyChange {
    let as_value = |tags: &BTreeMap<String, String>| {
        Value::Map(
            tags.iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect(),
        )
    };
    PropertyChange {
        attribute: TAGS_ATTRIBUTE.to_string(),
        old: (!old.is_empty()).then(|| as_value(old)),
        new: (!new.is_empty()).then(|| as_value(new)),
        known: true,
    }
}

fn depends_on_change(old: &[String], new: &[String]) -> Option<PropertyChange> {
    let before: BTreeSet<&String> = old.iter().collect();
    let after: BTreeSet<&String> = new.iter().collect();
    if before == after {
        return None;
    }
    let as_value = |ids: BTreeSet<&String>| {
        (!ids.is_empty()).then(|| {
            Value::List(ids.into_iter().map(|id| Value::from(id.as_str())).collect())
        })
    };
    Some(PropertyChange {
        attribute: DEPENDS_ON_ATTRIBUTE.to_string(),
        old: as_value(before),
        new: as_value(after),
        known: true,
    })
}

/// Resolve a token against recorded state unless the producer is about to
/// change the attribute.
fn lookup_planned(
    planned: &BTreeMap<&str, (Action, BTreeSet<String>)>,
    state: &StackState,
    token: &DeferredToken,
) -> Option<Value> {
    if let Some((action, changed)) = planned.get(token.source()) {
        if action.produces_new_object() {
            return None;
        }
        let head = token
            .attribute()
            .split_once('.')
            .map_or(token.attribute(), |(head, _)| head);
        if changed.contains(head) {
            return None;
        }
    }
    state.lookup(token)
}

fn delete_change(id: &str, snapshot: &ResourceSnapshot) -> PlannedChange {
    PlannedChange {
        logical_id: id.to_string(),
        kind: snapshot.kind,
        action: Action::Delete,
        reason: None,
        changed_attributes: Vec::new(),
        properties: snapshot.properties.clone(),
        depends_on: snapshot.depends_on.clone(),
        tags: snapshot.tags.clone(),
        prior: Some(snapshot.clone()),
    }
}

/// Order `ids` so that every node comes before the nodes it depends on,
/// using the dependencies recorded at apply time.
fn delete_order(state: &StackState, ids: &[&str]) -> Vec<String> {
    let set: BTreeSet<&str> = ids.iter().copied().collect();

    // Reverse edges: a producer "waits for" each of its consumers.
    let mut edges: BTreeMap<String, BTreeSet<String>> =
        set.iter().map(|id| (id.to_string(), BTreeSet::new())).collect();
    for id in &set {
        let Some(snapshot) = state.get(id) else {
            continue;
        };
        for producer in &snapshot.depends_on {
            if set.contains(producer.as_str())
                && let Some(waits) = edges.get_mut(producer)
            {
                waits.insert((*id).to_string());
            }
        }
    }

    match DependencyGraph::from_edges(edges) {
        Ok(graph) => graph.order().to_vec(),
        Err(e) => {
            log::warn!("recorded dependencies are inconsistent ({e}); deleting in id order");
            set.into_iter().map(str::to_string).collect()
        }
    }
}
