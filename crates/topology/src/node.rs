//! Resource nodes and the stack that owns them
//!
//! A [`ResourceNode`] is one typed, addressable declaration. A [`Stack`] is a
//! flat, named collection of nodes plus the context they were declared in;
//! the engine passes (graph, synth, plan) operate over it.

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::reference::Reference;
use crate::synth::{Document, synthesize};
use crate::types::{Properties, ResourceKind, StackContext, Value};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

fn logical_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").unwrap_or_else(|e| panic!("invalid id regex: {e}"))
    })
}

/// Check a logical id against the allowed pattern
pub fn validate_logical_id(id: &str) -> Result<()> {
    if logical_id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(Error::InvalidLogicalId(id.to_string()))
    }
}

/// One declared infrastructure object
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    logical_id: String,
    kind: ResourceKind,
    /// Literal values and references
    pub properties: Properties,
    /// Explicit dependencies in addition to those implied by references
    pub depends_on: BTreeSet<String>,
    /// Node-level tags; merged over the stack tags at synthesis
    pub tags: BTreeMap<String, String>,
}

impl ResourceNode {
    /// Create a node, validating its logical id
    pub fn new(
        kind: ResourceKind,
        logical_id: impl Into<String>,
        properties: Properties,
    ) -> Result<Self> {
        let logical_id = logical_id.into();
        validate_logical_id(&logical_id)?;
        Ok(Self {
            logical_id,
            kind,
            properties,
            depends_on: BTreeSet::new(),
            tags: BTreeMap::new(),
        })
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// The node's kind; fixed at creation
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Add an explicit dependency
    pub fn depends_on(&mut self, other: impl Into<String>) -> &mut Self {
        self.depends_on.insert(other.into());
        self
    }

    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Every reference nested anywhere in the property bag
    pub fn references(&self) -> Vec<&Reference> {
        self.properties
            .values()
            .flat_map(Value::references)
            .collect()
    }
}

/// A named collection of resource nodes
#[derive(Debug, Clone)]
pub struct Stack {
    context: StackContext,
    nodes: BTreeMap<String, ResourceNode>,
    outputs: BTreeMap<String, Value>,
}

impl Stack {
    pub fn new(context: StackContext) -> Self {
        Self {
            context,
            nodes: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &StackContext {
        &self.context
    }

    /// Declare a node.
    ///
    /// String literals in `properties` have their `{stack}`/`{stage}`/
    /// `{account}`/`{region}` placeholders expanded from the stack context.
    /// Fails with [`Error::DuplicateId`] if the id is already declared.
    pub fn declare(
        &mut self,
        kind: ResourceKind,
        logical_id: &str,
        properties: Properties,
    ) -> Result<&mut ResourceNode> {
        if self.nodes.contains_key(logical_id) {
            return Err(Error::DuplicateId(logical_id.to_string()));
        }

        let ctx = &self.context;
        let expanded = properties
            .into_iter()
            .map(|(k, v)| (k, v.map_strings(&|s| ctx.expand(s))))
            .collect();

        let node = ResourceNode::new(kind, logical_id, expanded)?;
        log::debug!("declared {} ({})", logical_id, kind);
        Ok(self.nodes.entry(logical_id.to_string()).or_insert(node))
    }

    /// Declare a stack output, exported after apply
    pub fn output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn get(&self, logical_id: &str) -> Option<&ResourceNode> {
        self.nodes.get(logical_id)
    }

    pub fn get_mut(&mut self, logical_id: &str) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(logical_id)
    }

    /// Nodes keyed by logical id
    pub fn nodes(&self) -> &BTreeMap<String, ResourceNode> {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Build the dependency graph over all declared nodes
    pub fn build_graph(&self) -> Result<DependencyGraph> {
        DependencyGraph::build(self.nodes.values())
    }

    /// Synthesize the deployment document
    pub fn synthesize(&self) -> Result<Document> {
        synthesize(self)
    }
}
