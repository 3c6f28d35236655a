//! Synthesis - walk the graph and emit the deployment document

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::node::Stack;
use crate::reference::Resolver;
use crate::types::{Properties, ResourceKind, StackContext, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version of the serialized document format
pub const DOCUMENT_FORMAT_VERSION: u32 = 1;

/// One emitted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub logical_id: String,
    pub kind: ResourceKind,
    /// Properties with every reference rewritten to a literal or deferred token
    #[serde(default)]
    pub properties: Properties,
    /// Direct producers (references and explicit dependencies)
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// The provider-consumable deployment document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub format_version: u32,
    /// Stack identifier (`<name>-<stage>`)
    pub stack: String,
    pub context: StackContext,
    /// Entries in dependency order
    pub entries: Vec<DocumentEntry>,
    /// Stack outputs, resolved like properties
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// blake3 hash of the serialized entries
    pub fingerprint: String,
}

impl Document {
    pub fn entry(&self, logical_id: &str) -> Option<&DocumentEntry> {
        self.entries.iter().find(|e| e.logical_id == logical_id)
    }

    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.logical_id == logical_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.logical_id.as_str())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Walks a dependency graph and emits document entries
pub struct Synthesizer<'a> {
    context: &'a StackContext,
}

impl<'a> Synthesizer<'a> {
    pub fn new(context: &'a StackContext) -> Self {
        Self { context }
    }

    /// Emit one entry per node in topological order.
    ///
    /// Pure transform: no I/O, no provider calls.
    pub fn synthesize(&self, stack: &Stack, graph: &DependencyGraph) -> Result<Document> {
        let mut resolver = Resolver::new(stack.nodes());
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut entries = Vec::with_capacity(graph.len());

        for id in graph.order() {
            let Some(node) = stack.get(id) else {
                continue;
            };

            debug_assert!(
                graph.dependencies(id).all(|dep| emitted.contains(dep)),
                "{id} emitted before its producers"
            );

            let properties = node
                .properties
                .iter()
                .map(|(k, v)| Ok((k.clone(), resolver.resolve_value(v)?)))
                .collect::<Result<Properties>>()?;

            let mut tags = self.context.tags.clone();
            tags.extend(node.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

            entries.push(DocumentEntry {
                logical_id: id.clone(),
                kind: node.kind(),
                properties,
                depends_on: graph.dependencies(id).map(str::to_string).collect(),
                tags,
            });
            emitted.insert(id.as_str());
        }

        let outputs = stack
            .outputs()
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolver.resolve_value(v)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let fingerprint = blake3::hash(&serde_json::to_vec(&entries)?)
            .to_hex()
            .to_string();

        log::info!(
            "synthesized {} entries for {} (fingerprint {})",
            entries.len(),
            self.context.stack_id(),
            &fingerprint[..12]
        );

        Ok(Document {
            format_version: DOCUMENT_FORMAT_VERSION,
            stack: self.context.stack_id(),
            context: self.context.clone(),
            entries,
            outputs,
            fingerprint,
        })
    }
}

/// Build the graph for `stack` and synthesize its document
pub fn synthesize(stack: &Stack) -> Result<Document> {
    let graph = stack.build_graph()?;
    Synthesizer::new(stack.context()).synthesize(stack, &graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reference::Reference;

    fn scenario() -> Stack {
        let mut stack = Stack::new(StackContext::new("erp", "dev").with_tag("cost", "OpusERP"));
        stack
            .declare(ResourceKind::Network, "N1", Properties::new())
            .unwrap();
        stack
            .declare(
                ResourceKind::Database,
                "D1",
                Properties::from([("port".to_string(), Value::from(5432))]),
            )
            .unwrap()
            .depends_on("N1");
        stack
            .declare(
                ResourceKind::Service,
                "S1",
                Properties::from([
                    ("host".to_string(), Value::Ref(Reference::new("D1", "endpoint"))),
                    ("port".to_string(), Value::Ref(Reference::new("D1", "port"))),
                ]),
            )
            .unwrap();
        stack
    }

    #[test]
    fn test_emits_in_dependency_order() {
        let doc = synthesize(&scenario()).unwrap();
        assert_eq!(doc.ids().collect::<Vec<_>>(), ["N1", "D1", "S1"]);
        assert_eq!(doc.stack, "erp-dev");
        assert_eq!(doc.format_version, DOCUMENT_FORMAT_VERSION);
    }

    #[test]
    fn test_references_rewritten() {
        let doc = synthesize(&scenario()).unwrap();
        let service = doc.entry("S1").unwrap();

        assert_eq!(service.properties["port"], Value::from(5432));
        assert!(matches!(service.properties["host"], Value::Deferred(_)));
        assert!(service.properties.values().all(|v| v.references().is_empty()));
        assert_eq!(service.depends_on, ["D1"]);
    }

    #[test]
    fn test_stack_tags_merged() {
        let mut stack = scenario();
        stack.get_mut("N1").unwrap().tag("owner", "ops");
        let doc = synthesize(&stack).unwrap();

        let network = doc.entry("N1").unwrap();
        assert_eq!(network.tags["cost"], "OpusERP");
        assert_eq!(network.tags["owner"], "ops");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = synthesize(&scenario()).unwrap();
        let b = synthesize(&scenario()).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a, b);
    }

    #[test]
    fn test_outputs_resolved() {
        let mut stack = scenario();
        stack.output("dbEndpoint", Value::Ref(Reference::new("D1", "endpoint")));
        let doc = synthesize(&stack).unwrap();
        assert!(matches!(doc.outputs["dbEndpoint"], Value::Deferred(_)));
    }

    #[test]
    fn test_output_to_undeclared_node_fails() {
        let mut stack = scenario();
        stack.output("ghost", Value::Ref(Reference::new("ghost", "arn")));
        let err = synthesize(&stack).unwrap_err();
        assert!(matches!(err, Error::UnresolvableReference { .. }));
    }

    #[test]
    fn test_document_json_round_trip() {
        let doc = synthesize(&scenario()).unwrap();
        let json = doc.to_json_pretty().unwrap();
        let back = Document::from_json(&json).unwrap();
        assert_eq!(back, doc);
    }
}
