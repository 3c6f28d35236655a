//! Dependency graph construction and deterministic topological ordering

use crate::error::{Error, Result};
use crate::node::ResourceNode;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Directed acyclic graph over logical ids.
///
/// An edge `A -> B` (B in `dependencies(A)`) means B must be created or
/// updated before A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph from declared nodes.
    ///
    /// Edges come from every nested reference (consumer -> producer) and from
    /// explicit `depends_on` sets. Unknown producers and cycles are errors;
    /// no partial graph is returned.
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a ResourceNode>) -> Result<Self> {
        let nodes: Vec<&ResourceNode> = nodes.into_iter().collect();
        let ids: BTreeSet<&str> = nodes.iter().map(|n| n.logical_id()).collect();

        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for node in &nodes {
            let id = node.logical_id();
            let deps = edges.entry(id.to_string()).or_default();

            for reference in node.references() {
                if !ids.contains(reference.source.as_str()) {
                    return Err(Error::UnresolvableReference {
                        reference: reference.to_string(),
                        missing: reference.source.clone(),
                        chain: vec![id.to_string()],
                    });
                }
                deps.insert(reference.source.clone());
            }

            for dep in &node.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::UnknownDependency {
                        node: id.to_string(),
                        dependency: dep.clone(),
                    });
                }
                deps.insert(dep.clone());
            }
        }

        Self::from_edges(edges)
    }

    /// Build from an explicit adjacency map (node -> its dependencies).
    ///
    /// Every dependency must also be a key of the map; a missing one is an
    /// [`Error::UnknownDependency`].
    pub fn from_edges(dependencies: BTreeMap<String, BTreeSet<String>>) -> Result<Self> {
        for (node, deps) in &dependencies {
            if let Some(missing) = deps.iter().find(|dep| !dependencies.contains_key(*dep)) {
                return Err(Error::UnknownDependency {
                    node: node.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            return Err(Error::CyclicDependency { cycle });
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> = dependencies
            .keys()
            .map(|k| (k.clone(), BTreeSet::new()))
            .collect();
        for (node, deps) in &dependencies {
            for dep in deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(node.clone());
            }
        }

        let order = topological_order(&dependencies, &dependents);
        if order.len() != dependencies.len() {
            let placed: BTreeSet<&String> = order.iter().collect();
            let cycle = dependencies
                .keys()
                .filter(|id| !placed.contains(id))
                .cloned()
                .collect();
            return Err(Error::CyclicDependency { cycle });
        }
        log::debug!("dependency order: {}", order.join(", "));

        Ok(Self {
            dependencies,
            dependents,
            order,
        })
    }

    /// Nodes in dependency order: every producer precedes its consumers.
    ///
    /// Ties are broken lexicographically by logical id, so identical input
    /// always yields identical order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Direct producers of `id`
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Direct consumers of `id`
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every node that directly or indirectly depends on `id`
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search with a recursion-stack marker.
///
/// Returns the first cycle found as an ordered path whose first and last
/// elements are the same node.
fn find_cycle(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    fn visit<'a>(
        node: &'a str,
        dependencies: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);
        for dep in dependencies.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(dep, dependencies, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    let mut path = Vec::new();
    for node in dependencies.keys() {
        if let Some(cycle) = visit(node, dependencies, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Kahn's algorithm with a min-heap so ready nodes come out in lexicographic order
fn topological_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    dependents: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<String> {
    let mut remaining: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(k, deps)| (k.as_str(), deps.len()))
        .collect();

    let mut ready: BinaryHeap<Reverse<&str>> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(k, _)| Reverse(*k))
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node.to_string());
        for consumer in dependents.get(node).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(consumer.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(consumer.as_str()));
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;
    use crate::types::{Properties, ResourceKind, Value};

    fn node(kind: ResourceKind, id: &str) -> ResourceNode {
        ResourceNode::new(kind, id, Properties::new()).unwrap()
    }

    fn with_ref(mut n: ResourceNode, key: &str, source: &str, attr: &str) -> ResourceNode {
        n.properties
            .insert(key.to_string(), Value::Ref(Reference::new(source, attr)));
        n
    }

    fn scenario_nodes() -> Vec<ResourceNode> {
        let network = node(ResourceKind::Network, "N1");
        let mut database = node(ResourceKind::Database, "D1");
        database.depends_on("N1");
        let service = with_ref(node(ResourceKind::Service, "S1"), "host", "D1", "endpoint");
        vec![service, database, network]
    }

    #[test]
    fn test_scenario_order() {
        let graph = DependencyGraph::build(&scenario_nodes()).unwrap();
        assert_eq!(graph.order(), ["N1", "D1", "S1"]);
        assert_eq!(graph.dependencies("S1").collect::<Vec<_>>(), ["D1"]);
        assert_eq!(graph.dependents("N1").collect::<Vec<_>>(), ["D1"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let mut nodes = vec![
            node(ResourceKind::Role, "zeta"),
            node(ResourceKind::Role, "alpha"),
            node(ResourceKind::Role, "mid"),
        ];
        let first = DependencyGraph::build(&nodes).unwrap().order().to_vec();
        nodes.reverse();
        let second = DependencyGraph::build(&nodes).unwrap().order().to_vec();

        assert_eq!(first, ["alpha", "mid", "zeta"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_producers_precede_consumers() {
        let nodes = vec![
            with_ref(node(ResourceKind::Service, "svc"), "cluster", "cluster", "arn"),
            with_ref(node(ResourceKind::Cluster, "cluster"), "network", "vpc", "id"),
            with_ref(node(ResourceKind::SecurityGroup, "sg"), "network", "vpc", "id"),
            node(ResourceKind::Network, "vpc"),
            with_ref(node(ResourceKind::Database, "db"), "groups", "sg", "group_id"),
        ];
        let graph = DependencyGraph::build(&nodes).unwrap();
        let position = |id: &str| graph.order().iter().position(|n| n == id).unwrap();

        for n in &nodes {
            for r in n.references() {
                assert!(position(&r.source) < position(n.logical_id()));
            }
        }
    }

    #[test]
    fn test_two_node_cycle_names_both() {
        let a = with_ref(node(ResourceKind::Role, "A"), "x", "B", "arn");
        let b = with_ref(node(ResourceKind::Role, "B"), "y", "A", "arn");

        let err = DependencyGraph::build(&[a, b]).unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert_eq!(cycle, ["A", "B", "A"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let a = with_ref(node(ResourceKind::Role, "A"), "x", "A", "arn");
        let err = DependencyGraph::build(&[a]).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { ref cycle } if cycle == &["A", "A"]));
    }

    #[test]
    fn test_unknown_reference_source() {
        let s = with_ref(node(ResourceKind::Service, "S1"), "host", "D1", "endpoint");
        let err = DependencyGraph::build(&[s]).unwrap_err();
        assert!(matches!(err, Error::UnresolvableReference { ref missing, .. } if missing == "D1"));
    }

    #[test]
    fn test_unknown_explicit_dependency() {
        let mut s = node(ResourceKind::Service, "S1");
        s.depends_on("ghost");
        let err = DependencyGraph::build(&[s]).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }

    #[test]
    fn test_from_edges_rejects_missing_dependency() {
        let edges = BTreeMap::from([
            ("A".to_string(), BTreeSet::from(["ghost".to_string()])),
            ("B".to_string(), BTreeSet::new()),
        ]);
        let err = DependencyGraph::from_edges(edges).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownDependency { node, dependency } if node == "A" && dependency == "ghost"
        ));
    }

    #[test]
    fn test_from_edges_orders_every_node() {
        let edges = BTreeMap::from([
            ("A".to_string(), BTreeSet::from(["B".to_string()])),
            ("B".to_string(), BTreeSet::new()),
            ("C".to_string(), BTreeSet::new()),
        ]);
        let graph = DependencyGraph::from_edges(edges).unwrap();
        assert_eq!(graph.order(), ["B", "A", "C"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = DependencyGraph::build(&scenario_nodes()).unwrap();
        let deps = graph.transitive_dependents("N1");
        assert!(deps.contains("D1"));
        assert!(deps.contains("S1"));
        assert!(graph.transitive_dependents("S1").is_empty());
    }
}
