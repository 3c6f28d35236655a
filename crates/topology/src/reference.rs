//! Reference resolution
//!
//! A [`Reference`] names an attribute of another node (`db.endpoint`). The
//! [`Resolver`] turns it into either a literal, when the attribute is
//! derivable from declared properties, or a [`DeferredToken`] that the
//! provider fills in at apply time.

use crate::error::{Error, Result};
use crate::node::ResourceNode;
use crate::types::{Value, lookup_attribute};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Pseudo-attribute that always resolves statically to the node's logical id
pub const LOGICAL_ID_ATTRIBUTE: &str = "logical_id";

/// A symbolic pointer to an attribute of another node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RefRepr", into = "RefRepr")]
pub struct Reference {
    /// Logical id of the producer node
    pub source: String,
    /// Attribute name, possibly a dotted path into a map property
    pub attribute: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefRepr {
    #[serde(rename = "ref")]
    target: String,
}

impl Reference {
    pub fn new(source: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `<node>.<attribute>`; the attribute may itself contain dots
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().split_once('.') {
            Some((source, attribute)) if !source.is_empty() && !attribute.is_empty() => {
                Ok(Self::new(source, attribute))
            }
            _ => Err(Error::InvalidReference(text.to_string())),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.attribute)
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<RefRepr> for Reference {
    type Error = Error;

    fn try_from(repr: RefRepr) -> Result<Self> {
        Self::parse(&repr.target)
    }
}

impl From<Reference> for RefRepr {
    fn from(r: Reference) -> Self {
        Self {
            target: r.to_string(),
        }
    }
}

/// An opaque placeholder emitted into the document for the provider to fill in
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "DeferredRepr", into = "DeferredRepr")]
pub struct DeferredToken(Reference);

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeferredRepr {
    deferred: String,
}

impl DeferredToken {
    pub fn new(reference: Reference) -> Self {
        Self(reference)
    }

    /// The reference this token stands for
    pub fn reference(&self) -> &Reference {
        &self.0
    }

    /// Logical id of the node that will produce the value
    pub fn source(&self) -> &str {
        &self.0.source
    }

    /// Attribute the producer must report
    pub fn attribute(&self) -> &str {
        &self.0.attribute
    }
}

impl TryFrom<DeferredRepr> for DeferredToken {
    type Error = Error;

    fn try_from(repr: DeferredRepr) -> Result<Self> {
        Reference::parse(&repr.deferred).map(Self)
    }
}

impl From<DeferredToken> for DeferredRepr {
    fn from(token: DeferredToken) -> Self {
        Self {
            deferred: token.0.to_string(),
        }
    }
}

/// Outcome of resolving one reference
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Value derivable from declared properties
    Resolved(Value),
    /// Value only known once the producer has been applied
    Deferred(DeferredToken),
}

impl Resolution {
    pub fn into_value(self) -> Value {
        match self {
            Resolution::Resolved(v) => v,
            Resolution::Deferred(t) => Value::Deferred(t),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred(_))
    }
}

/// Resolves references against the nodes of one synthesis pass.
///
/// Results are memoised, so resolving the same reference twice in a pass
/// always yields the same answer.
pub struct Resolver<'a> {
    nodes: &'a BTreeMap<String, ResourceNode>,
    cache: HashMap<Reference, Resolution>,
    in_progress: Vec<Reference>,
}

impl<'a> Resolver<'a> {
    pub fn new(nodes: &'a BTreeMap<String, ResourceNode>) -> Self {
        Self {
            nodes,
            cache: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Resolve a single reference
    pub fn resolve(&mut self, reference: &Reference) -> Result<Resolution> {
        if let Some(hit) = self.cache.get(reference) {
            return Ok(hit.clone());
        }

        if let Some(pos) = self.in_progress.iter().position(|r| r == reference) {
            let mut cycle: Vec<String> = self.in_progress[pos..]
                .iter()
                .map(|r| r.source.clone())
                .collect();
            cycle.push(reference.source.clone());
            return Err(Error::CyclicDependency { cycle });
        }

        let Some(producer) = self.nodes.get(&reference.source) else {
            return Err(Error::UnresolvableReference {
                reference: reference.to_string(),
                missing: reference.source.clone(),
                chain: self.in_progress.iter().map(ToString::to_string).collect(),
            });
        };

        let resolution = if reference.attribute == LOGICAL_ID_ATTRIBUTE {
            Resolution::Resolved(Value::String(producer.logical_id().to_string()))
        } else if let Some(declared) = lookup_attribute(&producer.properties, &reference.attribute)
        {
            self.in_progress.push(reference.clone());
            let resolved = self.resolve_value(&declared);
            self.in_progress.pop();
            let resolved = resolved?;

            if resolved.is_literal() {
                Resolution::Resolved(resolved)
            } else {
                Resolution::Deferred(DeferredToken::new(reference.clone()))
            }
        } else {
            Resolution::Deferred(DeferredToken::new(reference.clone()))
        };

        log::trace!(
            "resolved {} -> {}",
            reference,
            if resolution.is_deferred() {
                "deferred"
            } else {
                "static"
            }
        );
        self.cache.insert(reference.clone(), resolution.clone());
        Ok(resolution)
    }

    /// Rewrite every nested reference in `value`
    pub fn resolve_value(&mut self, value: &Value) -> Result<Value> {
        match value {
            Value::Ref(r) => Ok(self.resolve(r)?.into_value()),
            Value::List(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Properties, ResourceKind};

    fn nodes(list: Vec<ResourceNode>) -> BTreeMap<String, ResourceNode> {
        list.into_iter()
            .map(|n| (n.logical_id().to_string(), n))
            .collect()
    }

    fn node(kind: ResourceKind, id: &str, props: Vec<(&str, Value)>) -> ResourceNode {
        let props: Properties = props.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        ResourceNode::new(kind, id, props).unwrap()
    }

    #[test]
    fn test_parse_reference() {
        let r = Reference::parse("db.endpoint").unwrap();
        assert_eq!(r.source, "db");
        assert_eq!(r.attribute, "endpoint");

        let nested = Reference::parse("secret.template.username").unwrap();
        assert_eq!(nested.attribute, "template.username");

        assert!(Reference::parse("db").is_err());
        assert!(Reference::parse(".endpoint").is_err());
        assert!(Reference::parse("db.").is_err());
    }

    #[test]
    fn test_static_resolution_from_declared_property() {
        let nodes = nodes(vec![node(
            ResourceKind::Secret,
            "secret",
            vec![("secret_name", Value::from("erp-credentials-dev"))],
        )]);
        let mut resolver = Resolver::new(&nodes);

        let res = resolver
            .resolve(&Reference::new("secret", "secret_name"))
            .unwrap();
        assert_eq!(res, Resolution::Resolved(Value::from("erp-credentials-dev")));
    }

    #[test]
    fn test_runtime_attribute_is_deferred() {
        let nodes = nodes(vec![node(ResourceKind::Database, "db", vec![])]);
        let mut resolver = Resolver::new(&nodes);

        let res = resolver.resolve(&Reference::new("db", "endpoint")).unwrap();
        assert!(res.is_deferred());
    }

    #[test]
    fn test_chained_reference_through_deferred_is_deferred() {
        let nodes = nodes(vec![
            node(ResourceKind::Database, "db", vec![]),
            node(
                ResourceKind::Secret,
                "secret",
                vec![("host", Value::Ref(Reference::new("db", "endpoint")))],
            ),
        ]);
        let mut resolver = Resolver::new(&nodes);

        let res = resolver.resolve(&Reference::new("secret", "host")).unwrap();
        assert_eq!(
            res,
            Resolution::Deferred(DeferredToken::new(Reference::new("secret", "host")))
        );
    }

    #[test]
    fn test_logical_id_attribute() {
        let nodes = nodes(vec![node(ResourceKind::Cluster, "cluster", vec![])]);
        let mut resolver = Resolver::new(&nodes);

        let res = resolver
            .resolve(&Reference::new("cluster", LOGICAL_ID_ATTRIBUTE))
            .unwrap();
        assert_eq!(res, Resolution::Resolved(Value::from("cluster")));
    }

    #[test]
    fn test_undeclared_source_is_unresolvable() {
        let nodes = nodes(vec![]);
        let mut resolver = Resolver::new(&nodes);

        let err = resolver
            .resolve(&Reference::new("ghost", "endpoint"))
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvableReference { ref missing, .. } if missing == "ghost"));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let nodes = nodes(vec![node(ResourceKind::Database, "db", vec![])]);
        let mut resolver = Resolver::new(&nodes);
        let r = Reference::new("db", "endpoint");

        let first = resolver.resolve(&r).unwrap();
        let second = resolver.resolve(&r).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reference_chain_cycle_detected() {
        let nodes = nodes(vec![
            node(
                ResourceKind::Role,
                "a",
                vec![("x", Value::Ref(Reference::new("b", "y")))],
            ),
            node(
                ResourceKind::Role,
                "b",
                vec![("y", Value::Ref(Reference::new("a", "x")))],
            ),
        ]);
        let mut resolver = Resolver::new(&nodes);

        let err = resolver.resolve(&Reference::new("a", "x")).unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_value_rewrites_nested() {
        let nodes = nodes(vec![
            node(ResourceKind::Database, "db", vec![("port", Value::from(5432))]),
        ]);
        let mut resolver = Resolver::new(&nodes);
        let env = Value::Map(BTreeMap::from([
            ("HOST".to_string(), Value::Ref(Reference::new("db", "endpoint"))),
            ("PORT".to_string(), Value::Ref(Reference::new("db", "port"))),
        ]));

        let resolved = resolver.resolve_value(&env).unwrap();
        assert_eq!(resolved.get_path("PORT"), Some(&Value::from(5432)));
        assert!(matches!(resolved.get_path("HOST"), Some(Value::Deferred(_))));
    }
}
