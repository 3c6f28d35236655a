//! Core types: property values, resource kinds and the stack context

use crate::error::Error;
use crate::reference::{DeferredToken, Reference};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Property Values
// ============================================================================

/// A property value in a resource's property bag.
///
/// Literals mirror JSON. `Ref` is the declaration form of a cross-node
/// reference (`{ ref = "db.endpoint" }`); `Deferred` is the document form of a
/// reference that can only be resolved at apply time
/// (`{ deferred = "db.endpoint" }`).
///
/// Any map holding a `ref` or `deferred` key is read as a reference; a
/// malformed one is a deserialization error, never a plain map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Ref(Reference),
    Deferred(DeferredToken),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// True if the value contains no references and no deferred tokens
    pub fn is_literal(&self) -> bool {
        match self {
            Value::Ref(_) | Value::Deferred(_) => false,
            Value::List(items) => items.iter().all(Value::is_literal),
            Value::Map(map) => map.values().all(Value::is_literal),
            _ => true,
        }
    }

    /// Collect every reference nested anywhere in this value
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Collect every deferred token nested anywhere in this value
    pub fn deferred_tokens(&self) -> Vec<&DeferredToken> {
        match self {
            Value::Deferred(t) => vec![t],
            Value::List(items) => items.iter().flat_map(Value::deferred_tokens).collect(),
            Value::Map(map) => map.values().flat_map(Value::deferred_tokens).collect(),
            _ => Vec::new(),
        }
    }

    /// Rewrite every string literal with `f`, leaving references untouched
    pub fn map_strings(&self, f: &impl Fn(&str) -> String) -> Value {
        match self {
            Value::String(s) => Value::String(f(s)),
            Value::List(items) => Value::List(items.iter().map(|v| v.map_strings(f)).collect()),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.map_strings(f)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Replace deferred tokens using `lookup`.
    ///
    /// Returns `None` if any token could not be resolved.
    pub fn substitute_deferred(
        &self,
        lookup: &impl Fn(&DeferredToken) -> Option<Value>,
    ) -> Option<Value> {
        match self {
            Value::Deferred(token) => lookup(token),
            Value::List(items) => items
                .iter()
                .map(|v| v.substitute_deferred(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| v.substitute_deferred(lookup).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Map),
            other => Some(other.clone()),
        }
    }

    /// Follow a dotted path (`a.b.c`) through nested maps
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |current, key| match current {
            Value::Map(map) => map.get(key),
            _ => None,
        })
    }

    /// Borrow the string content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the integer content, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Compact single-line rendering for terminal output
    pub fn render(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Ref(r) => format!("${{{r}}}"),
            Value::Deferred(t) => format!("(known after apply: {})", t.reference()),
            other => serde_json::to_string(other).unwrap_or_else(|_| "<unrenderable>".into()),
        }
    }

    /// Multi-line rendering used for line diffs
    pub fn render_pretty(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Deferred(_) | Value::Ref(_) => self.render(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.render()),
        }
    }
}

const REF_KEY: &str = "ref";
const DEFERRED_KEY: &str = "deferred";

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a property value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> std::result::Result<Value, E> {
        Ok(Value::Integer(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> std::result::Result<Value, E> {
        i64::try_from(n)
            .map(Value::Integer)
            .map_err(|_| E::custom(format!("integer {n} is out of range (max {})", i64::MAX)))
    }

    fn visit_f64<E: de::Error>(self, n: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(n))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        from_map(map).map_err(de::Error::custom)
    }
}

/// Read `{ ref = .. }` and `{ deferred = .. }` as references; other maps stay maps
fn from_map(map: BTreeMap<String, Value>) -> crate::error::Result<Value> {
    let Some(key) = [REF_KEY, DEFERRED_KEY]
        .into_iter()
        .find(|key| map.contains_key(*key))
    else {
        return Ok(Value::Map(map));
    };

    let target = match map.get(key) {
        Some(Value::String(target)) if map.len() == 1 => target,
        _ => return Err(Error::InvalidReference(Value::Map(map).render())),
    };
    let reference = Reference::parse(target)?;

    Ok(if key == REF_KEY {
        Value::Ref(reference)
    } else {
        Value::Deferred(DeferredToken::new(reference))
    })
}

/// Look up a dotted attribute path in a property bag
pub fn lookup_attribute(properties: &BTreeMap<String, Value>, path: &str) -> Option<Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = properties.get(head)?;
    match rest {
        Some(rest) => value.get_path(rest).cloned(),
        None => Some(value.clone()),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Property bag keyed by attribute name
pub type Properties = BTreeMap<String, Value>;

// ============================================================================
// Resource Kinds
// ============================================================================

/// The kinds of infrastructure object the engine can declare.
///
/// The engine never interprets a kind beyond its replacement rules and the
/// attribute names a provider is expected to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    SecurityGroup,
    Secret,
    Database,
    Role,
    Policy,
    LoadBalancer,
    Listener,
    TargetGroup,
    Cluster,
    TaskDefinition,
    Service,
    LogGroup,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Secret => "secret",
            ResourceKind::Database => "database",
            ResourceKind::Role => "role",
            ResourceKind::Policy => "policy",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::Listener => "listener",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Cluster => "cluster",
            ResourceKind::TaskDefinition => "task_definition",
            ResourceKind::Service => "service",
            ResourceKind::LogGroup => "log_group",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            ResourceKind::Network,
            ResourceKind::Subnet,
            ResourceKind::SecurityGroup,
            ResourceKind::Secret,
            ResourceKind::Database,
            ResourceKind::Role,
            ResourceKind::Policy,
            ResourceKind::LoadBalancer,
            ResourceKind::Listener,
            ResourceKind::TargetGroup,
            ResourceKind::Cluster,
            ResourceKind::TaskDefinition,
            ResourceKind::Service,
            ResourceKind::LogGroup,
        ]
    }

    /// Properties whose change cannot be applied in place.
    pub fn immutable_properties(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Network => &["cidr"],
            ResourceKind::Subnet => &["network", "cidr", "availability_zone"],
            ResourceKind::SecurityGroup => &["network", "group_name", "description"],
            ResourceKind::Secret => &["secret_name"],
            ResourceKind::Database => &[
                "engine",
                "instance_identifier",
                "database_name",
                "master_username",
                "storage_encrypted",
            ],
            ResourceKind::Role => &["role_name", "assumed_by"],
            ResourceKind::Policy => &["policy_name"],
            ResourceKind::LoadBalancer => &["load_balancer_name", "internet_facing", "network"],
            ResourceKind::Listener => &["load_balancer"],
            ResourceKind::TargetGroup => &[
                "target_group_name",
                "protocol",
                "protocol_version",
                "port",
                "network",
            ],
            ResourceKind::Cluster => &["cluster_name"],
            ResourceKind::TaskDefinition => &[],
            ResourceKind::Service => &["cluster", "service_name", "launch_type"],
            ResourceKind::LogGroup => &["log_group_name"],
        }
    }

    /// Kinds whose every revision is a new object (no in-place update at all)
    pub fn replace_on_any_change(&self) -> bool {
        matches!(self, ResourceKind::TaskDefinition)
    }

    /// Check if changing `property` forces replacement
    pub fn is_immutable(&self, property: &str) -> bool {
        self.replace_on_any_change() || self.immutable_properties().contains(&property)
    }

    /// Attributes a provider reports once the node exists
    pub fn output_attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Network => &["id", "arn", "cidr"],
            ResourceKind::Subnet => &["id", "arn"],
            ResourceKind::SecurityGroup => &["id", "arn", "group_id"],
            ResourceKind::Secret => &["id", "arn", "secret_name"],
            ResourceKind::Database => &["id", "arn", "endpoint", "port"],
            ResourceKind::Role => &["id", "arn"],
            ResourceKind::Policy => &["id", "arn"],
            ResourceKind::LoadBalancer => &["id", "arn", "dns_name"],
            ResourceKind::Listener => &["id", "arn"],
            ResourceKind::TargetGroup => &["id", "arn"],
            ResourceKind::Cluster => &["id", "arn"],
            ResourceKind::TaskDefinition => &["id", "arn", "revision"],
            ResourceKind::Service => &["id", "arn"],
            ResourceKind::LogGroup => &["id", "arn"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

// ============================================================================
// Stack Context
// ============================================================================

/// Stack-wide naming and tagging context.
///
/// Passed explicitly to declaration and synthesis; there is no process-wide
/// naming state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackContext {
    /// Stack name (e.g. "ErpOpus")
    pub name: String,
    /// Deployment stage (e.g. "dev", "prod")
    pub stage: String,
    /// Target account, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Target region, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Tags applied to every node
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl StackContext {
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            account: None,
            region: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Identifier under which state for this stack and stage is recorded
    pub fn stack_id(&self) -> String {
        format!("{}-{}", self.name, self.stage)
    }

    /// Expand `{stack}`, `{stage}`, `{account}` and `{region}` placeholders
    pub fn expand(&self, template: &str) -> String {
        if !template.contains('{') {
            return template.to_string();
        }
        template
            .replace("{stack}", &self.name)
            .replace("{stage}", &self.stage)
            .replace("{account}", self.account.as_deref().unwrap_or(""))
            .replace("{region}", self.region.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_untagged_forms() {
        let json = r#"{"host": {"ref": "db.endpoint"}, "port": 5432, "tags": {"a": "b"}, "flag": true}"#;
        let props: Properties = serde_json::from_str(json).unwrap();

        assert_eq!(props["host"], Value::Ref(Reference::new("db", "endpoint")));
        assert_eq!(props["port"], Value::Integer(5432));
        assert!(matches!(props["tags"], Value::Map(_)));
        assert_eq!(props["flag"], Value::Bool(true));
    }

    #[test]
    fn test_malformed_reference_is_rejected() {
        let err = toml::from_str::<Properties>(r#"host = { ref = "db" }"#).unwrap_err();
        assert!(err.to_string().contains("invalid reference 'db'"), "{err}");

        let err = toml::from_str::<Properties>(r#"host = { ref = "db.endpoint", extra = 1 }"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid reference"), "{err}");

        assert!(serde_json::from_str::<Value>(r#"{"deferred": 5}"#).is_err());
        assert!(serde_json::from_str::<Value>(r#"{"ref": {"deep": "db.endpoint"}}"#).is_err());
    }

    #[test]
    fn test_reference_inside_nested_values() {
        let props: Properties = toml::from_str(
            r#"
            groups = [{ ref = "sg.group_id" }]
            env = { HOST = { ref = "db.endpoint" }, MODE = "prod" }
            "#,
        )
        .unwrap();
        assert_eq!(props["groups"].references().len(), 1);
        assert_eq!(
            props["env"].get_path("HOST"),
            Some(&Value::Ref(Reference::new("db", "endpoint")))
        );
    }

    #[test]
    fn test_integer_out_of_range_is_rejected() {
        let err = serde_json::from_str::<Value>("18446744073709551615").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert_eq!(
            serde_json::from_str::<Value>("9223372036854775807").unwrap(),
            Value::Integer(i64::MAX)
        );
    }

    #[test]
    fn test_value_deferred_round_trip() {
        let value = Value::Deferred(DeferredToken::new(Reference::new("db", "endpoint")));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"deferred":"db.endpoint"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_value_from_toml_inline_table() {
        let props: Properties = toml::from_str(
            r#"
            host = { ref = "db.endpoint" }
            cpu = 1024
            ratio = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(props["host"], Value::Ref(Reference::new("db", "endpoint")));
        assert_eq!(props["cpu"], Value::Integer(1024));
        assert_eq!(props["ratio"], Value::Float(0.5));
    }

    #[test]
    fn test_is_literal_and_references() {
        let value = Value::List(vec![
            Value::from("a"),
            Value::Ref(Reference::new("sg", "group_id")),
        ]);
        assert!(!value.is_literal());
        assert_eq!(value.references().len(), 1);
        assert!(Value::from(3).is_literal());
    }

    #[test]
    fn test_substitute_deferred() {
        let token = DeferredToken::new(Reference::new("db", "endpoint"));
        let value = Value::Map(BTreeMap::from([(
            "POSTGRES_HOST".to_string(),
            Value::Deferred(token),
        )]));

        let resolved = value.substitute_deferred(&|_| Some(Value::from("db.local")));
        assert_eq!(
            resolved.unwrap().get_path("POSTGRES_HOST"),
            Some(&Value::from("db.local"))
        );
        assert!(value.substitute_deferred(&|_| None).is_none());
    }

    #[test]
    fn test_lookup_attribute_path() {
        let props = Properties::from([(
            "template".to_string(),
            Value::Map(BTreeMap::from([("username".to_string(), Value::from("opususer"))])),
        )]);
        assert_eq!(
            lookup_attribute(&props, "template.username"),
            Some(Value::from("opususer"))
        );
        assert_eq!(lookup_attribute(&props, "template.password"), None);
        assert_eq!(lookup_attribute(&props, "missing"), None);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "security-group".parse::<ResourceKind>().unwrap(),
            ResourceKind::SecurityGroup
        );
        assert_eq!("Database".parse::<ResourceKind>().unwrap(), ResourceKind::Database);
        assert!("bucket".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_immutable_properties() {
        assert!(ResourceKind::Database.is_immutable("engine"));
        assert!(!ResourceKind::Database.is_immutable("allocated_storage"));
        assert!(ResourceKind::TaskDefinition.is_immutable("cpu"));
    }

    #[test]
    fn test_context_expand() {
        let ctx = StackContext::new("ErpOpus", "dev").with_region("us-east-1");
        assert_eq!(ctx.expand("{stack}-vpc-{stage}"), "ErpOpus-vpc-dev");
        assert_eq!(ctx.expand("{region}"), "us-east-1");
        assert_eq!(ctx.expand("{account}"), "");
        assert_eq!(ctx.stack_id(), "ErpOpus-dev");
    }
}
