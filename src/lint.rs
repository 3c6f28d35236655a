//! Advisory checks on a declared stack
//!
//! Lints never fail a command; `validate` and `plan` print them as warnings.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use topology::{ResourceKind, Stack, Value};

/// One advisory finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintWarning {
    pub logical_id: String,
    /// Dotted path to the offending property
    pub path: String,
    pub message: String,
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.logical_id, self.path, self.message)
    }
}

fn open_cidr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9A-Fa-f:.])(0\.0\.0\.0/0|::/0)(?:$|[^0-9])")
            .unwrap_or_else(|e| panic!("invalid cidr regex: {e}"))
    })
}

/// Run every lint over the stack, in logical-id order
pub fn lint(stack: &Stack) -> Vec<LintWarning> {
    let mut warnings = Vec::new();

    for (id, node) in stack.nodes() {
        if node.kind() != ResourceKind::SecurityGroup {
            continue;
        }
        for (name, value) in &node.properties {
            open_cidrs(id, name, value, &mut warnings);
        }
    }

    warnings
}

fn open_cidrs(id: &str, path: &str, value: &Value, out: &mut Vec<LintWarning>) {
    match value {
        Value::String(s) => {
            if let Some(caps) = open_cidr_pattern().captures(s) {
                out.push(LintWarning {
                    logical_id: id.to_string(),
                    path: path.to_string(),
                    message: format!("rule open to {} (any address)", &caps[1]),
                });
            }
        }
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                open_cidrs(id, &format!("{path}.{i}"), item, out);
            }
        }
        Value::Map(map) => {
            for (key, item) in map {
                open_cidrs(id, &format!("{path}.{key}"), item, out);
            }
        }
        _ => {}
    }
}
