//! Error types for the topology engine.
//!
//! Build-time errors (duplicate ids, unresolvable references, cycles) abort
//! the whole synthesis pass and never yield a partial graph. Runtime apply
//! failures carry the per-node [`ApplyResult`] so callers can see exactly
//! which nodes succeeded.

use crate::executor::ApplyResult;
use thiserror::Error;

/// Broad classes of engine errors, used to pick process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The declaration itself is invalid (fails synthesis)
    Validation,
    /// The provider could not apply some nodes
    Runtime,
    /// Recorded state does not match what the caller expected
    State,
    /// Anything else (serialization, I/O at the edges)
    Other,
}

/// Errors that can occur while declaring, synthesizing, planning or applying.
#[derive(Debug, Error)]
pub enum Error {
    /// A logical id was declared twice in the same pass
    #[error("duplicate logical id: {0}")]
    DuplicateId(String),

    /// A logical id does not match the allowed pattern
    #[error(
        "invalid logical id '{0}': must start with a letter and contain only letters, digits, '-' or '_'"
    )]
    InvalidLogicalId(String),

    /// A reference string is not of the form `<node>.<attribute>`
    #[error("invalid reference '{0}': expected <node>.<attribute>")]
    InvalidReference(String),

    /// A declaration could not be read (bad value, malformed reference)
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// A reference points at a node that was never declared
    #[error("unresolvable reference {reference}: node '{missing}' is not declared{}", format_chain(.chain))]
    UnresolvableReference {
        /// The reference that could not be resolved
        reference: String,
        /// The producer node that does not exist
        missing: String,
        /// Nodes and references traversed before reaching the missing producer
        chain: Vec<String>,
    },

    /// An explicit `depends_on` names a node that was never declared
    #[error("'{node}' depends on undeclared node '{dependency}'")]
    UnknownDependency {
        /// The declaring node
        node: String,
        /// The missing dependency
        dependency: String,
    },

    /// The dependency graph (or a reference chain) contains a cycle
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Ordered list of logical ids forming the cycle; first and last are equal
        cycle: Vec<String>,
    },

    /// Some nodes failed or were skipped during apply
    #[error(
        "apply finished with {} failed and {} skipped node(s)",
        .0.failed_count(),
        .0.skipped_count()
    )]
    ApplyPartialFailure(ApplyResult),

    /// A saved plan was computed against an older state
    #[error("stale plan: computed against state serial {planned}, current serial is {current}")]
    StaleState {
        /// Serial recorded in the plan
        planned: u64,
        /// Serial of the state on disk
        current: u64,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_chain(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (via {})", chain.join(" -> "))
    }
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DuplicateId(_)
            | Error::InvalidLogicalId(_)
            | Error::InvalidReference(_)
            | Error::InvalidDeclaration(_)
            | Error::UnresolvableReference { .. }
            | Error::UnknownDependency { .. }
            | Error::CyclicDependency { .. } => ErrorCategory::Validation,
            Error::ApplyPartialFailure(_) => ErrorCategory::Runtime,
            Error::StaleState { .. } => ErrorCategory::State,
            Error::Json(_) => ErrorCategory::Other,
        }
    }

    /// Process exit code for scripting.
    ///
    /// The three structural validation errors each get their own code.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::ApplyPartialFailure(_) => 2,
            Error::DuplicateId(_) => 3,
            Error::UnresolvableReference { .. } => 4,
            Error::CyclicDependency { .. } => 5,
            Error::InvalidLogicalId(_)
            | Error::InvalidReference(_)
            | Error::InvalidDeclaration(_)
            | Error::UnknownDependency { .. }
            | Error::StaleState { .. } => 6,
            Error::Json(_) => 1,
        }
    }
}

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_full_path() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_unresolvable_message_includes_chain() {
        let err = Error::UnresolvableReference {
            reference: "db.endpoint".into(),
            missing: "db".into(),
            chain: vec!["service".into()],
        };
        assert_eq!(
            err.to_string(),
            "unresolvable reference db.endpoint: node 'db' is not declared (via service)"
        );
    }

    #[test]
    fn test_validation_errors_have_distinct_exit_codes() {
        let dup = Error::DuplicateId("a".into()).exit_code();
        let unresolved = Error::UnresolvableReference {
            reference: "x.y".into(),
            missing: "x".into(),
            chain: vec![],
        }
        .exit_code();
        let cycle = Error::CyclicDependency { cycle: vec![] }.exit_code();

        assert_ne!(dup, unresolved);
        assert_ne!(dup, cycle);
        assert_ne!(unresolved, cycle);
        assert!(dup != 0 && unresolved != 0 && cycle != 0);
    }
}
