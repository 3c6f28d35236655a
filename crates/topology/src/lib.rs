//! # Topology
//!
//! A resource graph engine for declaring infrastructure stacks.
//!
//! Nodes are declared into a [`Stack`], references between them are resolved
//! into literals or deferred tokens, the graph is ordered, and the result is
//! synthesized into a [`Document`]. A [`Plan`] compares the document against
//! recorded [`StackState`], and an [`Executor`] applies the plan through a
//! [`Provider`].
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: One typed, addressable declaration with a property bag
//! - **Reference**: A symbolic pointer to another node's attribute (`db.endpoint`)
//! - **DependencyGraph**: Deterministic topological order over logical ids
//! - **Document**: The provider-consumable output of synthesis
//! - **Plan**: Create/update/replace/delete/no-op per node
//! - **StackState**: The last-applied snapshot, the only persisted data
//!
//! ## Example
//!
//! ```ignore
//! use topology::{
//!     CancelToken, GraphExecutor, Properties, Reference, ResourceKind, Stack,
//!     StackContext, StackState, Value, plan,
//! };
//!
//! let mut stack = Stack::new(StackContext::new("erp", "dev"));
//! stack.declare(ResourceKind::Network, "vpc", Properties::new())?;
//! stack
//!     .declare(ResourceKind::Database, "db", Properties::new())?
//!     .depends_on("vpc");
//! stack.declare(
//!     ResourceKind::Service,
//!     "api",
//!     Properties::from([(
//!         "db_host".to_string(),
//!         Value::Ref(Reference::new("db", "endpoint")),
//!     )]),
//! )?;
//!
//! let document = stack.synthesize()?;
//! let mut state = StackState::new(document.stack.clone());
//! let plan = plan(&document, &state);
//!
//! let executor = GraphExecutor::new(my_provider);
//! let result = executor.apply(&plan, &CancelToken::new());
//! state.record(&plan, &result);
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: Creates, updates, replaces and deletes nodes
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! The engine performs no I/O of its own; loading and saving state, locking
//! and talking to real infrastructure are the caller's concern.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod planner;
pub mod reference;
pub mod state;
pub mod synth;
pub mod types;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{PropertyChange, diff_properties, replacement_reason};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{
    ApplyResult, ApplySummary, DEFAULT_JOBS, ExecuteOutcome, Executor, GraphExecutor, NodeOutcome,
    NodeRequest, Outputs, Provider, execute,
};
pub use graph::DependencyGraph;
pub use node::{ResourceNode, Stack, validate_logical_id};
pub use planner::{
    Action, DEPENDS_ON_ATTRIBUTE, PLAN_FORMAT_VERSION, Plan, PlanSummary, PlannedChange,
    TAGS_ATTRIBUTE, plan,
};
pub use reference::{DeferredToken, LOGICAL_ID_ATTRIBUTE, Reference, Resolution, Resolver};
pub use state::{RecordSummary, ResourceSnapshot, STATE_FORMAT_VERSION, StackState};
pub use synth::{DOCUMENT_FORMAT_VERSION, Document, DocumentEntry, Synthesizer, synthesize};
pub use types::{Properties, ResourceKind, StackContext, Value, lookup_attribute};
