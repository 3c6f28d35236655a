//! Execution engine - applies a plan wave by wave through a provider
//!
//! Nodes whose producers have all finished form a wave; a wave runs in
//! parallel on a bounded rayon pool. A failed node causes every transitive
//! dependent to be skipped, while independent subtrees keep going.

use crate::context::{CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
use crate::diff::PropertyChange;
use crate::error::Error;
use crate::planner::{Action, Plan, PlannedChange};
use crate::reference::DeferredToken;
use crate::state::{ResourceSnapshot, StackState};
use crate::types::{Properties, ResourceKind, Value, lookup_attribute};
use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Attributes reported by a provider after creating or updating a node
pub type Outputs = Properties;

/// Default number of nodes applied concurrently within a wave
pub const DEFAULT_JOBS: usize = 4;

// ============================================================================
// Outcomes
// ============================================================================

/// Result of applying one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The provider applied the action (or nothing was needed)
    Success {
        action: Action,
        /// Concrete properties as applied
        #[serde(default)]
        properties: Properties,
        /// Attributes reported by the provider
        #[serde(default)]
        outputs: Outputs,
    },
    /// The provider reported an error
    Failed { reason: String },
    /// Not attempted (failed dependency or cancellation)
    Skipped { reason: String },
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Success { .. })
    }

    /// Look up an attribute on a successful outcome
    pub fn attribute(&self, path: &str) -> Option<Value> {
        match self {
            NodeOutcome::Success {
                properties,
                outputs,
                ..
            } => lookup_attribute(outputs, path).or_else(|| lookup_attribute(properties, path)),
            _ => None,
        }
    }
}

/// Per-node outcomes of one apply run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub outcomes: BTreeMap<String, NodeOutcome>,
    /// True if cancellation stopped the run before every wave started
    #[serde(default)]
    pub cancelled: bool,
}

/// Summary of an apply run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplySummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of nodes processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.skipped
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &NodeOutcome) {
        match outcome {
            NodeOutcome::Success { action, .. } => match action {
                Action::Create => self.created += 1,
                Action::Update => self.updated += 1,
                Action::Replace => self.replaced += 1,
                Action::Delete => self.deleted += 1,
                Action::NoOp => self.unchanged += 1,
            },
            NodeOutcome::Failed { .. } => self.failed += 1,
            NodeOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

impl ApplyResult {
    pub fn get(&self, logical_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(logical_id)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, NodeOutcome::Failed { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, NodeOutcome::Skipped { .. }))
            .count()
    }

    /// True if every node succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(NodeOutcome::is_success)
    }

    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for outcome in self.outcomes.values() {
            summary.add_outcome(outcome);
        }
        summary
    }

    /// Turn a partial failure into [`Error::ApplyPartialFailure`]
    pub fn into_result(self) -> crate::error::Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::ApplyPartialFailure(self))
        }
    }
}

// ============================================================================
// Provider and Executor traits
// ============================================================================

/// Everything a provider needs to act on one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeRequest<'a> {
    /// Stack identifier (`<name>-<stage>`)
    pub stack: &'a str,
    pub logical_id: &'a str,
    pub kind: ResourceKind,
    /// Concrete properties; every deferred token already substituted
    pub properties: &'a Properties,
    /// Attribute changes driving an update or replace
    pub changed_attributes: &'a [PropertyChange],
    /// Stack tags merged with node tags
    pub tags: &'a BTreeMap<String, String>,
    /// Recorded snapshot, if the node exists
    pub prior: Option<&'a ResourceSnapshot>,
}

/// Backend that turns planned actions into real infrastructure
pub trait Provider: Send + Sync {
    /// Create the node and report its attributes
    fn create(&self, request: &NodeRequest<'_>) -> Result<Outputs>;

    /// Update the node in place and report its attributes
    fn update(&self, request: &NodeRequest<'_>) -> Result<Outputs>;

    /// Replace the node with a new object
    fn replace(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.delete(request)?;
        self.create(request)
    }

    /// Delete the node
    fn delete(&self, request: &NodeRequest<'_>) -> Result<()>;
}

/// Applies plans
pub trait Executor {
    /// Apply every change in `plan`, returning one outcome per node
    fn apply(&self, plan: &Plan, cancel: &CancelToken) -> ApplyResult;

    /// Delete every recorded node, dependents first
    fn destroy(&self, stack: &str, state: &StackState, cancel: &CancelToken) -> ApplyResult {
        self.apply(&Plan::teardown(stack, state), cancel)
    }
}

// ============================================================================
// Graph executor
// ============================================================================

/// Executor that runs plan waves in parallel through a [`Provider`]
pub struct GraphExecutor<P: Provider> {
    provider: P,
    jobs: usize,
    progress: Mutex<Box<dyn ProgressCallback>>,
}

impl<P: Provider> GraphExecutor<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            jobs: DEFAULT_JOBS,
            progress: Mutex::new(Box::new(NoProgress)),
        }
    }

    /// Set the number of parallel jobs per wave (at least 1)
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressCallback + 'static) -> Self {
        self.progress = Mutex::new(Box::new(progress));
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn report(&self, f: impl FnOnce(&mut dyn ProgressCallback)) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        f(progress.as_mut());
    }

    fn apply_node(&self, stack: &str, change: &PlannedChange, properties: &Properties) -> NodeOutcome {
        let request = NodeRequest {
            stack,
            logical_id: &change.logical_id,
            kind: change.kind,
            properties,
            changed_attributes: &change.changed_attributes,
            tags: &change.tags,
            prior: change.prior.as_ref(),
        };

        let outputs = match change.action {
            Action::Create => self.provider.create(&request),
            Action::Update => self.provider.update(&request),
            Action::Replace => self.provider.replace(&request),
            Action::Delete => self.provider.delete(&request).map(|()| Outputs::new()),
            Action::NoOp => Ok(change
                .prior
                .as_ref()
                .map(|p| p.outputs.clone())
                .unwrap_or_default()),
        };

        match outputs {
            Ok(outputs) => NodeOutcome::Success {
                action: change.action,
                properties: properties.clone(),
                outputs,
            },
            Err(e) => {
                log::warn!("{} {} failed: {e:#}", change.action, change.logical_id);
                NodeOutcome::Failed {
                    reason: format!("{e:#}"),
                }
            }
        }
    }
}

impl<P: Provider> Executor for GraphExecutor<P> {
    fn apply(&self, plan: &Plan, cancel: &CancelToken) -> ApplyResult {
        let mut result = ApplyResult::default();
        let waves = waves(plan);
        let blockers = blockers(plan);

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!("failed to create thread pool, applying sequentially: {e}");
                None
            }
        };

        for (index, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!("apply cancelled before wave {}", index + 1);
                result.cancelled = true;
                for change in waves[index..].iter().flatten() {
                    let outcome = NodeOutcome::Skipped {
                        reason: "cancelled".to_string(),
                    };
                    self.report(|p| p.on_node_complete(&change.logical_id, &outcome));
                    result.outcomes.insert(change.logical_id.clone(), outcome);
                }
                break;
            }

            self.report(|p| p.on_wave_start(index + 1, wave.len()));

            // Resolve inputs against earlier waves; nodes that cannot run are settled here.
            let mut ready: Vec<(&PlannedChange, Properties)> = Vec::with_capacity(wave.len());
            for change in wave {
                let settled = match blocked_by(&result, &blockers, &change.logical_id) {
                    Some(reason) => Err(NodeOutcome::Skipped { reason }),
                    None => resolve_properties(change, plan, &result)
                        .map_err(|reason| NodeOutcome::Failed { reason }),
                };
                match settled {
                    Ok(properties) => {
                        self.report(|p| p.on_node_start(&change.logical_id, change.action));
                        ready.push((change, properties));
                    }
                    Err(outcome) => {
                        self.report(|p| p.on_node_complete(&change.logical_id, &outcome));
                        result.outcomes.insert(change.logical_id.clone(), outcome);
                    }
                }
            }

            let completed = self.run_wave(&plan.stack, &ready, pool.as_ref());
            for (id, outcome) in completed {
                self.report(|p| p.on_node_complete(&id, &outcome));
                result.outcomes.insert(id, outcome);
            }

            self.report(|p| p.on_wave_complete(index + 1));
        }

        let summary = result.summary();
        log::info!(
            "apply finished for {}: {} changed, {} failed, {} skipped",
            plan.stack,
            summary.total_changes(),
            summary.failed,
            summary.skipped
        );
        result
    }
}

impl<P: Provider> GraphExecutor<P> {
    fn run_wave(
        &self,
        stack: &str,
        ready: &[(&PlannedChange, Properties)],
        pool: Option<&rayon::ThreadPool>,
    ) -> Vec<(String, NodeOutcome)> {
        let run = |(change, properties): &(&PlannedChange, Properties)| {
            (
                change.logical_id.clone(),
                self.apply_node(stack, change, properties),
            )
        };

        match pool {
            Some(pool) if self.jobs > 1 && ready.len() > 1 => {
                let results: Arc<Mutex<Vec<(String, NodeOutcome)>>> =
                    Arc::new(Mutex::new(Vec::with_capacity(ready.len())));
                pool.install(|| {
                    ready.par_iter().for_each(|item| {
                        push_outcome(&results, run(item));
                    });
                });
                into_outcomes(results)
            }
            _ => ready.iter().map(run).collect(),
        }
    }
}

fn push_outcome(results: &Arc<Mutex<Vec<(String, NodeOutcome)>>>, outcome: (String, NodeOutcome)) {
    match results.lock() {
        Ok(mut locked) => locked.push(outcome),
        Err(poisoned) => poisoned.into_inner().push(outcome),
    }
}

fn into_outcomes(results: Arc<Mutex<Vec<(String, NodeOutcome)>>>) -> Vec<(String, NodeOutcome)> {
    let mutex = match Arc::try_unwrap(results) {
        Ok(mutex) => mutex,
        Err(shared) => {
            let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            return guard.clone();
        }
    };
    match mutex.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Group plan changes into waves.
///
/// A non-delete runs after its in-plan producers. Deletes run after every
/// non-delete, and each delete after the deletes of its consumers.
fn waves(plan: &Plan) -> Vec<Vec<&PlannedChange>> {
    let mut level: BTreeMap<&str, usize> = BTreeMap::new();
    let mut max_level = 0;

    for change in plan.changes.iter().filter(|c| c.action != Action::Delete) {
        let l = change
            .depends_on
            .iter()
            .filter_map(|dep| level.get(dep.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        max_level = max_level.max(l + 1);
        level.insert(&change.logical_id, l);
    }

    let base = max_level;
    let deletes: Vec<&PlannedChange> = plan
        .changes
        .iter()
        .filter(|c| c.action == Action::Delete)
        .collect();
    for change in &deletes {
        let l = deletes
            .iter()
            .filter(|consumer| consumer.depends_on.contains(&change.logical_id))
            .filter_map(|consumer| level.get(consumer.logical_id.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(base);
        level.insert(&change.logical_id, l);
    }

    let mut waves: BTreeMap<usize, Vec<&PlannedChange>> = BTreeMap::new();
    for change in &plan.changes {
        if let Some(l) = level.get(change.logical_id.as_str()) {
            waves.entry(*l).or_default().push(change);
        }
    }
    waves.into_values().collect()
}

/// In-plan nodes that must succeed before each node may run
fn blockers(plan: &Plan) -> BTreeMap<&str, Vec<&str>> {
    let in_plan: BTreeMap<&str, Action> = plan
        .changes
        .iter()
        .map(|c| (c.logical_id.as_str(), c.action))
        .collect();

    let mut blockers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for change in &plan.changes {
        let entry = blockers.entry(change.logical_id.as_str()).or_default();
        if change.action == Action::Delete {
            continue;
        }
        for dep in &change.depends_on {
            if matches!(in_plan.get(dep.as_str()), Some(a) if *a != Action::Delete) {
                entry.push(dep.as_str());
            }
        }
    }

    for change in plan.changes.iter().filter(|c| c.action == Action::Delete) {
        for producer in &change.depends_on {
            if in_plan.get(producer.as_str()) == Some(&Action::Delete)
                && let Some(entry) = blockers.get_mut(producer.as_str())
            {
                entry.push(change.logical_id.as_str());
            }
        }
    }

    // A consumer that drops a producer must change before the producer goes
    for change in plan.changes.iter().filter(|c| c.action != Action::Delete) {
        let Some(prior) = &change.prior else {
            continue;
        };
        for producer in &prior.depends_on {
            if in_plan.get(producer.as_str()) == Some(&Action::Delete)
                && let Some(entry) = blockers.get_mut(producer.as_str())
            {
                entry.push(change.logical_id.as_str());
            }
        }
    }
    blockers
}

fn blocked_by(result: &ApplyResult, blockers: &BTreeMap<&str, Vec<&str>>, id: &str) -> Option<String> {
    blockers.get(id)?.iter().find_map(|blocker| match result.get(blocker) {
        Some(NodeOutcome::Failed { .. }) => Some(format!("dependency {blocker} failed")),
        Some(NodeOutcome::Skipped { .. }) => Some(format!("dependency {blocker} was skipped")),
        _ => None,
    })
}

/// Substitute deferred tokens from applied outcomes, falling back to the
/// producer's recorded snapshot.
fn resolve_properties(
    change: &PlannedChange,
    plan: &Plan,
    result: &ApplyResult,
) -> std::result::Result<Properties, String> {
    let lookup = |token: &DeferredToken| {
        result
            .get(token.source())
            .and_then(|outcome| outcome.attribute(token.attribute()))
            .or_else(|| {
                plan.change(token.source())
                    .filter(|producer| !producer.action.produces_new_object())
                    .and_then(|producer| producer.prior.as_ref())
                    .and_then(|prior| prior.attribute(token.attribute()))
            })
    };

    let mut resolved = Properties::new();
    for (name, value) in &change.properties {
        match value.substitute_deferred(&lookup) {
            Some(v) => {
                resolved.insert(name.clone(), v);
            }
            None => {
                let missing = value
                    .deferred_tokens()
                    .into_iter()
                    .find(|&t| lookup(t).is_none())
                    .map_or_else(|| name.clone(), |t| t.reference().to_string());
                return Err(format!("value for {missing} was not reported by the provider"));
            }
        }
    }
    Ok(resolved)
}

/// Outcome of [`execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// The plan contained nothing to do
    NoChanges,
    /// The user declined the confirmation prompt
    Declined,
    /// The plan ran; state has been updated with the result
    Applied(ApplyResult),
}

/// Confirm, apply and record a plan.
///
/// Fails with [`Error::StaleState`] if the plan was computed against a
/// different state serial. Partial failures are recorded and returned as
/// [`ExecuteOutcome::Applied`]; use [`ApplyResult::into_result`] to turn them
/// into an error.
pub fn execute<E, C>(
    executor: &E,
    plan: &Plan,
    state: &mut StackState,
    confirm: &mut C,
    cancel: &CancelToken,
) -> Result<ExecuteOutcome>
where
    E: Executor + ?Sized,
    C: ConfirmCallback,
{
    if plan.state_serial != state.serial {
        return Err(Error::StaleState {
            planned: plan.state_serial,
            current: state.serial,
        }
        .into());
    }

    let summary = plan.summary();
    if !summary.has_changes() {
        return Ok(ExecuteOutcome::NoChanges);
    }

    if !confirm.confirm(&format!("Apply {summary}?"))? {
        return Ok(ExecuteOutcome::Declined);
    }

    let result = executor.apply(plan, cancel);
    state.record(plan, &result);
    Ok(ExecuteOutcome::Applied(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline};
    use crate::node::Stack;
    use crate::planner::plan;
    use crate::reference::Reference;
    use crate::types::StackContext;
    use std::collections::BTreeSet;

    /// Provider that records calls and fails for configured ids
    #[derive(Default)]
    struct MockProvider {
        fail: BTreeSet<String>,
        calls: Mutex<Vec<String>>,
        received: Mutex<BTreeMap<String, Properties>>,
        cancel_after: Option<(String, CancelToken)>,
    }

    impl MockProvider {
        fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn record(&self, op: &str, request: &NodeRequest<'_>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{op} {}", request.logical_id));
            self.received
                .lock()
                .unwrap()
                .insert(request.logical_id.to_string(), request.properties.clone());
            if let Some((id, token)) = &self.cancel_after
                && id == request.logical_id
            {
                token.cancel();
            }
            if self.fail.contains(request.logical_id) {
                anyhow::bail!("{} rejected by backend", request.logical_id);
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provider for MockProvider {
        fn create(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
            self.record("create", request)?;
            Ok(Outputs::from([
                (
                    "endpoint".to_string(),
                    Value::from(format!("{}.local", request.logical_id)),
                ),
                (
                    "arn".to_string(),
                    Value::from(format!("arn:{}", request.logical_id)),
                ),
            ]))
        }

        fn update(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
            self.record("update", request)?;
            Ok(request.prior.map(|p| p.outputs.clone()).unwrap_or_default())
        }

        fn delete(&self, request: &NodeRequest<'_>) -> Result<()> {
            self.record("delete", request)
        }
    }

    fn scenario() -> Stack {
        let mut stack = Stack::new(StackContext::new("erp", "dev"));
        stack
            .declare(ResourceKind::Network, "N1", Properties::new())
            .unwrap();
        stack
            .declare(
                ResourceKind::Database,
                "D1",
                Properties::from([("engine".to_string(), Value::from("postgres"))]),
            )
            .unwrap()
            .depends_on("N1");
        stack
            .declare(
                ResourceKind::Service,
                "S1",
                Properties::from([(
                    "host".to_string(),
                    Value::Ref(Reference::new("D1", "endpoint")),
                )]),
            )
            .unwrap();
        stack
    }

    fn fresh_plan(stack: &Stack) -> Plan {
        plan(&stack.synthesize().unwrap(), &StackState::new("erp-dev"))
    }

    #[test]
    fn test_all_succeed_in_order() {
        let executor = GraphExecutor::new(MockProvider::default()).with_jobs(1);
        let result = executor.apply(&fresh_plan(&scenario()), &CancelToken::new());

        assert!(result.is_success());
        assert_eq!(
            executor.provider().calls(),
            ["create N1", "create D1", "create S1"]
        );
        assert_eq!(result.summary().created, 3);
    }

    #[test]
    fn test_deferred_values_substituted() {
        let executor = GraphExecutor::new(MockProvider::default());
        executor.apply(&fresh_plan(&scenario()), &CancelToken::new());

        let received = executor.provider().received.lock().unwrap().clone();
        assert_eq!(received["S1"]["host"], Value::from("D1.local"));
    }

    #[test]
    fn test_failure_skips_dependents() {
        let executor = GraphExecutor::new(MockProvider::failing(&["D1"]));
        let result = executor.apply(&fresh_plan(&scenario()), &CancelToken::new());

        assert!(result.get("N1").unwrap().is_success());
        assert!(matches!(result.get("D1"), Some(NodeOutcome::Failed { .. })));
        assert!(matches!(
            result.get("S1"),
            Some(NodeOutcome::Skipped { reason }) if reason.contains("D1")
        ));
        assert!(!executor.provider().calls().contains(&"create S1".to_string()));

        let err = result.into_result().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_independent_subtree_continues() {
        let mut stack = scenario();
        stack
            .declare(ResourceKind::LogGroup, "Logs", Properties::new())
            .unwrap();
        let executor = GraphExecutor::new(MockProvider::failing(&["N1"]));
        let result = executor.apply(&fresh_plan(&stack), &CancelToken::new());

        assert!(result.get("Logs").unwrap().is_success());
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.skipped_count(), 2);
    }

    #[test]
    fn test_cancellation_between_waves() {
        let cancel = CancelToken::new();
        let provider = MockProvider {
            cancel_after: Some(("N1".to_string(), cancel.clone())),
            ..Default::default()
        };
        let executor = GraphExecutor::new(provider);
        let result = executor.apply(&fresh_plan(&scenario()), &cancel);

        assert!(result.cancelled);
        assert!(result.get("N1").unwrap().is_success());
        assert!(matches!(result.get("D1"), Some(NodeOutcome::Skipped { .. })));
        assert!(matches!(result.get("S1"), Some(NodeOutcome::Skipped { .. })));
    }

    #[test]
    fn test_execute_records_partial_state_and_retry() {
        let stack = scenario();
        let doc = stack.synthesize().unwrap();
        let mut state = StackState::new("erp-dev");

        let failing = GraphExecutor::new(MockProvider::failing(&["D1"]));
        let first = plan(&doc, &state);
        let outcome = execute(
            &failing,
            &first,
            &mut state,
            &mut AutoConfirm,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Applied(ref r) if !r.is_success()));
        assert!(state.get("N1").is_some());
        assert!(state.get("D1").is_none());
        assert_eq!(state.serial, 1);

        let healthy = GraphExecutor::new(MockProvider::default());
        let retry = plan(&doc, &state);
        assert_eq!(retry.change("N1").unwrap().action, Action::NoOp);
        execute(
            &healthy,
            &retry,
            &mut state,
            &mut AutoConfirm,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(healthy.provider().calls(), ["create D1", "create S1"]);
        assert_eq!(
            state.get("S1").unwrap().properties["host"],
            Value::from("D1.local")
        );
        assert!(!plan(&doc, &state).has_changes());
    }

    #[test]
    fn test_execute_rejects_stale_plan() {
        let stack = scenario();
        let stale = fresh_plan(&stack);
        let mut state = StackState::new("erp-dev");
        state.serial = 3;

        let executor = GraphExecutor::new(MockProvider::default());
        let err = execute(
            &executor,
            &stale,
            &mut state,
            &mut AutoConfirm,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StaleState { planned: 0, current: 3 })
        ));
        assert!(executor.provider().calls().is_empty());
    }

    #[test]
    fn test_execute_declined_changes_nothing() {
        let stack = scenario();
        let plan = fresh_plan(&stack);
        let mut state = StackState::new("erp-dev");
        let executor = GraphExecutor::new(MockProvider::default());

        let outcome = execute(
            &executor,
            &plan,
            &mut state,
            &mut AutoDecline,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(outcome, ExecuteOutcome::Declined);
        assert!(state.is_empty());
    }

    #[test]
    fn test_destroy_deletes_dependents_first() {
        let stack = scenario();
        let doc = stack.synthesize().unwrap();
        let mut state = StackState::new("erp-dev");
        let executor = GraphExecutor::new(MockProvider::default()).with_jobs(1);
        execute(
            &executor,
            &plan(&doc, &state),
            &mut state,
            &mut AutoConfirm,
            &CancelToken::new(),
        )
        .unwrap();

        let destroyer = GraphExecutor::new(MockProvider::default());
        let teardown = Plan::teardown("erp-dev", &state);
        let result = destroyer.destroy("erp-dev", &state, &CancelToken::new());
        state.record(&teardown, &result);

        assert_eq!(
            destroyer.provider().calls(),
            ["delete S1", "delete D1", "delete N1"]
        );
        assert!(state.is_empty());
    }

    #[test]
    fn test_failed_delete_blocks_producer_delete() {
        let stack = scenario();
        let doc = stack.synthesize().unwrap();
        let mut state = StackState::new("erp-dev");
        let executor = GraphExecutor::new(MockProvider::default());
        execute(
            &executor,
            &plan(&doc, &state),
            &mut state,
            &mut AutoConfirm,
            &CancelToken::new(),
        )
        .unwrap();

        let destroyer = GraphExecutor::new(MockProvider::failing(&["S1"]));
        let result = destroyer.destroy("erp-dev", &state, &CancelToken::new());
        assert!(matches!(result.get("S1"), Some(NodeOutcome::Failed { .. })));
        assert!(matches!(result.get("D1"), Some(NodeOutcome::Skipped { .. })));
        assert!(matches!(result.get("N1"), Some(NodeOutcome::Skipped { .. })));
    }

    #[test]
    fn test_failed_consumer_update_blocks_producer_delete() {
        let mut state = StackState::new("erp-dev");
        let executor = GraphExecutor::new(MockProvider::default());
        execute(
            &executor,
            &fresh_plan(&scenario()),
            &mut state,
            &mut AutoConfirm,
            &CancelToken::new(),
        )
        .unwrap();

        // S1 stops using D1, and D1 is removed
        let mut stack = Stack::new(StackContext::new("erp", "dev"));
        stack
            .declare(ResourceKind::Network, "N1", Properties::new())
            .unwrap();
        stack
            .declare(
                ResourceKind::Service,
                "S1",
                Properties::from([("host".to_string(), Value::from("db.example.com"))]),
            )
            .unwrap();
        let next = plan(&stack.synthesize().unwrap(), &state);
        assert_eq!(next.change("S1").unwrap().action, Action::Update);
        assert_eq!(next.change("D1").unwrap().action, Action::Delete);

        let executor = GraphExecutor::new(MockProvider::failing(&["S1"]));
        let result = executor.apply(&next, &CancelToken::new());

        assert_eq!(executor.provider().calls(), ["update S1"]);
        assert!(matches!(result.get("S1"), Some(NodeOutcome::Failed { .. })));
        assert!(matches!(
            result.get("D1"),
            Some(NodeOutcome::Skipped { reason }) if reason.contains("S1")
        ));
    }

    #[test]
    fn test_push_outcome_handles_poisoned_mutex() {
        let results: Arc<Mutex<Vec<(String, NodeOutcome)>>> = Arc::new(Mutex::new(Vec::new()));
        let poisoned = Arc::clone(&results);

        let _ = std::thread::spawn(move || {
            let _guard = poisoned
                .lock()
                .expect("lock should succeed before poisoning");
            panic!("intentional poison");
        })
        .join();

        push_outcome(
            &results,
            (
                "N1".to_string(),
                NodeOutcome::Skipped {
                    reason: "test".into(),
                },
            ),
        );
        assert_eq!(into_outcomes(results).len(), 1);
    }
}
