use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use topology::{ApplySummary, Document, ExecuteOutcome, NodeOutcome, Plan, StackState, Value};

use super::{Workspace, print_json, report_lints};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, ExecuteOptions, display_plan};
use crate::provider::StackProvider;
use crate::store::StateStore;
use crate::ui;

/// Machine-readable result of apply and destroy
#[derive(Serialize)]
pub struct ApplyReport<'a> {
    pub stack: &'a str,
    pub status: &'static str,
    pub serial: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ApplySummary>,
    pub outcomes: BTreeMap<&'a str, &'a NodeOutcome>,
    pub outputs: &'a BTreeMap<String, Value>,
}

enum PlanSource<'a> {
    Saved(&'a Path),
    Fresh(Document),
}

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let stack_id = workspace.stack_id();

    // A saved plan is applied as-is; otherwise plan now from the stack file
    let source = match &args.plan {
        Some(path) => PlanSource::Saved(path),
        None => {
            report_lints(ctx, &workspace.stack);
            PlanSource::Fresh(workspace.stack.synthesize()?)
        }
    };

    let store = workspace.store(ctx)?;
    let _lock = store.lock(&stack_id, "apply")?;
    let mut state = store.load(&stack_id)?;

    let plan = match source {
        PlanSource::Saved(path) => load_plan(path, &stack_id)?,
        PlanSource::Fresh(document) => topology::plan(&document, &state),
    };

    let opts = ExecuteOptions {
        jobs: workspace.jobs(args.jobs),
        yes: args.yes,
        interactive: ctx.interactive(),
    };
    let provider = StackProvider::from_config(&workspace.file.provider);

    run_plan(ctx, &store, &plan, &mut state, provider, &opts)
}

/// Show, confirm, execute and persist a plan; shared with destroy
pub fn run_plan(
    ctx: &Context,
    store: &StateStore,
    plan: &Plan,
    state: &mut StackState,
    provider: StackProvider,
    opts: &ExecuteOptions,
) -> Result<()> {
    if opts.interactive {
        display_plan(plan, ctx.verbose > 0);
    }

    let outcome = engine::execute(plan, state, provider, opts, &ctx.cancel)?;

    match outcome {
        ExecuteOutcome::NoChanges => {
            if ctx.json() {
                print_json(&report(plan, state, "no_changes", None))?;
            }
            Ok(())
        }
        ExecuteOutcome::Declined => {
            if ctx.json() {
                print_json(&report(plan, state, "declined", None))?;
            } else {
                println!();
                println!("  {} Aborted", "✗".red());
            }
            Ok(())
        }
        ExecuteOutcome::Applied(result) => {
            // Persist before reporting so a partial failure is still recorded
            store.save(state)?;

            if ctx.json() {
                let status = if result.is_success() { "applied" } else { "failed" };
                let mut body = report(plan, state, status, Some(result.summary()));
                body.outcomes = result
                    .outcomes
                    .iter()
                    .map(|(id, outcome)| (id.as_str(), outcome))
                    .collect();
                print_json(&body)?;
            } else if !ctx.quiet && !state.outputs.is_empty() {
                ui::section("Outputs");
                for (name, value) in &state.outputs {
                    ui::kv(name, &value.render());
                }
            }

            result.into_result()?;
            Ok(())
        }
    }
}

fn report<'a>(
    plan: &'a Plan,
    state: &'a StackState,
    status: &'static str,
    summary: Option<ApplySummary>,
) -> ApplyReport<'a> {
    ApplyReport {
        stack: &plan.stack,
        status,
        serial: state.serial,
        summary,
        outcomes: BTreeMap::new(),
        outputs: &state.outputs,
    }
}

/// Read a plan saved by `plan --out` and check it belongs to this stack
pub fn load_plan(path: &Path, stack_id: &str) -> Result<Plan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    let plan = Plan::from_json(&content)
        .with_context(|| format!("Failed to parse plan file: {}", path.display()))?;

    if plan.format_version != topology::PLAN_FORMAT_VERSION {
        bail!(
            "Plan file {} has format version {}, expected {}",
            path.display(),
            plan.format_version,
            topology::PLAN_FORMAT_VERSION
        );
    }
    if plan.stack != stack_id {
        bail!(
            "Plan file {} was computed for {}, not {}",
            path.display(),
            plan.stack,
            stack_id
        );
    }

    log::debug!("Loaded plan from {} ({})", path.display(), plan.summary());
    Ok(plan)
}
