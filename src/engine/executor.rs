//! Apply orchestration with terminal UI: progress, confirmation, summary

use anyhow::Result;
use colored::Colorize;
use topology::{
    ApplyResult, ApplySummary, CancelToken, DEFAULT_JOBS, ExecuteOutcome, GraphExecutor,
    NodeOutcome, Plan, StackState,
};

use crate::progress::{self, BarProgress, PromptConfirm};
use crate::provider::StackProvider;

/// Options for one apply or destroy run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of nodes applied concurrently within a wave
    pub jobs: usize,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Draw the progress bar and summary
    pub interactive: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            yes: false,
            interactive: true,
        }
    }
}

/// Confirm, apply and record `plan` through `provider`.
///
/// `state` is updated in place; the caller persists it.
pub fn execute(
    plan: &Plan,
    state: &mut StackState,
    provider: StackProvider,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
) -> Result<ExecuteOutcome> {
    let total = plan.changes.len();
    let pb = progress::apply_bar(total, opts.interactive)?;

    log::info!(
        "Applying {} through {} with {} job(s)",
        plan.stack,
        provider.name(),
        opts.jobs
    );

    let executor = GraphExecutor::new(provider)
        .with_jobs(opts.jobs)
        .with_progress(BarProgress::new(pb.clone()));
    let mut confirm = PromptConfirm::new(opts.yes);

    // The bar stays undrawn until the first node reports, after the prompt
    let outcome = topology::execute(&executor, plan, state, &mut confirm, cancel);
    pb.finish_and_clear();

    let outcome = outcome?;
    if opts.interactive
        && let ExecuteOutcome::Applied(result) = &outcome
    {
        print_summary(result);
    }
    Ok(outcome)
}

/// Print final summary
pub fn print_summary(result: &ApplyResult) {
    let summary: ApplySummary = result.summary();

    println!();
    if result.cancelled {
        println!("  {} Apply cancelled", "⚠".yellow().bold());
    } else if summary.is_success() {
        println!("  {} Stack applied successfully!", "✓".green().bold());
    } else {
        println!("  {} Stack applied with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
        for (id, outcome) in &result.outcomes {
            if let NodeOutcome::Failed { reason } = outcome {
                println!("      {} {}: {}", "✗".red(), id, reason);
            }
        }
    }
}
