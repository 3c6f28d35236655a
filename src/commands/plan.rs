use anyhow::{Context as _, Result};
use std::fs;
use std::path::Path;
use topology::Plan;

use super::{Workspace, print_json, report_lints};
use crate::Context;
use crate::engine::display_plan;
use crate::ui;

/// Synthesize, load state under the lock and compute the plan
pub fn compute(ctx: &Context, workspace: &Workspace) -> Result<Plan> {
    let document = workspace.stack.synthesize()?;
    let store = workspace.store(ctx)?;
    let stack_id = workspace.stack_id();

    let _lock = store.lock(&stack_id, "plan")?;
    let state = store.load(&stack_id)?;
    let plan = topology::plan(&document, &state);

    log::info!("Planned {}: {}", stack_id, plan.summary());
    Ok(plan)
}

pub fn run(ctx: &Context, out: Option<&Path>) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    report_lints(ctx, &workspace.stack);
    let plan = compute(ctx, &workspace)?;

    if let Some(path) = out {
        let json = plan.to_json_pretty()?;
        fs::write(path, format!("{json}\n"))
            .with_context(|| format!("Failed to write plan: {}", path.display()))?;
    }

    if ctx.json() {
        return print_json(&plan);
    }

    if !ctx.quiet {
        display_plan(&plan, ctx.verbose > 0);
        if let Some(path) = out {
            println!();
            ui::info(&format!(
                "Plan saved to {}; run `stackplan apply --plan {}` to apply it",
                path.display(),
                path.display()
            ));
        }
    }
    Ok(())
}
