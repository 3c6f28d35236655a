use anyhow::Result;
use topology::Plan;

use super::Workspace;
use super::apply::run_plan;
use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::ExecuteOptions;
use crate::provider::StackProvider;
use crate::ui;

/// Delete every recorded resource, dependents before their producers
pub fn run(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let stack_id = workspace.stack_id();
    let store = workspace.store(ctx)?;

    let _lock = store.lock(&stack_id, "destroy")?;
    let mut state = store.load(&stack_id)?;

    if state.is_empty() && !ctx.json() {
        if !ctx.quiet {
            ui::info(&format!("Nothing recorded for {stack_id}; nothing to destroy"));
        }
        return Ok(());
    }

    let plan = Plan::teardown(&stack_id, &state);
    let opts = ExecuteOptions {
        jobs: workspace.jobs(args.jobs),
        yes: args.yes,
        interactive: ctx.interactive(),
    };
    let provider = StackProvider::from_config(&workspace.file.provider);

    run_plan(ctx, &store, &plan, &mut state, provider, &opts)
}
