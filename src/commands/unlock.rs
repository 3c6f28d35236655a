use anyhow::Result;
use topology::ConfirmCallback;

use super::Workspace;
use crate::Context;
use crate::progress::PromptConfirm;
use crate::ui;

/// Remove the state lock of the current stack
pub fn run(ctx: &Context, yes: bool) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let stack_id = workspace.stack_id();
    let store = workspace.store(ctx)?;

    if !store.lock_path(&stack_id).exists() {
        ui::info(&format!("{stack_id} is not locked"));
        return Ok(());
    }

    match store.lock_info(&stack_id)? {
        Some(holder) => ui::warn(&format!(
            "{stack_id} is locked by `{}` (pid {}, user {}) since {}",
            holder.operation,
            holder.pid,
            holder.user,
            holder.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        )),
        None => ui::warn(&format!("{stack_id} has an unreadable lock file")),
    }

    let prompt = "Remove the lock? Only do this if that run is no longer active";
    if !PromptConfirm::new(yes).confirm(prompt)? {
        ui::info("Lock kept");
        return Ok(());
    }

    store.force_unlock(&stack_id)?;
    ui::success(&format!("Removed lock for {stack_id}"));
    Ok(())
}
