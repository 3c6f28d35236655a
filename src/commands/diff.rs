use anyhow::Result;
use serde::Serialize;
use topology::{Action, PropertyChange};

use super::{Workspace, plan::compute, print_json};
use crate::Context;
use crate::engine::display_diff;

#[derive(Serialize)]
struct DiffEntry<'a> {
    logical_id: &'a str,
    action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    changes: &'a [PropertyChange],
}

/// Attribute-level differences between the stack file and recorded state
pub fn run(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let plan = compute(ctx, &workspace)?;

    if ctx.json() {
        let entries: Vec<DiffEntry<'_>> = plan
            .changes
            .iter()
            .filter(|c| c.action.is_change())
            .map(|c| DiffEntry {
                logical_id: &c.logical_id,
                action: c.action,
                reason: c.reason.as_deref(),
                changes: &c.changed_attributes,
            })
            .collect();
        return print_json(&entries);
    }

    display_diff(&plan);
    Ok(())
}
