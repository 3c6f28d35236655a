use anyhow::Result;
use serde::Serialize;

use super::{Workspace, print_json, report_lints};
use crate::Context;
use crate::ui;

#[derive(Serialize)]
struct ValidateReport<'a> {
    stack: String,
    resources: usize,
    fingerprint: &'a str,
    warnings: Vec<String>,
}

/// Declare, resolve and order the stack without touching state
pub fn run(ctx: &Context) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let document = workspace.stack.synthesize()?;
    let warnings = report_lints(ctx, &workspace.stack);

    if ctx.json() {
        return print_json(&ValidateReport {
            stack: document.stack.clone(),
            resources: document.entries.len(),
            fingerprint: &document.fingerprint,
            warnings: warnings.iter().map(ToString::to_string).collect(),
        });
    }

    if !ctx.quiet {
        ui::success(&format!(
            "{} is valid: {} resources from {}",
            document.stack,
            document.entries.len(),
            workspace.path.display()
        ));
        if ctx.verbose > 0 {
            ui::kv("stage", &workspace.stage);
            ui::kv("fingerprint", &document.fingerprint);
        }
    }
    Ok(())
}
