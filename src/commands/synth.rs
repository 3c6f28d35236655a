use anyhow::{Context as _, Result};
use std::fs;
use std::path::Path;

use super::Workspace;
use crate::Context;
use crate::ui;

/// Emit the deployment document to stdout or a file
pub fn run(ctx: &Context, out: Option<&Path>) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let document = workspace.stack.synthesize()?;
    let json = document.to_json_pretty()?;

    match out {
        Some(path) => {
            fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write document: {}", path.display()))?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Wrote {} ({} resources) to {}",
                    document.stack,
                    document.entries.len(),
                    path.display()
                ));
            }
        }
        None => println!("{json}"),
    }
    Ok(())
}
