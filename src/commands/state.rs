use anyhow::{Result, bail};
use colored::Colorize;

use super::{Workspace, open_store, print_json};
use crate::Context;
use crate::config::ToolConfig;
use crate::ui;

/// Show recorded state for the current stack, or for one resource
pub fn show(ctx: &Context, id: Option<&str>) -> Result<()> {
    let workspace = Workspace::load(ctx)?;
    let stack_id = workspace.stack_id();
    let state = workspace.store(ctx)?.load(&stack_id)?;

    if let Some(id) = id {
        let Some(snapshot) = state.get(id) else {
            bail!("{id} is not recorded in the state of {stack_id}");
        };
        if ctx.json() {
            return print_json(snapshot);
        }

        ui::header(&format!("{id} ({})", snapshot.kind));
        if let Some(at) = snapshot.applied_at {
            ui::kv("applied", &at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        }
        if !snapshot.depends_on.is_empty() {
            ui::kv("depends on", &snapshot.depends_on.join(", "));
        }
        ui::section("Properties");
        for (name, value) in &snapshot.properties {
            ui::kv(name, &value.render());
        }
        ui::section("Outputs");
        for (name, value) in &snapshot.outputs {
            ui::kv(name, &value.render());
        }
        return Ok(());
    }

    if ctx.json() {
        return print_json(&state);
    }

    ui::header(&format!("State: {stack_id}"));
    ui::kv("serial", &state.serial.to_string());
    match state.last_applied {
        Some(at) => ui::kv("last applied", &at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        None => ui::kv("last applied", "never"),
    }

    if state.is_empty() {
        println!();
        ui::dim("No resources recorded");
        return Ok(());
    }

    ui::section("Resources");
    for (id, snapshot) in &state.resources {
        let primary = snapshot
            .outputs
            .get("id")
            .map(|v| v.render())
            .unwrap_or_default();
        println!(
            "  {} {:<30} {:<16} {}",
            "●".green(),
            id,
            snapshot.kind.as_str(),
            ui::truncate(&primary, 40).dimmed()
        );
    }

    if !state.outputs.is_empty() {
        ui::section("Outputs");
        for (name, value) in &state.outputs {
            ui::kv(name, &value.render());
        }
    }
    Ok(())
}

/// List every stack with recorded state
pub fn list(ctx: &Context) -> Result<()> {
    let config = ToolConfig::load()?;
    let store = open_store(ctx, &config)?;
    let entries = store.list()?;

    if ctx.json() {
        return print_json(&entries);
    }

    if entries.is_empty() {
        ui::info(&format!("No state recorded in {}", store.dir().display()));
        return Ok(());
    }

    ui::header("Stacks");
    for entry in &entries {
        let applied = entry
            .last_applied
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let lock = if entry.locked {
            format!(" {}", "[locked]".yellow())
        } else {
            String::new()
        };
        println!(
            "  {:<30} serial {:<5} {:>3} resources  {}{}",
            entry.stack,
            entry.serial,
            entry.resources,
            applied.dimmed(),
            lock
        );
    }
    Ok(())
}
