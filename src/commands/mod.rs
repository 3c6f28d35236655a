//! Subcommand implementations

pub mod apply;
pub mod destroy;
pub mod diff;
pub mod plan;
pub mod state;
pub mod synth;
pub mod unlock;
pub mod validate;

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use topology::{DEFAULT_JOBS, Stack};

use crate::Context;
use crate::config::{StackFile, ToolConfig};
use crate::lint::{self, LintWarning};
use crate::store::StateStore;
use crate::ui;

/// A loaded stack file with its resolved settings
pub struct Workspace {
    pub config: ToolConfig,
    pub path: PathBuf,
    pub file: StackFile,
    pub stage: String,
    pub stack: Stack,
}

impl Workspace {
    /// Load the tool config and the stack file, and declare the stack
    pub fn load(ctx: &Context) -> Result<Self> {
        let config = ToolConfig::load()?;
        let path = config.stack_file(ctx.file.as_deref());
        let file = StackFile::load(&path)?;
        let stage = file.stage(ctx.stage.as_deref(), &config);
        let stack = file.to_stack(&stage)?;

        log::info!(
            "Declared {} resources for {} from {}",
            stack.len(),
            stack.context().stack_id(),
            path.display()
        );

        Ok(Self {
            config,
            path,
            file,
            stage,
            stack,
        })
    }

    pub fn stack_id(&self) -> String {
        self.stack.context().stack_id()
    }

    pub fn store(&self, ctx: &Context) -> Result<StateStore> {
        open_store(ctx, &self.config)
    }

    /// Parallel jobs: CLI, then config, then the engine default
    pub fn jobs(&self, cli: Option<usize>) -> usize {
        cli.or(self.config.jobs).unwrap_or(DEFAULT_JOBS).max(1)
    }
}

/// Open the state store without needing a stack file
pub fn open_store(ctx: &Context, config: &ToolConfig) -> Result<StateStore> {
    let dir = config.state_dir(ctx.state_dir.as_deref())?;
    log::debug!("State directory: {}", dir.display());
    Ok(StateStore::new(dir))
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run lints and print them as warnings in text mode
pub fn report_lints(ctx: &Context, stack: &Stack) -> Vec<LintWarning> {
    let warnings = lint::lint(stack);
    if !ctx.json() && !ctx.quiet {
        for warning in &warnings {
            ui::warn(&warning.to_string());
        }
    }
    warnings
}
