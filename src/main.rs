mod cli;
mod commands;
mod config;
mod engine;
mod lint;
mod paths;
mod progress;
mod provider;
mod store;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, OutputFormat, StateCommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use topology::CancelToken;

use crate::store::StoreError;

/// Exit code when another run holds the state lock
const EXIT_LOCKED: u8 = 7;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub format: OutputFormat,
    pub file: Option<PathBuf>,
    pub stage: Option<String>,
    pub state_dir: Option<PathBuf>,
    /// Set by Ctrl-C; checked between apply waves
    pub cancel: CancelToken,
}

impl Context {
    pub fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Progress bars, plan boxes and summaries are drawn
    pub fn interactive(&self) -> bool {
        !self.quiet && !self.json()
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupt received; finishing in-flight resources, then stopping");
        handler_token.cancel();
    }) {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        format: cli.format,
        file: cli.file,
        stage: cli.stage,
        state_dir: cli.state_dir,
        cancel,
    };

    let result = match cli.command {
        Command::Validate => commands::validate::run(&ctx),
        Command::Synth { out } => commands::synth::run(&ctx, out.as_deref()),
        Command::Plan { out } => commands::plan::run(&ctx, out.as_deref()),
        Command::Diff => commands::diff::run(&ctx),
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Destroy(args) => commands::destroy::run(&ctx, args),
        Command::State(cmd) => match cmd {
            StateCommand::Show { id } => commands::state::show(&ctx, id.as_deref()),
            StateCommand::List => commands::state::list(&ctx),
        },
        Command::ForceUnlock { yes } => commands::unlock::run(&ctx, yes),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "stackplan", &mut io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Map an error to the documented process exit code
fn exit_code(error: &anyhow::Error) -> u8 {
    if let Some(e) = error.downcast_ref::<topology::Error>() {
        return e.exit_code();
    }
    if let Some(StoreError::Locked { .. }) = error.downcast_ref::<StoreError>() {
        return EXIT_LOCKED;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_exit_codes() {
        let cycle: anyhow::Error = topology::Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        }
        .into();
        assert_eq!(exit_code(&cycle), 5);

        let wrapped = Err::<(), _>(topology::Error::DuplicateId("vpc".into()))
            .context("Failed to load stack")
            .unwrap_err();
        assert_eq!(exit_code(&wrapped), 3);

        let locked: anyhow::Error = StoreError::Locked {
            stack: "erp-dev".into(),
            holder: store::LockInfo::new("apply"),
        }
        .into();
        assert_eq!(exit_code(&locked), EXIT_LOCKED);

        assert_eq!(exit_code(&anyhow::anyhow!("disk full")), 1);
    }
}
