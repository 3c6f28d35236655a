use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackplan")]
#[command(version)]
#[command(
    about = "Declare infrastructure stacks as resource graphs, then plan and apply them",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file (TOML or JSON); defaults to ./stackplan.toml
    #[arg(short, long, global = true, env = "STACKPLAN_FILE")]
    pub file: Option<PathBuf>,

    /// Deployment stage, overriding the stack file
    #[arg(long, global = true, env = "STACKPLAN_STAGE")]
    pub stage: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Directory holding state and lock files
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the stack file: ids, references, dependency cycles, lints
    Validate,

    /// Synthesize the deployment document
    Synth {
        /// Write the document to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show what apply would change
    Plan {
        /// Save the plan for a later `apply --plan`
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show attribute-level differences against recorded state
    Diff,

    /// Apply changes through the configured provider
    Apply(ApplyArgs),

    /// Delete every recorded resource of the stack
    Destroy(DestroyArgs),

    /// Inspect recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Remove a stale state lock left by an interrupted run
    ForceUnlock {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Apply a plan saved with `plan --out` instead of planning now
    #[arg(short, long)]
    pub plan: Option<PathBuf>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel jobs per wave
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel jobs per wave
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// Show the recorded state of the current stack, or of one resource
    Show {
        /// Logical id of a single resource
        id: Option<String>,
    },

    /// List every stack with recorded state
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stackplan", "plan", "--stage", "prod", "-f", "erp.toml", "-vv", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.stage.as_deref(), Some("prod"));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Plan { out: None }));
    }

    #[test]
    fn test_apply_args() {
        let cli = Cli::try_parse_from(["stackplan", "apply", "--plan", "p.json", "-y", "-j", "8"])
            .unwrap();
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.plan, Some(PathBuf::from("p.json")));
                assert!(args.yes);
                assert_eq!(args.jobs, Some(8));
            }
            _ => panic!("expected apply"),
        }
    }
}
