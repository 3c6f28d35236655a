//! Terminal progress and confirmation for apply and destroy.

use anyhow::{Result, bail};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use topology::{Action, ConfirmCallback, NodeOutcome, ProgressCallback};

use crate::ui;

/// Build the apply progress bar; hidden when output is quiet or machine-readable
pub fn apply_bar(total: usize, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

/// Drives an indicatif bar from executor callbacks.
///
/// Completed nodes are printed above the bar; the caller keeps a clone of
/// the bar to clear it once the run is over.
pub struct BarProgress {
    pb: ProgressBar,
}

impl BarProgress {
    pub fn new(pb: ProgressBar) -> Self {
        Self { pb }
    }
}

impl ProgressCallback for BarProgress {
    fn on_wave_start(&mut self, wave: usize, count: usize) {
        log::debug!("wave {wave}: {count} node(s)");
        self.pb.set_message(format!("wave {wave}"));
    }

    fn on_node_start(&mut self, id: &str, action: Action) {
        self.pb.set_message(ui::truncate(&format!("{action} {id}"), 40));
    }

    fn on_node_complete(&mut self, id: &str, outcome: &NodeOutcome) {
        let line = match outcome {
            NodeOutcome::Success {
                action: Action::NoOp,
                ..
            } => None,
            NodeOutcome::Success { action, .. } => Some(format!("{action} {id}")),
            NodeOutcome::Failed { reason } => Some(format!("{id} ({})", reason.red())),
            NodeOutcome::Skipped { reason } => Some(format!("{id} ({})", reason.dimmed())),
        };

        if let Some(line) = line {
            let symbol = ui::outcome_symbol(outcome);
            self.pb.suspend(|| println!("  {symbol} {line}"));
        }
        self.pb.inc(1);
    }

    fn on_wave_complete(&mut self, wave: usize) {
        log::debug!("wave {wave} complete");
    }
}

/// Interactive yes/no prompt, or a fixed answer when `--yes` was given
pub struct PromptConfirm {
    assume_yes: bool,
}

impl PromptConfirm {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }

        // Never hang waiting on a pipe
        if !std::io::stdin().is_terminal() {
            bail!("Confirmation required but stdin is not a terminal; pass --yes to proceed");
        }

        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()?;

        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topology::Properties;

    #[test]
    fn test_assume_yes_skips_prompt() {
        let mut confirm = PromptConfirm::new(true);
        assert!(confirm.confirm("Apply?").unwrap());
    }

    #[test]
    fn test_hidden_bar_counts_completions() {
        let pb = apply_bar(3, false).unwrap();
        let mut progress = BarProgress::new(pb.clone());

        progress.on_wave_start(1, 3);
        progress.on_node_start("vpc", Action::Create);
        progress.on_node_complete(
            "vpc",
            &NodeOutcome::Success {
                action: Action::Create,
                properties: Properties::new(),
                outputs: Properties::new(),
            },
        );
        progress.on_node_complete(
            "db",
            &NodeOutcome::Failed {
                reason: "quota exceeded".into(),
            },
        );
        progress.on_node_complete(
            "svc",
            &NodeOutcome::Skipped {
                reason: "dependency db failed".into(),
            },
        );
        progress.on_wave_complete(1);

        assert_eq!(pb.position(), 3);
    }

    #[test]
    fn test_visible_bar_has_length() {
        let pb = apply_bar(5, true).unwrap();
        assert_eq!(pb.length(), Some(5));
        pb.finish_and_clear();
    }
}
