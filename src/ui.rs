use colored::{ColoredString, Colorize};
use topology::{Action, NodeOutcome};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Plan symbol for an action
pub fn action_symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Replace => "±".magenta(),
        Action::Delete => "-".red(),
        Action::NoOp => "○".dimmed(),
    }
}

/// Result symbol for a node outcome
pub fn outcome_symbol(outcome: &NodeOutcome) -> ColoredString {
    match outcome {
        NodeOutcome::Success {
            action: Action::NoOp,
            ..
        } => "○".dimmed(),
        NodeOutcome::Success { .. } => "✓".green(),
        NodeOutcome::Failed { .. } => "✗".red(),
        NodeOutcome::Skipped { .. } => "⊘".yellow(),
    }
}

/// Truncate a string for single-line display, keeping the start
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("vpc", 10), "vpc");
        assert_eq!(truncate("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("arn:aws:rds:us-east-1:db", 10), "arn:aws...");
    }

    #[test]
    fn test_truncate_edge_cases() {
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("", 10), "");
    }
}
