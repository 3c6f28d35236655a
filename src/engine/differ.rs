//! Plan and diff display

use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use topology::{Action, Plan, PlannedChange, PropertyChange, Value};

use crate::ui;

const BOX_RULE: &str = "─────────────────────────────────────────────────────";

/// Display a plan as a boxed list of actions.
///
/// No-op nodes are listed only when `show_unchanged` is set.
pub fn display_plan(plan: &Plan, show_unchanged: bool) {
    if !plan.has_changes() {
        println!();
        println!(
            "  {} No changes. {} matches recorded state.",
            "✓".green(),
            plan.stack
        );
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        format!("Plan: {}", plan.stack).bold()
    );
    println!("│");

    for change in &plan.changes {
        if change.action == Action::NoOp && !show_unchanged {
            continue;
        }

        let note = match (&change.action, &change.reason) {
            (Action::Replace, Some(reason)) => format!("({reason})"),
            (Action::NoOp, _) => "(unchanged)".to_string(),
            _ => String::new(),
        };

        println!(
            "│   {} {:<30} {:<16} {}",
            ui::action_symbol(change.action),
            change.logical_id,
            change.kind.as_str().dimmed(),
            note.dimmed()
        );

        if matches!(change.action, Action::Update | Action::Replace) {
            for attr in &change.changed_attributes {
                println!("│       {}", attribute_line(change, attr));
            }
        }
    }

    println!("│");
    println!("├{BOX_RULE}┤");
    println!("│ Summary: {}", plan.summary().to_string().bold());
    println!("└{BOX_RULE}┘");
}

/// One-line description of an attribute change
fn attribute_line(change: &PlannedChange, attr: &PropertyChange) -> String {
    let forces = topology::replacement_reason(change.kind, attr).is_some();
    let arrow = match (&attr.old, &attr.new) {
        (None, Some(new)) => format!("{} {}", "+".green(), render(new, attr.known)),
        (Some(old), None) => format!("{} {}", "-".red(), ui::truncate(&old.render(), 40)),
        (Some(old), Some(new)) => format!(
            "{} → {}",
            ui::truncate(&old.render(), 40),
            render(new, attr.known)
        ),
        (None, None) => String::new(),
    };
    let marker = if forces {
        format!(" {}", "(forces replacement)".magenta())
    } else {
        String::new()
    };
    format!("{}: {arrow}{marker}", attr.attribute)
}

fn render(value: &Value, known: bool) -> String {
    if known {
        ui::truncate(&value.render(), 40)
    } else {
        "(known after apply)".italic().to_string()
    }
}

/// Display attribute-level differences, with line diffs for multi-line values
pub fn display_diff(plan: &Plan) {
    let mut shown = 0;

    for change in plan.changes.iter().filter(|c| c.action.is_change()) {
        shown += 1;
        println!();
        println!(
            "{} {} {}",
            ui::action_symbol(change.action),
            change.logical_id.bold(),
            format!("({}, {})", change.kind, change.action).dimmed()
        );

        match change.action {
            Action::Create => {
                for (name, value) in &change.properties {
                    let text = if value.is_literal() {
                        value.render_pretty()
                    } else {
                        value.render()
                    };
                    print_lines(name, "+", &text);
                }
            }
            Action::Delete => {
                for (name, value) in &change.properties {
                    print_lines(name, "-", &value.render_pretty());
                }
            }
            _ => {
                if let Some(reason) = &change.reason {
                    println!("  {}", reason.magenta());
                }
                for attr in &change.changed_attributes {
                    print_attribute_diff(attr);
                }
            }
        }
    }

    if shown == 0 {
        println!();
        println!("  {} No differences", "✓".green());
    }
}

fn print_lines(name: &str, sign: &str, text: &str) {
    let colored_sign = if sign == "+" { sign.green() } else { sign.red() };
    let mut lines = text.lines();
    let first = lines.next().unwrap_or("");
    println!("  {colored_sign} {}: {first}", name);
    for line in lines {
        println!("  {colored_sign}   {line}");
    }
}

fn print_attribute_diff(attr: &PropertyChange) {
    println!("  {} {}", "~".yellow(), attr.attribute.bold());

    if !attr.known {
        if let Some(old) = &attr.old {
            println!("    {} {}", "-".red(), old.render());
        }
        println!("    {} {}", "+".green(), "(known after apply)".italic());
        return;
    }

    let old = attr.old.as_ref().map(Value::render_pretty).unwrap_or_default();
    let new = attr.new.as_ref().map(Value::render_pretty).unwrap_or_default();

    for (tag, line) in line_diff(&old, &new) {
        match tag {
            ChangeTag::Delete => print!("    {} {}", "-".red(), line.red()),
            ChangeTag::Insert => print!("    {} {}", "+".green(), line.green()),
            ChangeTag::Equal => print!("      {}", line.dimmed()),
        }
        if !line.ends_with('\n') {
            println!();
        }
    }
}

/// Line diff between two renderings
pub fn line_diff(old: &str, new: &str) -> Vec<(ChangeTag, String)> {
    let diff = TextDiff::from_lines(old, new);
    diff.iter_all_changes()
        .map(|change| (change.tag(), change.value().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_diff_single_values() {
        let diff = line_diff("db.t3.micro", "db.t3.small");
        assert_eq!(
            diff,
            vec![
                (ChangeTag::Delete, "db.t3.micro".to_string()),
                (ChangeTag::Insert, "db.t3.small".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_diff_keeps_common_lines() {
        let old = "{\n  \"cpu\": 256,\n  \"memory\": 512\n}";
        let new = "{\n  \"cpu\": 512,\n  \"memory\": 512\n}";
        let diff = line_diff(old, new);

        let equal = diff.iter().filter(|(t, _)| *t == ChangeTag::Equal).count();
        let deleted: Vec<_> = diff
            .iter()
            .filter(|(t, _)| *t == ChangeTag::Delete)
            .map(|(_, l)| l.trim())
            .collect();
        assert_eq!(equal, 3);
        assert_eq!(deleted, vec!["\"cpu\": 256,"]);
    }

    #[test]
    fn test_attribute_line_marks_replacement() {
        let change = PlannedChange {
            logical_id: "db".into(),
            kind: topology::ResourceKind::Database,
            action: Action::Replace,
            reason: None,
            changed_attributes: vec![],
            properties: Default::default(),
            depends_on: vec![],
            tags: Default::default(),
            prior: None,
        };
        let attr = PropertyChange {
            attribute: "engine".into(),
            old: Some(Value::from("postgres")),
            new: Some(Value::from("mysql")),
            known: true,
        };
        colored::control::set_override(false);
        let line = attribute_line(&change, &attr);
        assert_eq!(line, "engine: postgres → mysql (forces replacement)");
    }
}
