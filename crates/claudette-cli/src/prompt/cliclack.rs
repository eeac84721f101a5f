//! Interactive answers the tools need from the user, asked through cliclack.

use cliclack::{confirm, input, note};
use console::style;

use claudette::tools::{ConfirmationGate, QuestionPrompt};

const MAX_DETAIL_LINES: usize = 40;

pub struct TerminalConfirmation;

impl ConfirmationGate for TerminalConfirmation {
    fn confirm(&self, icon: &str, action: &str, details: &[(String, String)]) -> bool {
        println!();
        println!("{} {}", icon, style(action).yellow().bold());
        for (label, value) in details {
            println!("{}", style(format!("{}:", label)).dim());
            print_detail(label, value);
        }

        // An interrupted or failed prompt counts as a refusal
        confirm("Proceed?")
            .initial_value(false)
            .interact()
            .unwrap_or(false)
    }
}

fn print_detail(label: &str, value: &str) {
    let lines: Vec<&str> = value.lines().collect();
    for line in lines.iter().take(MAX_DETAIL_LINES) {
        if label == "Diff" {
            println!("{}", colorize_diff_line(line));
        } else {
            println!("  {}", line);
        }
    }
    if lines.len() > MAX_DETAIL_LINES {
        println!(
            "{}",
            style(format!("  ... {} more lines", lines.len() - MAX_DETAIL_LINES)).dim()
        );
    }
}

fn colorize_diff_line(line: &str) -> String {
    if line.starts_with("+++") || line.starts_with("---") {
        style(line).bold().to_string()
    } else if line.starts_with('+') {
        style(line).green().to_string()
    } else if line.starts_with('-') {
        style(line).red().to_string()
    } else if line.starts_with("@@") {
        style(line).cyan().to_string()
    } else {
        line.to_string()
    }
}

pub struct TerminalQuestion;

impl QuestionPrompt for TerminalQuestion {
    fn ask(&self, question: &str, context: Option<&str>) -> Option<String> {
        println!();
        if let Some(context) = context {
            if let Err(error) = note("Context", context) {
                tracing::debug!(%error, "could not render the question context");
            }
        }
        let answer: String = input(format!("❓ {}", question))
            .placeholder("your answer")
            .required(false)
            .interact()
            .ok()?;
        let answer = answer.trim();
        if answer.is_empty() {
            None
        } else {
            Some(answer.to_string())
        }
    }
}
