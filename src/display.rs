//! Colored CLI display utilities for supervised runs.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while a command runs and after it finishes.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::supervisor::RunReport;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Print the command about to run.
pub fn print_run_start(command: &str, working_dir: &Path) {
    println!(
        "{} {} {} (in {})",
        timestamp().dimmed(),
        "[RUN]".blue().bold(),
        command.cyan(),
        working_dir.display().dimmed()
    );
    let _ = io::stdout().flush();
}

/// Echo one line of process output.
pub fn print_output_line(line: &str, raw_mode: bool) {
    println!("{} {}", "cmd>".dimmed(), truncate(line, 200, raw_mode));
    let _ = io::stdout().flush();
}

/// Print the identifier from a readiness signal.
pub fn print_ready(identifier: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[READY]".green().bold(),
        identifier.cyan()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}

/// Print a collected output file.
pub fn print_collected(label: &str, content: &str) {
    println!("{} {}", "[OUTPUT]".magenta().bold(), label.bold());
    print!("{content}");
    if !content.is_empty() && !content.ends_with('\n') {
        println!();
    }
    let _ = io::stdout().flush();
}

/// One-line summary of a finished run.
#[must_use]
pub fn summary_line(report: &RunReport, returncode: Option<i32>) -> String {
    let code = returncode.map_or_else(|| "none".to_string(), |c| c.to_string());
    let mut summary = format!(
        "exit={code}, lines={}, errors={}",
        report.lines,
        report.errors.len()
    );
    if report.stopped_on_error {
        summary.push_str(", stopped on error");
    }
    if report.critical {
        summary.push_str(", critical");
    }
    summary
}

/// Print the report collected over a run.
pub fn print_report(report: &RunReport, returncode: Option<i32>, raw_mode: bool) {
    let ts = timestamp();
    let summary = summary_line(report, returncode);
    if report.is_clean() && !matches!(returncode, Some(c) if c > 0) {
        println!(
            "{} {} Run completed {}",
            ts.dimmed(),
            "[DONE]".green().bold(),
            summary.dimmed()
        );
    } else {
        println!(
            "{} {} Run finished with problems {}",
            ts.dimmed(),
            "[DONE]".red().bold(),
            summary.dimmed()
        );
    }

    for error in &report.errors {
        for (i, line) in error.lines().enumerate() {
            let tag = if i == 0 { "[ERROR]" } else { "       " };
            println!("{} {}", tag.red().bold(), truncate(line, 200, raw_mode));
        }
    }
    if let Some(message) = &report.critical_message {
        println!(
            "{} {}",
            "[CRITICAL]".red().bold(),
            truncate(message, 200, raw_mode).red()
        );
    }
    let _ = io::stdout().flush();
}
