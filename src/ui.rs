//! Terminal output helpers.
//!
//! Colour handling follows NO_COLOR (https://no-color.org/) and the CLICOLOR
//! conventions: `NO_COLOR` disables colour, `CLICOLOR_FORCE` forces it,
//! `CLICOLOR=0` disables it, otherwise colour is used only on a TTY.

use colored::{Colorize, control};
use std::io::IsTerminal;

pub fn init_colors() {
    if std::env::var_os("NO_COLOR").is_some() {
        control::set_override(false);
        return;
    }

    if std::env::var("CLICOLOR_FORCE")
        .map(|v| v != "0")
        .unwrap_or(false)
    {
        control::set_override(true);
        return;
    }

    if std::env::var("CLICOLOR").map(|v| v == "0").unwrap_or(false) {
        control::set_override(false);
        return;
    }

    control::set_override(std::io::stdout().is_terminal());
}

/// Section header for a top-level step.
pub fn ohai(title: &str) {
    println!("{} {}", "==>".blue().bold(), title.bold());
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Indented tree line under the current header.
pub fn step(last: bool, msg: &str) {
    let branch = if last { "└" } else { "├" };
    println!("  {} {}", branch.dimmed(), msg);
}

pub fn opoo(msg: &str) {
    eprintln!("{} {}", "⚠ Warning:".yellow().bold(), msg);
}

pub fn onoe(msg: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), msg);
}

pub fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else if word.ends_with("formula") {
        format!("{} {}e", count, word)
    } else if let Some(stem) = word.strip_suffix('y') {
        format!("{} {}ies", count, stem)
    } else {
        format!("{} {}s", count, word)
    }
}
