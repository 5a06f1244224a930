//! Styled terminal output for interactive commands

use crossterm::style::Stylize;

pub fn print_header(title: &str) {
    let rule = "=".repeat(title.chars().count().max(40));
    println!();
    println!("{}", rule.as_str().cyan());
    println!("{}", title.bold().cyan());
    println!("{}", rule.as_str().cyan());
}

pub fn print_step(number: usize, total: usize, title: &str) {
    println!();
    println!("{}", format!("Step {}/{}: {}", number, total, title).bold().blue());
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// `label: value` with a dimmed label
pub fn print_field(label: &str, value: &str) {
    println!("  {} {}", format!("{}:", label).dark_grey(), value);
}
