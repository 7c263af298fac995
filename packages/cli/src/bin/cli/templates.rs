// ABOUTME: `shipyard templates` command listing quick-start prompt templates
// ABOUTME: Prints each template's identifier, label, and prompt prefix

use colored::*;
use shipyard_cli::render::template_lines;

pub fn templates_command() {
    println!("{}", "Quick-start templates".bold());
    for line in template_lines() {
        println!("  {}", line);
    }
    println!();
    println!(
        "Use one with {}",
        "shipyard build --template <name> <details...>".cyan()
    );
}
