use clap::{Parser, Subcommand};
use colored::*;
use std::process;

mod cli;

use cli::build::{build_command, BuildArgs};
use cli::templates::templates_command;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Shipyard - build and preview apps from a prompt")]
#[command(version)]
struct Cli {
    /// Log debug output from shipyard crates
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an app from a prompt and serve a live preview
    Build(BuildArgs),
    /// List quick-start prompt templates
    Templates,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    shipyard_cli::logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Build(args) => build_command(args).await,
        Commands::Templates => {
            templates_command();
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}
