// ABOUTME: `shipyard build` command running one build session from a prompt
// ABOUTME: Streams session events to the terminal until the preview is ready, fails, or Ctrl-C

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use shipyard_cli::watch::{watch, Watch};
use shipyard_config::{RuntimeKind, ShipyardConfig};
use shipyard_core::{BuildStatus, FileSetLimits};
use shipyard_generation::{CodeGenerationClient, EnvSecretStore};
use shipyard_sandbox::runtime_from_config;
use shipyard_session::{BuildSession, PromptTemplate};
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// What to build
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,

    /// Quick-start template to prefix the prompt with (see `shipyard templates`)
    #[arg(long, short)]
    template: Option<PromptTemplate>,

    /// Sandbox runtime, overriding SHIPYARD_RUNTIME
    #[arg(long)]
    runtime: Option<RuntimeKind>,

    /// Stream install and dev server output
    #[arg(long)]
    logs: bool,
}

impl BuildArgs {
    fn prompt(&self) -> String {
        let details = self.prompt.join(" ");
        match self.template {
            Some(template) => template.apply(&details),
            None => details,
        }
    }
}

/// Run one build. Returns whether it ended without failing.
pub async fn build_command(args: BuildArgs) -> Result<bool> {
    let mut config = ShipyardConfig::from_env().context("Invalid configuration")?;
    if let Some(runtime) = args.runtime {
        config.sandbox.runtime = runtime;
    }

    let limits = FileSetLimits {
        max_files: config.sandbox.max_files,
        max_total_bytes: config.sandbox.max_mount_bytes,
    };
    let generator = CodeGenerationClient::new(
        config.generation.clone(),
        limits,
        Arc::new(EnvSecretStore),
    )?;
    let runtime = runtime_from_config(&config.sandbox).context("Sandbox runtime unavailable")?;

    let session = BuildSession::new(&config, Arc::new(generator), runtime);
    let mut events = session.subscribe();

    let prompt = args.prompt();
    println!("{} {}", "you:".bold(), prompt);
    let _pipeline = session.submit(&prompt)?;

    let current = || session.status();
    let mut outcome = watch(&mut events, args.logs, current, |status| {
        matches!(status, BuildStatus::Ready | BuildStatus::Failed)
    })
    .await;

    if outcome == Watch::Ready {
        println!("{}", "Press Ctrl-C to stop the preview".dimmed());
        outcome = watch(&mut events, args.logs, current, |status| {
            status == BuildStatus::Failed
        })
        .await;
    }

    session.dispose().await;
    if outcome == Watch::Interrupted {
        println!("{}", "Stopped".dimmed());
    }
    Ok(outcome != Watch::Failed)
}
