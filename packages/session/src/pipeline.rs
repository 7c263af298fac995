// ABOUTME: One pipeline run of a submission: generate, boot, mount, install, start
// ABOUTME: Every stage result is checked against the run ticket before it reaches the session

use crate::error::Result;
use crate::session::Shared;
use crate::state::RunTicket;
use serde::Serialize;
use shipyard_core::{BuildStatus, ChatMessage, GeneratedFileSet};
use shipyard_generation::GenerationContext;
use shipyard_sandbox::{OutputChunk, OutputSink, RunningServer, SandboxHandle};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Named stages of the build pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Generate,
    Boot,
    Mount,
    Install,
    Start,
}

impl Stage {
    /// Session status while this stage runs
    pub fn status(&self) -> BuildStatus {
        match self {
            Stage::Generate => BuildStatus::Generating,
            Stage::Boot => BuildStatus::Booting,
            Stage::Mount => BuildStatus::Mounting,
            Stage::Install => BuildStatus::Installing,
            Stage::Start => BuildStatus::Starting,
        }
    }

    pub(crate) fn failure_summary(&self) -> &'static str {
        match self {
            Stage::Generate => "Code generation failed",
            Stage::Boot => "Could not start a sandbox",
            Stage::Mount => "Could not write the generated files",
            Stage::Install => "Installing dependencies failed",
            Stage::Start => "The dev server failed",
        }
    }
}

/// Where a run stands between stages
enum Step {
    Prompt,
    Generated(GeneratedFileSet),
    Booted(SandboxHandle, GeneratedFileSet),
    Mounted(SandboxHandle),
    Installed(SandboxHandle),
}

pub(crate) enum Outcome {
    Serving {
        handle: SandboxHandle,
        server: RunningServer,
    },
    /// A newer submission or dispose took over
    Superseded,
}

/// Copies output chunks into the session while a stage runs
pub(crate) struct OutputPump {
    shared: Arc<Shared>,
    ticket: RunTicket,
    rx: mpsc::UnboundedReceiver<OutputChunk>,
}

impl OutputPump {
    /// Drive `stage` to completion, recording output as it arrives
    pub(crate) async fn run<F: Future>(&mut self, stage: F) -> F::Output {
        tokio::pin!(stage);
        loop {
            tokio::select! {
                out = &mut stage => {
                    while let Ok(chunk) = self.rx.try_recv() {
                        self.shared.record_output(self.ticket, chunk);
                    }
                    return out;
                }
                Some(chunk) = self.rx.recv() => {
                    self.shared.record_output(self.ticket, chunk);
                }
            }
        }
    }
}

pub(crate) struct PipelineRun {
    shared: Arc<Shared>,
    ticket: RunTicket,
    prompt: String,
    context: GenerationContext,
    sink: OutputSink,
    pump: OutputPump,
    handle: Option<SandboxHandle>,
}

impl PipelineRun {
    pub(crate) fn new(
        shared: Arc<Shared>,
        ticket: RunTicket,
        prompt: String,
        history: Vec<ChatMessage>,
    ) -> Self {
        let (sink, rx) = mpsc::unbounded_channel();
        Self {
            pump: OutputPump {
                shared: shared.clone(),
                ticket,
                rx,
            },
            shared,
            ticket,
            prompt,
            context: GenerationContext::new(history),
            sink,
            handle: None,
        }
    }

    /// Run every stage. Returns the output pump for the server watcher.
    pub(crate) async fn execute(mut self) -> (Result<Outcome>, OutputPump) {
        let result = self.drive().await;
        if result.is_err() {
            if let Some(handle) = &self.handle {
                self.shared.lifecycle.mark_failed(handle).await;
            }
        }
        (result, self.pump)
    }

    /// Move the session into `stage`, or report that this run is stale
    fn enter(&self, stage: Stage) -> bool {
        let entered = self.shared.enter_stage(self.ticket, stage.status());
        if !entered {
            debug!(
                "Run {} superseded before {:?}",
                self.ticket.epoch(),
                stage
            );
        }
        entered
    }

    async fn drive(&mut self) -> Result<Outcome> {
        let mut step = Step::Prompt;
        loop {
            step = match step {
                Step::Prompt => {
                    let files = self
                        .shared
                        .generator
                        .generate(&self.prompt, &self.context)
                        .await?;
                    info!(
                        "Generated {} files ({} bytes)",
                        files.len(),
                        files.total_bytes()
                    );
                    Step::Generated(files)
                }
                Step::Generated(files) => {
                    if !self.enter(Stage::Boot) {
                        return Ok(Outcome::Superseded);
                    }
                    let shared = &self.shared;
                    let ticket = self.ticket;
                    let Some(handle) = shared.lifecycle.boot(|| shared.is_current(ticket)).await?
                    else {
                        return Ok(Outcome::Superseded);
                    };
                    self.handle = Some(handle);
                    if !self.shared.record_sandbox(self.ticket, handle.id()) {
                        return Ok(Outcome::Superseded);
                    }
                    Step::Booted(handle, files)
                }
                Step::Booted(handle, files) => {
                    if !self.enter(Stage::Mount) {
                        return Ok(Outcome::Superseded);
                    }
                    self.shared.lifecycle.mount(&handle, files).await?;
                    Step::Mounted(handle)
                }
                Step::Mounted(handle) => {
                    if !self.enter(Stage::Install) {
                        return Ok(Outcome::Superseded);
                    }
                    self.shared.lifecycle.mark_installing(&handle).await?;
                    self.pump
                        .run(self.shared.runner.install(
                            &handle,
                            &self.shared.install,
                            &self.sink,
                        ))
                        .await?;
                    Step::Installed(handle)
                }
                Step::Installed(handle) => {
                    if !self.enter(Stage::Start) {
                        return Ok(Outcome::Superseded);
                    }
                    let server = self
                        .pump
                        .run(self.shared.runner.start(&handle, &self.shared.start, &self.sink))
                        .await?;
                    self.shared.lifecycle.mark_running(&handle).await?;
                    return Ok(Outcome::Serving { handle, server });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Stage::Generate, BuildStatus::Generating)]
    #[case(Stage::Boot, BuildStatus::Booting)]
    #[case(Stage::Mount, BuildStatus::Mounting)]
    #[case(Stage::Install, BuildStatus::Installing)]
    #[case(Stage::Start, BuildStatus::Starting)]
    fn test_stage_status(#[case] stage: Stage, #[case] status: BuildStatus) {
        assert_eq!(stage.status(), status);
        assert!(status.is_in_progress());
    }
}
