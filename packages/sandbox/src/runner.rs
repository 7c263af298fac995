// ABOUTME: Command runner for dependency installs and dev servers inside a sandbox
// ABOUTME: Streams output to a sink, classifies failures, and waits for the dev server to be ready

use crate::error::SpawnError;
use crate::lifecycle::SandboxHandle;
use crate::runtime::{OutputChunk, ProcessEvent, ProcessHandle, SandboxRuntime};
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use shipyard_config::CommandSpec;
use shipyard_core::ServedOrigin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives every output chunk of the commands a runner executes
pub type OutputSink = mpsc::UnboundedSender<OutputChunk>;

static RESOLUTION_FAILURE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"ERESOLVE|E404|ETARGET|No matching version|Could not resolve dependency|ERR_PNPM_NO_MATCHING_VERSION|Couldn't find any versions",
    )
    .ok()
});

static PORT_CONFLICT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)EADDRINUSE|address already in use|Port \d+ is (?:already )?in use").ok()
});

fn line_matches(pattern: &Lazy<Option<Regex>>, line: &str) -> bool {
    pattern.as_ref().is_some_and(|regex| regex.is_match(line))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("Dependency resolution failed (exit code {code}): {detail}")]
    DependencyResolutionFailed { code: i32, detail: String },

    #[error("Dependency install exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("Could not run dependency install: {0}")]
    Spawn(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("Dev server port is already in use: {detail}")]
    PortConflict { detail: String },

    #[error("Dev server exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("Dev server stopped")]
    Stopped,

    #[error("Dev server did not report ready within {0:?}")]
    ReadyTimeout(Duration),

    #[error("Could not run dev server: {0}")]
    Spawn(String),
}

/// Remembers the first output line that explains a failure
#[derive(Debug, Default)]
struct FailureEvidence {
    line: Option<String>,
}

impl FailureEvidence {
    fn observe(&mut self, pattern: &Lazy<Option<Regex>>, line: &str) {
        if self.line.is_none() && line_matches(pattern, line) {
            self.line = Some(line.trim().to_string());
        }
    }
}

fn install_failure(code: i32, evidence: FailureEvidence) -> InstallError {
    match evidence.line {
        Some(detail) => InstallError::DependencyResolutionFailed { code, detail },
        None => InstallError::NonZeroExit { code },
    }
}

fn start_failure(code: i32, evidence: &FailureEvidence) -> StartError {
    match (&evidence.line, code) {
        (Some(detail), _) => StartError::PortConflict {
            detail: detail.clone(),
        },
        (None, 0) => StartError::Stopped,
        (None, code) => StartError::NonZeroExit { code },
    }
}

fn forward(sink: &OutputSink, chunk: OutputChunk) {
    // The session may have stopped listening; output is best-effort
    let _ = sink.send(chunk);
}

/// A dev server that has reported ready
pub struct RunningServer {
    origin: ServedOrigin,
    watcher: JoinHandle<StartError>,
}

impl RunningServer {
    pub fn origin(&self) -> &ServedOrigin {
        &self.origin
    }

    /// Resolves once the server exits, with the reason it stopped
    pub async fn exited(self) -> StartError {
        match self.watcher.await {
            Ok(reason) => reason,
            Err(e) => {
                debug!("Dev server watcher ended abnormally: {}", e);
                StartError::NonZeroExit { code: -1 }
            }
        }
    }
}

/// Runs commands in sandboxes through a runtime
#[derive(Clone)]
pub struct CommandRunner {
    runtime: Arc<dyn SandboxRuntime>,
    ready_timeout: Duration,
}

impl CommandRunner {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, ready_timeout: Duration) -> Self {
        Self {
            runtime,
            ready_timeout,
        }
    }

    pub async fn spawn(
        &self,
        handle: &SandboxHandle,
        command: &CommandSpec,
    ) -> Result<ProcessHandle, SpawnError> {
        debug!("Running '{}' in sandbox {}", command, handle.id().short());
        self.runtime.spawn(handle.id(), command).await
    }

    /// Run the install command to completion
    pub async fn install(
        &self,
        handle: &SandboxHandle,
        command: &CommandSpec,
        sink: &OutputSink,
    ) -> Result<(), InstallError> {
        let mut process = self
            .spawn(handle, command)
            .await
            .map_err(|e| InstallError::Spawn(e.to_string()))?;

        let mut evidence = FailureEvidence::default();
        let mut code = -1;

        while let Some(event) = process.next().await {
            match event {
                ProcessEvent::Output(chunk) => {
                    evidence.observe(&RESOLUTION_FAILURE, &chunk.text);
                    forward(sink, chunk);
                }
                ProcessEvent::Ready(_) => {}
                ProcessEvent::Exited(exit) => code = exit,
            }
        }

        if code == 0 {
            info!("'{}' completed in sandbox {}", command, handle.id().short());
            Ok(())
        } else {
            let err = install_failure(code, evidence);
            warn!("'{}' failed: {}", command, err);
            Err(err)
        }
    }

    /// Start the dev server and wait until it reports ready.
    ///
    /// The process keeps running afterwards; the returned [`RunningServer`]
    /// keeps forwarding its output and reports when it exits.
    pub async fn start(
        &self,
        handle: &SandboxHandle,
        command: &CommandSpec,
        sink: &OutputSink,
    ) -> Result<RunningServer, StartError> {
        let mut process = self
            .spawn(handle, command)
            .await
            .map_err(|e| StartError::Spawn(e.to_string()))?;

        let mut evidence = FailureEvidence::default();

        let waited = tokio::time::timeout(self.ready_timeout, async {
            while let Some(event) = process.next().await {
                match event {
                    ProcessEvent::Output(chunk) => {
                        evidence.observe(&PORT_CONFLICT, &chunk.text);
                        forward(sink, chunk);
                    }
                    ProcessEvent::Ready(origin) => return Ok(origin),
                    ProcessEvent::Exited(code) => return Err(start_failure(code, &evidence)),
                }
            }
            Err(start_failure(-1, &evidence))
        })
        .await;

        let origin = match waited {
            Ok(Ok(origin)) => origin,
            Ok(Err(err)) => {
                warn!("'{}' exited before it was ready: {}", command, err);
                return Err(err);
            }
            Err(_) => {
                warn!(
                    "'{}' did not report ready within {:?}",
                    command, self.ready_timeout
                );
                return Err(StartError::ReadyTimeout(self.ready_timeout));
            }
        };

        info!(
            "Dev server in sandbox {} is ready at {}",
            handle.id().short(),
            origin.url
        );

        let sink = sink.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = process.next().await {
                match event {
                    ProcessEvent::Output(chunk) => {
                        evidence.observe(&PORT_CONFLICT, &chunk.text);
                        forward(&sink, chunk);
                    }
                    ProcessEvent::Ready(_) => {}
                    ProcessEvent::Exited(code) => return start_failure(code, &evidence),
                }
            }
            start_failure(-1, &evidence)
        });

        Ok(RunningServer { origin, watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StreamType;
    use crate::testing::{ScriptedProcess, ScriptedRuntime};
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<ScriptedRuntime>, CommandRunner, SandboxHandle) {
        let runtime = Arc::new(ScriptedRuntime::new());
        let manager =
            crate::SandboxLifecycleManager::new(runtime.clone(), Default::default());
        let handle = manager.boot(|| true).await.unwrap().unwrap();
        let runner = CommandRunner::new(runtime.clone(), Duration::from_secs(5));
        (runtime, runner, handle)
    }

    fn install_cmd() -> CommandSpec {
        CommandSpec::new("npm", &["install"])
    }

    fn start_cmd() -> CommandSpec {
        CommandSpec::new("npm", &["run", "dev"])
    }

    #[tokio::test]
    async fn test_install_success_forwards_output() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(ScriptedProcess::exits(0).with_output("added 12 packages"));
        let (sink, mut rx) = mpsc::unbounded_channel();

        runner.install(&handle, &install_cmd(), &sink).await.unwrap();

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.text, "added 12 packages");
        assert_eq!(chunk.stream, StreamType::Stdout);
    }

    #[tokio::test]
    async fn test_install_resolution_failure() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(
            ScriptedProcess::exits(1)
                .with_stderr("npm ERR! code ERESOLVE")
                .with_stderr("npm ERR! ERESOLVE unable to resolve dependency tree"),
        );
        let (sink, _rx) = mpsc::unbounded_channel();

        let err = runner.install(&handle, &install_cmd(), &sink).await.unwrap_err();
        assert_eq!(
            err,
            InstallError::DependencyResolutionFailed {
                code: 1,
                detail: "npm ERR! code ERESOLVE".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_install_plain_non_zero_exit() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(ScriptedProcess::exits(2).with_stderr("gyp ERR! build error"));
        let (sink, _rx) = mpsc::unbounded_channel();

        let err = runner.install(&handle, &install_cmd(), &sink).await.unwrap_err();
        assert_eq!(err, InstallError::NonZeroExit { code: 2 });
    }

    #[tokio::test]
    async fn test_start_returns_served_origin() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(ScriptedProcess::serves(5173).with_output("VITE v5.0.0 ready"));
        let (sink, _rx) = mpsc::unbounded_channel();

        let server = runner.start(&handle, &start_cmd(), &sink).await.unwrap();
        assert_eq!(server.origin(), &ServedOrigin::localhost(5173));
    }

    #[tokio::test]
    async fn test_start_port_conflict_before_ready() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(
            ScriptedProcess::exits(1)
                .with_stderr("Error: listen EADDRINUSE: address already in use :::5173"),
        );
        let (sink, _rx) = mpsc::unbounded_channel();

        let err = runner.start(&handle, &start_cmd(), &sink).await.err().unwrap();
        assert!(matches!(err, StartError::PortConflict { .. }));
    }

    #[tokio::test]
    async fn test_start_non_zero_exit_before_ready() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(ScriptedProcess::exits(1).with_stderr("SyntaxError: Unexpected token"));
        let (sink, _rx) = mpsc::unbounded_channel();

        let err = runner.start(&handle, &start_cmd(), &sink).await.err().unwrap();
        assert_eq!(err, StartError::NonZeroExit { code: 1 });
    }

    #[tokio::test]
    async fn test_start_times_out_without_ready() {
        let (runtime, _, handle) = setup().await;
        runtime.push_process(ScriptedProcess::hangs());
        let runner = CommandRunner::new(runtime.clone(), Duration::from_millis(50));
        let (sink, _rx) = mpsc::unbounded_channel();

        let err = runner.start(&handle, &start_cmd(), &sink).await.err().unwrap();
        assert_eq!(err, StartError::ReadyTimeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_server_exit_after_ready_is_reported() {
        let (runtime, runner, handle) = setup().await;
        runtime.push_process(ScriptedProcess::serves(5173).then_exit(137));
        let (sink, _rx) = mpsc::unbounded_channel();

        let server = runner.start(&handle, &start_cmd(), &sink).await.unwrap();
        assert_eq!(server.exited().await, StartError::NonZeroExit { code: 137 });
    }
}
