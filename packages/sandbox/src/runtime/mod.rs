// ABOUTME: Runtime trait and process event types for sandbox execution backends
// ABOUTME: Defines the interface for booting, mounting, spawning in, and tearing down sandboxes

use crate::error::{BootError, MountError, SpawnError, TeardownError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use shipyard_config::CommandSpec;
use shipyard_core::{GeneratedFileSet, SandboxId, ServedOrigin};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub mod docker;
pub mod local;

pub use docker::DockerRuntime;
pub use local::LocalRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// One piece of output from a process running in a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    pub timestamp: DateTime<Utc>,
    pub stream: StreamType,
    pub text: String,
}

impl OutputChunk {
    pub fn new(stream: StreamType, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(OutputChunk),
    /// The process is serving and reachable at this origin
    Ready(ServedOrigin),
    /// Always the final event of a process
    Exited(i32),
}

/// Producer side of a [`ProcessHandle`], held by runtime backends.
///
/// Sends never fail loudly: a dropped handle only means nobody is listening.
#[derive(Debug, Clone)]
pub struct ProcessEvents {
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl ProcessEvents {
    pub fn output(&self, stream: StreamType, text: impl Into<String>) {
        let _ = self
            .tx
            .send(ProcessEvent::Output(OutputChunk::new(stream, text)));
    }

    pub fn ready(&self, origin: ServedOrigin) {
        let _ = self.tx.send(ProcessEvent::Ready(origin));
    }

    pub fn exited(&self, code: i32) {
        let _ = self.tx.send(ProcessEvent::Exited(code));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Interleaved event stream of one spawned process.
///
/// The stream is finite: it ends after [`ProcessEvent::Exited`], or when the
/// runtime drops its producer. Output cannot be replayed; a fresh stream
/// requires spawning the command again.
#[derive(Debug)]
pub struct ProcessHandle {
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    finished: bool,
}

impl ProcessHandle {
    pub fn channel() -> (ProcessEvents, ProcessHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ProcessEvents { tx },
            ProcessHandle {
                events: rx,
                finished: false,
            },
        )
    }

    /// Drain the stream and return the exit code.
    ///
    /// A stream that ends without an exit event reports `-1`.
    pub async fn wait(mut self) -> i32 {
        use futures::StreamExt;

        while let Some(event) = self.next().await {
            if let ProcessEvent::Exited(code) = event {
                return code;
            }
        }
        -1
    }
}

impl Stream for ProcessHandle {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if matches!(event, ProcessEvent::Exited(_)) {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Backend that hosts isolated sandboxes
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Allocate a fresh, empty sandbox
    async fn boot(&self) -> Result<SandboxId, BootError>;

    /// Replace the sandbox's project directory with exactly these files
    async fn mount(&self, id: SandboxId, files: GeneratedFileSet) -> Result<(), MountError>;

    /// Start a command in the sandbox's project directory
    async fn spawn(&self, id: SandboxId, command: &CommandSpec)
        -> Result<ProcessHandle, SpawnError>;

    /// Release everything the sandbox owns. Unknown ids are a no-op.
    async fn teardown(&self, id: SandboxId) -> Result<(), TeardownError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_wait_returns_exit_code() {
        let (events, handle) = ProcessHandle::channel();
        events.output(StreamType::Stdout, "added 12 packages");
        events.exited(3);
        assert_eq!(handle.wait().await, 3);
    }

    #[tokio::test]
    async fn test_wait_without_exit_event() {
        let (events, handle) = ProcessHandle::channel();
        events.output(StreamType::Stderr, "killed");
        drop(events);
        assert_eq!(handle.wait().await, -1);
    }

    #[tokio::test]
    async fn test_stream_ends_after_exit() {
        let (events, mut handle) = ProcessHandle::channel();
        events.exited(0);
        events.output(StreamType::Stdout, "late output");

        assert_eq!(handle.next().await, Some(ProcessEvent::Exited(0)));
        assert_eq!(handle.next().await, None);
    }
}
