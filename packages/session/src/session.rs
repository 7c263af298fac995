// ABOUTME: Build session coordinator turning chat prompts into running previews
// ABOUTME: Owns the session state and sandbox lifecycle and discards results of superseded runs

use crate::error::{PipelineError, SubmitError};
use crate::events::SessionEvent;
use crate::pipeline::{Outcome, OutputPump, PipelineRun};
use crate::state::{RunTicket, SessionSnapshot, SessionState};
use shipyard_config::{CommandSpec, ShipyardConfig};
use shipyard_core::{
    BuildStatus, ChatMessage, FileSetLimits, MessageKind, SandboxId, ServedOrigin,
};
use shipyard_generation::FileGenerator;
use shipyard_sandbox::{
    CommandRunner, OutputChunk, RunningServer, SandboxHandle, SandboxLifecycleManager,
    SandboxRuntime,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ACKNOWLEDGEMENT: &str = "On it! Generating your app...";

/// State shared between a session and its pipeline runs
pub(crate) struct Shared {
    pub(crate) generator: Arc<dyn FileGenerator>,
    pub(crate) lifecycle: SandboxLifecycleManager,
    pub(crate) runner: CommandRunner,
    pub(crate) install: CommandSpec,
    pub(crate) start: CommandSpec,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` if `ticket` is still current, then broadcast what it produced.
    ///
    /// Events are sent with the state lock held so observers see them in the
    /// order the state changed.
    fn update<R>(
        &self,
        ticket: RunTicket,
        f: impl FnOnce(&mut SessionState, &mut Vec<SessionEvent>) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return None;
        }
        let mut events = Vec::new();
        let result = f(&mut *state, &mut events);
        self.broadcast(events);
        Some(result)
    }

    fn broadcast(&self, events: Vec<SessionEvent>) {
        for event in events {
            // Nobody listening is the normal case for a headless session
            if self.events.send(event).is_err() && self.events.receiver_count() > 0 {
                warn!("Failed to broadcast session event");
            }
        }
    }

    pub(crate) fn is_current(&self, ticket: RunTicket) -> bool {
        self.lock().is_current(ticket)
    }

    pub(crate) fn enter_stage(&self, ticket: RunTicket, status: BuildStatus) -> bool {
        self.update(ticket, |state, events| state.set_status(status, events))
            .is_some()
    }

    pub(crate) fn record_sandbox(&self, ticket: RunTicket, id: SandboxId) -> bool {
        self.update(ticket, |state, _| state.sandbox = Some(id))
            .is_some()
    }

    pub(crate) fn record_output(&self, ticket: RunTicket, chunk: OutputChunk) {
        self.update(ticket, |state, events| {
            state.logs.push(chunk.clone());
            events.push(SessionEvent::Output { chunk });
        });
    }

    fn mark_ready(&self, ticket: RunTicket, id: SandboxId, origin: ServedOrigin) -> bool {
        self.update(ticket, |state, events| {
            let message = format!("Your app is running at {}", origin.url);
            state.sandbox = Some(id);
            state.origin = Some(origin);
            state.set_status(BuildStatus::Ready, events);
            state.append(ChatMessage::assistant(MessageKind::Ready, message), events);
        })
        .is_some()
    }

    fn fail(&self, ticket: RunTicket, err: &PipelineError) {
        let applied = self.update(ticket, |state, events| {
            state.origin = None;
            state.append(
                ChatMessage::assistant(MessageKind::Error, err.user_message()),
                events,
            );
            state.set_status(BuildStatus::Failed, events);
        });

        match applied {
            Some(()) => error!("Build run {} failed: {}", ticket.epoch(), err),
            None => debug!(
                "Discarding failure of superseded run {}: {}",
                ticket.epoch(),
                err
            ),
        }
    }
}

/// One chat-driven build session.
///
/// Each [`submit`](Self::submit) supersedes the previous run: results of an
/// older run are dropped, and its sandbox is torn down before the new run
/// boots one.
pub struct BuildSession {
    shared: Arc<Shared>,
}

impl BuildSession {
    pub fn new(
        config: &ShipyardConfig,
        generator: Arc<dyn FileGenerator>,
        runtime: Arc<dyn SandboxRuntime>,
    ) -> Self {
        let limits = FileSetLimits {
            max_files: config.sandbox.max_files,
            max_total_bytes: config.sandbox.max_mount_bytes,
        };
        let (events, _) = broadcast::channel(config.session.event_channel_size.max(1));

        Self {
            shared: Arc::new(Shared {
                generator,
                lifecycle: SandboxLifecycleManager::new(runtime.clone(), limits),
                runner: CommandRunner::new(runtime, config.sandbox.ready_timeout),
                install: config.sandbox.install.clone(),
                start: config.sandbox.start.clone(),
                state: Mutex::new(SessionState::new(config.session.log_capacity)),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn status(&self) -> BuildStatus {
        self.shared.lock().status
    }

    /// Output of the current run, oldest first
    pub fn logs(&self) -> Vec<OutputChunk> {
        self.shared.lock().logs.to_vec()
    }

    pub fn lifecycle(&self) -> &SandboxLifecycleManager {
        &self.shared.lifecycle
    }

    /// Start building `prompt`. Must be called within a tokio runtime.
    ///
    /// The returned task finishes once the run is ready, failed, or
    /// superseded. A dev server that exits later is still reported.
    pub fn submit(&self, prompt: &str) -> Result<JoinHandle<()>, SubmitError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }

        let (ticket, history) = {
            let mut state = self.shared.lock();
            if !state.active {
                return Err(SubmitError::Disposed);
            }

            let ticket = state.next_run();
            let history = state.messages.clone();
            let mut events = Vec::new();

            state.logs.clear();
            state.sandbox = None;
            state.origin = None;
            state.append(ChatMessage::user(prompt), &mut events);
            state.append(
                ChatMessage::assistant(MessageKind::Acknowledgement, ACKNOWLEDGEMENT),
                &mut events,
            );
            state.set_status(BuildStatus::Generating, &mut events);
            self.shared.broadcast(events);
            (ticket, history)
        };

        info!("Starting build run {}", ticket.epoch());
        let run = PipelineRun::new(self.shared.clone(), ticket, prompt.to_string(), history);
        let shared = self.shared.clone();

        Ok(tokio::spawn(async move {
            let (outcome, pump) = match tokio::spawn(run.execute()).await {
                Ok((result, pump)) => (result, Some(pump)),
                Err(join) => (Err(PipelineError::from(join)), None),
            };

            match outcome {
                Ok(Outcome::Serving { handle, server }) => {
                    if let Some(pump) = pump {
                        serve(shared, ticket, handle, server, pump);
                    }
                }
                Ok(Outcome::Superseded) => {
                    debug!("Build run {} was superseded", ticket.epoch());
                }
                Err(err) => shared.fail(ticket, &err),
            }
        }))
    }

    /// Stop the session and release its sandbox.
    ///
    /// Outstanding runs keep going but nothing they produce is applied.
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        {
            let mut state = self.shared.lock();
            if state.active {
                info!("Disposing build session");
            }
            state.deactivate();
            state.sandbox = None;
            state.origin = None;
            let mut events = Vec::new();
            state.refresh_preview(&mut events);
            self.shared.broadcast(events);
        }
        self.shared.lifecycle.teardown().await;
    }
}

/// Publish a ready server and keep watching it until it exits
fn serve(
    shared: Arc<Shared>,
    ticket: RunTicket,
    handle: SandboxHandle,
    server: RunningServer,
    mut pump: OutputPump,
) {
    let origin = server.origin().clone();
    if !shared.mark_ready(ticket, handle.id(), origin) {
        debug!("Build run {} became ready after it was superseded", ticket.epoch());
        return;
    }

    tokio::spawn(async move {
        let reason = pump.run(server.exited()).await;
        if shared.is_current(ticket) {
            shared.lifecycle.mark_failed(&handle).await;
        }
        shared.fail(ticket, &PipelineError::Start(reason));
    });
}
