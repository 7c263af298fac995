// ABOUTME: Mutable state of one build session and the snapshots handed to observers
// ABOUTME: Tracks the run epoch that decides whether a pipeline result may still be applied

use crate::events::SessionEvent;
use serde::Serialize;
use shipyard_core::{BuildStatus, ChatMessage, SandboxId, ServedOrigin};
use shipyard_preview::{PreviewBinding, PreviewSurface};
use shipyard_sandbox::OutputChunk;
use std::collections::VecDeque;
use tracing::warn;

/// Identity of one pipeline run.
///
/// A run may only touch the session while its ticket matches the current
/// epoch and the session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    epoch: u64,
}

impl RunTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Most recent output chunks, oldest dropped first
#[derive(Debug)]
pub(crate) struct LogBuffer {
    chunks: VecDeque<OutputChunk>,
    capacity: usize,
}

impl LogBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, chunk: OutputChunk) {
        if self.capacity == 0 {
            return;
        }
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
    }

    pub(crate) fn to_vec(&self) -> Vec<OutputChunk> {
        self.chunks.iter().cloned().collect()
    }
}

/// Point-in-time copy of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: BuildStatus,
    pub loading_label: Option<&'static str>,
    pub messages: Vec<ChatMessage>,
    pub sandbox_id: Option<SandboxId>,
    pub origin: Option<ServedOrigin>,
    pub preview: PreviewBinding,
    pub active: bool,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) status: BuildStatus,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) sandbox: Option<SandboxId>,
    pub(crate) origin: Option<ServedOrigin>,
    pub(crate) preview: PreviewSurface,
    pub(crate) logs: LogBuffer,
    epoch: u64,
    pub(crate) active: bool,
}

impl SessionState {
    pub(crate) fn new(log_capacity: usize) -> Self {
        Self {
            status: BuildStatus::Idle,
            messages: Vec::new(),
            sandbox: None,
            origin: None,
            preview: PreviewSurface::new(),
            logs: LogBuffer::new(log_capacity),
            epoch: 0,
            active: true,
        }
    }

    pub(crate) fn is_current(&self, ticket: RunTicket) -> bool {
        self.active && self.epoch == ticket.epoch
    }

    /// Start a new run, superseding every earlier one
    pub(crate) fn next_run(&mut self) -> RunTicket {
        self.epoch += 1;
        RunTicket { epoch: self.epoch }
    }

    /// Stop accepting results from any run
    pub(crate) fn deactivate(&mut self) {
        self.active = false;
        self.epoch += 1;
    }

    pub(crate) fn set_status(&mut self, status: BuildStatus, events: &mut Vec<SessionEvent>) {
        if !self.status.can_transition_to(status) {
            warn!(
                "Ignoring status change {} -> {}",
                self.status, status
            );
            return;
        }
        self.status = status;
        events.push(SessionEvent::StatusChanged {
            status,
            label: status.loading_label(),
        });
        self.refresh_preview(events);
    }

    pub(crate) fn append(&mut self, message: ChatMessage, events: &mut Vec<SessionEvent>) {
        self.messages.push(message.clone());
        events.push(SessionEvent::MessageAppended { message });
    }

    pub(crate) fn refresh_preview(&mut self, events: &mut Vec<SessionEvent>) {
        let status = if self.active {
            self.status
        } else {
            BuildStatus::Idle
        };
        let change = self
            .preview
            .apply(status, self.sandbox.zip(self.origin.as_ref()));
        if change.is_change() {
            events.push(SessionEvent::PreviewChanged {
                change,
                binding: self.preview.binding().clone(),
            });
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            loading_label: self.status.loading_label(),
            messages: self.messages.clone(),
            sandbox_id: self.sandbox,
            origin: self.origin.clone(),
            preview: self.preview.binding().clone(),
            active: self.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_preview::PreviewChange;
    use shipyard_sandbox::StreamType;

    #[test]
    fn test_log_buffer_drops_oldest() {
        let mut logs = LogBuffer::new(2);
        for text in ["one", "two", "three"] {
            logs.push(OutputChunk::new(StreamType::Stdout, text));
        }
        let texts: Vec<String> = logs.to_vec().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, vec!["two", "three"]);

        logs.clear();
        assert!(logs.to_vec().is_empty());
    }

    #[test]
    fn test_new_run_supersedes_previous() {
        let mut state = SessionState::new(10);
        let first = state.next_run();
        assert!(state.is_current(first));

        let second = state.next_run();
        assert!(!state.is_current(first));
        assert!(state.is_current(second));

        state.deactivate();
        assert!(!state.is_current(second));
    }

    #[test]
    fn test_rejected_transition_emits_nothing() {
        let mut state = SessionState::new(10);
        let mut events = Vec::new();

        state.set_status(BuildStatus::Installing, &mut events);
        assert_eq!(state.status, BuildStatus::Idle);
        assert!(events.is_empty());

        state.set_status(BuildStatus::Generating, &mut events);
        assert_eq!(state.status, BuildStatus::Generating);
        assert!(matches!(
            events.as_slice(),
            [
                SessionEvent::StatusChanged { status: BuildStatus::Generating, .. },
                SessionEvent::PreviewChanged { change: PreviewChange::Relabeled, .. },
            ]
        ));
    }

    #[test]
    fn test_ready_binds_preview() {
        let mut state = SessionState::new(10);
        let mut events = Vec::new();
        let id = SandboxId::new();

        for status in [
            BuildStatus::Generating,
            BuildStatus::Booting,
            BuildStatus::Mounting,
            BuildStatus::Installing,
            BuildStatus::Starting,
        ] {
            state.set_status(status, &mut events);
        }
        state.sandbox = Some(id);
        state.origin = Some(ServedOrigin::localhost(5173));
        events.clear();

        state.set_status(BuildStatus::Ready, &mut events);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::PreviewChanged { binding: PreviewBinding::Bound { sandbox_id, .. }, .. })
                if *sandbox_id == id
        ));
        assert_eq!(state.snapshot().origin, Some(ServedOrigin::localhost(5173)));
    }
}
