// ABOUTME: Events broadcast by a build session to its observers
// ABOUTME: Status changes, chat messages, process output, and preview binding changes

use serde::Serialize;
use shipyard_core::{BuildStatus, ChatMessage};
use shipyard_preview::{PreviewBinding, PreviewChange};
use shipyard_sandbox::OutputChunk;

/// Real-time session event for view layers and the CLI
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged {
        status: BuildStatus,
        /// Loading label while a stage is running
        label: Option<&'static str>,
    },
    MessageAppended {
        message: ChatMessage,
    },
    Output {
        chunk: OutputChunk,
    },
    PreviewChanged {
        change: PreviewChange,
        binding: PreviewBinding,
    },
}
