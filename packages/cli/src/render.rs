// ABOUTME: Terminal rendering of build session events
// ABOUTME: Turns status changes, chat messages, output, and preview changes into printable lines

use colored::*;
use shipyard_core::{BuildStatus, ChatMessage, ChatRole, MessageKind};
use shipyard_preview::{PreviewBinding, PreviewChange};
use shipyard_sandbox::{OutputChunk, StreamType};
use shipyard_session::{PromptTemplate, SessionEvent};

pub fn status_line(status: BuildStatus, label: Option<&str>) -> String {
    match (status, label) {
        (_, Some(label)) => format!("{} {}", "⏳".dimmed(), label.cyan()),
        (BuildStatus::Ready, None) => format!("{} {}", "✓".green().bold(), "Ready".green().bold()),
        (BuildStatus::Failed, None) => format!("{} {}", "✗".red().bold(), "Build failed".red().bold()),
        (other, None) => other.to_string(),
    }
}

pub fn message_line(message: &ChatMessage) -> String {
    match (message.role(), message.kind()) {
        (ChatRole::User, _) => format!("{} {}", "you:".bold(), message.content()),
        (ChatRole::Assistant, MessageKind::Error) => {
            format!("{} {}", "shipyard:".bold(), message.content().red())
        }
        (ChatRole::Assistant, MessageKind::Ready) => {
            format!("{} {}", "shipyard:".bold(), message.content().green())
        }
        (ChatRole::Assistant, _) => format!("{} {}", "shipyard:".bold(), message.content()),
    }
}

pub fn output_line(chunk: &OutputChunk) -> String {
    match chunk.stream {
        StreamType::Stdout => format!("  {} {}", "│".dimmed(), chunk.text),
        StreamType::Stderr => format!("  {} {}", "│".dimmed(), chunk.text.yellow()),
    }
}

pub fn preview_line(change: PreviewChange, binding: &PreviewBinding) -> Option<String> {
    match (change, binding) {
        (PreviewChange::Bound | PreviewChange::Rebound, PreviewBinding::Bound { url, .. }) => {
            Some(format!("{} {}", "Preview:".bold(), url.underline().blue()))
        }
        (PreviewChange::Cleared, _) => Some(format!("{}", "Preview closed".dimmed())),
        _ => None,
    }
}

/// Printable line for `event`, if it should be shown. Output is shown only
/// when `show_output` is set.
pub fn event_line(event: &SessionEvent, show_output: bool) -> Option<String> {
    match event {
        SessionEvent::StatusChanged { status, label } => Some(status_line(*status, *label)),
        SessionEvent::MessageAppended { message } => match message.role() {
            // The prompt was typed on the command line already
            ChatRole::User => None,
            ChatRole::Assistant => Some(message_line(message)),
        },
        SessionEvent::Output { chunk } if show_output => Some(output_line(chunk)),
        SessionEvent::Output { .. } => None,
        SessionEvent::PreviewChanged { change, binding } => preview_line(*change, binding),
    }
}

pub fn template_lines() -> Vec<String> {
    PromptTemplate::ALL
        .iter()
        .map(|t| format!("{:<18} {:<20} {}", t.slug().bold(), t.label(), t.prefix().dimmed()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shipyard_core::SandboxId;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_status_lines() {
        plain();
        assert_eq!(
            status_line(BuildStatus::Installing, BuildStatus::Installing.loading_label()),
            "⏳ Installing dependencies..."
        );
        assert_eq!(status_line(BuildStatus::Ready, None), "✓ Ready");
        assert_eq!(status_line(BuildStatus::Failed, None), "✗ Build failed");
    }

    #[test]
    fn test_user_messages_are_not_echoed() {
        plain();
        let event = SessionEvent::MessageAppended {
            message: ChatMessage::user("build a todo app"),
        };
        assert_eq!(event_line(&event, true), None);

        let event = SessionEvent::MessageAppended {
            message: ChatMessage::assistant(MessageKind::Error, "Code generation failed"),
        };
        assert_eq!(
            event_line(&event, false),
            Some("shipyard: Code generation failed".to_string())
        );
    }

    #[test]
    fn test_output_only_when_requested() {
        plain();
        let event = SessionEvent::Output {
            chunk: OutputChunk::new(StreamType::Stdout, "added 3 packages"),
        };
        assert_eq!(event_line(&event, false), None);
        assert_eq!(
            event_line(&event, true),
            Some("  │ added 3 packages".to_string())
        );
    }

    #[test]
    fn test_preview_bound_line() {
        plain();
        let binding = PreviewBinding::Bound {
            sandbox_id: SandboxId::new(),
            url: "http://localhost:5173".to_string(),
            bound_at: chrono::Utc::now(),
        };
        assert_eq!(
            preview_line(PreviewChange::Bound, &binding),
            Some("Preview: http://localhost:5173".to_string())
        );
        assert_eq!(preview_line(PreviewChange::Unchanged, &binding), None);
    }
}
