// ABOUTME: Follows a build session's event stream from the terminal
// ABOUTME: Prints events until a stop status is reached, recovering the status when events were dropped

use crate::render::{event_line, status_line};
use shipyard_core::BuildStatus;
use shipyard_session::SessionEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// How watching the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    Ready,
    Failed,
    Interrupted,
}

fn finished(status: BuildStatus) -> Watch {
    match status {
        BuildStatus::Failed => Watch::Failed,
        _ => Watch::Ready,
    }
}

/// Print events until `stop` accepts a status or the user presses Ctrl-C.
///
/// A receiver that lags behind may have lost the status change it waits for,
/// so after a lag the session's `current` status is checked directly.
pub async fn watch(
    events: &mut broadcast::Receiver<SessionEvent>,
    show_output: bool,
    current: impl Fn() -> BuildStatus,
    stop: impl Fn(BuildStatus) -> bool,
) -> Watch {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = event_line(&event, show_output) {
                        println!("{}", line);
                    }
                    if let SessionEvent::StatusChanged { status, .. } = event {
                        if stop(status) {
                            return finished(status);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} session events", skipped);
                    let status = current();
                    if stop(status) {
                        println!("{}", status_line(status, None));
                        return finished(status);
                    }
                }
                Err(RecvError::Closed) => return Watch::Failed,
            },
            _ = tokio::signal::ctrl_c() => return Watch::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_sandbox::{OutputChunk, StreamType};

    fn output(text: &str) -> SessionEvent {
        SessionEvent::Output {
            chunk: OutputChunk::new(StreamType::Stderr, text),
        }
    }

    #[tokio::test]
    async fn test_failure_lost_to_lag_still_stops() {
        let (tx, mut rx) = broadcast::channel(4);
        tx.send(SessionEvent::StatusChanged {
            status: BuildStatus::Failed,
            label: None,
        })
        .unwrap();
        for i in 0..10 {
            tx.send(output(&format!("npm ERR! line {}", i))).unwrap();
        }

        let outcome = watch(
            &mut rx,
            false,
            || BuildStatus::Failed,
            |status| matches!(status, BuildStatus::Ready | BuildStatus::Failed),
        )
        .await;
        assert_eq!(outcome, Watch::Failed);
    }

    #[tokio::test]
    async fn test_lag_while_in_progress_keeps_watching() {
        let (tx, mut rx) = broadcast::channel(4);
        for i in 0..10 {
            tx.send(output(&format!("added {} packages", i))).unwrap();
        }
        tx.send(SessionEvent::StatusChanged {
            status: BuildStatus::Ready,
            label: None,
        })
        .unwrap();

        let outcome = watch(
            &mut rx,
            false,
            || BuildStatus::Installing,
            |status| matches!(status, BuildStatus::Ready | BuildStatus::Failed),
        )
        .await;
        assert_eq!(outcome, Watch::Ready);
    }

    #[tokio::test]
    async fn test_closed_channel_counts_as_failure() {
        let (tx, mut rx) = broadcast::channel::<SessionEvent>(4);
        drop(tx);

        let outcome = watch(&mut rx, false, || BuildStatus::Idle, |_| false).await;
        assert_eq!(outcome, Watch::Failed);
    }
}
