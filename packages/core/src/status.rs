// ABOUTME: Build status of a session and the loading label shown for each stage
// ABOUTME: Encodes which status transitions the build pipeline may make

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shown while nothing has been submitted yet
pub const WAITING_LABEL: &str = "Waiting for prompt submission...";

/// Shown after a build failed
pub const FAILED_LABEL: &str = "Build failed. Submit a new prompt to try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Generating,
    Booting,
    Mounting,
    Installing,
    Starting,
    Ready,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Idle => "idle",
            BuildStatus::Generating => "generating",
            BuildStatus::Booting => "booting",
            BuildStatus::Mounting => "mounting",
            BuildStatus::Installing => "installing",
            BuildStatus::Starting => "starting",
            BuildStatus::Ready => "ready",
            BuildStatus::Failed => "failed",
        }
    }

    /// Human-readable label for a stage that is still running
    pub fn loading_label(&self) -> Option<&'static str> {
        match self {
            BuildStatus::Generating => Some("Generating code..."),
            BuildStatus::Booting => Some("Booting sandbox..."),
            BuildStatus::Mounting => Some("Writing files..."),
            BuildStatus::Installing => Some("Installing dependencies..."),
            BuildStatus::Starting => Some("Starting dev server..."),
            BuildStatus::Idle | BuildStatus::Ready | BuildStatus::Failed => None,
        }
    }

    /// Text a preview shows in place of the app for this status
    pub fn placeholder_label(&self) -> &'static str {
        match self {
            BuildStatus::Idle => WAITING_LABEL,
            BuildStatus::Failed => FAILED_LABEL,
            other => other.loading_label().unwrap_or(WAITING_LABEL),
        }
    }

    /// A pipeline stage is running
    pub fn is_in_progress(&self) -> bool {
        self.loading_label().is_some()
    }

    fn stage_rank(&self) -> Option<u8> {
        match self {
            BuildStatus::Generating => Some(1),
            BuildStatus::Booting => Some(2),
            BuildStatus::Mounting => Some(3),
            BuildStatus::Installing => Some(4),
            BuildStatus::Starting => Some(5),
            BuildStatus::Ready => Some(6),
            BuildStatus::Idle | BuildStatus::Failed => None,
        }
    }

    /// Whether the pipeline may move from `self` to `next`.
    ///
    /// Stages only move one step forward. `Failed` is reachable from any
    /// running stage and from `Ready`, whose dev server can still exit.
    /// `Generating` starts a new submission and is always allowed.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match next {
            BuildStatus::Generating => true,
            BuildStatus::Failed => self.is_in_progress() || *self == BuildStatus::Ready,
            BuildStatus::Idle => false,
            _ => match (self.stage_rank(), next.stage_rank()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BuildStatus::Idle, BuildStatus::Generating, true)]
    #[case(BuildStatus::Generating, BuildStatus::Booting, true)]
    #[case(BuildStatus::Booting, BuildStatus::Mounting, true)]
    #[case(BuildStatus::Mounting, BuildStatus::Installing, true)]
    #[case(BuildStatus::Installing, BuildStatus::Starting, true)]
    #[case(BuildStatus::Starting, BuildStatus::Ready, true)]
    #[case(BuildStatus::Ready, BuildStatus::Generating, true)]
    #[case(BuildStatus::Failed, BuildStatus::Generating, true)]
    #[case(BuildStatus::Installing, BuildStatus::Failed, true)]
    #[case(BuildStatus::Generating, BuildStatus::Installing, false)]
    #[case(BuildStatus::Ready, BuildStatus::Booting, false)]
    #[case(BuildStatus::Failed, BuildStatus::Booting, false)]
    #[case(BuildStatus::Ready, BuildStatus::Failed, true)]
    #[case(BuildStatus::Failed, BuildStatus::Failed, false)]
    #[case(BuildStatus::Idle, BuildStatus::Failed, false)]
    #[case(BuildStatus::Starting, BuildStatus::Idle, false)]
    fn test_transitions(
        #[case] from: BuildStatus,
        #[case] to: BuildStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_labels() {
        assert_eq!(
            BuildStatus::Generating.loading_label(),
            Some("Generating code...")
        );
        assert_eq!(BuildStatus::Mounting.placeholder_label(), "Writing files...");
        assert_eq!(BuildStatus::Idle.placeholder_label(), WAITING_LABEL);
        assert_eq!(BuildStatus::Ready.loading_label(), None);
        assert!(!BuildStatus::Failed.is_in_progress());
    }
}
