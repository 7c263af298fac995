// ABOUTME: Preview surface binding a session to the origin its sandbox serves
// ABOUTME: Binds only when ready and rebinds whenever the sandbox identity changes

use chrono::{DateTime, Utc};
use serde::Serialize;
use shipyard_core::{BuildStatus, SandboxId, ServedOrigin, WAITING_LABEL};
use tracing::{debug, info, warn};

/// What the preview currently shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PreviewBinding {
    /// Blank or loading view with a status label
    Placeholder { label: String },
    /// The running app of one sandbox
    Bound {
        sandbox_id: SandboxId,
        url: String,
        bound_at: DateTime<Utc>,
    },
}

/// Effect of applying a session update to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewChange {
    Unchanged,
    /// Went from placeholder to a sandbox
    Bound,
    /// Switched to a different sandbox, even if it serves the same URL
    Rebound,
    /// Went from a sandbox back to placeholder
    Cleared,
    /// Still a placeholder, showing a different label
    Relabeled,
}

impl PreviewChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, PreviewChange::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct PreviewSurface {
    binding: PreviewBinding,
}

impl Default for PreviewSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewSurface {
    pub fn new() -> Self {
        Self {
            binding: PreviewBinding::Placeholder {
                label: WAITING_LABEL.to_string(),
            },
        }
    }

    pub fn binding(&self) -> &PreviewBinding {
        &self.binding
    }

    pub fn bound_sandbox(&self) -> Option<SandboxId> {
        match &self.binding {
            PreviewBinding::Bound { sandbox_id, .. } => Some(*sandbox_id),
            PreviewBinding::Placeholder { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.binding {
            PreviewBinding::Bound { url, .. } => Some(url),
            PreviewBinding::Placeholder { .. } => None,
        }
    }

    /// Bring the surface in line with the session's status and active sandbox.
    ///
    /// Identity is the sandbox id: a new sandbox always rebinds, and the same
    /// sandbox never does.
    pub fn apply(
        &mut self,
        status: BuildStatus,
        active: Option<(SandboxId, &ServedOrigin)>,
    ) -> PreviewChange {
        match (status, active) {
            (BuildStatus::Ready, Some((id, origin))) => self.bind(id, origin),
            (BuildStatus::Ready, None) => {
                warn!("Session is ready but has no served origin; showing placeholder");
                self.clear(status)
            }
            _ => self.clear(status),
        }
    }

    fn bind(&mut self, id: SandboxId, origin: &ServedOrigin) -> PreviewChange {
        let change = match self.bound_sandbox() {
            Some(current) if current == id => return PreviewChange::Unchanged,
            Some(_) => PreviewChange::Rebound,
            None => PreviewChange::Bound,
        };

        info!("Preview bound to sandbox {} at {}", id.short(), origin.url);
        self.binding = PreviewBinding::Bound {
            sandbox_id: id,
            url: origin.url.clone(),
            bound_at: Utc::now(),
        };
        change
    }

    fn clear(&mut self, status: BuildStatus) -> PreviewChange {
        let label = status.placeholder_label();
        let change = match &self.binding {
            PreviewBinding::Placeholder { label: current } if current == label => {
                return PreviewChange::Unchanged
            }
            PreviewBinding::Placeholder { .. } => PreviewChange::Relabeled,
            PreviewBinding::Bound { .. } => {
                debug!("Preview cleared ({})", status);
                PreviewChange::Cleared
            }
        };

        self.binding = PreviewBinding::Placeholder {
            label: label.to_string(),
        };
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_starts_as_waiting_placeholder() {
        let surface = PreviewSurface::new();
        assert_eq!(
            surface.binding(),
            &PreviewBinding::Placeholder {
                label: "Waiting for prompt submission...".to_string()
            }
        );
        assert_eq!(surface.url(), None);
    }

    #[test]
    fn test_placeholder_for_every_non_ready_status() {
        let origin = ServedOrigin::localhost(5173);
        let id = SandboxId::new();

        for status in [
            BuildStatus::Idle,
            BuildStatus::Generating,
            BuildStatus::Booting,
            BuildStatus::Mounting,
            BuildStatus::Installing,
            BuildStatus::Starting,
            BuildStatus::Failed,
        ] {
            let mut surface = PreviewSurface::new();
            let expected = if status == BuildStatus::Idle {
                PreviewChange::Unchanged
            } else {
                PreviewChange::Relabeled
            };
            assert_eq!(surface.apply(status, Some((id, &origin))), expected);
            assert_eq!(
                surface.binding(),
                &PreviewBinding::Placeholder {
                    label: status.placeholder_label().to_string()
                }
            );
        }
    }

    #[test]
    fn test_label_follows_stage_changes() {
        let mut surface = PreviewSurface::new();

        assert_eq!(surface.apply(BuildStatus::Generating, None), PreviewChange::Relabeled);
        assert_eq!(surface.apply(BuildStatus::Generating, None), PreviewChange::Unchanged);
        assert_eq!(surface.apply(BuildStatus::Booting, None), PreviewChange::Relabeled);
        assert_eq!(
            surface.binding(),
            &PreviewBinding::Placeholder {
                label: "Booting sandbox...".to_string()
            }
        );
    }

    #[test]
    fn test_binds_on_ready() {
        let mut surface = PreviewSurface::new();
        let id = SandboxId::new();
        let origin = ServedOrigin::localhost(5173);

        assert_eq!(
            surface.apply(BuildStatus::Ready, Some((id, &origin))),
            PreviewChange::Bound
        );
        assert_eq!(surface.bound_sandbox(), Some(id));
        assert_eq!(surface.url(), Some("http://localhost:5173"));

        assert_eq!(
            surface.apply(BuildStatus::Ready, Some((id, &origin))),
            PreviewChange::Unchanged
        );
    }

    #[test]
    fn test_rebinds_on_new_sandbox_with_same_url() {
        let mut surface = PreviewSurface::new();
        let origin = ServedOrigin::localhost(5173);
        let first = SandboxId::new();
        let second = SandboxId::new();

        surface.apply(BuildStatus::Ready, Some((first, &origin)));
        assert_eq!(
            surface.apply(BuildStatus::Ready, Some((second, &origin))),
            PreviewChange::Rebound
        );
        assert_eq!(surface.bound_sandbox(), Some(second));
    }

    #[test]
    fn test_clears_when_session_leaves_ready() {
        let mut surface = PreviewSurface::new();
        let id = SandboxId::new();
        let origin = ServedOrigin::localhost(4000);

        surface.apply(BuildStatus::Ready, Some((id, &origin)));
        assert_eq!(surface.apply(BuildStatus::Generating, None), PreviewChange::Cleared);
        assert_eq!(
            surface.binding(),
            &PreviewBinding::Placeholder {
                label: "Generating code...".to_string()
            }
        );
    }
}
