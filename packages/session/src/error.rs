// ABOUTME: Error types for build sessions
// ABOUTME: Submission rejections and the pipeline error that wraps every stage failure

use crate::pipeline::Stage;
use shipyard_generation::GenerationError;
use shipyard_sandbox::{BootError, InstallError, LifecycleError, MountError, StartError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    #[error("Session has been disposed")]
    Disposed,
}

/// Why a pipeline run ended in `Failed`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error("{0}")]
    Unclassified(String),
}

impl From<LifecycleError> for PipelineError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Mount(e) => PipelineError::Mount(e),
            other => PipelineError::Unclassified(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Unclassified(format!("build task ended abnormally: {}", err))
    }
}

impl PipelineError {
    /// Stage the error belongs to, if it could be classified
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Generation(_) => Some(Stage::Generate),
            PipelineError::Boot(_) => Some(Stage::Boot),
            PipelineError::Mount(_) => Some(Stage::Mount),
            PipelineError::Install(_) => Some(Stage::Install),
            PipelineError::Start(_) => Some(Stage::Start),
            PipelineError::Unclassified(_) => None,
        }
    }

    /// Text of the assistant message reporting this failure
    pub fn user_message(&self) -> String {
        match self.stage() {
            Some(stage) => format!("{}: {}", stage.failure_summary(), self),
            None => format!("Something went wrong while building your app: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shipyard_core::SandboxId;

    #[rstest]
    #[case(
        PipelineError::Generation(GenerationError::AuthMissing(
            "secret 'ANTHROPIC_API_KEY' not found".to_string()
        )),
        "Code generation failed: No usable API key: secret 'ANTHROPIC_API_KEY' not found"
    )]
    #[case(
        PipelineError::Install(InstallError::NonZeroExit { code: 1 }),
        "Installing dependencies failed: Dependency install exited with code 1"
    )]
    #[case(
        PipelineError::Unclassified("task panicked".to_string()),
        "Something went wrong while building your app: task panicked"
    )]
    fn test_user_message(#[case] err: PipelineError, #[case] expected: &str) {
        assert_eq!(err.user_message(), expected);
    }

    #[test]
    fn test_lifecycle_errors_map_to_stage() {
        let mount: PipelineError = LifecycleError::Mount(MountError::TooLarge("5MB".into())).into();
        assert_eq!(mount.stage(), Some(Stage::Mount));

        let stale: PipelineError = LifecycleError::StaleHandle(SandboxId::new()).into();
        assert_eq!(stale.stage(), None);
    }
}
