// ABOUTME: Error types for sandbox runtimes
// ABOUTME: Boot, mount, spawn and teardown failures reported by a runtime backend

use shipyard_core::{FileSetError, SandboxId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    #[error("Sandbox environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("Sandbox resource limit reached: {0}")]
    ResourceLimit(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    #[error("Invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("File set too large: {0}")]
    TooLarge(String),

    #[error("Failed to write files into sandbox: {0}")]
    Io(String),

    #[error("Sandbox {0} does not exist")]
    UnknownSandbox(SandboxId),
}

impl From<FileSetError> for MountError {
    fn from(err: FileSetError) -> Self {
        match err {
            FileSetError::InvalidPath { path, reason } => MountError::InvalidPath { path, reason },
            FileSetError::Empty => MountError::InvalidPath {
                path: String::new(),
                reason: "file set is empty".to_string(),
            },
            other @ (FileSetError::TooManyFiles { .. } | FileSetError::TooLarge { .. }) => {
                MountError::TooLarge(other.to_string())
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("Sandbox {0} does not exist")]
    UnknownSandbox(SandboxId),

    #[error("Failed to spawn '{command}': {reason}")]
    Failed { command: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sandbox teardown failed: {0}")]
pub struct TeardownError(pub String);
