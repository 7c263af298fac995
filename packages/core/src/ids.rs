// ABOUTME: Identity types for sandboxes and the origins they serve
// ABOUTME: Sandbox identity is a UUID so a replaced sandbox never compares equal to its predecessor

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identity of one booted sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(Uuid);

impl SandboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex characters, used in container names and logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin a sandboxed dev server is reachable at from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServedOrigin {
    pub url: String,
    pub port: u16,
}

impl ServedOrigin {
    pub fn localhost(port: u16) -> Self {
        Self {
            url: format!("http://localhost:{}", port),
            port,
        }
    }
}
