// ABOUTME: Sandbox runtimes, lifecycle management, and command execution
// ABOUTME: Selects a runtime backend from configuration and exposes the sandbox building blocks

pub mod error;
pub mod lifecycle;
pub mod ready;
pub mod runner;
pub mod runtime;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{BootError, MountError, SpawnError, TeardownError};
pub use lifecycle::{LifecycleError, LifecycleState, SandboxHandle, SandboxLifecycleManager};
pub use ready::{detect_port, ReadyDetector};
pub use runner::{CommandRunner, InstallError, OutputSink, RunningServer, StartError};
pub use runtime::{
    DockerRuntime, LocalRuntime, OutputChunk, ProcessEvent, ProcessHandle, SandboxRuntime,
    StreamType,
};

use shipyard_config::{RuntimeKind, SandboxConfig};
use std::sync::Arc;
use tracing::info;

/// Build the runtime backend selected in `config`
pub fn runtime_from_config(config: &SandboxConfig) -> Result<Arc<dyn SandboxRuntime>, BootError> {
    let runtime: Arc<dyn SandboxRuntime> = match config.runtime {
        RuntimeKind::Local => Arc::new(LocalRuntime::new()),
        RuntimeKind::Docker => Arc::new(DockerRuntime::connect(config)?),
    };
    info!("Using {} sandbox runtime", runtime.name());
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_runtime_from_config() {
        let runtime = runtime_from_config(&SandboxConfig::default()).unwrap();
        assert_eq!(runtime.name(), "local");
    }
}
