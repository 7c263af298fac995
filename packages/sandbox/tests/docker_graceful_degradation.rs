// ABOUTME: Tests for the Docker runtime when no Docker daemon is reachable
// ABOUTME: Boots fail with a clear error and nothing else needs the daemon

#![cfg(unix)]

use bollard::Docker;
use shipyard_config::{CommandSpec, SandboxConfig};
use shipyard_core::{GeneratedFileSet, SandboxId};
use shipyard_sandbox::{
    BootError, DockerRuntime, MountError, SandboxRuntime, SpawnError,
};

fn unreachable_runtime(dir: &tempfile::TempDir) -> DockerRuntime {
    let socket = dir.path().join("docker.sock");
    // bollard requires the socket path to exist; bind and drop so connections are refused
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    let client = Docker::connect_with_unix(
        &socket.to_string_lossy(),
        5,
        bollard::API_DEFAULT_VERSION,
    )
    .unwrap();
    DockerRuntime::with_client(client, &SandboxConfig::default())
}

#[tokio::test]
async fn test_boot_without_daemon_is_environment_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = unreachable_runtime(&dir);

    let err = runtime.boot().await.unwrap_err();
    assert!(
        matches!(err, BootError::EnvironmentUnavailable(_)),
        "unexpected error: {}",
        err
    );
}

#[tokio::test]
async fn test_unknown_sandbox_operations_without_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = unreachable_runtime(&dir);
    let id = SandboxId::new();

    let mut files = GeneratedFileSet::new();
    files.insert("index.html", "<html></html>").unwrap();
    assert_eq!(
        runtime.mount(id, files).await.unwrap_err(),
        MountError::UnknownSandbox(id)
    );

    let spawned = runtime
        .spawn(id, &CommandSpec::new("npm", &["install"]))
        .await;
    assert!(matches!(spawned, Err(SpawnError::UnknownSandbox(_))));

    // Nothing to remove, so teardown never needs the daemon
    assert!(runtime.teardown(id).await.is_ok());
    assert_eq!(runtime.name(), "docker");
}
