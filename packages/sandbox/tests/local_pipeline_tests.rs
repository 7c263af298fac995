// ABOUTME: Integration tests driving the lifecycle manager and runner over the local runtime
// ABOUTME: Uses small shell scripts in place of a package manager and dev server

#![cfg(unix)]

use shipyard_config::CommandSpec;
use shipyard_core::{FileSetLimits, GeneratedFileSet};
use shipyard_sandbox::{
    CommandRunner, InstallError, LifecycleState, LocalRuntime, SandboxLifecycleManager,
    SandboxRuntime, StartError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn project() -> GeneratedFileSet {
    let mut files = GeneratedFileSet::new();
    files
        .insert("install.sh", "echo 'added 3 packages'\n")
        .unwrap();
    files
        .insert(
            "serve.sh",
            "echo \"  Local:   http://localhost:$PORT/\"\nexec sleep 30\n",
        )
        .unwrap();
    files
}

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", &[script])
}

fn setup(base: &tempfile::TempDir) -> (Arc<LocalRuntime>, SandboxLifecycleManager, CommandRunner) {
    let runtime = Arc::new(LocalRuntime::with_base_dir(base.path()));
    let manager = SandboxLifecycleManager::new(runtime.clone(), FileSetLimits::default());
    let runner = CommandRunner::new(runtime.clone(), Duration::from_secs(10));
    (runtime, manager, runner)
}

#[tokio::test]
async fn test_install_then_start_serves_on_sandbox_port() {
    let base = tempfile::tempdir().unwrap();
    let (runtime, manager, runner) = setup(&base);
    let (sink, mut output) = mpsc::unbounded_channel();

    let handle = manager.boot(|| true).await.unwrap().unwrap();
    manager.mount(&handle, project()).await.unwrap();

    manager.mark_installing(&handle).await.unwrap();
    runner.install(&handle, &sh("install.sh"), &sink).await.unwrap();
    assert_eq!(output.recv().await.unwrap().text, "added 3 packages");

    let server = runner.start(&handle, &sh("serve.sh"), &sink).await.unwrap();
    manager.mark_running(&handle).await.unwrap();

    let port = runtime.sandbox_port(handle.id()).await.unwrap();
    assert_eq!(server.origin().port, port);
    assert_eq!(server.origin().url, format!("http://localhost:{}", port));
    assert_eq!(manager.state().await, LifecycleState::Running);

    manager.teardown().await;
    assert!(matches!(server.exited().await, StartError::NonZeroExit { .. }));
    assert!(runtime.sandbox_dir(handle.id()).await.is_none());
}

#[tokio::test]
async fn test_failed_install_reports_resolution_error() {
    let base = tempfile::tempdir().unwrap();
    let (_runtime, manager, runner) = setup(&base);
    let (sink, _output) = mpsc::unbounded_channel();

    let mut files = project();
    files
        .insert(
            "install.sh",
            "echo 'npm ERR! code ETARGET' >&2\necho 'npm ERR! notarget No matching version found for react@99' >&2\nexit 1\n",
        )
        .unwrap();

    let handle = manager.boot(|| true).await.unwrap().unwrap();
    manager.mount(&handle, files).await.unwrap();

    let err = runner
        .install(&handle, &sh("install.sh"), &sink)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        InstallError::DependencyResolutionFailed {
            code: 1,
            detail: "npm ERR! code ETARGET".to_string()
        }
    );

    manager.teardown().await;
}

#[tokio::test]
async fn test_reboot_releases_previous_directory() {
    let base = tempfile::tempdir().unwrap();
    let (runtime, manager, _runner) = setup(&base);

    let first = manager.boot(|| true).await.unwrap().unwrap();
    let first_dir = runtime.sandbox_dir(first.id()).await.unwrap();

    let second = manager.boot(|| true).await.unwrap().unwrap();
    assert!(!first_dir.exists());
    assert!(runtime.sandbox_dir(second.id()).await.is_some());
    assert_eq!(runtime.name(), "local");

    manager.teardown().await;
    manager.teardown().await;
    assert_eq!(manager.boots(), 2);
    assert_eq!(manager.teardowns(), 2);
}
