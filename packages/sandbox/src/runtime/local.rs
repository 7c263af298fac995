// ABOUTME: Local runtime hosting each sandbox in a temporary directory on the host
// ABOUTME: Commands run as child process groups that are killed when the sandbox is torn down

use super::{ProcessHandle, SandboxRuntime, StreamType};
use crate::error::{BootError, MountError, SpawnError, TeardownError};
use crate::ready::LineScanner;
use async_trait::async_trait;
use shipyard_config::CommandSpec;
use shipyard_core::{validate_file_path, GeneratedFileSet, SandboxId, ServedOrigin};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long teardown waits for killed processes to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

struct LocalProcess {
    kill: oneshot::Sender<()>,
    waiter: JoinHandle<()>,
}

struct LocalSandbox {
    dir: TempDir,
    port: u16,
    processes: Vec<LocalProcess>,
    /// Held while files are written; teardown takes it before removing the dir
    files: Arc<Mutex<()>>,
}

/// Sandboxes as host directories and host processes.
///
/// Gives no isolation beyond a private working directory and port. Meant for
/// development and tests; use [`super::DockerRuntime`] for untrusted code.
pub struct LocalRuntime {
    base_dir: Option<PathBuf>,
    sandboxes: Mutex<HashMap<SandboxId, LocalSandbox>>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self {
            base_dir: None,
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Create sandbox directories under `base_dir` instead of the system temp dir
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Project directory of a live sandbox
    pub async fn sandbox_dir(&self, id: SandboxId) -> Option<PathBuf> {
        let sandboxes = self.sandboxes.lock().await;
        sandboxes.get(&id).map(|s| s.dir.path().to_path_buf())
    }

    /// Port handed to processes of a live sandbox through `PORT`
    pub async fn sandbox_port(&self, id: SandboxId) -> Option<u16> {
        let sandboxes = self.sandboxes.lock().await;
        sandboxes.get(&id).map(|s| s.port)
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove everything inside `dir`, keeping the directory itself
async fn clear_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

async fn write_files(root: &Path, files: GeneratedFileSet) -> Result<(), MountError> {
    // Never recreate a project directory that has already been removed
    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        _ => {
            return Err(MountError::Io(format!(
                "project directory {} no longer exists",
                root.display()
            )))
        }
    }

    for (path, contents) in files {
        validate_file_path(&path)?;
        let target = root.join(&path);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MountError::Io(format!("{}: {}", path, e)))?;
        }

        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| MountError::Io(format!("{}: {}", path, e)))?;
    }
    Ok(())
}

fn pump_lines<R>(reader: R, stream: StreamType, scanner: LineScanner) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        // Keep draining after the handle is dropped so the child never blocks on a full pipe
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    scanner.line(stream, line.trim_end_matches(&['\n', '\r'][..]));
                }
                Err(e) => {
                    debug!("Stopped reading sandbox process output: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("Failed to signal process group {}: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

async fn supervise(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    pumps: Vec<JoinHandle<()>>,
    scanner: LineScanner,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit kill and when the sandbox entry is dropped
        _ = kill => {
            kill_group(&child);
            let _ = child.start_kill();
            child.wait().await
        }
    };

    for pump in pumps {
        if tokio::time::timeout(REAP_TIMEOUT, pump).await.is_err() {
            warn!("Output of a sandbox process did not close after exit");
        }
    }

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!("Failed to wait for sandbox process: {}", e);
            -1
        }
    };
    scanner.exited(code);
}

#[async_trait]
impl SandboxRuntime for LocalRuntime {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn boot(&self) -> Result<SandboxId, BootError> {
        let port = portpicker::pick_unused_port()
            .ok_or_else(|| BootError::ResourceLimit("no free port available".to_string()))?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("shipyard-");
        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            BootError::EnvironmentUnavailable(format!("failed to create sandbox directory: {}", e))
        })?;

        let id = SandboxId::new();
        info!(
            "Booted local sandbox {} at {} (port {})",
            id.short(),
            dir.path().display(),
            port
        );

        self.sandboxes.lock().await.insert(
            id,
            LocalSandbox {
                dir,
                port,
                processes: Vec::new(),
                files: Arc::new(Mutex::new(())),
            },
        );
        Ok(id)
    }

    async fn mount(&self, id: SandboxId, files: GeneratedFileSet) -> Result<(), MountError> {
        let lock = self
            .sandboxes
            .lock()
            .await
            .get(&id)
            .map(|s| s.files.clone())
            .ok_or(MountError::UnknownSandbox(id))?;
        let _writing = lock.lock().await;

        // Teardown may have claimed the sandbox while we waited
        let root = self
            .sandbox_dir(id)
            .await
            .ok_or(MountError::UnknownSandbox(id))?;

        clear_dir(&root)
            .await
            .map_err(|e| MountError::Io(format!("failed to clear project directory: {}", e)))?;

        let count = files.len();
        write_files(&root, files).await?;
        debug!("Mounted {} files into local sandbox {}", count, id.short());
        Ok(())
    }

    async fn spawn(
        &self,
        id: SandboxId,
        command: &CommandSpec,
    ) -> Result<ProcessHandle, SpawnError> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(&id)
            .ok_or(SpawnError::UnknownSandbox(id))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(sandbox.dir.path())
            .env("PORT", sandbox.port.to_string())
            .env("BROWSER", "none")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| SpawnError::Failed {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        info!(
            "Spawned '{}' in local sandbox {} (pid {:?})",
            command,
            id.short(),
            child.id()
        );

        let (events, handle) = ProcessHandle::channel();
        let scanner = LineScanner::new(events, Arc::new(ServedOrigin::localhost));

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump_lines(stdout, StreamType::Stdout, scanner.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump_lines(stderr, StreamType::Stderr, scanner.clone()));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let waiter = tokio::spawn(supervise(child, kill_rx, pumps, scanner));

        sandbox.processes.push(LocalProcess {
            kill: kill_tx,
            waiter,
        });

        Ok(handle)
    }

    async fn teardown(&self, id: SandboxId) -> Result<(), TeardownError> {
        let Some(sandbox) = self.sandboxes.lock().await.remove(&id) else {
            debug!("Local sandbox {} already torn down", id.short());
            return Ok(());
        };

        for process in sandbox.processes {
            let _ = process.kill.send(());
            if tokio::time::timeout(REAP_TIMEOUT, process.waiter)
                .await
                .is_err()
            {
                warn!("Timed out reaping a process of sandbox {}", id.short());
            }
        }

        // Wait out a mount that is still writing into the directory
        let _writing = sandbox.files.lock().await;

        let path = sandbox.dir.path().display().to_string();
        sandbox
            .dir
            .close()
            .map_err(|e| TeardownError(format!("failed to remove {}: {}", path, e)))?;

        info!("Tore down local sandbox {}", id.short());
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::ProcessEvent;
    use futures::StreamExt;

    fn files(entries: &[(&str, &str)]) -> GeneratedFileSet {
        let mut set = GeneratedFileSet::new();
        for (path, contents) in entries {
            set.insert(*path, *contents).unwrap();
        }
        set
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", &["-c", script])
    }

    #[tokio::test]
    async fn test_mount_replaces_previous_contents() {
        let base = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::with_base_dir(base.path());
        let id = runtime.boot().await.unwrap();
        let dir = runtime.sandbox_dir(id).await.unwrap();

        runtime
            .mount(id, files(&[("index.html", "one"), ("src/App.jsx", "app")]))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("src/App.jsx")).unwrap(), "app");

        runtime
            .mount(id, files(&[("index.html", "two")]))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("index.html")).unwrap(), "two");
        assert!(!dir.join("src").exists());

        runtime.teardown(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_removes_dir() {
        let base = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::with_base_dir(base.path());
        let id = runtime.boot().await.unwrap();
        let dir = runtime.sandbox_dir(id).await.unwrap();

        runtime.teardown(id).await.unwrap();
        assert!(!dir.exists());
        runtime.teardown(id).await.unwrap();

        let err = runtime.mount(id, files(&[("a.txt", "a")])).await.unwrap_err();
        assert_eq!(err, MountError::UnknownSandbox(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_during_mount_removes_everything() {
        let base = tempfile::tempdir().unwrap();
        let runtime = Arc::new(LocalRuntime::with_base_dir(base.path()));

        let mut set = GeneratedFileSet::new();
        for i in 0..200 {
            set.insert(format!("src/dir{}/nested/file{}.js", i, i), "export {}")
                .unwrap();
        }

        for _ in 0..20 {
            let id = runtime.boot().await.unwrap();
            let dir = runtime.sandbox_dir(id).await.unwrap();

            let mounting = {
                let runtime = runtime.clone();
                let set = set.clone();
                tokio::spawn(async move { runtime.mount(id, set).await })
            };
            tokio::time::sleep(Duration::from_micros(300)).await;

            runtime.teardown(id).await.unwrap();
            let mounted = mounting.await.unwrap();
            assert!(
                matches!(mounted, Ok(()) | Err(MountError::UnknownSandbox(_))),
                "unexpected mount result: {:?}",
                mounted
            );
            assert!(!dir.exists());
        }

        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_streams_output_and_exit_code() {
        let base = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::with_base_dir(base.path());
        let id = runtime.boot().await.unwrap();
        runtime.mount(id, files(&[("hello.txt", "hi")])).await.unwrap();

        let handle = runtime
            .spawn(id, &sh("cat hello.txt; echo oops >&2; exit 3"))
            .await
            .unwrap();
        let events: Vec<ProcessEvent> = handle.collect().await;

        assert_eq!(events.last(), Some(&ProcessEvent::Exited(3)));
        let text: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Output(chunk) => Some(chunk.text.as_str()),
                _ => None,
            })
            .collect();
        assert!(text.contains(&"hi"));
        assert!(text.contains(&"oops"));

        runtime.teardown(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_banner_maps_to_localhost_origin() {
        let runtime = LocalRuntime::new();
        let id = runtime.boot().await.unwrap();
        let port = runtime.sandbox_port(id).await.unwrap();

        let mut handle = runtime
            .spawn(
                id,
                &sh("echo \"Local:   http://localhost:$PORT/\"; sleep 30"),
            )
            .await
            .unwrap();

        let mut ready = None;
        while let Some(event) = handle.next().await {
            if let ProcessEvent::Ready(origin) = event {
                ready = Some(origin);
                break;
            }
        }
        assert_eq!(ready, Some(ServedOrigin::localhost(port)));

        // Teardown kills the sleeping process, which ends the stream
        runtime.teardown(id).await.unwrap();
        assert_ne!(handle.wait().await, 0);
    }
}
