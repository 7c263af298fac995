// ABOUTME: Docker runtime hosting each sandbox in its own container
// ABOUTME: Uses bollard to create containers, upload project archives, and stream exec output

use super::{ProcessHandle, SandboxRuntime, StreamType};
use crate::error::{BootError, MountError, SpawnError, TeardownError};
use crate::ready::{LineBuffer, LineScanner};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        UploadToContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use futures::StreamExt;
use shipyard_config::{CommandSpec, SandboxConfig};
use shipyard_core::{GeneratedFileSet, SandboxId, ServedOrigin};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const LABEL_PREFIX: &str = "shipyard.sandbox";

struct DockerSandbox {
    container_id: String,
    host_port: u16,
    execs: Vec<JoinHandle<()>>,
}

pub struct DockerRuntime {
    client: Docker,
    image: String,
    workdir: String,
    dev_port: u16,
    pull_timeout: Duration,
    sandboxes: Mutex<HashMap<SandboxId, DockerSandbox>>,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon with the image and ports from `config`
    pub fn connect(config: &SandboxConfig) -> Result<Self, BootError> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| BootError::EnvironmentUnavailable(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Docker, config: &SandboxConfig) -> Self {
        Self {
            client,
            image: config.image.clone(),
            workdir: config.workdir.clone(),
            dev_port: config.dev_port,
            pull_timeout: Duration::from_secs(600),
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    fn container_config(&self, id: SandboxId, host_port: u16) -> Config<String> {
        let container_port = format!("{}/tcp", self.dev_port);

        let labels = HashMap::from([
            (format!("{}.managed", LABEL_PREFIX), "true".to_string()),
            (format!("{}.id", LABEL_PREFIX), id.to_string()),
        ]);

        let port_bindings = HashMap::from([(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        )]);

        Config {
            image: Some(self.image.clone()),
            // Keep the container alive; real work happens through exec
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            env: Some(vec![
                format!("PORT={}", self.dev_port),
                "HOST=0.0.0.0".to_string(),
                "BROWSER=none".to_string(),
            ]),
            working_dir: Some(self.workdir.clone()),
            labels: Some(labels),
            exposed_ports: Some(HashMap::from([(container_port, HashMap::new())])),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn ensure_image(&self) -> Result<(), BootError> {
        match self.client.inspect_image(&self.image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(BootError::EnvironmentUnavailable(e.to_string())),
        }

        info!(
            "Pulling image: {} (timeout: {:?})",
            self.image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: self.image.clone(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let pulled = tokio::time::timeout(self.pull_timeout, async {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(progress) => {
                        if let Some(error) = progress.error {
                            return Err(error);
                        }
                        if let Some(status) = progress.status {
                            debug!("Pull status: {}", status);
                        }
                    }
                    Err(e) => return Err(e.to_string()),
                }
            }
            Ok(())
        })
        .await;

        match pulled {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", self.image);
                Ok(())
            }
            Ok(Err(e)) => Err(BootError::EnvironmentUnavailable(format!(
                "failed to pull image {}: {}",
                self.image, e
            ))),
            Err(_) => Err(BootError::EnvironmentUnavailable(format!(
                "timed out pulling image {} after {:?}",
                self.image, self.pull_timeout
            ))),
        }
    }

    async fn container_of(&self, id: SandboxId) -> Option<String> {
        let sandboxes = self.sandboxes.lock().await;
        sandboxes.get(&id).map(|s| s.container_id.clone())
    }

    /// Run a command to completion, discarding output, and return its exit code
    async fn exec_to_completion(
        &self,
        container_id: &str,
        cmd: Vec<String>,
    ) -> Result<i64, bollard::errors::Error> {
        let exec = self
            .client
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        if let StartExecResults::Attached { mut output, .. } =
            self.client.start_exec(&exec.id, None).await?
        {
            while output.next().await.is_some() {}
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        Ok(inspect.exit_code.unwrap_or(0))
    }
}

/// Classify a container creation failure
fn boot_error(e: bollard::errors::Error) -> BootError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("port is already allocated")
        || lower.contains("no space left")
        || lower.contains("cannot allocate memory")
        || lower.contains("too many")
    {
        BootError::ResourceLimit(message)
    } else {
        BootError::EnvironmentUnavailable(message)
    }
}

/// Build an in-memory tar archive of a file set, parent directories first
pub fn build_archive(files: &GeneratedFileSet) -> std::io::Result<Vec<u8>> {
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    let mut builder = tar::Builder::new(Vec::new());
    let mut dirs = BTreeSet::new();

    for (path, contents) in files.iter() {
        let mut segments: Vec<&str> = path.split('/').collect();
        segments.pop();

        let mut prefix = String::new();
        for segment in segments {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if dirs.insert(prefix.clone()) {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_mtime(mtime);
                builder.append_data(&mut header, format!("{}/", prefix), std::io::empty())?;
            }
        }

        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(contents.len() as u64);
        header.set_mtime(mtime);
        builder.append_data(&mut header, path, contents.as_bytes())?;
    }

    builder.into_inner()
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn boot(&self) -> Result<SandboxId, BootError> {
        self.client
            .ping()
            .await
            .map_err(|e| BootError::EnvironmentUnavailable(e.to_string()))?;

        self.ensure_image().await?;

        let host_port = portpicker::pick_unused_port()
            .ok_or_else(|| BootError::ResourceLimit("no free host port available".to_string()))?;

        let id = SandboxId::new();
        let name = format!("shipyard-{}", id.short());
        info!("Creating container: {}", name);

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                self.container_config(id, host_port),
            )
            .await
            .map_err(boot_error)?;

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            error!("Failed to start container {}: {}", name, e);
            let _ = self
                .client
                .remove_container(
                    &container.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(boot_error(e));
        }

        info!(
            "Booted docker sandbox {} (container {}, port {} -> {})",
            id.short(),
            name,
            host_port,
            self.dev_port
        );

        self.sandboxes.lock().await.insert(
            id,
            DockerSandbox {
                container_id: container.id,
                host_port,
                execs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn mount(&self, id: SandboxId, files: GeneratedFileSet) -> Result<(), MountError> {
        let container_id = self
            .container_of(id)
            .await
            .ok_or(MountError::UnknownSandbox(id))?;

        let archive = build_archive(&files).map_err(|e| MountError::Io(e.to_string()))?;

        let cleared = self
            .exec_to_completion(
                &container_id,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "rm -rf \"$0\" && mkdir -p \"$0\"".to_string(),
                    self.workdir.clone(),
                ],
            )
            .await
            .map_err(|e| MountError::Io(e.to_string()))?;
        if cleared != 0 {
            return Err(MountError::Io(format!(
                "clearing {} exited with code {}",
                self.workdir, cleared
            )));
        }

        self.client
            .upload_to_container(
                &container_id,
                Some(UploadToContainerOptions {
                    path: self.workdir.clone(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| MountError::Io(e.to_string()))?;

        debug!(
            "Uploaded {} files into docker sandbox {}",
            files.len(),
            id.short()
        );
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

        let failed = |e: bollard::errors::Error| SpawnError::Failed {
            command: command.to_string(),
            reason: e.to_string(),
        };

        let mut cmd = vec![command.program.clone()];
        cmd.extend(command.args.iter().cloned());

        let exec = self
            .client
            .create_exec(
                &sandbox.container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    working_dir: Some(self.workdir.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(failed)?;

        let mut output = match self.client.start_exec(&exec.id, None).await.map_err(failed)? {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(SpawnError::Failed {
                    command: command.to_string(),
                    reason: "exec was detached unexpectedly".to_string(),
                })
            }
        };

        info!("Spawned '{}' in docker sandbox {}", command, id.short());

        let (events, handle) = ProcessHandle::channel();
        let host_port = sandbox.host_port;
        let dev_port = self.dev_port;
        let scanner = LineScanner::new(
            events,
            Arc::new(move |port| {
                if port != dev_port {
                    warn!(
                        "Dev server announced port {} but only {} is published",
                        port, dev_port
                    );
                }
                ServedOrigin::localhost(host_port)
            }),
        );

        let client = self.client.clone();
        let exec_id = exec.id;
        let task = tokio::spawn(async move {
            let mut stdout = LineBuffer::default();
            let mut stderr = LineBuffer::default();

            while let Some(message) = output.next().await {
                let (stream, buffer, bytes) = match message {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        (StreamType::Stdout, &mut stdout, message)
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        (StreamType::Stderr, &mut stderr, message)
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Exec output stream ended: {}", e);
                        break;
                    }
                };
                for line in buffer.push(&String::from_utf8_lossy(&bytes)) {
                    scanner.line(stream, &line);
                }
            }

            if let Some(rest) = stdout.finish() {
                scanner.line(StreamType::Stdout, &rest);
            }
            if let Some(rest) = stderr.finish() {
                scanner.line(StreamType::Stderr, &rest);
            }

            let code = match client.inspect_exec(&exec_id).await {
                Ok(inspect) => inspect.exit_code.map(|c| c as i32).unwrap_or(-1),
                Err(e) => {
                    debug!("Could not inspect exec {}: {}", exec_id, e);
                    -1
                }
            };
            scanner.exited(code);
        });

        sandbox.execs.push(task);
        Ok(handle)
    }

    async fn teardown(&self, id: SandboxId) -> Result<(), TeardownError> {
        let Some(sandbox) = self.sandboxes.lock().await.remove(&id) else {
            debug!("Docker sandbox {} already torn down", id.short());
            return Ok(());
        };

        info!(
            "Removing container {} of sandbox {}",
            sandbox.container_id,
            id.short()
        );

        let removed = self
            .client
            .remove_container(
                &sandbox.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;

        for exec in sandbox.execs {
            exec.abort();
        }

        match removed {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} was already gone", sandbox.container_id);
                Ok(())
            }
            Err(e) => Err(TeardownError(e.to_string())),
        }
    }
}
