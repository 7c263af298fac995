//! Scripted [`SandboxRuntime`] that records every call, for exercising the
//! lifecycle and the build pipeline without touching the host.

use crate::error::{BootError, MountError, SpawnError, TeardownError};
use crate::runtime::{ProcessEvents, ProcessHandle, SandboxRuntime, StreamType};
use async_trait::async_trait;
use shipyard_config::CommandSpec;
use shipyard_core::{GeneratedFileSet, SandboxId, ServedOrigin};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Exit code reported for processes killed by a teardown
pub const KILLED_EXIT_CODE: i32 = 137;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Boot(SandboxId),
    Mount(SandboxId, Vec<String>),
    Spawn(SandboxId, CommandSpec),
    Teardown(SandboxId),
}

/// Holds a scripted operation back until released
pub struct Gate {
    started: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

struct GateLatch {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

impl GateLatch {
    async fn pass(self) {
        let _ = self.started.send(());
        let _ = self.release.await;
    }
}

fn gate_pair() -> (Gate, GateLatch) {
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    (
        Gate {
            started: Some(started_rx),
            release: Some(release_tx),
        },
        GateLatch {
            started: started_tx,
            release: release_rx,
        },
    )
}

impl Gate {
    /// Wait until the gated operation has been reached
    pub async fn wait_started(&mut self) {
        if let Some(started) = self.started.take() {
            let _ = started.await;
        }
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

/// Script for one spawned process: output, then optional readiness, then exit
#[derive(Debug, Clone)]
pub struct ScriptedProcess {
    output: Vec<(StreamType, String)>,
    ready: Option<u16>,
    exit: Option<i32>,
}

impl ScriptedProcess {
    /// Exits with `code` right away
    pub fn exits(code: i32) -> Self {
        Self {
            output: Vec::new(),
            ready: None,
            exit: Some(code),
        }
    }

    /// Reports ready on `localhost:port` and runs until torn down
    pub fn serves(port: u16) -> Self {
        Self {
            output: Vec::new(),
            ready: Some(port),
            exit: None,
        }
    }

    /// Runs silently until torn down
    pub fn hangs() -> Self {
        Self {
            output: Vec::new(),
            ready: None,
            exit: None,
        }
    }

    pub fn with_output(mut self, text: impl Into<String>) -> Self {
        self.output.push((StreamType::Stdout, text.into()));
        self
    }

    pub fn with_stderr(mut self, text: impl Into<String>) -> Self {
        self.output.push((StreamType::Stderr, text.into()));
        self
    }

    /// Exit with `code` after everything else has been emitted
    pub fn then_exit(mut self, code: i32) -> Self {
        self.exit = Some(code);
        self
    }

    /// Emit the script. Returns the producer when the process stays alive.
    fn play(self, events: ProcessEvents) -> Option<ProcessEvents> {
        for (stream, text) in self.output {
            events.output(stream, text);
        }
        if let Some(port) = self.ready {
            events.ready(ServedOrigin::localhost(port));
        }
        match self.exit {
            Some(code) => {
                events.exited(code);
                None
            }
            None => Some(events),
        }
    }
}

struct PendingProcess {
    script: ScriptedProcess,
    gate: Option<GateLatch>,
}

#[derive(Default)]
struct State {
    calls: Vec<RuntimeCall>,
    live: HashSet<SandboxId>,
    peak_live: usize,
    boots: usize,
    teardowns: usize,
    mounts: usize,
    mounted: HashMap<SandboxId, GeneratedFileSet>,
    running: HashMap<SandboxId, Vec<ProcessEvents>>,
    processes: VecDeque<PendingProcess>,
    boot_failures: VecDeque<BootError>,
    boot_gates: VecDeque<GateLatch>,
    mount_failures: VecDeque<MountError>,
    mount_gates: VecDeque<GateLatch>,
    teardown_failure: Option<String>,
}

/// In-memory runtime driven by scripts pushed ahead of time.
///
/// Unscripted spawns exit 0 immediately.
#[derive(Default, Clone)]
pub struct ScriptedRuntime {
    state: Arc<Mutex<State>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script the next spawned process
    pub fn push_process(&self, script: ScriptedProcess) {
        self.lock().processes.push_back(PendingProcess { script, gate: None });
    }

    /// Script the next spawned process, held back until the gate is released
    pub fn push_gated_process(&self, script: ScriptedProcess) -> Gate {
        let (gate, latch) = gate_pair();
        self.lock().processes.push_back(PendingProcess {
            script,
            gate: Some(latch),
        });
        gate
    }

    pub fn fail_next_boot(&self, error: BootError) {
        self.lock().boot_failures.push_back(error);
    }

    /// Hold the next boot until the gate is released
    pub fn hold_next_boot(&self) -> Gate {
        let (gate, latch) = gate_pair();
        self.lock().boot_gates.push_back(latch);
        gate
    }

    /// Hold the next mount until the gate is released
    pub fn hold_next_mount(&self) -> Gate {
        let (gate, latch) = gate_pair();
        self.lock().mount_gates.push_back(latch);
        gate
    }

    pub fn fail_next_mount(&self, error: MountError) {
        self.lock().mount_failures.push_back(error);
    }

    /// Make every teardown report an error after releasing the sandbox
    pub fn fail_teardowns(&self, message: impl Into<String>) {
        self.lock().teardown_failure = Some(message.into());
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn boots(&self) -> usize {
        self.lock().boots
    }

    pub fn teardowns(&self) -> usize {
        self.lock().teardowns
    }

    pub fn mounts(&self) -> usize {
        self.lock().mounts
    }

    pub fn spawns(&self) -> Vec<CommandSpec> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Spawn(_, command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live(&self) -> Vec<SandboxId> {
        self.lock().live.iter().copied().collect()
    }

    /// Largest number of sandboxes that were ever live at once
    pub fn peak_live(&self) -> usize {
        self.lock().peak_live
    }

    pub fn mounted_files(&self, id: SandboxId) -> Option<GeneratedFileSet> {
        self.lock().mounted.get(&id).cloned()
    }

    fn keep_running(&self, id: SandboxId, events: ProcessEvents) {
        let mut state = self.lock();
        if state.live.contains(&id) {
            state.running.entry(id).or_default().push(events);
        } else {
            events.exited(KILLED_EXIT_CODE);
        }
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn boot(&self) -> Result<SandboxId, BootError> {
        let id = SandboxId::new();
        let gate = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Boot(id));
            state.boot_gates.pop_front()
        };

        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut state = self.lock();
        if let Some(error) = state.boot_failures.pop_front() {
            return Err(error);
        }
        state.live.insert(id);
        state.boots += 1;
        state.peak_live = state.peak_live.max(state.live.len());
        Ok(id)
    }

    async fn mount(&self, id: SandboxId, files: GeneratedFileSet) -> Result<(), MountError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Mount(
                id,
                files.paths().map(str::to_string).collect(),
            ));
            state.mount_gates.pop_front()
        };

        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut state = self.lock();
        if let Some(error) = state.mount_failures.pop_front() {
            return Err(error);
        }
        if !state.live.contains(&id) {
            return Err(MountError::UnknownSandbox(id));
        }

        state.mounts += 1;
        state.mounted.insert(id, files);
        Ok(())
    }

    async fn spawn(
        &self,
        id: SandboxId,
        command: &CommandSpec,
    ) -> Result<ProcessHandle, SpawnError> {
        let pending = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Spawn(id, command.clone()));
            if !state.live.contains(&id) {
                return Err(SpawnError::UnknownSandbox(id));
            }
            state.processes.pop_front()
        };

        let (events, handle) = ProcessHandle::channel();
        let PendingProcess { script, gate } = pending.unwrap_or(PendingProcess {
            script: ScriptedProcess::exits(0),
            gate: None,
        });

        match gate {
            None => {
                if let Some(events) = script.play(events) {
                    self.keep_running(id, events);
                }
            }
            Some(gate) => {
                let runtime = self.clone();
                tokio::spawn(async move {
                    gate.pass().await;
                    if let Some(events) = script.play(events) {
                        runtime.keep_running(id, events);
                    }
                });
            }
        }

        Ok(handle)
    }

    async fn teardown(&self, id: SandboxId) -> Result<(), TeardownError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Teardown(id));

        if !state.live.remove(&id) {
            return Ok(());
        }
        state.teardowns += 1;
        state.mounted.remove(&id);
        for events in state.running.remove(&id).unwrap_or_default() {
            events.exited(KILLED_EXIT_CODE);
        }

        match &state.teardown_failure {
            Some(message) => Err(TeardownError(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ProcessEvent;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_running_process_is_killed_by_teardown() {
        let runtime = ScriptedRuntime::new();
        runtime.push_process(ScriptedProcess::serves(5173));

        let id = runtime.boot().await.unwrap();
        let mut handle = runtime
            .spawn(id, &CommandSpec::new("npm", &["run", "dev"]))
            .await
            .unwrap();

        assert_eq!(
            handle.next().await,
            Some(ProcessEvent::Ready(ServedOrigin::localhost(5173)))
        );

        runtime.teardown(id).await.unwrap();
        assert_eq!(handle.wait().await, KILLED_EXIT_CODE);
        assert!(runtime.live().is_empty());
    }

    #[tokio::test]
    async fn test_gated_process_waits_for_release() {
        let runtime = ScriptedRuntime::new();
        let mut gate = runtime.push_gated_process(ScriptedProcess::exits(0));

        let id = runtime.boot().await.unwrap();
        let handle = runtime
            .spawn(id, &CommandSpec::new("npm", &["install"]))
            .await
            .unwrap();

        gate.wait_started().await;
        gate.release();
        assert_eq!(handle.wait().await, 0);
    }
}
