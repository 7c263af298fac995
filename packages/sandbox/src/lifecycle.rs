// ABOUTME: Sandbox lifecycle manager owning at most one live sandbox at a time
// ABOUTME: Serializes boot and teardown so a replaced sandbox is always released before the next boot

use crate::error::{BootError, MountError};
use crate::runtime::SandboxRuntime;
use serde::Serialize;
use shipyard_core::{FileSetLimits, GeneratedFileSet, SandboxId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Booting,
    Mounted,
    Installing,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl LifecycleState {
    pub fn has_live_sandbox(&self) -> bool {
        matches!(
            self,
            LifecycleState::Booting
                | LifecycleState::Mounted
                | LifecycleState::Installing
                | LifecycleState::Running
        )
    }
}

/// Capability to operate on the sandbox a manager booted.
///
/// Only the manager hands these out. A handle outlives its sandbox once the
/// sandbox is torn down; operations on it then fail with
/// [`LifecycleError::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxHandle {
    id: SandboxId,
}

impl SandboxHandle {
    pub fn id(&self) -> SandboxId {
        self.id
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error(transparent)]
    Mount(#[from] MountError),

    #[error("Sandbox {0} is no longer the live sandbox")]
    StaleHandle(SandboxId),
}

struct Inner {
    live: Option<SandboxId>,
    state: LifecycleState,
}

/// Owns the sandbox of one build session.
///
/// One lock guards the whole lifecycle. `boot` holds it across tearing down
/// the previous sandbox and booting the next one, and `teardown` takes the
/// same lock, so at most one boot or teardown is ever in flight.
pub struct SandboxLifecycleManager {
    runtime: Arc<dyn SandboxRuntime>,
    limits: FileSetLimits,
    inner: Mutex<Inner>,
    boots: AtomicU64,
    teardowns: AtomicU64,
}

impl SandboxLifecycleManager {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, limits: FileSetLimits) -> Self {
        Self {
            runtime,
            limits,
            inner: Mutex::new(Inner {
                live: None,
                state: LifecycleState::Idle,
            }),
            boots: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    pub async fn live_handle(&self) -> Option<SandboxHandle> {
        self.inner.lock().await.live.map(|id| SandboxHandle { id })
    }

    /// Sandboxes successfully booted so far
    pub fn boots(&self) -> u64 {
        self.boots.load(Ordering::SeqCst)
    }

    /// Live sandboxes released so far
    pub fn teardowns(&self) -> u64 {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Tear down any live sandbox, then boot a fresh one.
    ///
    /// `is_current` is checked after the previous sandbox is gone and before
    /// the runtime is asked for a new one, with the lifecycle lock held.
    /// Returning `false` skips the boot and yields `Ok(None)`.
    pub async fn boot<F>(&self, is_current: F) -> Result<Option<SandboxHandle>, BootError>
    where
        F: FnOnce() -> bool + Send,
    {
        let mut inner = self.inner.lock().await;

        if let Some(previous) = inner.live.take() {
            info!(
                "Releasing sandbox {} before booting a new one",
                previous.short()
            );
            self.release(&mut inner, previous).await;
        }

        if !is_current() {
            debug!("Boot skipped, requester is no longer current");
            return Ok(None);
        }

        inner.state = LifecycleState::Booting;
        match self.runtime.boot().await {
            Ok(id) => {
                self.boots.fetch_add(1, Ordering::SeqCst);
                inner.live = Some(id);
                info!("Booted sandbox {} on {} runtime", id.short(), self.runtime.name());
                Ok(Some(SandboxHandle { id }))
            }
            Err(e) => {
                warn!("Sandbox boot failed on {} runtime: {}", self.runtime.name(), e);
                inner.state = LifecycleState::Failed;
                Err(e)
            }
        }
    }

    /// Write a file set into the live sandbox, replacing whatever was there.
    ///
    /// Holds the lifecycle lock for the whole write, so a teardown requested
    /// meanwhile waits and then removes everything that was written.
    pub async fn mount(
        &self,
        handle: &SandboxHandle,
        files: GeneratedFileSet,
    ) -> Result<(), LifecycleError> {
        let mut inner = self.inner.lock().await;
        if inner.live != Some(handle.id) {
            return Err(LifecycleError::StaleHandle(handle.id));
        }
        files.check_limits(&self.limits).map_err(MountError::from)?;

        let count = files.len();
        let bytes = files.total_bytes();
        self.runtime.mount(handle.id, files).await?;

        inner.state = LifecycleState::Mounted;
        info!(
            "Mounted {} files ({} bytes) into sandbox {}",
            count,
            bytes,
            handle.id.short()
        );
        Ok(())
    }

    pub async fn mark_installing(&self, handle: &SandboxHandle) -> Result<(), LifecycleError> {
        self.transition(handle, LifecycleState::Installing).await
    }

    pub async fn mark_running(&self, handle: &SandboxHandle) -> Result<(), LifecycleError> {
        self.transition(handle, LifecycleState::Running).await
    }

    /// Record a failure of the live sandbox. Stale handles are ignored.
    pub async fn mark_failed(&self, handle: &SandboxHandle) {
        let _ = self.transition(handle, LifecycleState::Failed).await;
    }

    /// Release the live sandbox, if any. Safe to call any number of times.
    pub async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        match inner.live.take() {
            Some(id) => self.release(&mut inner, id).await,
            None => debug!("Teardown requested with no live sandbox"),
        }
    }

    async fn transition(
        &self,
        handle: &SandboxHandle,
        state: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let mut inner = self.inner.lock().await;
        if inner.live != Some(handle.id) {
            return Err(LifecycleError::StaleHandle(handle.id));
        }
        debug!(
            "Sandbox {}: {:?} -> {:?}",
            handle.id.short(),
            inner.state,
            state
        );
        inner.state = state;
        Ok(())
    }

    async fn release(&self, inner: &mut Inner, id: SandboxId) {
        inner.state = LifecycleState::Terminating;
        if let Err(e) = self.runtime.teardown(id).await {
            warn!("Sandbox {} teardown reported an error: {}", id.short(), e);
        }
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        inner.state = LifecycleState::Terminated;
        info!("Sandbox {} torn down", id.short());
    }
}
