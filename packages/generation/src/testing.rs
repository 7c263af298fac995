//! Scripted [`FileGenerator`] for exercising the build pipeline without a network

use crate::client::{FileGenerator, GenerationContext, GenerationError, GenerationResult};
use async_trait::async_trait;
use shipyard_core::GeneratedFileSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

struct ScriptedReply {
    result: GenerationResult<GeneratedFileSet>,
    started: Option<oneshot::Sender<()>>,
    release: Option<oneshot::Receiver<()>>,
}

/// Holds a scripted reply back until released
pub struct GenerationGate {
    started: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl GenerationGate {
    /// Wait until the generator has picked up the gated reply
    pub async fn wait_started(&mut self) {
        if let Some(started) = self.started.take() {
            let _ = started.await;
        }
    }

    /// Let the gated reply resolve
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

/// Replies are handed out in the order they were pushed
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_files(&self, files: GeneratedFileSet) {
        self.push(Ok(files), None, None);
    }

    pub fn push_error(&self, error: GenerationError) {
        self.push(Err(error), None, None);
    }

    /// Queue a reply that blocks until the returned gate is released
    pub fn push_gated(&self, result: GenerationResult<GeneratedFileSet>) -> GenerationGate {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.push(result, Some(started_tx), Some(release_rx));
        GenerationGate {
            started: Some(started_rx),
            release: Some(release_tx),
        }
    }

    fn push(
        &self,
        result: GenerationResult<GeneratedFileSet>,
        started: Option<oneshot::Sender<()>>,
        release: Option<oneshot::Receiver<()>>,
    ) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(ScriptedReply {
                result,
                started,
                release,
            });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl FileGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _context: &GenerationContext,
    ) -> GenerationResult<GeneratedFileSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();

        let Some(mut reply) = reply else {
            return Err(GenerationError::Network("no scripted reply".to_string()));
        };

        if let Some(started) = reply.started.take() {
            let _ = started.send(());
        }
        if let Some(release) = reply.release.take() {
            let _ = release.await;
        }

        reply.result
    }
}
