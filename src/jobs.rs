//! Admission control for concurrent compositing jobs.
//!
//! Each job is a blocking pipeline; the gate caps how many run at once and
//! makes excess submissions wait for a free slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::composition::{CompositionEngine, JobRecord, StackRequest};
use crate::config::Config;
use crate::error::{CompositorError, Result};

/// Counting admission limit in front of a shared [`CompositionEngine`]
#[derive(Clone)]
pub struct JobGate {
    engine: Arc<CompositionEngine>,
    permits: Arc<Semaphore>,
    limit: usize,
    active: Arc<AtomicUsize>,
}

impl JobGate {
    /// Gate admitting at most `max_concurrent` jobs (at least one)
    pub fn new(engine: Arc<CompositionEngine>, max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Gate sized by `jobs.max_concurrent` of the engine's config
    pub fn from_engine(engine: Arc<CompositionEngine>) -> Self {
        let limit = engine.config().jobs.max_concurrent;
        Self::new(engine, limit)
    }

    /// Gate over an ffmpeg-backed engine built from `config`
    pub fn from_config(config: Config) -> Self {
        Self::from_engine(Arc::new(CompositionEngine::with_ffmpeg(config)))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for a slot, then run the job on the blocking pool
    pub async fn run(&self, request: StackRequest) -> Result<JobRecord> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CompositorError::generic("job gate closed"))?;

        let engine = Arc::clone(&self.engine);
        let active = Arc::clone(&self.active);
        let output = request.output.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _slot = ActiveSlot::enter(active);
            engine.compose(&request)
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(CompositorError::generic(format!(
                "job for {} did not complete: {}",
                output.display(),
                e
            ))),
        }
    }

    /// Submit a job without waiting for it
    pub fn spawn(&self, request: StackRequest) -> JoinHandle<Result<JobRecord>> {
        let gate = self.clone();
        debug!("Queued job for {}", request.output.display());
        tokio::spawn(async move { gate.run(request).await })
    }
}

/// Counts a pipeline as active for as long as it is held
struct ActiveSlot {
    active: Arc<AtomicUsize>,
}

impl ActiveSlot {
    fn enter(active: Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Job admitted ({} active)", now);
        Self { active }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
