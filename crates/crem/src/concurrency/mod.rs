//! Concurrency gate
//!
//! Bounds how many jobs run at once and keeps a live table of in-flight jobs
//! so they can be cancelled by ID. Built on the same semaphore-bounded
//! acquisition pattern [`crate::isolate::BoxPool`] uses for boxes, one layer
//! up: a gate admits a job before any box is ever requested.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Identifier for a single admitted job.
pub type JobId = Uuid;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate is closed")]
    Closed,

    #[error("acquisition cancelled")]
    Cancelled,
}

/// A slot reserved in the gate for one job.
///
/// Dropping a permit releases its semaphore slot and removes the job's
/// cancellation token from the live table, whether or not the job ran to
/// completion.
#[derive(Debug)]
pub struct JobPermit {
    id: JobId,
    token: CancellationToken,
    jobs: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    _permit: OwnedSemaphorePermit,
}

impl JobPermit {
    /// The ID assigned to this job when it was admitted.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Cancellation token for this job. Cancel-safe code should select on
    /// this alongside the job's own work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        let jobs = self.jobs.clone();
        let id = self.id;
        tokio::spawn(async move {
            jobs.lock().await.remove(&id);
        });
    }
}

/// Admits jobs up to a fixed concurrency limit and tracks which are live.
///
/// Acquisition is FIFO: [`tokio::sync::Semaphore`] wakes waiters in the order
/// they queued, so a burst of requests beyond capacity is served in arrival
/// order rather than arbitrarily.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    jobs: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    next_box_id: AtomicU32,
    box_id_base: u32,
    box_id_count: u32,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` jobs concurrently.
    pub fn new(capacity: usize) -> Self {
        Self::with_box_range(capacity, 0, 1000)
    }

    /// Create a gate whose box-ID allocator cycles through
    /// `[box_id_base, box_id_base + box_id_count)`.
    ///
    /// A job that needs two boxes (compile stage + run stage) calls
    /// [`Self::alloc_box_id`] twice under the same permit; since the counter
    /// only wraps at `box_id_count`, this mirrors the allocation
    /// [`crate::isolate::BoxPool`] does internally but keeps it scoped to the
    /// gate so one job's two boxes are allocated together, not split across
    /// pools.
    pub fn with_box_range(capacity: usize, box_id_base: u32, box_id_count: u32) -> Self {
        assert!(box_id_count > 0, "box_id_count must be positive");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_box_id: AtomicU32::new(0),
            box_id_base,
            box_id_count,
        }
    }

    /// Allocate the next box ID in this gate's range.
    ///
    /// Callers holding a [`JobPermit`] may call this up to twice (compile
    /// box, run box) without risk of two concurrent jobs colliding, since the
    /// counter advances atomically regardless of how many boxes each job
    /// requests.
    pub fn alloc_box_id(&self) -> u32 {
        let n = self.next_box_id.fetch_add(1, Ordering::Relaxed);
        self.box_id_base + (n % self.box_id_count)
    }

    /// Wait for a free slot and admit a new job, returning its permit.
    ///
    /// The returned [`JobId`] is freshly generated; callers should use it as
    /// the job's public identifier for the lifetime of the permit.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<JobPermit, GateError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.jobs.lock().await.insert(id, token.clone());

        debug!(%id, "job admitted");

        Ok(JobPermit {
            id,
            token,
            jobs: self.jobs.clone(),
            _permit: permit,
        })
    }

    /// Request cancellation of a live job. Returns `false` if no job with
    /// that ID is currently tracked (already finished, or never admitted).
    pub fn cancel(&self, id: JobId) -> bool {
        match self.jobs.try_lock() {
            Ok(jobs) => match jobs.get(&id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            // Contended: fall back to the async path via a blocking wait is
            // unnecessary here since callers needing a guaranteed result
            // should use `cancel_async`.
            Err(_) => false,
        }
    }

    /// Async form of [`Self::cancel`] that always observes the current table.
    pub async fn cancel_async(&self, id: JobId) -> bool {
        match self.jobs.lock().await.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live job, then wait up to `deadline` for them to drain
    /// out of the live table. Used during shutdown.
    pub async fn cancel_all(&self, deadline: Duration) {
        {
            let jobs = self.jobs.lock().await;
            for token in jobs.values() {
                token.cancel();
            }
        }

        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if self.jobs.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Number of jobs currently admitted (running or awaiting cancellation
    /// cleanup).
    pub async fn active_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Number of free slots available for immediate admission.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
