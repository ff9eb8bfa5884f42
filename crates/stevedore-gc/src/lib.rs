//! Online garbage-collection workers.
//!
//! Two worker kinds exist, one per review queue: [`BlobWorker`] and
//! [`ManifestWorker`]. Each runs a single dequeue-and-act cycle per call; a
//! scheduler outside this crate composes cycles into an infinite loop with
//! backoff.
//!
//! A cycle opens a transaction with a bounded timeout, dequeues one due task
//! with an exclusive skip-locked row lock, re-verifies the reachability
//! predicate inside the same snapshot, and either deletes the now-dangling
//! entity or just drops the task. On a recoverable failure the task is
//! re-locked in a fresh transaction and postponed by five minutes; deadline
//! errors surface without postponement so the scheduler retries the whole
//! cycle.
//!
//! Any number of worker processes may run against the same database: the
//! skip-locked dequeue guarantees a task is processed by at most one worker
//! at a time, without workers blocking each other.
//!
//! # Example
//!
//! ```rust,ignore
//! use stevedore_gc::BlobWorker;
//! use stevedore_postgres::Database;
//!
//! async fn example() -> Result<(), stevedore_gc::WorkerError> {
//!     let db = Database::connect("host=localhost user=postgres dbname=registry").await?;
//!     let mut worker = BlobWorker::new(db);
//!     let outcome = worker.run().await?;
//!     println!("found={} dangling={}", outcome.found, outcome.dangling);
//!     Ok(())
//! }
//! ```

mod metrics;

use std::time::{Duration, Instant};
use stevedore::{GCBlobTask, GCManifestTask};
use stevedore_postgres::{BlobStore, Database, GCBlobTaskStore, GCManifestTaskStore, ManifestStore};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default bound on one cycle's transaction.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Fixed backoff applied when a task is postponed after a failed cycle.
pub const POSTPONE_DELAY: Duration = Duration::from_secs(5 * 60);

/// Errors surfaced by a worker cycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The cycle failed; the task (if one was dequeued) was postponed.
    #[error("gc cycle failed: {0}")]
    Store(#[from] stevedore_postgres::Error),

    /// The cycle's deadline elapsed. The task was not postponed; the
    /// scheduler retries the entire cycle.
    #[error("gc cycle deadline exceeded: {0}")]
    DeadlineExceeded(#[source] stevedore_postgres::Error),

    /// The cycle failed and the compensating postponement failed too.
    #[error("gc cycle failed: {cycle}; postponing the task also failed: {postpone}")]
    PostponeFailed {
        cycle: stevedore_postgres::Error,
        postpone: stevedore_postgres::Error,
    },
}

/// Outcome of one worker cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Whether a due task was dequeued.
    pub found: bool,
    /// Whether the reviewed entity was dangling and deleted.
    pub dangling: bool,
    /// The event label that enqueued the reviewed task.
    pub event: Option<String>,
}

fn is_deadline(e: &stevedore_postgres::Error) -> bool {
    matches!(e, stevedore_postgres::Error::Postgres(pg) if stevedore_postgres::is_statement_canceled(pg))
}

/// Worker reviewing `gc_blob_review_queue`.
pub struct BlobWorker {
    db: Database,
    tx_timeout: Duration,
}

impl BlobWorker {
    pub fn new(db: Database) -> Self {
        BlobWorker {
            db,
            tx_timeout: DEFAULT_TX_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_tx_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Run one dequeue-and-act cycle.
    pub async fn run(&mut self) -> Result<CycleResult, WorkerError> {
        let started = Instant::now();
        let outcome = self.cycle().await;
        observe("blob", started, &outcome);
        outcome
    }

    async fn cycle(&mut self) -> Result<CycleResult, WorkerError> {
        match self.attempt().await {
            Ok(result) => Ok(result),
            Err((Some(mut task), e)) if !is_deadline(&e) => {
                warn!(
                    digest = %task.digest,
                    event = %task.event,
                    "blob review failed, postponing: {}",
                    e
                );
                match self.postpone(&mut task).await {
                    Ok(()) => Err(WorkerError::Store(e)),
                    Err(postpone) => Err(WorkerError::PostponeFailed { cycle: e, postpone }),
                }
            }
            Err((_, e)) if is_deadline(&e) => Err(WorkerError::DeadlineExceeded(e)),
            Err((_, e)) => Err(WorkerError::Store(e)),
        }
    }

    async fn attempt(
        &mut self,
    ) -> Result<CycleResult, (Option<GCBlobTask>, stevedore_postgres::Error)> {
        let store = GCBlobTaskStore::new();
        let tx = match self.db.begin(Some(self.tx_timeout)).await {
            Ok(tx) => tx,
            Err(e) => return Err((None, e)),
        };
        let task = match store.next(tx.client()).await {
            Ok(task) => task,
            Err(e) => return Err((None, e)),
        };
        let Some(task) = task else {
            debug!("no blob review task due");
            if let Err(e) = tx.commit().await {
                return Err((None, e));
            }
            return Ok(CycleResult::default());
        };

        let dangling = match store.is_dangling(tx.client(), &task.digest).await {
            Ok(dangling) => dangling,
            Err(e) => return Err((Some(task), e)),
        };
        if dangling {
            if let Err(e) = BlobStore::new().delete(tx.client(), &task.digest).await {
                return Err((Some(task), e));
            }
            info!(digest = %task.digest, event = %task.event, "deleted dangling blob");
        } else {
            debug!(digest = %task.digest, event = %task.event, "blob still referenced, dropping task");
        }
        if let Err(e) = store.delete(tx.client(), &task).await {
            return Err((Some(task), e));
        }
        if let Err(e) = tx.commit().await {
            return Err((Some(task), e));
        }
        Ok(CycleResult {
            found: true,
            dangling,
            event: Some(task.event),
        })
    }

    // Fresh transaction: the failed one rolled back when it was dropped.
    async fn postpone(&mut self, task: &mut GCBlobTask) -> Result<(), stevedore_postgres::Error> {
        let store = GCBlobTaskStore::new();
        let tx = self.db.begin(Some(self.tx_timeout)).await?;
        if store
            .find_and_lock(tx.client(), &task.digest)
            .await?
            .is_some()
        {
            store.postpone(tx.client(), task, POSTPONE_DELAY).await?;
        }
        tx.commit().await
    }
}

/// Worker reviewing `gc_manifest_review_queue`.
pub struct ManifestWorker {
    db: Database,
    tx_timeout: Duration,
}

impl ManifestWorker {
    pub fn new(db: Database) -> Self {
        ManifestWorker {
            db,
            tx_timeout: DEFAULT_TX_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_tx_timeout(mut self, tx_timeout: Duration) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Run one dequeue-and-act cycle.
    pub async fn run(&mut self) -> Result<CycleResult, WorkerError> {
        let started = Instant::now();
        let outcome = self.cycle().await;
        observe("manifest", started, &outcome);
        outcome
    }

    async fn cycle(&mut self) -> Result<CycleResult, WorkerError> {
        match self.attempt().await {
            Ok(result) => Ok(result),
            Err((Some(mut task), e)) if !is_deadline(&e) => {
                warn!(
                    manifest_id = task.manifest_id,
                    event = %task.event,
                    "manifest review failed, postponing: {}",
                    e
                );
                match self.postpone(&mut task).await {
                    Ok(()) => Err(WorkerError::Store(e)),
                    Err(postpone) => Err(WorkerError::PostponeFailed { cycle: e, postpone }),
                }
            }
            Err((_, e)) if is_deadline(&e) => Err(WorkerError::DeadlineExceeded(e)),
            Err((_, e)) => Err(WorkerError::Store(e)),
        }
    }

    async fn attempt(
        &mut self,
    ) -> Result<CycleResult, (Option<GCManifestTask>, stevedore_postgres::Error)> {
        let store = GCManifestTaskStore::new();
        let tx = match self.db.begin(Some(self.tx_timeout)).await {
            Ok(tx) => tx,
            Err(e) => return Err((None, e)),
        };
        let task = match store.next(tx.client()).await {
            Ok(task) => task,
            Err(e) => return Err((None, e)),
        };
        let Some(task) = task else {
            debug!("no manifest review task due");
            if let Err(e) = tx.commit().await {
                return Err((None, e));
            }
            return Ok(CycleResult::default());
        };

        let dangling = match store
            .is_dangling(
                tx.client(),
                task.namespace_id,
                task.repository_id,
                task.manifest_id,
            )
            .await
        {
            Ok(dangling) => dangling,
            Err(e) => return Err((Some(task), e)),
        };
        if dangling {
            // cascades remove the task row along with tags, layers and links
            match ManifestStore::new()
                .delete(
                    tx.client(),
                    task.namespace_id,
                    task.repository_id,
                    task.manifest_id,
                )
                .await
            {
                Ok(digest) => {
                    let digest = digest.map(|d| d.to_string()).unwrap_or_default();
                    info!(
                        manifest_id = task.manifest_id,
                        digest = %digest,
                        event = %task.event,
                        "deleted dangling manifest"
                    );
                }
                Err(e) => return Err((Some(task), e)),
            }
        } else {
            debug!(
                manifest_id = task.manifest_id,
                event = %task.event,
                "manifest still referenced, dropping task"
            );
        }
        if let Err(e) = store.delete(tx.client(), &task).await {
            return Err((Some(task), e));
        }
        if let Err(e) = tx.commit().await {
            return Err((Some(task), e));
        }
        Ok(CycleResult {
            found: true,
            dangling,
            event: Some(task.event),
        })
    }

    async fn postpone(
        &mut self,
        task: &mut GCManifestTask,
    ) -> Result<(), stevedore_postgres::Error> {
        let store = GCManifestTaskStore::new();
        let tx = self.db.begin(Some(self.tx_timeout)).await?;
        if store
            .find_and_lock(
                tx.client(),
                task.namespace_id,
                task.repository_id,
                task.manifest_id,
            )
            .await?
            .is_some()
        {
            store.postpone(tx.client(), task, POSTPONE_DELAY).await?;
        }
        tx.commit().await
    }
}

fn observe(worker: &str, started: Instant, outcome: &Result<CycleResult, WorkerError>) {
    let result = match outcome {
        Ok(r) if !r.found => "empty",
        Ok(r) if r.dangling => "dangling",
        Ok(_) => "kept",
        Err(_) => "error",
    };
    metrics::METRICS
        .run_duration_seconds
        .with_label_values(&[worker])
        .observe(started.elapsed().as_secs_f64());
    metrics::METRICS
        .cycles_total
        .with_label_values(&[worker, result])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_result_default_is_not_found() {
        let r = CycleResult::default();
        assert!(!r.found);
        assert!(!r.dangling);
        assert!(r.event.is_none());
    }

    #[test]
    fn test_postpone_delay_is_five_minutes() {
        assert_eq!(POSTPONE_DELAY, Duration::from_secs(300));
        assert_eq!(DEFAULT_TX_TIMEOUT, Duration::from_secs(600));
    }
}
