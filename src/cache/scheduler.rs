//! Debounced invalidation scheduler.
//!
//! The first task queued while idle opens a batch window; when the debounce
//! timer fires the queue is drained, merged, resolved, and purged with every
//! merged task running concurrently. Tasks queued while a batch executes open
//! the next window instead of waiting. Timers use the tokio clock, so tests
//! drive the window with a paused runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::histogram;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lock::mutex_lock;
use super::planner::InvalidationPlan;
use super::purge::{MultiTierPurger, PurgeReport};
use super::relations::RelationshipMapper;
use super::task::{InvalidationTask, TaskQueue};

const SOURCE: &str = "cache::scheduler";
const METRIC_BATCH_MS: &str = "cms_sync_invalidation_batch_ms";

#[derive(Clone)]
pub struct InvalidationScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    queue: TaskQueue,
    mapper: RelationshipMapper,
    purger: MultiTierPurger,
    debounce: Duration,
    window_open: AtomicBool,
    batches: Mutex<Vec<JoinHandle<()>>>,
}

impl InvalidationScheduler {
    pub fn new(mapper: RelationshipMapper, purger: MultiTierPurger, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: TaskQueue::new(),
                mapper,
                purger,
                debounce,
                window_open: AtomicBool::new(false),
                batches: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn mapper(&self) -> &RelationshipMapper {
        &self.inner.mapper
    }

    pub fn purger(&self) -> &MultiTierPurger {
        &self.inner.purger
    }

    /// Enqueue a task for the current batch window. Never blocks on purging.
    pub fn queue(&self, task: InvalidationTask) {
        self.inner.queue.push(task);

        if self.inner.window_open.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.window_open.store(false, Ordering::SeqCst);
            inner.process_pending().await;
        });

        let mut batches = mutex_lock(&self.inner.batches, SOURCE, "queue");
        batches.retain(|batch| !batch.is_finished());
        batches.push(handle);
    }

    /// Resolve and purge one task now, outside any batch window.
    pub async fn invalidate_immediately(&self, task: &InvalidationTask) -> PurgeReport {
        self.inner.run_task(task).await
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Wait for every spawned batch, including ones whose timer has not fired yet.
    pub async fn settle(&self) {
        loop {
            let batches: Vec<_> = {
                let mut guard = mutex_lock(&self.inner.batches, SOURCE, "settle");
                guard.drain(..).collect()
            };
            if batches.is_empty() {
                return;
            }
            for batch in batches {
                if let Err(err) = batch.await {
                    warn!(target = "cms_sync::scheduler", error = %err, "invalidation batch aborted");
                }
            }
        }
    }

    /// Process whatever is queued without waiting for the timer, then settle.
    pub async fn flush(&self) {
        self.inner.process_pending().await;
        self.settle().await;
    }
}

impl SchedulerInner {
    async fn process_pending(&self) {
        let started_at = Instant::now();
        let drained = self.queue.drain_all();
        if drained.is_empty() {
            return;
        }

        let queued = drained.len();
        let plan = InvalidationPlan::from_tasks(drained);
        info!(
            target = "cms_sync::scheduler",
            queued,
            plan = %plan,
            "invalidation batch starting"
        );

        let reports = join_all(plan.tasks.iter().map(|task| self.run_task(task))).await;
        let failed = reports.iter().filter(|report| report.has_failures()).count();

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_BATCH_MS).record(elapsed_ms);
        info!(
            target = "cms_sync::scheduler",
            tasks = plan.tasks.len(),
            failed,
            elapsed_ms,
            "invalidation batch finished"
        );
    }

    async fn run_task(&self, task: &InvalidationTask) -> PurgeReport {
        let resources = self.mapper.resolve_task(task).await;
        debug!(
            content_type = %task.content_type,
            document_id = %task.document_id,
            tags = ?resources.tags,
            paths = ?resources.paths,
            "resolved affected resources"
        );

        let report = self.purger.execute(&resources, task).await;
        match report.failure_summary() {
            Some(summary) => warn!(
                target = "cms_sync::scheduler",
                content_type = %task.content_type,
                document_id = %task.document_id,
                failure = %summary,
                "invalidation completed with tier failures"
            ),
            None => debug!(
                content_type = %task.content_type,
                document_id = %task.document_id,
                "invalidation completed"
            ),
        }
        report
    }
}
