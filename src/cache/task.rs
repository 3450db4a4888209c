//! Invalidation tasks and the in-memory queue that buffers them.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::domain::document::ContentDocument;
use crate::domain::types::{ContentType, WebhookOperation};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::task";
const METRIC_QUEUE_LEN: &str = "cms_sync_invalidation_queue_len";

/// Monotonic sequence number used to pick the latest task per document.
pub type Epoch = u64;

/// Extra identifiers gathered during sync that widen invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedData {
    pub group_id: Option<String>,
    pub sibling_ids: BTreeSet<String>,
}

impl RelatedData {
    pub fn merge(&mut self, other: RelatedData) {
        if other.group_id.is_some() {
            self.group_id = other.group_id;
        }
        self.sibling_ids.extend(other.sibling_ids);
    }
}

/// One unit of invalidation work describing a content change.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationTask {
    pub content_type: ContentType,
    pub operation: WebhookOperation,
    pub document_id: String,
    pub before: Option<ContentDocument>,
    pub after: Option<ContentDocument>,
    /// After-states replaced while merging a batch; still purged.
    pub superseded: Vec<ContentDocument>,
    pub related: RelatedData,
}

impl InvalidationTask {
    pub fn new(
        operation: WebhookOperation,
        before: Option<ContentDocument>,
        after: Option<ContentDocument>,
    ) -> Option<Self> {
        let reference = after.as_ref().or(before.as_ref())?;
        Some(Self {
            content_type: reference.content_type(),
            operation,
            document_id: reference.id().to_string(),
            before,
            after,
            superseded: Vec::new(),
            related: RelatedData::default(),
        })
    }

    /// A task known only by id; resources are resolved from the CMS at purge time.
    pub fn for_document(content_type: ContentType, document_id: impl Into<String>) -> Self {
        Self {
            content_type,
            operation: WebhookOperation::Update,
            document_id: document_id.into(),
            before: None,
            after: None,
            superseded: Vec::new(),
            related: RelatedData::default(),
        }
    }

    pub fn with_related(mut self, related: RelatedData) -> Self {
        self.related = related;
        self
    }

    /// Snapshots present on the task, newest first.
    pub fn snapshots(&self) -> impl Iterator<Item = &ContentDocument> {
        self.after
            .iter()
            .chain(self.superseded.iter().rev())
            .chain(self.before.iter())
    }
}

#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: Uuid,
    pub epoch: Epoch,
    pub task: InvalidationTask,
    pub queued_at: OffsetDateTime,
}

/// FIFO buffer between webhook handling and the scheduler.
pub struct TaskQueue {
    queue: Mutex<VecDeque<QueuedTask>>,
    epoch_counter: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn push(&self, task: InvalidationTask) -> Uuid {
        let queued = QueuedTask {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            task,
            queued_at: OffsetDateTime::now_utc(),
        };
        let id = queued.id;

        debug!(
            task_id = %queued.id,
            task_epoch = queued.epoch,
            content_type = %queued.task.content_type,
            document_id = %queued.task.document_id,
            operation = %queued.task.operation,
            "invalidation task queued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "push");
        queue.push_back(queued);
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        id
    }

    /// Remove and return every pending task in FIFO order.
    pub fn drain_all(&self) -> Vec<QueuedTask> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain_all");
        let drained: Vec<_> = queue.drain(..).collect();
        gauge!(METRIC_QUEUE_LEN).set(0.0);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
