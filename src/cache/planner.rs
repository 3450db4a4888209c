//! Batch planning.
//!
//! Collapses a drained batch of tasks so each document is processed once.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::domain::types::ContentType;

use super::task::{Epoch, InvalidationTask, QueuedTask};

#[derive(Debug, Default)]
pub struct InvalidationPlan {
    /// Merged tasks in order of first appearance.
    pub tasks: Vec<InvalidationTask>,
    /// Number of queued tasks folded into an earlier one.
    pub merged: usize,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ tasks: {}, merged: {} }}",
            self.tasks.len(),
            self.merged
        )
    }
}

impl InvalidationPlan {
    /// Merge tasks sharing (content type, document id).
    ///
    /// The latest epoch supplies the operation and after-state. The earliest
    /// before-state is kept so references dropped mid-batch are still purged,
    /// and replaced after-states are carried as superseded snapshots.
    /// Related data accumulates across all merged tasks.
    pub fn from_tasks(tasks: Vec<QueuedTask>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();
        let mut index: HashMap<(ContentType, String), (usize, Epoch)> = HashMap::new();

        let mut tasks: Vec<_> = tasks.into_iter().filter(|t| seen_ids.insert(t.id)).collect();
        tasks.sort_by_key(|t| t.epoch);

        for queued in tasks {
            let key = (queued.task.content_type, queued.task.document_id.clone());
            match index.get_mut(&key) {
                Some((position, latest)) => {
                    plan.merged += 1;
                    let existing = &mut plan.tasks[*position];
                    let incoming = queued.task;
                    if queued.epoch > *latest {
                        *latest = queued.epoch;
                        existing.operation = incoming.operation;
                        if let Some(stale) =
                            std::mem::replace(&mut existing.after, incoming.after)
                        {
                            existing.superseded.push(stale);
                        }
                        existing.superseded.extend(incoming.superseded);
                    }
                    if existing.before.is_none() {
                        existing.before = incoming.before;
                    }
                    existing.related.merge(incoming.related);
                }
                None => {
                    index.insert(key, (plan.tasks.len(), queued.epoch));
                    plan.tasks.push(queued.task);
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
