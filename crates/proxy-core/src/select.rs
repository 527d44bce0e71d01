//! Write/read/assignment queue selection (spec §4.3).
//!
//! Queue ids are synthesized from `QueueData`'s three counters rather than
//! reported by the broker directly, so every caller must derive the same
//! partitioning to land on a stable id across route refreshes — see
//! [`gen_partitions`].

use crate::model::{Perm, QueueData, SelectableMessageQueue, TopicRoute};
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One synthesized partition of a `QueueData`: a queue id and its
/// effective permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePartition {
    pub queue_id: i32,
    pub perm: Perm,
}

/// Splits `QueueData`'s `(readQueueNums, writeQueueNums, perm)` into
/// contiguous partitions: `r` read-only ids, then `w` write-only ids, then
/// `rw` read-write ids, per spec §4.3's policy encoding.
pub fn gen_partitions(queue: &QueueData) -> Vec<QueuePartition> {
    let (read_nums, write_nums) = (queue.read_queue_nums, queue.write_queue_nums);
    let both = queue.perm.can_read() && queue.perm.can_write();

    let rw = if both { read_nums.min(write_nums) } else { 0 };
    let w = if queue.perm.can_write() { write_nums - rw } else { 0 };
    let r = if queue.perm.can_read() { read_nums - rw } else { 0 };

    let mut partitions = Vec::with_capacity((r + w + rw) as usize);
    let mut id = 0i32;
    for _ in 0..r {
        partitions.push(QueuePartition {
            queue_id: id,
            perm: Perm::READ,
        });
        id += 1;
    }
    for _ in 0..w {
        partitions.push(QueuePartition {
            queue_id: id,
            perm: Perm::WRITE,
        });
        id += 1;
    }
    for _ in 0..rw {
        partitions.push(QueuePartition {
            queue_id: id,
            perm: Perm::READ_WRITE,
        });
        id += 1;
    }
    partitions
}

/// Rotates over a topic's writable queues with a monotonic counter scoped
/// to `(topic, producerGroup)`. First selection per key is randomized so
/// concurrently-starting producers don't stampede queue 0.
#[derive(Debug, Default)]
pub struct WriteQueueSelector {
    cursors: DashMap<(String, String), Arc<AtomicU32>>,
}

impl WriteQueueSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the next writable queue for `(topic, producerGroup)` given
    /// the topic's current route, advancing the rotation counter.
    /// Returns `None` if the topic has no writable queue.
    pub fn select(
        &self,
        topic: &str,
        producer_group: &str,
        route: &TopicRoute,
    ) -> Option<SelectableMessageQueue> {
        let writable = writable_queues(route);
        if writable.is_empty() {
            return None;
        }

        let key = (topic.to_string(), producer_group.to_string());
        let cursor = self
            .cursors
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU32::new(rand::thread_rng().gen())))
            .clone();
        let idx = cursor.fetch_add(1, Ordering::Relaxed) as usize % writable.len();
        let (broker_name, queue_id) = writable[idx];
        Some(SelectableMessageQueue {
            topic: topic.to_string(),
            broker_name,
            queue_id,
        })
    }
}

/// Advances a cursor over readable queues for `(consumerGroup, topic)`.
#[derive(Debug, Default)]
pub struct ReadQueueSelector {
    cursors: DashMap<(String, String), Arc<AtomicU32>>,
}

impl ReadQueueSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the next readable queue for `(consumerGroup, topic)`.
    /// Returns `None` if the topic has no readable queue.
    pub fn select(
        &self,
        topic: &str,
        consumer_group: &str,
        route: &TopicRoute,
    ) -> Option<SelectableMessageQueue> {
        let readable = readable_queues(route);
        if readable.is_empty() {
            return None;
        }

        let key = (topic.to_string(), consumer_group.to_string());
        let cursor = self
            .cursors
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU32::new(rand::thread_rng().gen())))
            .clone();
        let idx = cursor.fetch_add(1, Ordering::Relaxed) as usize % readable.len();
        let (broker_name, queue_id) = readable[idx];
        Some(SelectableMessageQueue {
            topic: topic.to_string(),
            broker_name,
            queue_id,
        })
    }
}

/// Assignment-mode selection: returns every broker with a readable queue,
/// each mapped to the placeholder `queueId = -1` — the broker itself load
/// balances across its own queues at pop time.
#[derive(Debug, Default)]
pub struct AssignmentSelector;

impl AssignmentSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, topic: &str, route: &TopicRoute) -> Vec<SelectableMessageQueue> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for queue in &route.queue_datas {
            if queue.perm.can_read() && seen.insert(queue.broker_name.clone()) {
                out.push(SelectableMessageQueue {
                    topic: topic.to_string(),
                    broker_name: queue.broker_name.clone(),
                    queue_id: SelectableMessageQueue::ASSIGNMENT_QUEUE_ID,
                });
            }
        }
        out
    }
}

fn writable_queues(route: &TopicRoute) -> Vec<(String, i32)> {
    flatten(route, |p| p.perm.can_write())
}

fn readable_queues(route: &TopicRoute) -> Vec<(String, i32)> {
    flatten(route, |p| p.perm.can_read())
}

fn flatten(route: &TopicRoute, keep: impl Fn(&QueuePartition) -> bool) -> Vec<(String, i32)> {
    let mut out = Vec::new();
    for queue in &route.queue_datas {
        for partition in gen_partitions(queue) {
            if keep(&partition) {
                out.push((queue.broker_name.clone(), partition.queue_id));
            }
        }
    }
    out
}
