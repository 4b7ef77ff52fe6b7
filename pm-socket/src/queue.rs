//! Outbound message queue for outage buffering.
//!
//! While no live connection exists, `emit` calls land here. Entries are
//! delivered in strict FIFO order on the next successful connect; entries
//! older than the TTL are dropped unsent so a long outage does not replay
//! stale commands.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use pm_core::constants;

/// Queue policy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum age an entry may reach before being discarded unsent.
    pub ttl: Duration,
    /// Optional capacity bound. When full, enqueueing evicts the oldest
    /// entry. The default policy is TTL-only (`None`); the bound exists as
    /// an extension point for memory-constrained hosts.
    pub max_entries: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(constants::QUEUE_TTL_SECS),
            max_entries: None,
        }
    }
}

/// A buffered outbound message.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Named event to send.
    pub event: String,
    /// Opaque payload.
    pub payload: Value,
    /// When the entry was enqueued.
    pub enqueued_at: Instant,
}

impl QueueEntry {
    /// Age of this entry.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Whether this entry has outlived the given TTL.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Result of draining the queue for a flush.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Entries still within the TTL, in enqueue order.
    pub fresh: Vec<QueueEntry>,
    /// Entries past the TTL, dropped unsent.
    pub stale: Vec<QueueEntry>,
}

/// TTL-bounded FIFO buffer of outbound messages.
#[derive(Clone)]
pub struct OutboxQueue {
    config: QueueConfig,
    entries: Arc<Mutex<VecDeque<QueueEntry>>>,
}

impl OutboxQueue {
    /// Create a new queue with the given policy.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// The queue policy.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append an entry stamped with the current time.
    ///
    /// Returns the evicted oldest entry when a capacity bound displaced one.
    pub async fn enqueue(&self, event: &str, payload: Value) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().await;

        let evicted = match self.config.max_entries {
            Some(cap) if entries.len() >= cap => entries.pop_front(),
            _ => None,
        };

        debug!("queued outbound event: {event} ({} buffered)", entries.len() + 1);
        entries.push_back(QueueEntry {
            event: event.to_string(),
            payload,
            enqueued_at: Instant::now(),
        });

        evicted
    }

    /// Take all entries, split into fresh (deliverable, FIFO order) and
    /// stale (past TTL, to be dropped).
    pub async fn drain(&self) -> DrainOutcome {
        let mut entries = self.entries.lock().await;
        let mut outcome = DrainOutcome::default();

        for entry in entries.drain(..) {
            if entry.is_stale(self.config.ttl) {
                outcome.stale.push(entry);
            } else {
                outcome.fresh.push(entry);
            }
        }

        if !outcome.stale.is_empty() {
            info!(
                "dropping {} stale queued message(s) older than {:?}",
                outcome.stale.len(),
                self.config.ttl
            );
        }
        outcome
    }

    /// Put entries back at the head of the queue, preserving their order.
    ///
    /// Used when a flush fails partway so undelivered entries keep their
    /// place ahead of anything enqueued since.
    pub async fn requeue_front(&self, batch: Vec<QueueEntry>) {
        let mut entries = self.entries.lock().await;
        for entry in batch.into_iter().rev() {
            entries.push_front(entry);
        }
    }

    /// Number of buffered entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Discard all buffered entries.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        if count > 0 {
            info!("cleared {count} queued message(s)");
        }
    }

    /// Queue statistics for diagnostics.
    pub async fn stats(&self) -> QueueStats {
        let entries = self.entries.lock().await;
        let stale = entries
            .iter()
            .filter(|e| e.is_stale(self.config.ttl))
            .count();
        QueueStats {
            buffered: entries.len(),
            stale,
            oldest_age: entries.front().map(|e| e.age()),
        }
    }
}

/// Snapshot of queue health.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Entries currently buffered.
    pub buffered: usize,
    /// Buffered entries already past the TTL.
    pub stale: usize,
    /// Age of the oldest entry, if any.
    pub oldest_age: Option<Duration>,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffered={}, stale={}", self.buffered, self.stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let queue = OutboxQueue::new(QueueConfig::default());
        queue.enqueue("first", json!({"n": 1})).await;
        queue.enqueue("second", json!({"n": 2})).await;
        queue.enqueue("third", json!({"n": 3})).await;

        let outcome = queue.drain().await;
        let order: Vec<&str> = outcome.fresh.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
        assert!(outcome.stale.is_empty());
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_split_out_on_drain() {
        let queue = OutboxQueue::new(QueueConfig::default());
        queue.enqueue("old", json!({})).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        queue.enqueue("young", json!({})).await;

        let outcome = queue.drain().await;
        assert_eq!(outcome.fresh.len(), 1);
        assert_eq!(outcome.fresh[0].event, "young");
        assert_eq!(outcome.stale.len(), 1);
        assert_eq!(outcome.stale[0].event, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_exactly_at_ttl_is_not_stale() {
        let queue = OutboxQueue::new(QueueConfig::default());
        queue.enqueue("boundary", json!({})).await;

        tokio::time::advance(Duration::from_secs(30)).await;

        let outcome = queue.drain().await;
        assert_eq!(outcome.fresh.len(), 1);
        assert!(outcome.stale.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let queue = OutboxQueue::new(QueueConfig {
            max_entries: Some(2),
            ..QueueConfig::default()
        });

        assert!(queue.enqueue("a", json!({})).await.is_none());
        assert!(queue.enqueue("b", json!({})).await.is_none());

        let evicted = queue.enqueue("c", json!({})).await.expect("should evict");
        assert_eq!(evicted.event, "a");

        let outcome = queue.drain().await;
        let order: Vec<&str> = outcome.fresh.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(order, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_requeue_front_restores_order() {
        let queue = OutboxQueue::new(QueueConfig::default());
        queue.enqueue("c", json!({})).await;

        let batch = vec![
            QueueEntry {
                event: "a".into(),
                payload: json!({}),
                enqueued_at: Instant::now(),
            },
            QueueEntry {
                event: "b".into(),
                payload: json!({}),
                enqueued_at: Instant::now(),
            },
        ];
        queue.requeue_front(batch).await;

        let outcome = queue.drain().await;
        let order: Vec<&str> = outcome.fresh.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = OutboxQueue::new(QueueConfig::default());
        queue.enqueue("x", json!({})).await;
        queue.enqueue("y", json!({})).await;
        assert_eq!(queue.len().await, 2);

        queue.clear().await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let queue = OutboxQueue::new(QueueConfig::default());
        queue.enqueue("old", json!({})).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        queue.enqueue("young", json!({})).await;

        let stats = queue.stats().await;
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.stale, 1);
        assert!(stats.oldest_age.unwrap() >= Duration::from_secs(31));
        assert_eq!(stats.to_string(), "buffered=2, stale=1");
    }
}
