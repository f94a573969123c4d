//! Retention policy: decides which terminal records to purge.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{TaskId, TaskRecord};

/// TTL- and history-cap-based eviction, applied only to terminal records.
///
/// Two rules, run after every job completes:
/// - terminal records older than `ttl` are removed;
/// - if the registry holds more than `max_history` records, the oldest
///   terminal ones (by `created_at`) are removed until at/under the cap.
///
/// Active records are never evicted by either rule, regardless of age or
/// count.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub ttl: Duration,
    pub max_history: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_history: 100,
        }
    }
}

impl RetentionPolicy {
    /// Pick the records to evict. Pure; the store applies the result under
    /// its lock.
    pub fn select_evictions<'a, I>(&self, records: I, now: DateTime<Utc>) -> Vec<TaskId>
    where
        I: Iterator<Item = &'a TaskRecord>,
    {
        let mut terminal: Vec<&TaskRecord> = Vec::new();
        let mut total = 0usize;
        for record in records {
            total += 1;
            if record.status.is_terminal() {
                terminal.push(record);
            }
        }

        let ttl = chrono::TimeDelta::from_std(self.ttl).unwrap_or(chrono::TimeDelta::MAX);
        let mut evict: Vec<TaskId> = terminal
            .iter()
            .filter(|r| now - r.created_at > ttl)
            .map(|r| r.id)
            .collect();

        if total > self.max_history {
            terminal.sort_by_key(|r| r.created_at);
            let excess = total - self.max_history;
            for record in terminal.iter().take(excess) {
                if !evict.contains(&record.id) {
                    evict.push(record.id);
                }
            }
        }
        evict
    }
}
