//! Progress tracking for one sync group.
//!
//! The `SyncProgressTracker` counts the entries of a group as they are updated or fail and logs
//! `entry i of n` progress at a fixed interval, plus once at the end of the group.

use tracing::info;

const LOG_INTERVAL: usize = 25;

/// Service for tracking per-group synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Label of the group, used in log lines
    group: String,
    /// Expanded entries the group started with
    total: usize,
    /// Entries written (or that would have been written in a dry run)
    updated: usize,
    /// Entries that now report delivered
    delivered: usize,
    /// Entries recorded as errors
    failed: usize,
    /// Processed count at the last progress line
    last_logged: usize,
}

impl SyncProgressTracker {
    /// Create a new progress tracker for a group of `total` entries.
    pub fn new(group: impl Into<String>, total: usize) -> Self {
        Self {
            group: group.into(),
            total,
            updated: 0,
            delivered: 0,
            failed: 0,
            last_logged: 0,
        }
    }

    pub fn record_updated(&mut self, delivered: bool) {
        self.updated += 1;
        if delivered {
            self.delivered += 1;
        }
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn processed(&self) -> usize {
        self.updated + self.failed
    }

    /// Log progress every `LOG_INTERVAL` entries or when forced
    pub fn log_progress(&mut self, force: bool) {
        let processed = self.processed();
        let should_log = force || processed.saturating_sub(self.last_logged) >= LOG_INTERVAL;

        if should_log {
            info!(
                "{}: entry {} of {} ({} updated, {} failed)",
                self.group, processed, self.total, self.updated, self.failed
            );
            self.last_logged = processed;
        }
    }

    /// Get group statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            total: self.total,
            updated: self.updated,
            delivered: self.delivered,
            failed: self.failed,
        }
    }
}

/// Statistics about one group's sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub total: usize,
    pub updated: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl SyncStats {
    /// Get a human-readable summary of the group statistics
    pub fn summary(&self) -> String {
        format!(
            "{} entries: {} updated ({} delivered), {} failed{}",
            self.total,
            self.updated,
            self.delivered,
            self.failed,
            if self.updated + self.failed < self.total {
                format!(" ({} unprocessed)", self.total - self.updated - self.failed)
            } else {
                String::new()
            }
        )
    }
}
