// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Per-channel transfer statistics
//!
//! Lock-free counters, cheap enough to bump from the dispatcher and the
//! interrupt handler.

use std::sync::atomic::{AtomicU64, Ordering};

/// Channel statistics collector
pub struct ChannelStats {
    submitted: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    bytes_started: AtomicU64,
    busy_retries: AtomicU64,
    rejected: AtomicU64,
    terminated: AtomicU64,
    spurious_irqs: AtomicU64,
}

/// Statistics snapshot at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Descriptors queued by submit
    pub submitted: u64,
    /// Transfers programmed into the engine
    pub started: u64,
    /// Descriptors reaped (finished, rejected or terminated)
    pub completed: u64,
    /// Bytes handed to the engine
    pub bytes_started: u64,
    /// Dispatch attempts that found the engine running
    pub busy_retries: u64,
    /// Descriptors the engine could not encode
    pub rejected: u64,
    /// Descriptors abandoned by terminate_all
    pub terminated: u64,
    /// Completion interrupts with nothing in flight
    pub spurious_irqs: u64,
}

impl StatsSnapshot {
    /// Descriptors submitted but not yet reaped
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

impl ChannelStats {
    pub const fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            bytes_started: AtomicU64::new(0),
            busy_retries: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            terminated: AtomicU64::new(0),
            spurious_irqs: AtomicU64::new(0),
        }
    }

    pub fn record_submit(&self, count: usize) {
        self.submitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_start(&self, bytes: u32) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.bytes_started
            .fetch_add(u64::from(bytes), Ordering::Relaxed);
    }

    pub fn record_complete(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_terminated(&self, count: usize) {
        self.terminated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_spurious(&self) {
        self.spurious_irqs.fetch_add(1, Ordering::Relaxed);
    }

    /// Get statistics snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            bytes_started: self.bytes_started.load(Ordering::Relaxed),
            busy_retries: self.busy_retries.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
            spurious_irqs: self.spurious_irqs.load(Ordering::Relaxed),
        }
    }
}

impl Default for ChannelStats {
    fn default() -> Self {
        Self::new()
    }
}
