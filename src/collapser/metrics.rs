//! Metrics for a request collapser.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::batch::{DemuxSummary, SealTrigger};

/// Counters for monitoring one collapser
#[derive(Debug, Default)]
pub struct CollapserMetrics {
    /// Requests accepted by `submit`
    pub requests_submitted: AtomicU64,

    /// Windows sealed because they reached max batch size
    pub sealed_by_size: AtomicU64,

    /// Windows sealed because their deadline elapsed
    pub sealed_by_timer: AtomicU64,

    /// Windows sealed by flush or teardown
    pub sealed_by_flush: AtomicU64,

    /// Sealed windows discarded without executing because they were empty
    pub windows_discarded: AtomicU64,

    /// Invocations of the batch command
    pub batches_executed: AtomicU64,

    /// Total requests across executed batches (for batch size averaging)
    pub total_batch_requests: AtomicU64,

    /// Batches whose response list was shorter than the request list
    pub contract_violations: AtomicU64,

    /// Batches whose command failed
    pub batch_failures: AtomicU64,

    /// Failed batches answered by the command's fallback
    pub fallbacks_used: AtomicU64,

    /// Requests resolved with a value
    pub values_delivered: AtomicU64,

    /// Requests resolved with an explicit "no value"
    pub absent_responses: AtomicU64,
}

impl CollapserMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sealed(&self, trigger: SealTrigger) {
        let counter = match trigger {
            SealTrigger::Size => &self.sealed_by_size,
            SealTrigger::Timer => &self.sealed_by_timer,
            SealTrigger::Flush => &self.sealed_by_flush,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.windows_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, batch_size: usize) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
        self.total_batch_requests
            .fetch_add(batch_size as u64, Ordering::Relaxed);
    }

    pub fn record_contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demux(&self, summary: &DemuxSummary) {
        self.values_delivered
            .fetch_add(summary.values as u64, Ordering::Relaxed);
        self.absent_responses
            .fetch_add(summary.absent as u64, Ordering::Relaxed);
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_executed.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.total_batch_requests.load(Ordering::Relaxed) as f64 / batches as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            sealed_by_size: self.sealed_by_size.load(Ordering::Relaxed),
            sealed_by_timer: self.sealed_by_timer.load(Ordering::Relaxed),
            sealed_by_flush: self.sealed_by_flush.load(Ordering::Relaxed),
            windows_discarded: self.windows_discarded.load(Ordering::Relaxed),
            batches_executed: self.batches_executed.load(Ordering::Relaxed),
            contract_violations: self.contract_violations.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
            values_delivered: self.values_delivered.load(Ordering::Relaxed),
            absent_responses: self.absent_responses.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Point-in-time copy of [`CollapserMetrics`]
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_submitted: u64,
    pub sealed_by_size: u64,
    pub sealed_by_timer: u64,
    pub sealed_by_flush: u64,
    pub windows_discarded: u64,
    pub batches_executed: u64,
    pub contract_violations: u64,
    pub batch_failures: u64,
    pub fallbacks_used: u64,
    pub values_delivered: u64,
    pub absent_responses: u64,
    pub avg_batch_size: f64,
}
