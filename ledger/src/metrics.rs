//! Transfer counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Transfer engine metrics.
#[derive(Debug, Default)]
pub struct TransferMetrics {
    /// Transfers submitted to the engine.
    pub attempted: AtomicU64,
    /// Transfers rejected before a transaction was opened.
    pub rejected: AtomicU64,
    /// Transfers committed.
    pub committed: AtomicU64,
    /// Transfers whose unit of work did not commit.
    pub rolled_back: AtomicU64,
    /// Rolled-back transfers that failed with a retryable error.
    pub retryable_failures: AtomicU64,
    /// Transfers currently inside a transaction.
    pub in_flight: AtomicU64,
}

impl TransferMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer request.
    pub fn transfer_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that failed validation.
    pub fn transfer_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction being opened for a transfer.
    ///
    /// The returned guard keeps the transfer counted as in flight until it
    /// is resolved. A guard dropped unresolved, as when the caller drops
    /// the transfer future, counts as a non-retryable rollback.
    pub fn transfer_started(&self) -> InFlightTransfer<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightTransfer {
            metrics: self,
            resolved: false,
        }
    }

    fn transfer_finished(&self, committed: bool, retryable: bool) {
        if committed {
            self.committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rolled_back.fetch_add(1, Ordering::Relaxed);
            if retryable {
                self.retryable_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> TransferMetricsSnapshot {
        TransferMetricsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            retryable_failures: self.retryable_failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// One transfer counted in `in_flight`.
#[must_use = "dropping the guard records the transfer as rolled back"]
pub struct InFlightTransfer<'a> {
    metrics: &'a TransferMetrics,
    resolved: bool,
}

impl InFlightTransfer<'_> {
    /// Record the transfer as committed.
    pub fn committed(mut self) {
        self.resolved = true;
        self.metrics.transfer_finished(true, false);
    }

    /// Record the transfer as rolled back.
    pub fn rolled_back(mut self, retryable: bool) {
        self.resolved = true;
        self.metrics.transfer_finished(false, retryable);
    }
}

impl Drop for InFlightTransfer<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.metrics.transfer_finished(false, false);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferMetricsSnapshot {
    pub attempted: u64,
    pub rejected: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub retryable_failures: u64,
    pub in_flight: u64,
}

/// Shared metrics instance.
pub type SharedTransferMetrics = Arc<TransferMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = TransferMetrics::new();

        metrics.transfer_attempted();
        let first = metrics.transfer_started();
        metrics.transfer_attempted();
        let _second = metrics.transfer_started();
        first.committed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempted, 2);
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.in_flight, 1);
    }

    #[test]
    fn test_retryable_rollback_counted() {
        let metrics = TransferMetrics::new();

        metrics.transfer_started().rolled_back(true);
        metrics.transfer_started().rolled_back(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rolled_back, 2);
        assert_eq!(snapshot.retryable_failures, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn test_unresolved_guard_counts_as_rollback() {
        let metrics = TransferMetrics::new();

        {
            let _guard = metrics.transfer_started();
            assert_eq!(metrics.snapshot().in_flight, 1);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.rolled_back, 1);
        assert_eq!(snapshot.retryable_failures, 0);
        assert_eq!(snapshot.committed, 0);
    }
}
