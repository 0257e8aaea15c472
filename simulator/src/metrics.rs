//! Run statistics, computed once from every attempt of a run.

use std::time::Duration;

use serde::Serialize;

/// What happened to one submitted transfer, retries included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub latency_ms: u64,
    pub retries: u32,
    pub committed: bool,
}

/// Counts and latency distribution of a finished run. Latencies cover
/// committed transfers only.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    pub success_rate: f64,
    pub throughput_per_sec: f64,
    pub average_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

impl MetricsSummary {
    pub fn from_attempts(attempts: &[Attempt], elapsed: Duration) -> Self {
        let mut latencies: Vec<u64> = attempts
            .iter()
            .filter(|a| a.committed)
            .map(|a| a.latency_ms)
            .collect();
        latencies.sort_unstable();

        let total = attempts.len() as u64;
        let successful = latencies.len() as u64;
        let elapsed_secs = elapsed.as_secs_f64();

        Self {
            total,
            successful,
            failed: total - successful,
            retries: attempts.iter().map(|a| u64::from(a.retries)).sum(),
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            throughput_per_sec: if elapsed_secs > 0.0 {
                successful as f64 / elapsed_secs
            } else {
                0.0
            },
            average_latency_ms: latencies
                .iter()
                .sum::<u64>()
                .checked_div(successful)
                .unwrap_or(0),
            p50_latency_ms: nearest_rank(&latencies, 50),
            p95_latency_ms: nearest_rank(&latencies, 95),
            p99_latency_ms: nearest_rank(&latencies, 99),
        }
    }
}

/// Nearest-rank percentile of an ascending slice; 0 when empty.
fn nearest_rank(sorted: &[u64], percentile: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (percentile * sorted.len()).div_ceil(100).clamp(1, sorted.len());
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(latency_ms: u64, retries: u32) -> Attempt {
        Attempt {
            latency_ms,
            retries,
            committed: true,
        }
    }

    #[test]
    fn test_summary_counts() {
        let attempts = [
            ok(100, 0),
            ok(200, 2),
            ok(150, 0),
            Attempt {
                latency_ms: 900,
                retries: 3,
                committed: false,
            },
        ];

        let summary = MetricsSummary::from_attempts(&attempts, Duration::from_secs(2));

        assert_eq!(summary.total, 4);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retries, 5);
        assert_eq!(summary.average_latency_ms, 150);
        assert_eq!(summary.success_rate, 0.75);
        assert_eq!(summary.throughput_per_sec, 1.5);
    }

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(nearest_rank(&sorted, 50), 50);
        assert_eq!(nearest_rank(&sorted, 99), 99);
        assert_eq!(nearest_rank(&sorted, 100), 100);
        assert_eq!(nearest_rank(&[7], 1), 7);
    }

    #[test]
    fn test_empty_run() {
        let summary = MetricsSummary::from_attempts(&[], Duration::ZERO);
        assert_eq!(summary.p99_latency_ms, 0);
        assert_eq!(summary.average_latency_ms, 0);
        assert_eq!(summary.throughput_per_sec, 0.0);
    }
}
