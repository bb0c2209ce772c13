//! Scoring throughput, latency and score distribution for the serve loop.

use crate::types::ScoreResponse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_SAMPLES: usize = 10_000;

pub struct ScoringMetrics {
    pub orders_scored: AtomicU64,
    pub orders_flagged: AtomicU64,
    pub orders_failed: AtomicU64,
    /// Latencies in microseconds, most recent last
    latencies: RwLock<Vec<u64>>,
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl ScoringMetrics {
    pub fn new() -> Self {
        Self {
            orders_scored: AtomicU64::new(0),
            orders_flagged: AtomicU64::new(0),
            orders_failed: AtomicU64::new(0),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, elapsed: Duration, response: &ScoreResponse) {
        if let Ok(mut times) = self.latencies.write() {
            times.push(elapsed.as_micros() as u64);
            if times.len() > MAX_SAMPLES {
                times.drain(0..MAX_SAMPLES / 2);
            }
        }

        let Some(probability) = response.fraud_probability else {
            self.orders_failed.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.orders_scored.fetch_add(1, Ordering::Relaxed);
        if response.is_fraud == Some(true) {
            self.orders_flagged.fetch_add(1, Ordering::Relaxed);
        }
        let bucket = ((probability * 10.0).max(0.0) as usize).min(9);
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn latency_stats(&self) -> LatencyStats {
        let mut sorted = match self.latencies.read() {
            Ok(times) => times.clone(),
            Err(_) => return LatencyStats::default(),
        };
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let pct = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        LatencyStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: pct(0.5),
            p95_us: pct(0.95),
            p99_us: pct(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Orders handled per second since start, failures included
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.handled() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn handled(&self) -> u64 {
        self.orders_scored.load(Ordering::Relaxed) + self.orders_failed.load(Ordering::Relaxed)
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn print_summary(&self) {
        let scored = self.orders_scored.load(Ordering::Relaxed);
        let flagged = self.orders_flagged.load(Ordering::Relaxed);
        let failed = self.orders_failed.load(Ordering::Relaxed);
        let flag_rate = if scored > 0 {
            flagged as f64 / scored as f64 * 100.0
        } else {
            0.0
        };
        let latency = self.latency_stats();

        info!("==================== SCORING SUMMARY ====================");
        info!(
            "Orders scored: {:>8}  failed: {:>6}  throughput: {:>6.1}/s",
            scored,
            failed,
            self.throughput()
        );
        info!("Flagged as fraud: {:>8}  ({:.1}%)", flagged, flag_rate);
        info!(
            "Latency (us): mean={} p50={} p95={} p99={} max={}",
            latency.mean_us, latency.p50_us, latency.p95_us, latency.p99_us, latency.max_us
        );

        let dist = self.score_distribution();
        let total: u64 = dist.iter().sum();
        for (i, &count) in dist.iter().enumerate() {
            let pct = if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            info!(
                "  {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                "#".repeat(((pct / 2.0) as usize).min(20))
            );
        }
        info!("=========================================================");
    }
}

impl Default for ScoringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a summary every `interval_secs`
pub struct MetricsReporter {
    metrics: Arc<ScoringMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ScoringMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // First tick fires immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderId;

    #[test]
    fn test_record_counts_and_buckets() {
        let metrics = ScoringMetrics::new();
        metrics.record(
            Duration::from_micros(100),
            &ScoreResponse::scored(OrderId::Number(1), 0.95, 0.5),
        );
        metrics.record(
            Duration::from_micros(300),
            &ScoreResponse::scored(OrderId::Number(2), 0.12, 0.5),
        );
        metrics.record(
            Duration::from_micros(50),
            &ScoreResponse::failed(OrderId::unknown(), "missing order_id"),
        );

        assert_eq!(metrics.orders_scored.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.orders_flagged.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.orders_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.handled(), 3);

        let dist = metrics.score_distribution();
        assert_eq!(dist[9], 1);
        assert_eq!(dist[1], 1);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = ScoringMetrics::new();
        assert_eq!(metrics.latency_stats(), LatencyStats::default());

        for us in [100, 200, 300, 400] {
            metrics.record(
                Duration::from_micros(us),
                &ScoreResponse::scored(OrderId::Number(1), 0.3, 0.5),
            );
        }
        let stats = metrics.latency_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_us, 250);
        assert_eq!(stats.p50_us, 300);
        assert_eq!(stats.max_us, 400);
    }

    #[test]
    fn test_probability_one_lands_in_top_bucket() {
        let metrics = ScoringMetrics::new();
        metrics.record(
            Duration::from_micros(1),
            &ScoreResponse::scored(OrderId::Number(1), 1.0, 0.5),
        );
        assert_eq!(metrics.score_distribution()[9], 1);
    }
}
