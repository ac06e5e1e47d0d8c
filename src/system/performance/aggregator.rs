//! Rolling Metrics Aggregation
//!
//! A pure fold from a window of samples to `Metrics`. The aggregator holds no
//! state: every observation recomputes from the window it is handed, so
//! there is nothing to invalidate when the log changes.
//!
//! Tail percentiles come from an HDR histogram recorded in microseconds
//! (1 µs to 60 s, 3 significant figures).

use hdrhistogram::Histogram;

use crate::models::{Metrics, Sample};

/// Highest latency tracked by the tail histogram (60 s in µs)
const HISTOGRAM_MAX_US: u64 = 60_000_000;

/// Stateless metrics computation over sample windows.
pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Fold a window of samples into metrics.
    ///
    /// Order-independent and O(window). An empty window yields all zeros;
    /// a short window is used as-is.
    pub fn aggregate(window: &[Sample]) -> Metrics {
        if window.is_empty() {
            return Metrics::empty();
        }

        let mut histogram = Histogram::<u64>::new_with_max(HISTOGRAM_MAX_US, 3).ok();
        let mut sum_ms = 0.0f64;
        let mut min_ms = f32::MAX;
        let mut max_ms = 0.0f32;
        let mut jank_count = 0usize;

        for sample in window {
            sum_ms += sample.latency_ms as f64;
            min_ms = min_ms.min(sample.latency_ms);
            max_ms = max_ms.max(sample.latency_ms);
            if sample.is_jank {
                jank_count += 1;
            }
            if let Some(h) = histogram.as_mut() {
                let us = ((sample.latency_ms as f64) * 1000.0).round() as u64;
                h.saturating_record(us.max(1));
            }
        }

        let frame_count = window.len();
        let quantile_ms = |q: f64| -> f32 {
            histogram
                .as_ref()
                .map(|h| (h.value_at_quantile(q) as f32 / 1000.0).min(max_ms))
                .unwrap_or(0.0)
        };

        Metrics {
            average_latency_ms: (sum_ms / frame_count as f64) as f32,
            min_latency_ms: min_ms,
            max_latency_ms: max_ms,
            p95_latency_ms: quantile_ms(0.95),
            p99_latency_ms: quantile_ms(0.99),
            jank_count,
            frame_count,
            jank_percentage: jank_percentage(jank_count, frame_count),
        }
    }

    /// The newest-first prefix of `samples` belonging to the latest run.
    ///
    /// Frame ids restart at 0 on every start, so the latest run ends where
    /// the newest-first frame ids stop strictly decreasing.
    pub fn current_run(samples_newest_first: &[Sample]) -> &[Sample] {
        let boundary = samples_newest_first
            .windows(2)
            .position(|pair| pair[1].frame_id >= pair[0].frame_id)
            .map(|i| i + 1)
            .unwrap_or(samples_newest_first.len());
        &samples_newest_first[..boundary]
    }
}

/// `100 * jank / frames`, defined as 0 for no frames.
pub fn jank_percentage(jank_count: usize, frame_count: usize) -> f32 {
    if frame_count == 0 {
        return 0.0;
    }
    (jank_count as f64 * 100.0 / frame_count as f64) as f32
}
