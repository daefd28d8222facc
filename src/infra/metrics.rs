//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics so the link reader, the session task and the
//! workers can record without contention. `report()` swaps the periodic
//! counters to zero; monotonic totals are only loaded.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not be used for coordination.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Render latency bucket boundaries (microseconds)
/// Buckets: ≤250, ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, >128000
const BUCKET_BOUNDS: [u64; 10] = [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing `percentile`
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [250, 500, 1000, 2000, 4000, 8000, 16000, 32000, 64000, 128000, 256000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Inbound frames handed to the session (monotonic)
    frames_received: AtomicU64,
    /// Frames dropped: protocol errors, not connected (monotonic)
    frames_dropped: AtomicU64,
    /// Times the link reader waited on a full session channel (monotonic)
    inbound_backpressure: AtomicU64,
    /// Tiles fully reassembled and decoded (monotonic)
    tiles_completed: AtomicU64,
    /// Tiles whose bytes failed to decode (monotonic)
    tile_decode_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// REQUEST_TILE messages queued (monotonic)
    tile_requests: AtomicU64,
    /// Frames written to the peer (monotonic)
    outbound_frames: AtomicU64,
    /// Outbound frames with no peer or a full writer (monotonic)
    outbound_dropped: AtomicU64,
    /// Renders since last report (reset on report)
    renders_since_report: AtomicU64,
    renders_total: AtomicU64,
    render_failures: AtomicU64,
    render_latency_sum_us: AtomicU64,
    render_latency_max_us: AtomicU64,
    render_latency_buckets: [AtomicU64; NUM_BUCKETS],
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            inbound_backpressure: AtomicU64::new(0),
            tiles_completed: AtomicU64::new(0),
            tile_decode_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            tile_requests: AtomicU64::new(0),
            outbound_frames: AtomicU64::new(0),
            outbound_dropped: AtomicU64::new(0),
            renders_since_report: AtomicU64::new(0),
            renders_total: AtomicU64::new(0),
            render_failures: AtomicU64::new(0),
            render_latency_sum_us: AtomicU64::new(0),
            render_latency_max_us: AtomicU64::new(0),
            render_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_inbound_backpressure(&self) {
        self.inbound_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tile_completed(&self) {
        self.tiles_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tile_decode_failure(&self) {
        self.tile_decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_tile_request(&self) {
        self.tile_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_outbound_frame(&self) {
        self.outbound_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_outbound_dropped(&self) {
        self.outbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed render and its latency
    #[inline]
    pub fn record_render(&self, latency_us: u64) {
        self.renders_total.fetch_add(1, Ordering::Relaxed);
        self.renders_since_report.fetch_add(1, Ordering::Relaxed);
        self.render_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.render_latency_max_us, latency_us);
        self.render_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn tiles_completed(&self) -> u64 {
        self.tiles_completed.load(Ordering::Relaxed)
    }

    pub fn tile_requests(&self) -> u64 {
        self.tile_requests.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn outbound_frames(&self) -> u64 {
        self.outbound_frames.load(Ordering::Relaxed)
    }

    /// Snapshot and reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let render_count = self.renders_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.render_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.render_latency_max_us.swap(0, Ordering::Relaxed);
        let render_buckets = swap_buckets(&self.render_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let renders_per_sec = if elapsed.as_secs_f64() > 0.0 {
            render_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_render_us = if render_count > 0 { latency_sum / render_count } else { 0 };

        MetricsSummary {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            inbound_backpressure: self.inbound_backpressure.load(Ordering::Relaxed),
            tiles_completed: self.tiles_completed.load(Ordering::Relaxed),
            tile_decode_failures: self.tile_decode_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            tile_requests: self.tile_requests.load(Ordering::Relaxed),
            outbound_frames: self.outbound_frames.load(Ordering::Relaxed),
            outbound_dropped: self.outbound_dropped.load(Ordering::Relaxed),
            renders_total: self.renders_total.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            renders_per_sec,
            avg_render_us,
            max_render_us: max_latency,
            render_buckets,
            render_p50_us: percentile_from_buckets(&render_buckets, 0.50),
            render_p99_us: percentile_from_buckets(&render_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub inbound_backpressure: u64,
    pub tiles_completed: u64,
    pub tile_decode_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub tile_requests: u64,
    pub outbound_frames: u64,
    pub outbound_dropped: u64,
    pub renders_total: u64,
    pub render_failures: u64,
    pub renders_per_sec: f64,
    pub avg_render_us: u64,
    pub max_render_us: u64,
    /// Bounds: ≤250, ≤500, ≤1000, ... ≤128000, >128000 µs
    pub render_buckets: [u64; NUM_BUCKETS],
    pub render_p50_us: u64,
    pub render_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_received = %self.frames_received,
            frames_dropped = %self.frames_dropped,
            inbound_backpressure = %self.inbound_backpressure,
            tiles_completed = %self.tiles_completed,
            tile_decode_failures = %self.tile_decode_failures,
            cache_hits = %self.cache_hits,
            cache_misses = %self.cache_misses,
            tile_requests = %self.tile_requests,
            outbound_frames = %self.outbound_frames,
            outbound_dropped = %self.outbound_dropped,
            renders_per_sec = format!("{:.1}", self.renders_per_sec),
            render_avg_us = %self.avg_render_us,
            render_max_us = %self.max_render_us,
            render_p50_us = %self.render_p50_us,
            render_p99_us = %self.render_p99_us,
            render_failures = %self.render_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.frames_received(), 0);
        assert_eq!(metrics.tiles_completed(), 0);
        assert_eq!(metrics.tile_requests(), 0);
    }

    #[test]
    fn test_cache_lookup_split() {
        let metrics = Metrics::new();
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(false);

        let summary = metrics.report();
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.cache_misses, 2);
    }

    #[test]
    fn test_report_resets_render_window() {
        let metrics = Metrics::new();
        metrics.record_render(1000);
        metrics.record_render(3000);
        metrics.record_frame_received();

        let summary = metrics.report();
        assert_eq!(summary.avg_render_us, 2000);
        assert_eq!(summary.max_render_us, 3000);
        assert_eq!(summary.renders_total, 2);
        assert_eq!(summary.frames_received, 1);

        let summary = metrics.report();
        assert_eq!(summary.avg_render_us, 0);
        assert_eq!(summary.max_render_us, 0);
        // monotonic totals survive
        assert_eq!(summary.renders_total, 2);
        assert_eq!(summary.frames_received, 1);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(250), 0);
        assert_eq!(bucket_index(251), 1);
        assert_eq!(bucket_index(128000), 9);
        assert_eq!(bucket_index(128001), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_render(1500);
        }
        let summary = metrics.report();
        assert_eq!(summary.render_p50_us, 2000);
        assert_eq!(summary.render_p99_us, 2000);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        m.record_frame_received();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.frames_received(), 4000);
    }
}
