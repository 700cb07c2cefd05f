//! Lock-free refresh metrics and periodic reporting
//!
//! Uses atomics so the coordinator never contends with the reporter or the
//! HTTP endpoint. All atomics use Relaxed ordering: these are statistics only
//! and must not be used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Cycle duration bucket boundaries (milliseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const CYCLE_BUCKET_BOUNDS_MS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a duration using binary search
#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    CYCLE_BUCKET_BOUNDS_MS.partition_point(|&bound| bound < duration_ms)
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// How a refresh cycle ended, for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Published,
    FetchTransient,
    FetchPermanent,
    ParseFailed,
}

pub struct Metrics {
    /// Completed cycles (monotonic)
    cycles_total: AtomicU64,
    cycles_published: AtomicU64,
    cycles_failed: AtomicU64,
    /// Triggers dropped because a cycle was already running
    cycles_coalesced: AtomicU64,
    fetch_transient_failures: AtomicU64,
    fetch_permanent_failures: AtomicU64,
    parse_failures: AtomicU64,
    /// Malformed trail rows skipped across all cycles
    rows_skipped_total: AtomicU64,
    parse_warnings_total: AtomicU64,
    /// Trails in the last published snapshot
    trails_total: AtomicU64,
    /// Trails with a geometry match in the last published snapshot
    trails_matched: AtomicU64,
    ways_indexed: AtomicU64,
    geometry_loads: AtomicU64,
    geometry_load_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    /// Unix seconds of the last published snapshot (0 = never)
    last_success_epoch_secs: AtomicU64,
    cycle_duration_buckets: [AtomicU64; NUM_BUCKETS],
    cycle_duration_sum_ms: AtomicU64,
    cycle_duration_max_ms: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_published: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            cycles_coalesced: AtomicU64::new(0),
            fetch_transient_failures: AtomicU64::new(0),
            fetch_permanent_failures: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            rows_skipped_total: AtomicU64::new(0),
            parse_warnings_total: AtomicU64::new(0),
            trails_total: AtomicU64::new(0),
            trails_matched: AtomicU64::new(0),
            ways_indexed: AtomicU64::new(0),
            geometry_loads: AtomicU64::new(0),
            geometry_load_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success_epoch_secs: AtomicU64::new(0),
            cycle_duration_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            cycle_duration_sum_ms: AtomicU64::new(0),
            cycle_duration_max_ms: AtomicU64::new(0),
        }
    }

    /// Record a finished cycle and its wall-clock duration
    pub fn record_cycle(&self, result: CycleResult, duration_ms: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_buckets[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.cycle_duration_max_ms.fetch_max(duration_ms, Ordering::Relaxed);

        match result {
            CycleResult::Published => {
                self.cycles_published.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                return;
            }
            CycleResult::FetchTransient => {
                self.fetch_transient_failures.fetch_add(1, Ordering::Relaxed);
            }
            CycleResult::FetchPermanent => {
                self.fetch_permanent_failures.fetch_add(1, Ordering::Relaxed);
            }
            CycleResult::ParseFailed => {
                self.parse_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.cycles_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse(&self, rows_skipped: usize, warnings: usize) {
        self.rows_skipped_total.fetch_add(rows_skipped as u64, Ordering::Relaxed);
        self.parse_warnings_total.fetch_add(warnings as u64, Ordering::Relaxed);
    }

    pub fn set_published(&self, trails: usize, matched: usize, epoch_secs: u64) {
        self.trails_total.store(trails as u64, Ordering::Relaxed);
        self.trails_matched.store(matched as u64, Ordering::Relaxed);
        self.last_success_epoch_secs.store(epoch_secs, Ordering::Relaxed);
    }

    pub fn record_geometry_load(&self, ways: Option<usize>) {
        match ways {
            Some(n) => {
                self.geometry_loads.fetch_add(1, Ordering::Relaxed);
                self.ways_indexed.store(n as u64, Ordering::Relaxed);
            }
            None => {
                self.geometry_load_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Consistent-enough snapshot of all counters
    pub fn report(&self) -> MetricsSummary {
        let buckets = load_buckets(&self.cycle_duration_buckets);
        let cycles_total = self.cycles_total.load(Ordering::Relaxed);
        let sum = self.cycle_duration_sum_ms.load(Ordering::Relaxed);
        MetricsSummary {
            cycles_total,
            cycles_published: self.cycles_published.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycles_coalesced: self.cycles_coalesced.load(Ordering::Relaxed),
            fetch_transient_failures: self.fetch_transient_failures.load(Ordering::Relaxed),
            fetch_permanent_failures: self.fetch_permanent_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            rows_skipped_total: self.rows_skipped_total.load(Ordering::Relaxed),
            parse_warnings_total: self.parse_warnings_total.load(Ordering::Relaxed),
            trails_total: self.trails_total.load(Ordering::Relaxed),
            trails_matched: self.trails_matched.load(Ordering::Relaxed),
            ways_indexed: self.ways_indexed.load(Ordering::Relaxed),
            geometry_loads: self.geometry_loads.load(Ordering::Relaxed),
            geometry_load_failures: self.geometry_load_failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_success_epoch_secs: self.last_success_epoch_secs.load(Ordering::Relaxed),
            cycle_duration_buckets: buckets,
            cycle_duration_sum_ms: sum,
            cycle_duration_max_ms: self.cycle_duration_max_ms.load(Ordering::Relaxed),
            avg_cycle_ms: if cycles_total > 0 { sum / cycles_total } else { 0 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_published: u64,
    pub cycles_failed: u64,
    pub cycles_coalesced: u64,
    pub fetch_transient_failures: u64,
    pub fetch_permanent_failures: u64,
    pub parse_failures: u64,
    pub rows_skipped_total: u64,
    pub parse_warnings_total: u64,
    pub trails_total: u64,
    pub trails_matched: u64,
    pub ways_indexed: u64,
    pub geometry_loads: u64,
    pub geometry_load_failures: u64,
    pub consecutive_failures: u64,
    pub last_success_epoch_secs: u64,
    pub cycle_duration_buckets: [u64; NUM_BUCKETS],
    pub cycle_duration_sum_ms: u64,
    pub cycle_duration_max_ms: u64,
    pub avg_cycle_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles = %self.cycles_total,
            published = %self.cycles_published,
            failed = %self.cycles_failed,
            coalesced = %self.cycles_coalesced,
            fetch_transient = %self.fetch_transient_failures,
            fetch_permanent = %self.fetch_permanent_failures,
            parse_failures = %self.parse_failures,
            consecutive_failures = %self.consecutive_failures,
            trails = %self.trails_total,
            trails_matched = %self.trails_matched,
            ways = %self.ways_indexed,
            rows_skipped = %self.rows_skipped_total,
            avg_cycle_ms = %self.avg_cycle_ms,
            max_cycle_ms = %self.cycle_duration_max_ms,
            "metrics"
        );
    }
}
