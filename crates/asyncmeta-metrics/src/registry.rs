use crate::snapshot::{MetricsSnapshot, OperationMetrics, TargetMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;

const DECADES: usize = 8;
const NUM_HISTOGRAM_BINS: usize = DECADES * 10;

/// Logarithmic latency histogram.
///
/// Each power-of-ten decade from 1μs to 100s is split into ten bins keyed
/// by the leading digit, which keeps relative error under 10% with
/// constant memory and lock-free recording.
#[derive(Debug)]
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.bins[Self::bin_for(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn bin_for(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10() as usize;
        if decade >= DECADES {
            return NUM_HISTOGRAM_BINS - 1;
        }
        let leading = (latency_us / 10u64.pow(decade as u32)) as usize;
        decade * 10 + leading.min(9)
    }

    /// Lower bound of a bin.
    fn bin_floor(bin: usize) -> u64 {
        let decade = bin / 10;
        let leading = (bin % 10).max(1) as u64;
        10u64.pow(decade as u32) * leading
    }

    fn percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        let rank = ((total * percentile) / 100).max(1);
        let mut seen = 0;
        for (bin, count) in self.bins.iter().enumerate() {
            seen += count.load(Ordering::Relaxed);
            if seen >= rank {
                return Self::bin_floor(bin);
            }
        }
        Self::bin_floor(NUM_HISTOGRAM_BINS - 1)
    }

    /// Returns `(avg, p50, p95, p99)` in microseconds.
    fn summary(&self) -> (u64, u64, u64, u64) {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return (0, 0, 0, 0);
        }
        let avg = self.total_latency.load(Ordering::Relaxed) / total;
        (avg, self.percentile(50), self.percentile(95), self.percentile(99))
    }
}

#[derive(Debug)]
struct OperationStats {
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: LatencyHistogram,
}

impl OperationStats {
    fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
        }
    }

    fn snapshot(&self) -> OperationMetrics {
        let (avg_latency_us, p50_latency_us, p95_latency_us, p99_latency_us) =
            self.latencies.summary();
        OperationMetrics {
            call_count: self.call_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_latency_us,
            p50_latency_us,
            p95_latency_us,
            p99_latency_us,
        }
    }
}

/// Per-target counters.
///
/// Obtained once per target through [`MetricsRegistry::target`] and held
/// by the component that does the counting.
#[derive(Debug, Default)]
pub struct TargetCounters {
    connects: AtomicU64,
    connect_failures: AtomicU64,
    binds: AtomicU64,
    requests_sent: AtomicU64,
    retries: AtomicU64,
    abandons: AtomicU64,
    stale_responses: AtomicU64,
    entries: AtomicU64,
    read_errors: AtomicU64,
    quarantines: AtomicU64,
}

macro_rules! counter {
    ($($method:ident => $field:ident),* $(,)?) => {$(
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    )*};
}

impl TargetCounters {
    counter! {
        record_connect => connects,
        record_connect_failure => connect_failures,
        record_bind => binds,
        record_sent => requests_sent,
        record_retry => retries,
        record_abandon => abandons,
        record_stale => stale_responses,
        record_entry => entries,
        record_read_error => read_errors,
        record_quarantine => quarantines,
    }

    pub fn snapshot(&self) -> TargetMetrics {
        TargetMetrics {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            binds: self.binds.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            abandons: self.abandons.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            quarantines: self.quarantines.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe metrics registry.
///
/// Dispatcher-wide counters are plain atomics. Per-operation and
/// per-target statistics live in maps behind an `RwLock`; entries are
/// created on first use and never removed, since both key sets are small
/// and fixed for the lifetime of a dispatcher.
///
/// # Example
///
/// ```rust
/// use asyncmeta_metrics::MetricsRegistry;
///
/// let registry = MetricsRegistry::new();
/// registry.record_admitted();
/// registry.record_busy();
/// registry.record_released();
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.pending_operations, 0);
/// assert_eq!(snapshot.busy_rejections, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    pending: AtomicU64,
    busy_rejections: AtomicU64,
    timeouts: AtomicU64,
    teardowns: AtomicU64,
    operations: StdRwLock<HashMap<String, Arc<OperationStats>>>,
    targets: StdRwLock<HashMap<String, Arc<TargetCounters>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            operations: StdRwLock::new(HashMap::new()),
            targets: StdRwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_admitted(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        // Saturate instead of wrapping if a release is ever unmatched.
        let _ = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed client operation.
    ///
    /// # Arguments
    /// * `kind` - Operation name (`"add"`, `"search"`, ...)
    /// * `latency_us` - Time from dispatch to final result
    /// * `success` - Whether the final result code was a success code
    pub fn record_operation(&self, kind: &str, latency_us: u64, success: bool) {
        let stats = self.operation_stats(kind);
        stats.call_count.fetch_add(1, Ordering::Relaxed);
        if success {
            stats.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        stats.latencies.record(latency_us);
    }

    fn operation_stats(&self, kind: &str) -> Arc<OperationStats> {
        if let Ok(operations) = self.operations.read() {
            if let Some(stats) = operations.get(kind) {
                return Arc::clone(stats);
            }
        }
        let mut operations = self
            .operations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            operations
                .entry(kind.to_string())
                .or_insert_with(|| Arc::new(OperationStats::new())),
        )
    }

    /// Returns the counters of a target, creating them on first use.
    pub fn target(&self, name: &str) -> Arc<TargetCounters> {
        if let Ok(targets) = self.targets.read() {
            if let Some(counters) = targets.get(name) {
                return Arc::clone(counters);
            }
        }
        let mut targets = self
            .targets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(targets.entry(name.to_string()).or_default())
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = self
            .operations
            .read()
            .map(|ops| {
                ops.iter()
                    .map(|(name, stats)| (name.clone(), stats.snapshot()))
                    .collect()
            })
            .unwrap_or_default();
        let targets = self
            .targets
            .read()
            .map(|targets| {
                targets
                    .iter()
                    .map(|(name, counters)| (name.clone(), counters.snapshot()))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            uptime_ms: self.uptime_ms(),
            pending_operations: self.pending.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            operations,
            targets,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
