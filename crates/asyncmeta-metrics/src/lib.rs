//! AsyncMeta Metrics Collection
//!
//! Thread-safe counters for the dispatcher: per-operation call counts and
//! latency percentiles, per-target traffic counters, and the dispatcher-wide
//! admission and teardown counters.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: storage with lock-free counters on the hot path
//! - [`MetricsSnapshot`]: serializable point-in-time copy
//!
//! # Usage Example
//!
//! ```rust
//! use asyncmeta_metrics::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new();
//! registry.record_operation("search", 1_250, true);
//! registry.target("t1").record_sent();
//!
//! let snapshot = registry.snapshot();
//! assert_eq!(snapshot.operations["search"].call_count, 1);
//! assert_eq!(snapshot.targets["t1"].requests_sent, 1);
//! ```
//!
//! # Thread Safety
//!
//! Counters are `AtomicU64` with relaxed ordering. The per-name maps sit
//! behind an `RwLock` that is only written the first time a name is seen.

mod registry;
mod snapshot;

pub use registry::{MetricsRegistry, TargetCounters};
pub use snapshot::{MetricsSnapshot, OperationMetrics, TargetMetrics};
