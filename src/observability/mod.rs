//! Observability primitives.
//!
//! - [`metrics`]: counters, gauges, and per-loop metric snapshots

pub mod metrics;

pub use metrics::{Counter, Gauge, LoopMetrics, MetricsSnapshot};
