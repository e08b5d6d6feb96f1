//! Liveness monitoring
//!
//! On-demand device probing with transition history, plus an optional
//! interval-driven background watcher.

pub mod events;
pub mod liveness;
pub mod watcher;

pub use events::{MonitorEvent, MonitoringStatus};
pub use liveness::{
    LivenessMonitor, PingFailure, PingOutcome, PingStats, PingSweep, ping_stats_at, record_probe,
};
pub use watcher::{BackgroundMonitor, EventCallback};
