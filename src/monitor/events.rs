//! Liveness monitoring events
//!
//! Emitted by [`super::BackgroundMonitor`] to its callback

use serde::{Deserialize, Serialize};

/// Monitoring events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MonitorEvent {
    /// Monitoring session started
    MonitoringStarted { interval_seconds: u64 },

    /// Monitoring session stopped
    MonitoringStopped,

    /// Sweep cycle started
    SweepStarted { sweep_number: u32 },

    /// Sweep cycle completed
    SweepCompleted {
        sweep_number: u32,
        devices_checked: usize,
        devices_online: usize,
        status_changes: usize,
        duration_ms: u64,
    },

    /// Device answered after being offline or never probed
    DeviceCameOnline { device_id: i64, ip_address: String },

    /// Device stopped answering
    DeviceWentOffline { device_id: i64, ip_address: String },

    /// Error during monitoring
    MonitoringError { message: String },
}

/// Monitoring status information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub is_running: bool,
    pub interval_seconds: u64,
    pub sweep_count: u32,
    pub last_sweep_time: Option<String>,
    pub devices_online: usize,
    pub devices_checked: usize,
}
