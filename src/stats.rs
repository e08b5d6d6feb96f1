//! Read-only rollups over the staging queue and the inventory

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::database::{DeviceCounts, QueueStats, device_counts, queue_stats};
use crate::error::Result;

/// Result of `getDiscoveryStats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    #[serde(flatten)]
    pub counts: QueueStats,
    pub recent_window_hours: i64,
    pub alive_percentage: f64,
    pub snmp_percentage: f64,
    pub processed_percentage: f64,
}

/// Inventory-wide summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub devices: DeviceCounts,
    pub online_percentage: f64,
    pub pending_discoveries: i64,
    pub failed_discoveries: i64,
    pub recent_discoveries: i64,
}

/// `part / whole` as a percentage rounded to two decimals; 0 when `whole` is 0
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 10_000.0).round() / 100.0
}

pub fn discovery_stats(
    conn: &Connection,
    recent_window_hours: i64,
    now: DateTime<Utc>,
) -> Result<DiscoveryStats> {
    let counts = queue_stats(conn, now - Duration::hours(recent_window_hours))?;

    Ok(DiscoveryStats {
        alive_percentage: percentage(counts.alive, counts.total),
        snmp_percentage: percentage(counts.snmp_available, counts.alive),
        processed_percentage: percentage(counts.processed, counts.total),
        recent_window_hours,
        counts,
    })
}

pub fn inventory_summary(
    conn: &Connection,
    recent_window_hours: i64,
    now: DateTime<Utc>,
) -> Result<InventorySummary> {
    let devices = device_counts(conn)?;
    let queue = queue_stats(conn, now - Duration::hours(recent_window_hours))?;

    Ok(InventorySummary {
        online_percentage: percentage(devices.online, devices.enabled),
        pending_discoveries: queue.pending,
        failed_discoveries: queue.failed,
        recent_discoveries: queue.recent,
        devices,
    })
}
