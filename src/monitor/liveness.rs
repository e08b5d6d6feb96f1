//! Device liveness re-probing and transition history
//!
//! A probe that confirms the stored state only refreshes `last_seen`. A probe
//! that contradicts it flips `is_alive` with a compare-and-set and appends one
//! history row in the same savepoint. Losing the compare-and-set to a
//! concurrent writer leaves no history row behind.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tokio_util::sync::CancellationToken;

use crate::database::{
    Database, Device, LivenessState, StatusHistoryRecord, get_device, history_since,
    insert_status_change, list_enabled_devices, set_liveness_if, touch_last_seen, with_savepoint,
};
use crate::error::{Error, ProbeError, Result};
use crate::scanner::{LivenessProber, ProbeOutcome};

/// Result of `pingDevice`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingOutcome {
    pub device_id: i64,
    pub ip_address: String,
    pub status_changed: bool,
    pub old_status: LivenessState,
    pub new_status: LivenessState,
    pub rtt_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeError>,
    pub checked_at: DateTime<Utc>,
}

/// Result of `getDevicePingStats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingStats {
    pub device_id: i64,
    pub window_days: u32,
    pub window_start: DateTime<Utc>,
    pub current_status: LivenessState,
    pub transitions: usize,
    pub went_online: usize,
    pub went_offline: usize,
    /// Share of the known-state time spent online, 0.0 to 1.0
    pub uptime_ratio: Option<f64>,
    pub uptime_percent: Option<f64>,
    pub last_change: Option<DateTime<Utc>>,
}

/// A device that could not be re-probed during a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingFailure {
    pub device_id: i64,
    pub ip_address: String,
    pub error: String,
}

/// Result of probing every enabled device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingSweep {
    pub checked: usize,
    pub online: usize,
    pub offline: usize,
    pub changes: Vec<PingOutcome>,
    pub failures: Vec<PingFailure>,
    pub cancelled: bool,
}

/// Re-probes inventory devices and records their transitions
#[derive(Clone)]
pub struct LivenessMonitor {
    db: Database,
    prober: LivenessProber,
}

impl LivenessMonitor {
    pub fn new(db: Database, prober: LivenessProber) -> Self {
        Self { db, prober }
    }

    /// Probes one device and records a transition if its state changed.
    pub async fn ping_device(&self, device_id: i64) -> Result<PingOutcome> {
        let device = {
            let conn = self.db.lock()?;
            get_device(&conn, device_id)?.ok_or(Error::NotFound {
                entity: "device",
                id: device_id,
            })?
        };
        let ip = parse_device_address(&device)?;

        let probe = self.prober.probe(ip).await;

        let conn = self.db.lock()?;
        record_probe(&conn, &device, probe, Utc::now())
    }

    /// Probes every enabled device. Per-device failures are collected.
    pub async fn ping_all(&self, cancel: &CancellationToken) -> Result<PingSweep> {
        let devices = {
            let conn = self.db.lock()?;
            list_enabled_devices(&conn)?
        };

        let mut sweep = PingSweep::default();
        let mut targets = Vec::with_capacity(devices.len());
        for device in devices {
            match parse_device_address(&device) {
                Ok(ip) => targets.push((ip, device)),
                Err(e) => sweep.failures.push(PingFailure {
                    device_id: device.id,
                    ip_address: device.ip_address.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let ips: Vec<Ipv4Addr> = targets.iter().map(|(ip, _)| *ip).collect();
        let mut batch = self.prober.probe_all(&ips, cancel).await;
        sweep.cancelled = batch.cancelled;

        let now = Utc::now();
        let conn = self.db.lock()?;
        for (ip, device) in targets {
            let Some(probe) = batch.results.remove(&ip) else {
                continue;
            };
            match record_probe(&conn, &device, probe, now) {
                Ok(outcome) => {
                    sweep.checked += 1;
                    match outcome.new_status {
                        LivenessState::Online => sweep.online += 1,
                        _ => sweep.offline += 1,
                    }
                    if outcome.status_changed {
                        sweep.changes.push(outcome);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to record probe for device {}: {}", device.id, e);
                    sweep.failures.push(PingFailure {
                        device_id: device.id,
                        ip_address: device.ip_address.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Ping sweep: {} checked, {} online, {} offline, {} changed, {} failed",
            sweep.checked,
            sweep.online,
            sweep.offline,
            sweep.changes.len(),
            sweep.failures.len()
        );
        Ok(sweep)
    }

    /// Transition statistics over the trailing `window_days`
    pub fn device_ping_stats(&self, device_id: i64, window_days: u32) -> Result<PingStats> {
        let conn = self.db.lock()?;
        ping_stats_at(&conn, device_id, window_days, Utc::now())
    }
}

fn parse_device_address(device: &Device) -> Result<Ipv4Addr> {
    device.ip_address.parse::<Ipv4Addr>().map_err(|e| {
        Error::validation(format!(
            "device {} has invalid address '{}': {}",
            device.id, device.ip_address, e
        ))
    })
}

/// Applies one probe result to the stored device state
pub fn record_probe(
    conn: &Connection,
    device: &Device,
    probe: ProbeOutcome,
    now: DateTime<Utc>,
) -> Result<PingOutcome> {
    let old_status = device.liveness;
    let new_status = LivenessState::from_alive(Some(probe.is_alive));

    let status_changed = if new_status == old_status {
        touch_last_seen(conn, device.id, now)?;
        false
    } else {
        with_savepoint(conn, "liveness_transition", |conn| {
            if !set_liveness_if(conn, device.id, old_status, probe.is_alive, now)? {
                tracing::debug!(
                    "Device {} changed state concurrently, skipping transition record",
                    device.id
                );
                return Ok(false);
            }
            insert_status_change(conn, device.id, old_status, new_status, now)?;
            Ok(true)
        })?
    };

    if status_changed {
        tracing::info!(
            "Device {} ({}) went {} (was {})",
            device.id,
            device.ip_address,
            new_status,
            old_status
        );
    }

    Ok(PingOutcome {
        device_id: device.id,
        ip_address: device.ip_address.clone(),
        status_changed,
        old_status,
        new_status,
        rtt_ms: probe.rtt_ms,
        error: probe.error,
        checked_at: now,
    })
}

/// Ping statistics as of `now`. Rows before the window are ignored.
pub fn ping_stats_at(
    conn: &Connection,
    device_id: i64,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<PingStats> {
    if window_days == 0 {
        return Err(Error::validation("window must be at least one day"));
    }
    let device = get_device(conn, device_id)?.ok_or(Error::NotFound {
        entity: "device",
        id: device_id,
    })?;

    let window_start = now - Duration::days(i64::from(window_days));
    let rows: Vec<StatusHistoryRecord> = history_since(conn, device_id, window_start)?
        .into_iter()
        .filter(|row| row.changed_at <= now)
        .collect();

    let uptime_ratio = uptime_ratio(&rows, window_start, now);

    Ok(PingStats {
        device_id,
        window_days,
        window_start,
        current_status: device.liveness,
        transitions: rows.len(),
        went_online: rows.iter().filter(|r| r.status == LivenessState::Online).count(),
        went_offline: rows.iter().filter(|r| r.status == LivenessState::Offline).count(),
        uptime_ratio,
        uptime_percent: uptime_ratio.map(|r| (r * 10_000.0).round() / 100.0),
        last_change: rows.last().map(|r| r.changed_at),
    })
}

/// Time-weighted online share.
///
/// Each row's `status` holds until the next row or `now`. Before the first
/// row the device was in that row's `old_status`; unknown time is left out
/// of the denominator.
fn uptime_ratio(rows: &[StatusHistoryRecord], window_start: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    let first = rows.first()?;

    let mut online = Duration::zero();
    let mut known = Duration::zero();
    let mut account = |state: LivenessState, from: DateTime<Utc>, to: DateTime<Utc>| {
        let span = to - from;
        if span <= Duration::zero() {
            return;
        }
        match state {
            LivenessState::Online => {
                online += span;
                known += span;
            }
            LivenessState::Offline => known += span,
            LivenessState::Unknown => {}
        }
    };

    account(first.old_status, window_start, first.changed_at);
    for (i, row) in rows.iter().enumerate() {
        let until = rows.get(i + 1).map(|next| next.changed_at).unwrap_or(now);
        account(row.status, row.changed_at, until);
    }

    if known <= Duration::zero() {
        return None;
    }
    Some(online.num_milliseconds() as f64 / known.num_milliseconds() as f64)
}
