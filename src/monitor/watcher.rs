//! Background liveness watcher
//!
//! Re-probes the inventory on a fixed interval and reports transitions
//! through a callback

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::events::{MonitorEvent, MonitoringStatus};
use super::liveness::{LivenessMonitor, PingSweep};
use crate::config::{DEFAULT_MONITOR_INTERVAL, MAX_MONITOR_INTERVAL, MIN_MONITOR_INTERVAL};
use crate::database::LivenessState;

/// Event callback type
pub type EventCallback = Arc<dyn Fn(MonitorEvent) + Send + Sync>;

/// Background liveness monitor
pub struct BackgroundMonitor {
    monitor: LivenessMonitor,
    is_running: Arc<AtomicBool>,
    interval_seconds: Arc<Mutex<u64>>,
    sweep_count: Arc<AtomicU32>,
    last_sweep: Arc<Mutex<Option<(String, PingSweep)>>>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl BackgroundMonitor {
    pub fn new(monitor: LivenessMonitor) -> Self {
        Self {
            monitor,
            is_running: Arc::new(AtomicBool::new(false)),
            interval_seconds: Arc::new(Mutex::new(DEFAULT_MONITOR_INTERVAL)),
            sweep_count: Arc::new(AtomicU32::new(0)),
            last_sweep: Arc::new(Mutex::new(None)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Start background monitoring with event callback.
    ///
    /// Calling this while running only updates the interval.
    pub async fn start<F>(&self, callback: F, interval: Option<u64>)
    where
        F: Fn(MonitorEvent) + Send + Sync + 'static,
    {
        let interval_secs = interval
            .unwrap_or(DEFAULT_MONITOR_INTERVAL)
            .clamp(MIN_MONITOR_INTERVAL, MAX_MONITOR_INTERVAL);

        *self.interval_seconds.lock().await = interval_secs;
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.sweep_count.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();

        let callback: EventCallback = Arc::new(callback);
        callback(MonitorEvent::MonitoringStarted {
            interval_seconds: interval_secs,
        });

        let monitor = self.monitor.clone();
        let is_running = Arc::clone(&self.is_running);
        let sweep_count = Arc::clone(&self.sweep_count);
        let last_sweep = Arc::clone(&self.last_sweep);
        let interval_seconds = Arc::clone(&self.interval_seconds);

        tokio::spawn(async move {
            tracing::info!(
                "[MONITOR] Liveness monitoring started (interval: {}s)",
                interval_secs
            );

            while is_running.load(Ordering::SeqCst) {
                let sweep_number = sweep_count.fetch_add(1, Ordering::SeqCst) + 1;
                callback(MonitorEvent::SweepStarted { sweep_number });

                let start = Instant::now();
                match monitor.ping_all(&cancel).await {
                    Ok(sweep) => {
                        let duration_ms = start.elapsed().as_millis() as u64;
                        emit_transitions(&callback, &sweep);
                        callback(MonitorEvent::SweepCompleted {
                            sweep_number,
                            devices_checked: sweep.checked,
                            devices_online: sweep.online,
                            status_changes: sweep.changes.len(),
                            duration_ms,
                        });
                        tracing::debug!(
                            "[MONITOR] Sweep #{} complete: {} devices in {}ms",
                            sweep_number,
                            sweep.checked,
                            duration_ms
                        );
                        *last_sweep.lock().await = Some((chrono::Utc::now().to_rfc3339(), sweep));
                    }
                    Err(e) => {
                        tracing::warn!("[MONITOR] Sweep #{} failed: {}", sweep_number, e);
                        callback(MonitorEvent::MonitoringError {
                            message: e.to_string(),
                        });
                    }
                }

                let wait = Duration::from_secs(*interval_seconds.lock().await);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            is_running.store(false, Ordering::SeqCst);
            tracing::info!("[MONITOR] Liveness monitoring stopped");
            callback(MonitorEvent::MonitoringStopped);
        });
    }

    /// Stop background monitoring. The current sweep finishes its in-flight probes.
    pub async fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.cancel.lock().await.cancel();
    }

    pub async fn status(&self) -> MonitoringStatus {
        let last = self.last_sweep.lock().await;
        let (last_sweep_time, devices_online, devices_checked) = match last.as_ref() {
            Some((at, sweep)) => (Some(at.clone()), sweep.online, sweep.checked),
            None => (None, 0, 0),
        };

        MonitoringStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            interval_seconds: *self.interval_seconds.lock().await,
            sweep_count: self.sweep_count.load(Ordering::SeqCst),
            last_sweep_time,
            devices_online,
            devices_checked,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

fn emit_transitions(callback: &EventCallback, sweep: &PingSweep) {
    for change in &sweep.changes {
        let event = match change.new_status {
            LivenessState::Online => MonitorEvent::DeviceCameOnline {
                device_id: change.device_id,
                ip_address: change.ip_address.clone(),
            },
            _ => MonitorEvent::DeviceWentOffline {
                device_id: change.device_id,
                ip_address: change.ip_address.clone(),
            },
        };
        callback(event);
    }
}
