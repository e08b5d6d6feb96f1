use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::app::{AppContext, StatsReport, monitor_event_line};
use crate::assignment::{AssignmentReport, AssignmentStats, AutoAssignmentEngine};
use crate::database::{Database, DiscoveryRecord, DiscoveryStatus, Page};
use crate::discovery::{DiscoveryService, SingleDiscovery, SubnetDiscovery};
use crate::error::ProbeError;
use crate::monitor::{
    BackgroundMonitor, LivenessMonitor, MonitorEvent, MonitoringStatus, PingOutcome, PingStats,
};
use crate::scanner::{EchoFuture, EchoProbe, LivenessProber, MetadataProber, SurgeEchoProbe};
use crate::stats::{discovery_stats, inventory_summary};

/// Upper bound on waiting for the watcher loop to wind down after cancel
const MONITOR_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn open_database(context: &AppContext) -> Result<Database> {
    Database::new(context.db_path().to_path_buf()).with_context(|| {
        format!(
            "Failed to open inventory database at {}",
            context.db_path().display()
        )
    })
}

/// Echo stand-in for commands that only touch the database, so they run
/// without raw socket privileges
struct NoEchoSocket;

impl EchoProbe for NoEchoSocket {
    fn echo<'a>(
        &'a self,
        _ip: std::net::Ipv4Addr,
        _sequence: u16,
        _timeout: Duration,
    ) -> EchoFuture<'a> {
        Box::pin(async {
            Err(ProbeError::Unreachable(
                "ICMP socket is not opened for this command".to_string(),
            ))
        })
    }
}

fn echo_probe(context: &AppContext) -> Result<Arc<dyn EchoProbe>> {
    if let Some(probe) = context.echo_probe() {
        return Ok(probe);
    }
    let probe = SurgeEchoProbe::new().context(
        "Failed to open ICMP socket. Run as root or grant CAP_NET_RAW (or allow unprivileged ping via net.ipv4.ping_group_range)",
    )?;
    Ok(Arc::new(probe))
}

fn liveness_prober(context: &AppContext) -> Result<LivenessProber> {
    Ok(LivenessProber::new(
        echo_probe(context)?,
        context.config().ping.clone(),
    ))
}

fn store_only_prober(context: &AppContext) -> LivenessProber {
    let probe = context
        .echo_probe()
        .unwrap_or_else(|| Arc::new(NoEchoSocket));
    LivenessProber::new(probe, context.config().ping.clone())
}

fn build_discovery_service(context: &AppContext, prober: LivenessProber) -> Result<DiscoveryService> {
    let config = context.config().clone();
    Ok(DiscoveryService::new(
        open_database(context)?,
        prober,
        MetadataProber::new(context.snmp_transport(), config.snmp.clone()),
        config,
    ))
}

fn discovery_service(context: &AppContext) -> Result<DiscoveryService> {
    build_discovery_service(context, liveness_prober(context)?)
}

/// Queue maintenance never sends a packet
fn queue_service(context: &AppContext) -> Result<DiscoveryService> {
    build_discovery_service(context, store_only_prober(context))
}

fn liveness_monitor(context: &AppContext) -> Result<LivenessMonitor> {
    Ok(LivenessMonitor::new(
        open_database(context)?,
        liveness_prober(context)?,
    ))
}

pub(crate) async fn handle_discover(ip: &str, context: &AppContext) -> Result<SingleDiscovery> {
    let service = discovery_service(context)?;
    let result = service
        .discover_single_ip(ip)
        .await
        .with_context(|| format!("Discovery of {} failed", ip))?;
    Ok(result)
}

pub(crate) async fn handle_scan(cidr: &str, context: &AppContext) -> Result<SubnetDiscovery> {
    let service = discovery_service(context)?;
    crate::log_stderr!("Scanning {} (Ctrl+C stops after in-flight probes)", cidr);
    let summary = service
        .discover_subnet(cidr, context.cancel_token())
        .await
        .with_context(|| format!("Scan of {} failed", cidr))?;
    Ok(summary)
}

pub(crate) fn handle_queue(
    status: Option<DiscoveryStatus>,
    page: u32,
    page_size: u32,
    context: &AppContext,
) -> Result<Page<DiscoveryRecord>> {
    let page = queue_service(context)?
        .list_discovery_queue(status, page, page_size)
        .context("Failed to list discovery queue")?;
    Ok(page)
}

pub(crate) fn handle_assign(context: &AppContext) -> Result<AssignmentReport> {
    let engine = AutoAssignmentEngine::new(open_database(context)?, context.config())
        .context("Failed to prepare auto-assignment")?;
    let report = engine.run()?;
    crate::log_stderr!("{}", report.message);
    Ok(report)
}

pub(crate) fn handle_assign_stats(context: &AppContext) -> Result<AssignmentStats> {
    let engine = AutoAssignmentEngine::new(open_database(context)?, context.config())
        .context("Failed to prepare auto-assignment")?;
    Ok(engine.stats()?)
}

pub(crate) fn handle_stats(context: &AppContext) -> Result<StatsReport> {
    let db = open_database(context)?;
    let conn = db.lock()?;
    let now = Utc::now();
    let hours = context.config().recent_window_hours;
    Ok(StatsReport {
        discovery: discovery_stats(&conn, hours, now).context("Failed to compute discovery stats")?,
        inventory: inventory_summary(&conn, hours, now)
            .context("Failed to compute inventory summary")?,
    })
}

pub(crate) fn handle_purge(days: u32, context: &AppContext) -> Result<usize> {
    let deleted = queue_service(context)?
        .clear_old_records(days)
        .context("Failed to purge discovery records")?;
    crate::log_stderr!("Purged {} discovery records older than {} days", deleted, days);
    Ok(deleted)
}

pub(crate) fn handle_mark_processed(record_id: i64, context: &AppContext) -> Result<()> {
    queue_service(context)?.mark_processed(record_id)?;
    Ok(())
}

pub(crate) fn handle_delete_record(record_id: i64, context: &AppContext) -> Result<()> {
    queue_service(context)?.delete_record(record_id)?;
    Ok(())
}

pub(crate) async fn handle_ping(device_id: i64, context: &AppContext) -> Result<PingOutcome> {
    let monitor = liveness_monitor(context)?;
    let outcome = monitor
        .ping_device(device_id)
        .await
        .with_context(|| format!("Ping of device {} failed", device_id))?;
    Ok(outcome)
}

pub(crate) fn handle_ping_stats(device_id: i64, days: u32, context: &AppContext) -> Result<PingStats> {
    let monitor = LivenessMonitor::new(open_database(context)?, store_only_prober(context));
    let stats = monitor
        .device_ping_stats(device_id, days)
        .with_context(|| format!("Failed to compute ping stats for device {}", device_id))?;
    Ok(stats)
}

/// Runs the background watcher until the context is cancelled, streaming
/// one JSON event per line through the output hook.
pub(crate) async fn handle_monitor(
    interval: Option<u64>,
    context: &AppContext,
) -> Result<MonitoringStatus> {
    let watcher = BackgroundMonitor::new(liveness_monitor(context)?);
    let stopped = Arc::new(Notify::new());

    let sink = context.clone();
    let stopped_signal = Arc::clone(&stopped);
    watcher
        .start(
            move |event: MonitorEvent| {
                sink.emit_line(&monitor_event_line(&event));
                if matches!(event, MonitorEvent::MonitoringStopped) {
                    stopped_signal.notify_one();
                }
            },
            interval,
        )
        .await;

    context.cancel_token().cancelled().await;
    watcher.stop().await;
    if tokio::time::timeout(MONITOR_SHUTDOWN_GRACE, stopped.notified())
        .await
        .is_err()
    {
        crate::log_warn!("Monitor loop did not stop within {:?}", MONITOR_SHUTDOWN_GRACE);
    }

    Ok(watcher.status().await)
}
