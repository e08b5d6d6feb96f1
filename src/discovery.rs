//! Discovery workflow
//!
//! Expands the target range, pings every address, queries SNMP on the ones
//! that answer and stages each result as soon as its probes complete. A scan
//! that is cancelled or runs out of time keeps everything staged so far.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::database::{
    self, Database, DiscoveryRecord, DiscoveryStatus, NewDiscovery, Page, upsert_discovery,
};
use crate::error::{Error, ProbeError, Result};
use crate::network::{expand_range, parse_single_address};
use crate::scanner::{LivenessProber, MetadataProber, SnmpOutcome, SystemInfo};

/// Result of `discoverSingleIP`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleDiscovery {
    pub success: bool,
    pub ip_address: String,
    pub alive: bool,
    pub response_time_ms: Option<u64>,
    pub snmp_available: bool,
    pub metadata: SystemInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<ProbeError>,
    pub record_id: i64,
    pub message: String,
}

/// An address whose result could not be staged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryFailure {
    pub ip_address: String,
    pub error: String,
}

/// Result of `discoverSubnet`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetDiscovery {
    pub success: bool,
    pub cidr: String,
    /// Hosts in the expanded range
    pub host_count: usize,
    /// Hosts whose probes completed
    pub scanned_count: usize,
    pub alive_count: usize,
    pub snmp_count: usize,
    pub staged_count: usize,
    pub failed_count: usize,
    pub failures: Vec<DiscoveryFailure>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub message: String,
}

/// Probe results for one address, before staging
struct AddressProbe {
    ip: Ipv4Addr,
    alive: bool,
    rtt_ms: Option<u64>,
    probe_error: Option<ProbeError>,
    snmp: Option<SnmpOutcome>,
}

impl AddressProbe {
    fn to_new_discovery(&self) -> NewDiscovery {
        let (snmp_available, info) = match &self.snmp {
            Some(outcome) if outcome.available => (true, outcome.info.clone()),
            _ => (false, SystemInfo::default()),
        };
        NewDiscovery {
            ip_address: self.ip.to_string(),
            is_alive: self.alive,
            snmp_available,
            response_time_ms: self.rtt_ms.map(|ms| ms as i64),
            info,
        }
    }
}

/// Orchestrates range expansion, probing and staging
#[derive(Clone)]
pub struct DiscoveryService {
    db: Database,
    liveness: LivenessProber,
    metadata: MetadataProber,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(
        db: Database,
        liveness: LivenessProber,
        metadata: MetadataProber,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            db,
            liveness,
            metadata,
            config,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Pings `ip`, then queries SNMP if it answered
    async fn probe_address(
        liveness: &LivenessProber,
        metadata: &MetadataProber,
        snmp_slots: Option<&Semaphore>,
        ip: Ipv4Addr,
    ) -> AddressProbe {
        let ping = liveness.probe(ip).await;
        let snmp = if ping.is_alive {
            let _slot = match snmp_slots {
                Some(slots) => slots.acquire().await.ok(),
                None => None,
            };
            Some(metadata.query(ip).await)
        } else {
            None
        };

        AddressProbe {
            ip,
            alive: ping.is_alive,
            rtt_ms: ping.rtt_ms,
            probe_error: ping.error,
            snmp,
        }
    }

    fn stage(db: &Database, probe: &AddressProbe) -> Result<i64> {
        let conn = db.lock()?;
        upsert_discovery(&conn, &probe.to_new_discovery(), Utc::now())
    }

    /// Probes and stages one address.
    ///
    /// An unreachable host is still staged with `alive: false`.
    pub async fn discover_single_ip(&self, input: &str) -> Result<SingleDiscovery> {
        let ip = parse_single_address(input)?;
        tracing::info!("Discovering single host {}", ip);

        let probe = Self::probe_address(&self.liveness, &self.metadata, None, ip).await;
        let record_id = Self::stage(&self.db, &probe)?;

        let snmp_available = probe.snmp.as_ref().is_some_and(|s| s.available);
        let message = match (probe.alive, snmp_available) {
            (true, true) => format!("{} is alive and answered SNMP", ip),
            (true, false) => format!("{} is alive; SNMP not available", ip),
            (false, _) => format!("{} did not respond", ip),
        };

        Ok(SingleDiscovery {
            success: true,
            ip_address: ip.to_string(),
            alive: probe.alive,
            response_time_ms: probe.rtt_ms,
            snmp_available,
            metadata: probe.to_new_discovery().info,
            probe_error: probe.probe_error,
            record_id,
            message,
        })
    }

    /// Scans every host of `cidr` through a bounded worker pool.
    ///
    /// Range errors are returned before any probe is sent. Once `cancel`
    /// fires or the scan timeout elapses no new address is launched;
    /// in-flight addresses finish and are staged.
    pub async fn discover_subnet(&self, cidr: &str, cancel: &CancellationToken) -> Result<SubnetDiscovery> {
        let started = Instant::now();
        let hosts = expand_range(cidr, self.config.max_scan_hosts)?;
        let deadline = tokio::time::Instant::now() + self.config.scan_timeout;

        tracing::info!("Scanning {} ({} hosts)...", cidr.trim(), hosts.len());

        let mut summary = SubnetDiscovery {
            cidr: cidr.trim().to_string(),
            host_count: hosts.len(),
            ..SubnetDiscovery::default()
        };

        let ping_slots = Arc::new(Semaphore::new(self.config.ping.concurrency.max(1)));
        let snmp_slots = Arc::new(Semaphore::new(self.config.snmp.concurrency.max(1)));
        let mut handles = Vec::with_capacity(hosts.len());

        for ip in hosts {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    summary.timed_out = true;
                    break;
                }
                permit = Arc::clone(&ping_slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        summary.failures.push(DiscoveryFailure {
                            ip_address: ip.to_string(),
                            error: e.to_string(),
                        });
                        continue;
                    }
                },
            };

            let db = self.db.clone();
            let liveness = self.liveness.clone();
            let metadata = self.metadata.clone();
            let snmp_slots = Arc::clone(&snmp_slots);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let probe =
                    Self::probe_address(&liveness, &metadata, Some(snmp_slots.as_ref()), ip).await;
                let staged = Self::stage(&db, &probe);
                (probe, staged)
            });
            handles.push((ip, handle));
        }

        if summary.cancelled || summary.timed_out {
            tracing::warn!(
                "Scan of {} stopped early after launching {} of {} hosts",
                summary.cidr,
                handles.len(),
                summary.host_count
            );
        }

        for (ip, handle) in handles {
            match handle.await {
                Ok((probe, staged)) => {
                    summary.scanned_count += 1;
                    if probe.alive {
                        summary.alive_count += 1;
                    }
                    if probe.snmp.as_ref().is_some_and(|s| s.available) {
                        summary.snmp_count += 1;
                    }
                    match staged {
                        Ok(_) => summary.staged_count += 1,
                        Err(e) => {
                            tracing::warn!("Failed to stage {}: {}", ip, e);
                            summary.failures.push(DiscoveryFailure {
                                ip_address: ip.to_string(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Discovery task for {} failed: {}", ip, e);
                    summary.failures.push(DiscoveryFailure {
                        ip_address: ip.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.failed_count = summary.failures.len();
        summary.duration_ms = started.elapsed().as_millis() as u64;
        summary.success = true;
        summary.message = format!(
            "Scanned {}/{} hosts in {}: {} alive, {} with SNMP, {} staged{}",
            summary.scanned_count,
            summary.host_count,
            summary.cidr,
            summary.alive_count,
            summary.snmp_count,
            summary.staged_count,
            if summary.cancelled {
                " (cancelled)"
            } else if summary.timed_out {
                " (timed out)"
            } else {
                ""
            }
        );

        tracing::info!("{}", summary.message);
        Ok(summary)
    }

    pub fn list_discovery_queue(
        &self,
        status: Option<DiscoveryStatus>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<DiscoveryRecord>> {
        let conn = self.db.lock()?;
        database::list_by_status(&conn, status, page, page_size)
    }

    /// Deletes non-pending records older than `days`
    pub fn clear_old_records(&self, days: u32) -> Result<usize> {
        if days == 0 {
            return Err(Error::validation("retention must be at least one day"));
        }
        let conn = self.db.lock()?;
        let deleted = database::purge_older_than(&conn, days, Utc::now())?;
        tracing::info!("Purged {} discovery records older than {} days", deleted, days);
        Ok(deleted)
    }

    pub fn mark_processed(&self, record_id: i64) -> Result<()> {
        let conn = self.db.lock()?;
        database::mark_processed(&conn, record_id, Utc::now())
    }

    pub fn delete_record(&self, record_id: i64) -> Result<()> {
        let conn = self.db.lock()?;
        database::delete_record(&conn, record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{EchoFuture, EchoProbe, SnmpFuture, SnmpTransport, SnmpValue};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::time::Duration;

    struct Hosts(HashSet<Ipv4Addr>);

    impl EchoProbe for Hosts {
        fn echo<'a>(&'a self, ip: Ipv4Addr, _sequence: u16, _timeout: Duration) -> EchoFuture<'a> {
            let alive = self.0.contains(&ip);
            Box::pin(async move {
                if alive {
                    Ok(Duration::from_millis(3))
                } else {
                    Err(ProbeError::Timeout)
                }
            })
        }
    }

    struct NamedAgent;

    impl SnmpTransport for NamedAgent {
        fn get<'a>(
            &'a self,
            target: SocketAddr,
            _community: &'a str,
            _oids: &'a [&'static [u64]],
            _timeout: Duration,
        ) -> SnmpFuture<'a> {
            Box::pin(async move {
                Ok(vec![(3, SnmpValue::Octets(format!("host-{}", target.ip()).into_bytes()))])
            })
        }
    }

    fn service(db: Database, alive: &[Ipv4Addr]) -> DiscoveryService {
        let config = DiscoveryConfig::default();
        DiscoveryService::new(
            db,
            LivenessProber::new(Arc::new(Hosts(alive.iter().copied().collect())), config.ping.clone()),
            MetadataProber::new(Arc::new(NamedAgent), config.snmp.clone()),
            config,
        )
    }

    #[tokio::test]
    async fn single_ip_rejects_ranges_before_probing() {
        let svc = service(Database::in_memory().unwrap(), &[]);
        assert!(matches!(
            svc.discover_single_ip("10.0.0.0/24").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn single_ip_stages_metadata_for_live_host() {
        let ip = Ipv4Addr::new(10, 9, 0, 1);
        let svc = service(Database::in_memory().unwrap(), &[ip]);

        let result = svc.discover_single_ip(" 10.9.0.1 ").await.unwrap();

        assert!(result.alive && result.snmp_available);
        assert_eq!(result.metadata.sys_name.as_deref(), Some("host-10.9.0.1"));
        let page = svc.list_discovery_queue(Some(DiscoveryStatus::Pending), 1, 50).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, result.record_id);
    }

    #[tokio::test]
    async fn subnet_scan_rejects_oversized_range() {
        let svc = service(Database::in_memory().unwrap(), &[]);
        let result = svc.discover_subnet("10.0.0.0/16", &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::RangeTooLarge { requested: 65534, .. })));
    }

    #[tokio::test]
    async fn cancelled_scan_launches_nothing() {
        let svc = service(Database::in_memory().unwrap(), &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = svc.discover_subnet("10.0.0.0/29", &cancel).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!((summary.host_count, summary.scanned_count), (6, 0));
    }

    #[tokio::test]
    async fn clear_old_records_requires_positive_days() {
        let svc = service(Database::in_memory().unwrap(), &[]);
        assert!(matches!(svc.clear_old_records(0), Err(Error::Validation(_))));
        assert_eq!(svc.clear_old_records(30).unwrap(), 0);
    }
}
