//! Auto-assignment engine
//!
//! Turns pending discoveries into classified devices and retries devices
//! that are still parked in the "Unknown" buckets. Each item runs in its own
//! savepoint; one bad item never aborts the batch.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use super::rules::{MatchSubject, RuleSpec, RuleTable, load_rule_specs};
use crate::config::DiscoveryConfig;
use crate::database::lease;
use crate::database::{
    Database, Device, DeviceDraft, DiscoveryRecord, Sentinels, device_counts, get_device_by_ip,
    insert_discovered_device, mark_failed, mark_processed, pending_counts, pending_records,
    reclassify_device, unclassified_devices, update_discovered_device, with_savepoint,
};
use crate::error::{Error, Result};
use crate::monitor::record_probe;
use crate::scanner::{ProbeOutcome, SystemInfo};

/// Lease name guarding engine runs
pub const ASSIGNMENT_LEASE: &str = "auto_assignment";

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One item the engine could not process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFailure {
    pub ip_address: String,
    pub record_id: Option<i64>,
    pub device_id: Option<i64>,
    pub error: String,
}

/// Counters for one run. `processed = matched + unknown + skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub processed: u64,
    pub matched: u64,
    pub unknown: u64,
    pub skipped: u64,
    pub failed: u64,
    pub rules_active: usize,
    pub rules_rejected: usize,
    pub failures: Vec<AssignmentFailure>,
}

impl AssignmentSummary {
    fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Matched => self.matched += 1,
            ItemOutcome::Unknown => self.unknown += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    fn fail(&mut self, failure: AssignmentFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

/// Result of `processAutoAssignment`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReport {
    pub success: bool,
    pub stats: AssignmentSummary,
    pub message: String,
}

impl From<AssignmentSummary> for AssignmentReport {
    fn from(stats: AssignmentSummary) -> Self {
        let message = format!(
            "Processed {} items: {} matched, {} unknown, {} skipped, {} failed",
            stats.processed, stats.matched, stats.unknown, stats.skipped, stats.failed
        );
        Self {
            success: true,
            stats,
            message,
        }
    }
}

/// Snapshot of classification backlog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentStats {
    pub pending_records: i64,
    pub pending_alive: i64,
    pub unclassified_devices: i64,
    pub manual_devices: i64,
    pub auto_assigned_devices: i64,
    pub total_devices: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Matched,
    Unknown,
    Skipped,
}

/// Held for the duration of a run; gives the lease back on drop
struct RunLease {
    db: Database,
    owner: String,
}

impl RunLease {
    fn acquire(db: &Database, ttl: Duration, now: DateTime<Utc>) -> Result<Self> {
        let owner = format!(
            "pid{}-run{}",
            std::process::id(),
            RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let conn = db.lock()?;
        if let Some(holder) = lease::try_acquire(&conn, ASSIGNMENT_LEASE, &owner, ttl, now)? {
            return Err(Error::AssignmentInProgress {
                owner: holder.owner,
                expires_at: holder.expires_at.to_rfc3339(),
            });
        }

        Ok(Self {
            db: db.clone(),
            owner,
        })
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        match self.db.lock() {
            Ok(conn) => {
                if let Err(e) = lease::release(&conn, ASSIGNMENT_LEASE, &self.owner) {
                    tracing::warn!("Failed to release assignment lease {}: {}", self.owner, e);
                }
            }
            Err(e) => tracing::warn!("Failed to release assignment lease {}: {}", self.owner, e),
        }
    }
}

/// Batch classifier from staged discoveries into the inventory
pub struct AutoAssignmentEngine {
    db: Database,
    rules: Vec<RuleSpec>,
    sentinels: Sentinels,
    lease_ttl: Duration,
}

impl AutoAssignmentEngine {
    /// Loads the rule table and resolves the "Unknown" sentinels.
    pub fn new(db: Database, config: &DiscoveryConfig) -> Result<Self> {
        let rules = load_rule_specs(config.rules_path.as_deref())?;
        Self::with_rules(db, config, rules)
    }

    pub fn with_rules(db: Database, config: &DiscoveryConfig, rules: Vec<RuleSpec>) -> Result<Self> {
        let sentinels = {
            let conn = db.lock()?;
            Sentinels::resolve(&conn, &config.unknown_department, &config.unknown_unit)?
        };

        Ok(Self {
            db,
            rules,
            sentinels,
            lease_ttl: Duration::seconds(config.assignment_lease_secs.max(1)),
        })
    }

    pub fn sentinels(&self) -> Sentinels {
        self.sentinels
    }

    pub fn run(&self) -> Result<AssignmentReport> {
        self.run_at(Utc::now()).map(AssignmentReport::from)
    }

    /// One classification pass at the given wall-clock time.
    ///
    /// Fails up front with [`Error::AssignmentInProgress`] if another run
    /// holds the lease.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<AssignmentSummary> {
        let _lease = RunLease::acquire(&self.db, self.lease_ttl, now)?;

        // Scoped so the connection is unlocked before the lease drops.
        let summary = {
            let conn = self.db.lock()?;
            self.classify_all(&conn, now)?
        };

        tracing::info!(
            "Auto-assignment finished: {} processed ({} matched, {} unknown, {} skipped), {} failed",
            summary.processed,
            summary.matched,
            summary.unknown,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    fn classify_all(&self, conn: &Connection, now: DateTime<Utc>) -> Result<AssignmentSummary> {
        let table = RuleTable::compile(conn, &self.rules)?;
        let mut summary = AssignmentSummary {
            rules_active: table.len(),
            rules_rejected: table.rejected().len(),
            ..AssignmentSummary::default()
        };
        let mut touched: HashSet<String> = HashSet::new();

        for record in pending_records(conn)? {
            touched.insert(record.ip_address.clone());
            match with_savepoint(conn, "assign_record", |conn| {
                self.assign_record(conn, &table, &record, now)
            }) {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::warn!("Auto-assignment failed for {}: {}", record.ip_address, e);
                    if let Err(mark_err) = mark_failed(conn, record.id, &e.to_string(), now) {
                        tracing::warn!(
                            "Could not mark discovery record {} failed: {}",
                            record.id,
                            mark_err
                        );
                    }
                    summary.fail(AssignmentFailure {
                        ip_address: record.ip_address.clone(),
                        record_id: Some(record.id),
                        device_id: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        for device in unclassified_devices(conn, &self.sentinels)? {
            if touched.contains(&device.ip_address) {
                continue;
            }
            match with_savepoint(conn, "assign_device", |conn| {
                self.reassign_device(conn, &table, &device, now)
            }) {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::warn!("Reclassification failed for device {}: {}", device.id, e);
                    summary.fail(AssignmentFailure {
                        ip_address: device.ip_address.clone(),
                        record_id: None,
                        device_id: Some(device.id),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Resolves targets; a missing side falls back to its sentinel
    fn classify(&self, table: &RuleTable, subject: &MatchSubject<'_>) -> (i64, i64, ItemOutcome) {
        match table.first_match(subject) {
            Some(rule) => {
                tracing::debug!("Rule '{}' matched {:?}", rule.name, subject.address);
                (
                    rule.department_id.unwrap_or(self.sentinels.department_id),
                    rule.unit_id.unwrap_or(self.sentinels.unit_id),
                    ItemOutcome::Matched,
                )
            }
            None => (
                self.sentinels.department_id,
                self.sentinels.unit_id,
                ItemOutcome::Unknown,
            ),
        }
    }

    fn assign_record(
        &self,
        conn: &Connection,
        table: &RuleTable,
        record: &DiscoveryRecord,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome> {
        if !record.is_alive {
            mark_processed(conn, record.id, now)?;
            return Ok(ItemOutcome::Skipped);
        }

        let existing = get_device_by_ip(conn, &record.ip_address)?;
        if let Some(device) = &existing
            && (!device.auto_assigned || !device.enabled)
        {
            tracing::debug!(
                "Device {} ({}) is manual or retired, leaving it untouched",
                device.id,
                device.ip_address
            );
            mark_processed(conn, record.id, now)?;
            return Ok(ItemOutcome::Skipped);
        }

        let info = record.system_info();
        let hostname = derive_hostname(&info, existing.as_ref(), &record.ip_address);
        let address = record.ip_address.parse::<Ipv4Addr>().ok();
        let subject = MatchSubject {
            hostname: Some(&hostname),
            address,
            info: &info,
        };
        let (department_id, unit_id, outcome) = self.classify(table, &subject);

        let draft = DeviceDraft {
            hostname,
            ip_address: record.ip_address.clone(),
            department_id,
            unit_id,
            is_alive: record.is_alive,
            snmp_available: record.snmp_available,
            info,
        };

        let outcome = match existing {
            None => {
                insert_discovered_device(conn, &draft, now)?;
                outcome
            }
            Some(device) => {
                if !update_discovered_device(conn, device.id, &draft, now)? {
                    ItemOutcome::Skipped
                } else {
                    // Rediscovery is a liveness observation; a flip is
                    // recorded the same way a ping records it.
                    if let Some(address) = address {
                        let seen = ProbeOutcome {
                            address,
                            is_alive: record.is_alive,
                            rtt_ms: record.response_time_ms.map(|ms| ms as u64),
                            error: None,
                        };
                        record_probe(conn, &device, seen, now)?;
                    }
                    outcome
                }
            }
        };

        mark_processed(conn, record.id, now)?;
        Ok(outcome)
    }

    fn reassign_device(
        &self,
        conn: &Connection,
        table: &RuleTable,
        device: &Device,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome> {
        let info = device.system_info();
        let subject = MatchSubject {
            hostname: Some(&device.hostname),
            address: device.ip_address.parse::<Ipv4Addr>().ok(),
            info: &info,
        };

        match self.classify(table, &subject) {
            (_, _, ItemOutcome::Unknown) => Ok(ItemOutcome::Unknown),
            (department_id, unit_id, outcome) => {
                if reclassify_device(conn, device.id, department_id, unit_id, now)? {
                    Ok(outcome)
                } else {
                    Ok(ItemOutcome::Skipped)
                }
            }
        }
    }

    /// Classification backlog counters
    pub fn stats(&self) -> Result<AssignmentStats> {
        let conn = self.db.lock()?;
        let (pending_records, pending_alive) = pending_counts(&conn)?;
        let counts = device_counts(&conn)?;
        let unclassified = unclassified_devices(&conn, &self.sentinels)?.len() as i64;

        Ok(AssignmentStats {
            pending_records,
            pending_alive,
            unclassified_devices: unclassified,
            manual_devices: counts.manual,
            auto_assigned_devices: counts.auto_assigned,
            total_devices: counts.total,
        })
    }
}

/// sysName, then the device's current hostname, then the address
fn derive_hostname(info: &SystemInfo, existing: Option<&Device>, ip_address: &str) -> String {
    info.sys_name
        .clone()
        .or_else(|| existing.map(|d| d.hostname.clone()))
        .unwrap_or_else(|| ip_address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{NewDiscovery, create_department, get_device, upsert_discovery};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap()
    }

    fn stage(db: &Database, ip: &str, alive: bool, descr: Option<&str>) -> i64 {
        let conn = db.lock().unwrap();
        upsert_discovery(
            &conn,
            &NewDiscovery {
                ip_address: ip.to_string(),
                is_alive: alive,
                snmp_available: descr.is_some(),
                response_time_ms: None,
                info: SystemInfo {
                    sys_descr: descr.map(str::to_string),
                    ..SystemInfo::default()
                },
            },
            now(),
        )
        .unwrap()
    }

    fn it_rule() -> RuleSpec {
        RuleSpec {
            name: "printers".to_string(),
            field: "sys_descr".to_string(),
            pattern: "LaserJet".to_string(),
            department: Some("IT".to_string()),
            unit: None,
            enabled: true,
        }
    }

    #[test]
    fn derive_hostname_prefers_sys_name() {
        let info = SystemInfo {
            sys_name: Some("edge-fw".to_string()),
            ..SystemInfo::default()
        };
        assert_eq!(derive_hostname(&info, None, "10.0.0.1"), "edge-fw");
        assert_eq!(derive_hostname(&SystemInfo::default(), None, "10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn matched_rule_keeps_sentinel_for_missing_side() {
        let db = Database::in_memory().unwrap();
        let it = create_department(&db.lock().unwrap(), "IT", None).unwrap();
        stage(&db, "10.3.0.1", true, Some("HP LaserJet 4200"));

        let engine =
            AutoAssignmentEngine::with_rules(db.clone(), &DiscoveryConfig::default(), vec![it_rule()])
                .unwrap();
        let summary = engine.run_at(now()).unwrap();
        assert_eq!((summary.processed, summary.matched), (1, 1));

        let conn = db.lock().unwrap();
        let device = get_device_by_ip(&conn, "10.3.0.1").unwrap().unwrap();
        assert_eq!(device.department_id, it);
        assert_eq!(device.unit_id, engine.sentinels().unit_id);
        assert!(device.auto_assigned);
    }

    #[test]
    fn dead_hosts_are_skipped_without_a_device() {
        let db = Database::in_memory().unwrap();
        let id = stage(&db, "10.3.0.2", false, None);

        let engine = AutoAssignmentEngine::with_rules(db.clone(), &DiscoveryConfig::default(), vec![])
            .unwrap();
        let summary = engine.run_at(now()).unwrap();
        assert_eq!((summary.processed, summary.skipped), (1, 1));

        let conn = db.lock().unwrap();
        assert!(get_device_by_ip(&conn, "10.3.0.2").unwrap().is_none());
        let record = crate::database::get_discovery(&conn, id).unwrap().unwrap();
        assert_eq!(record.discovery_status, crate::database::DiscoveryStatus::Processed);
    }

    #[test]
    fn unknown_devices_are_reclassified_when_a_rule_appears() {
        let db = Database::in_memory().unwrap();
        stage(&db, "10.3.0.3", true, Some("HP LaserJet 4200"));
        let config = DiscoveryConfig::default();

        let first = AutoAssignmentEngine::with_rules(db.clone(), &config, vec![]).unwrap();
        assert_eq!(first.run_at(now()).unwrap().unknown, 1);
        assert_eq!(first.stats().unwrap().unclassified_devices, 1);

        let it = create_department(&db.lock().unwrap(), "IT", None).unwrap();
        let second = AutoAssignmentEngine::with_rules(db.clone(), &config, vec![it_rule()]).unwrap();
        let summary = second.run_at(now()).unwrap();
        assert_eq!((summary.processed, summary.matched), (1, 1));

        let conn = db.lock().unwrap();
        let device = get_device_by_ip(&conn, "10.3.0.3").unwrap().unwrap();
        assert_eq!(device.department_id, it);
        let stale = get_device(&conn, device.id).unwrap().unwrap();
        assert_eq!(stale.hostname, "10.3.0.3");
    }

    #[test]
    fn held_lease_blocks_a_second_run() {
        let db = Database::in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            lease::try_acquire(&conn, ASSIGNMENT_LEASE, "other-host", Duration::minutes(10), now())
                .unwrap();
        }

        let engine = AutoAssignmentEngine::with_rules(db.clone(), &DiscoveryConfig::default(), vec![])
            .unwrap();
        assert!(matches!(
            engine.run_at(now() + Duration::minutes(1)),
            Err(Error::AssignmentInProgress { .. })
        ));

        // After expiry the run proceeds and releases its own lease.
        engine.run_at(now() + Duration::minutes(11)).unwrap();
        let conn = db.lock().unwrap();
        assert!(lease::current_holder(&conn, ASSIGNMENT_LEASE).unwrap().is_none());
    }
}
