//! Discovery staging queue
//!
//! One row per probed address. Rediscovery overwrites the row in a single
//! `INSERT ... ON CONFLICT` statement so overlapping scans cannot duplicate it.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use super::models::*;
use crate::error::{Error, Result};

/// Largest page a listing returns
pub const MAX_PAGE_SIZE: u32 = 500;

const RECORD_COLUMNS: &str = r#"
    id, ip_address, is_alive, snmp_available, response_time_ms,
    sys_descr, sys_name, sys_contact, sys_object_id, sys_location,
    discovery_status, discovered_at, error_message, created_at, updated_at
"#;

fn map_record(row: &Row<'_>) -> rusqlite::Result<DiscoveryRecord> {
    Ok(DiscoveryRecord {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        is_alive: row.get::<_, i32>(2)? == 1,
        snmp_available: row.get::<_, i32>(3)? == 1,
        response_time_ms: row.get(4)?,
        sys_descr: row.get(5)?,
        sys_name: row.get(6)?,
        sys_contact: row.get(7)?,
        sys_object_id: row.get(8)?,
        sys_location: row.get(9)?,
        discovery_status: parse_enum_column(row.get(10)?, 10)?,
        discovered_at: parse_datetime_column(row.get(11)?, 11)?,
        error_message: row.get(12)?,
        created_at: parse_datetime_column(row.get(13)?, 13)?,
        updated_at: parse_datetime_column(row.get(14)?, 14)?,
    })
}

/// Busy, locked and constraint failures are races with another writer
fn is_write_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::ConstraintViolation)
    )
}

fn upsert_once(conn: &Connection, record: &NewDiscovery, now: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        r#"
        INSERT INTO discovery_queue (
            ip_address, is_alive, snmp_available, response_time_ms,
            sys_descr, sys_name, sys_contact, sys_object_id, sys_location,
            discovery_status, discovered_at, error_message, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, NULL, ?10, ?10)
        ON CONFLICT(ip_address) DO UPDATE SET
            is_alive = excluded.is_alive,
            snmp_available = excluded.snmp_available,
            response_time_ms = excluded.response_time_ms,
            sys_descr = excluded.sys_descr,
            sys_name = excluded.sys_name,
            sys_contact = excluded.sys_contact,
            sys_object_id = excluded.sys_object_id,
            sys_location = excluded.sys_location,
            discovery_status = 'pending',
            discovered_at = excluded.discovered_at,
            error_message = NULL,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
        params![
            record.ip_address,
            record.is_alive as i32,
            record.snmp_available as i32,
            record.response_time_ms,
            record.info.sys_descr,
            record.info.sys_name,
            record.info.sys_contact,
            record.info.sys_object_id,
            record.info.sys_location,
            now,
        ],
        |row| row.get(0),
    )
}

/// Inserts or refreshes the staging row for `record.ip_address`.
///
/// The last writer's probe data wins and the row returns to `pending`. A
/// conflicting concurrent write is retried once before it is reported.
pub fn upsert_discovery(conn: &Connection, record: &NewDiscovery, now: DateTime<Utc>) -> Result<i64> {
    let now = to_db_time(now);

    match upsert_once(conn, record, &now) {
        Ok(id) => Ok(id),
        Err(e) if is_write_conflict(&e) => {
            tracing::debug!("Retrying staging upsert for {} after conflict: {}", record.ip_address, e);
            upsert_once(conn, record, &now).map_err(|e| {
                if is_write_conflict(&e) {
                    Error::PersistenceConflict {
                        key: record.ip_address.clone(),
                        reason: e.to_string(),
                    }
                } else {
                    Error::Database(e)
                }
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_discovery(conn: &Connection, id: i64) -> Result<Option<DiscoveryRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM discovery_queue WHERE id = ?1", RECORD_COLUMNS),
            params![id],
            map_record,
        )
        .optional()?;
    Ok(record)
}

pub fn get_discovery_by_ip(conn: &Connection, ip_address: &str) -> Result<Option<DiscoveryRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM discovery_queue WHERE ip_address = ?1", RECORD_COLUMNS),
            params![ip_address],
            map_record,
        )
        .optional()?;
    Ok(record)
}

/// Paged listing, newest discoveries first. `page` starts at 1.
pub fn list_by_status(
    conn: &Connection,
    status: Option<DiscoveryStatus>,
    page: u32,
    page_size: u32,
) -> Result<Page<DiscoveryRecord>> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let offset = i64::from(page - 1) * i64::from(page_size);
    let status = status.map(|s| s.as_str());

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM discovery_queue WHERE ?1 IS NULL OR discovery_status = ?1",
        params![status],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM discovery_queue
        WHERE ?1 IS NULL OR discovery_status = ?1
        ORDER BY discovered_at DESC, id DESC
        LIMIT ?2 OFFSET ?3
        "#,
        RECORD_COLUMNS
    ))?;

    let items = stmt
        .query_map(params![status, page_size, offset], map_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let size = i64::from(page_size);
    Ok(Page {
        items,
        page,
        page_size,
        total,
        total_pages: (total + size - 1) / size,
    })
}

/// All pending rows in arrival order
pub fn pending_records(conn: &Connection) -> Result<Vec<DiscoveryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM discovery_queue WHERE discovery_status = 'pending' ORDER BY id",
        RECORD_COLUMNS
    ))?;

    let records = stmt
        .query_map([], map_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn transition_from_pending(
    conn: &Connection,
    id: i64,
    target: DiscoveryStatus,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        r#"
        UPDATE discovery_queue
        SET discovery_status = ?2, error_message = ?3, updated_at = ?4
        WHERE id = ?1 AND discovery_status = 'pending'
        "#,
        params![id, target.as_str(), error_message, to_db_time(now)],
    )?;

    if changed == 1 {
        return Ok(());
    }

    match get_discovery(conn, id)? {
        None => Err(Error::NotFound {
            entity: "discovery record",
            id,
        }),
        Some(record) => Err(Error::InvalidTransition {
            id,
            current: record.discovery_status.to_string(),
            target: target.to_string(),
        }),
    }
}

/// pending → processed
pub fn mark_processed(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    transition_from_pending(conn, id, DiscoveryStatus::Processed, None, now)
}

/// pending → failed, keeping the reason
pub fn mark_failed(conn: &Connection, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
    transition_from_pending(conn, id, DiscoveryStatus::Failed, Some(error), now)
}

pub fn delete_record(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM discovery_queue WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(Error::NotFound {
            entity: "discovery record",
            id,
        });
    }
    Ok(())
}

/// Deletes rows discovered more than `days` ago. Pending rows are kept
/// regardless of age.
pub fn purge_older_than(conn: &Connection, days: u32, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = to_db_time(now - Duration::days(i64::from(days)));
    let deleted = conn.execute(
        r#"
        DELETE FROM discovery_queue
        WHERE discovered_at < ?1 AND discovery_status <> 'pending'
        "#,
        params![cutoff],
    )?;
    Ok(deleted)
}

/// Pending rows, and how many of those answered ICMP
pub fn pending_counts(conn: &Connection) -> Result<(i64, i64)> {
    let counts = conn.query_row(
        r#"
        SELECT COUNT(*), COALESCE(SUM(is_alive = 1), 0)
        FROM discovery_queue
        WHERE discovery_status = 'pending'
        "#,
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

/// Counters by status, liveness, SNMP availability and recent activity
pub fn queue_stats(conn: &Connection, recent_since: DateTime<Utc>) -> Result<QueueStats> {
    let stats = conn.query_row(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(discovery_status = 'pending'), 0),
            COALESCE(SUM(discovery_status = 'processed'), 0),
            COALESCE(SUM(discovery_status = 'failed'), 0),
            COALESCE(SUM(is_alive = 1), 0),
            COALESCE(SUM(is_alive = 0), 0),
            COALESCE(SUM(snmp_available = 1), 0),
            COALESCE(SUM(discovered_at >= ?1), 0)
        FROM discovery_queue
        "#,
        params![to_db_time(recent_since)],
        |row| {
            Ok(QueueStats {
                total: row.get(0)?,
                pending: row.get(1)?,
                processed: row.get(2)?,
                failed: row.get(3)?,
                alive: row.get(4)?,
                dead: row.get(5)?,
                snmp_available: row.get(6)?,
                recent: row.get(7)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::scanner::SystemInfo;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn finding(ip: &str, alive: bool) -> NewDiscovery {
        NewDiscovery {
            ip_address: ip.to_string(),
            is_alive: alive,
            snmp_available: alive,
            response_time_ms: alive.then_some(4),
            info: SystemInfo {
                sys_descr: alive.then(|| "Cisco IOS".to_string()),
                ..SystemInfo::default()
            },
        }
    }

    #[test]
    fn upsert_updates_existing_row_instead_of_duplicating() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();

        let first = upsert_discovery(&conn, &finding("10.0.0.5", true), at(1)).unwrap();
        mark_processed(&conn, first, at(1)).unwrap();
        let second = upsert_discovery(&conn, &finding("10.0.0.5", false), at(2)).unwrap();

        assert_eq!(first, second);
        let stats = queue_stats(&conn, at(1)).unwrap();
        assert_eq!(stats.total, 1);

        let record = get_discovery(&conn, first).unwrap().unwrap();
        assert!(!record.is_alive);
        assert_eq!(record.sys_descr, None);
        assert_eq!(record.discovered_at, at(2));
        assert_eq!(record.created_at, at(1));
        // A fresh discovery puts the row back in the queue.
        assert_eq!(record.discovery_status, DiscoveryStatus::Pending);
    }

    #[test]
    fn status_only_leaves_pending_once() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let id = upsert_discovery(&conn, &finding("10.0.0.6", true), at(1)).unwrap();

        mark_failed(&conn, id, "snmp walk aborted", at(1)).unwrap();
        let record = get_discovery(&conn, id).unwrap().unwrap();
        assert_eq!(record.discovery_status, DiscoveryStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("snmp walk aborted"));

        assert!(matches!(
            mark_processed(&conn, id, at(1)),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            mark_processed(&conn, 999, at(1)),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn purge_never_deletes_pending_rows() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();

        let processed = upsert_discovery(&conn, &finding("10.0.0.1", true), at(1)).unwrap();
        mark_processed(&conn, processed, at(1)).unwrap();
        upsert_discovery(&conn, &finding("10.0.0.2", true), at(1)).unwrap();
        let fresh = upsert_discovery(&conn, &finding("10.0.0.3", true), at(9)).unwrap();
        mark_processed(&conn, fresh, at(9)).unwrap();

        let deleted = purge_older_than(&conn, 7, at(11)).unwrap();

        assert_eq!(deleted, 1);
        assert!(get_discovery(&conn, processed).unwrap().is_none());
        assert!(get_discovery_by_ip(&conn, "10.0.0.2").unwrap().is_some());
        assert!(get_discovery(&conn, fresh).unwrap().is_some());
    }

    #[test]
    fn list_by_status_pages_newest_first() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        for day in 1..=5 {
            upsert_discovery(&conn, &finding(&format!("10.0.0.{day}"), true), at(day)).unwrap();
        }
        let done = get_discovery_by_ip(&conn, "10.0.0.5").unwrap().unwrap();
        mark_processed(&conn, done.id, at(5)).unwrap();

        let page = list_by_status(&conn, Some(DiscoveryStatus::Pending), 1, 3).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.items[0].ip_address, "10.0.0.4");

        let second = list_by_status(&conn, Some(DiscoveryStatus::Pending), 2, 3).unwrap();
        assert_eq!(second.items.len(), 1);

        let all = list_by_status(&conn, None, 0, 0).unwrap();
        assert_eq!((all.page, all.page_size, all.total), (1, 1, 5));
    }

    #[test]
    fn stats_on_empty_queue_are_zero() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        assert_eq!(queue_stats(&conn, at(1)).unwrap(), QueueStats::default());
    }

    #[test]
    fn stats_count_every_dimension() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        upsert_discovery(&conn, &finding("10.0.0.1", true), at(1)).unwrap();
        let dead = upsert_discovery(&conn, &finding("10.0.0.2", false), at(5)).unwrap();
        mark_failed(&conn, dead, "unreachable", at(5)).unwrap();

        let stats = queue_stats(&conn, at(4)).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!((stats.pending, stats.processed, stats.failed), (1, 0, 1));
        assert_eq!((stats.alive, stats.dead, stats.snmp_available), (1, 1, 1));
        assert_eq!(stats.recent, 1);
    }

    #[test]
    fn delete_record_reports_missing_rows() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let id = upsert_discovery(&conn, &finding("10.0.0.1", true), at(1)).unwrap();
        delete_record(&conn, id).unwrap();
        assert!(matches!(delete_record(&conn, id), Err(Error::NotFound { .. })));
    }
}
