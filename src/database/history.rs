//! Device liveness history
//!
//! Append-only: rows are inserted on an observed transition and never
//! updated. They are removed only by the device cascade.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use super::models::*;
use crate::error::{Error, Result};

fn map_history(row: &Row<'_>) -> rusqlite::Result<StatusHistoryRecord> {
    Ok(StatusHistoryRecord {
        id: row.get(0)?,
        device_id: row.get(1)?,
        old_status: parse_enum_column(row.get(2)?, 2)?,
        status: parse_enum_column(row.get(3)?, 3)?,
        changed_at: parse_datetime_column(row.get(4)?, 4)?,
    })
}

/// Appends one transition row. `status` must be a probed state.
pub fn insert_status_change(
    conn: &Connection,
    device_id: i64,
    old_status: LivenessState,
    status: LivenessState,
    changed_at: DateTime<Utc>,
) -> Result<i64> {
    if status == LivenessState::Unknown {
        return Err(Error::validation("a transition cannot end in the unknown state"));
    }

    conn.execute(
        r#"
        INSERT INTO device_status_history (device_id, old_status, status, changed_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![device_id, old_status.as_str(), status.as_str(), to_db_time(changed_at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Transitions of one device at or after `since`, oldest first
pub fn history_since(
    conn: &Connection,
    device_id: i64,
    since: DateTime<Utc>,
) -> Result<Vec<StatusHistoryRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, device_id, old_status, status, changed_at
        FROM device_status_history
        WHERE device_id = ?1 AND changed_at >= ?2
        ORDER BY changed_at ASC, id ASC
        "#,
    )?;
    let rows = stmt
        .query_map(params![device_id, to_db_time(since)], map_history)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Most recent transitions of one device, newest first
pub fn history_for_device(
    conn: &Connection,
    device_id: i64,
    limit: u32,
) -> Result<Vec<StatusHistoryRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, device_id, old_status, status, changed_at
        FROM device_status_history
        WHERE device_id = ?1
        ORDER BY changed_at DESC, id DESC
        LIMIT ?2
        "#,
    )?;
    let rows = stmt
        .query_map(params![device_id, limit], map_history)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{UNKNOWN_DEPARTMENT, UNKNOWN_UNIT};
    use crate::database::{Database, Sentinels, create_manual_device};
    use chrono::{Duration, TimeZone};

    fn setup(conn: &Connection) -> i64 {
        let sentinels = Sentinels::resolve(conn, UNKNOWN_DEPARTMENT, UNKNOWN_UNIT).unwrap();
        create_manual_device(
            conn,
            &ManualDevice {
                hostname: "ap-3".to_string(),
                ip_address: "10.2.0.3".to_string(),
                department_id: sentinels.department_id,
                unit_id: sentinels.unit_id,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn history_since_filters_by_window() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let device = setup(&conn);
        let base = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();

        insert_status_change(&conn, device, LivenessState::Unknown, LivenessState::Online, base).unwrap();
        insert_status_change(
            &conn,
            device,
            LivenessState::Online,
            LivenessState::Offline,
            base + Duration::days(3),
        )
        .unwrap();

        let recent = history_since(&conn, device, base + Duration::days(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].old_status, LivenessState::Online);
        assert_eq!(history_for_device(&conn, device, 10).unwrap().len(), 2);
    }

    #[test]
    fn transition_to_unknown_is_rejected() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let device = setup(&conn);
        let result = insert_status_change(
            &conn,
            device,
            LivenessState::Online,
            LivenessState::Unknown,
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
