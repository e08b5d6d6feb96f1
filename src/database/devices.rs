//! Device inventory and classification targets
//!
//! Writes issued on behalf of auto-assignment carry an
//! `auto_assigned = 1 AND enabled = 1` guard, so a device taken over by
//! manual classification or retired between read and write is left alone.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::error::{Error, Result};
use crate::network::parse_single_address;

const DEVICE_COLUMNS: &str = r#"
    id, hostname, ip_address, department_id, unit_id, auto_assigned,
    is_alive, last_seen, snmp_available,
    sys_descr, sys_name, sys_contact, sys_object_id, sys_location,
    enabled, created_at, updated_at
"#;

fn map_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    let is_alive: Option<i32> = row.get(6)?;
    Ok(Device {
        id: row.get(0)?,
        hostname: row.get(1)?,
        ip_address: row.get(2)?,
        department_id: row.get(3)?,
        unit_id: row.get(4)?,
        auto_assigned: row.get::<_, i32>(5)? == 1,
        liveness: LivenessState::from_alive(is_alive.map(|v| v == 1)),
        last_seen: parse_optional_datetime_column(row.get(7)?, 7)?,
        snmp_available: row.get::<_, i32>(8)? == 1,
        sys_descr: row.get(9)?,
        sys_name: row.get(10)?,
        sys_contact: row.get(11)?,
        sys_object_id: row.get(12)?,
        sys_location: row.get(13)?,
        enabled: row.get::<_, i32>(14)? == 1,
        created_at: parse_datetime_column(row.get(15)?, 15)?,
        updated_at: parse_datetime_column(row.get(16)?, 16)?,
    })
}

// ============================================================================
// Departments and equipment units
// ============================================================================

/// IDs of the reserved "Unknown" department and unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinels {
    pub department_id: i64,
    pub unit_id: i64,
}

impl Sentinels {
    /// Looks up both sentinel rows by name. Either missing is fatal.
    pub fn resolve(conn: &Connection, department: &str, unit: &str) -> Result<Self> {
        let department_id = find_department(conn, department)?
            .ok_or_else(|| Error::MissingSentinel {
                kind: "department",
                name: department.to_string(),
            })?
            .id;
        let unit_id = find_unit(conn, unit)?
            .ok_or_else(|| Error::MissingSentinel {
                kind: "equipment unit",
                name: unit.to_string(),
            })?
            .id;

        Ok(Self {
            department_id,
            unit_id,
        })
    }

    /// True if either side of the classification is still unresolved
    pub fn is_unclassified(&self, department_id: i64, unit_id: i64) -> bool {
        department_id == self.department_id || unit_id == self.unit_id
    }
}

fn find_category(conn: &Connection, table: &str, name: &str) -> Result<Option<Category>> {
    let category = conn
        .query_row(
            &format!("SELECT id, name, code FROM {} WHERE name = ?1", table),
            params![name],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    code: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(category)
}

fn category_exists(conn: &Connection, table: &str, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(&format!("SELECT id FROM {} WHERE id = ?1", table), params![id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

pub fn find_department(conn: &Connection, name: &str) -> Result<Option<Category>> {
    find_category(conn, "departments", name)
}

pub fn find_unit(conn: &Connection, name: &str) -> Result<Option<Category>> {
    find_category(conn, "equipment_units", name)
}

pub fn create_department(conn: &Connection, name: &str, code: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO departments (name, code) VALUES (?1, ?2)",
        params![name, code],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn create_unit(conn: &Connection, name: &str, code: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO equipment_units (name, code) VALUES (?1, ?2)",
        params![name, code],
    )?;
    Ok(conn.last_insert_rowid())
}

fn ensure_targets_exist(conn: &Connection, department_id: i64, unit_id: i64) -> Result<()> {
    if !category_exists(conn, "departments", department_id)? {
        return Err(Error::NotFound {
            entity: "department",
            id: department_id,
        });
    }
    if !category_exists(conn, "equipment_units", unit_id)? {
        return Err(Error::NotFound {
            entity: "equipment unit",
            id: unit_id,
        });
    }
    Ok(())
}

// ============================================================================
// Devices
// ============================================================================

pub fn get_device(conn: &Connection, id: i64) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
            params![id],
            map_device,
        )
        .optional()?;
    Ok(device)
}

pub fn get_device_by_ip(conn: &Connection, ip_address: &str) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            &format!("SELECT {} FROM devices WHERE ip_address = ?1", DEVICE_COLUMNS),
            params![ip_address],
            map_device,
        )
        .optional()?;
    Ok(device)
}

pub fn list_enabled_devices(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM devices WHERE enabled = 1 ORDER BY id",
        DEVICE_COLUMNS
    ))?;
    let devices = stmt
        .query_map([], map_device)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(devices)
}

/// Enabled auto-assigned devices still sitting in an "Unknown" bucket
pub fn unclassified_devices(conn: &Connection, sentinels: &Sentinels) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM devices
        WHERE auto_assigned = 1 AND enabled = 1
          AND (department_id = ?1 OR unit_id = ?2)
        ORDER BY id
        "#,
        DEVICE_COLUMNS
    ))?;
    let devices = stmt
        .query_map(params![sentinels.department_id, sentinels.unit_id], map_device)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(devices)
}

/// Creates a manually classified device
pub fn create_manual_device(conn: &Connection, device: &ManualDevice, now: DateTime<Utc>) -> Result<i64> {
    let hostname = device.hostname.trim();
    if hostname.is_empty() {
        return Err(Error::validation("hostname must not be empty"));
    }
    let ip = parse_single_address(&device.ip_address)?;
    ensure_targets_exist(conn, device.department_id, device.unit_id)?;

    let now = to_db_time(now);
    conn.execute(
        r#"
        INSERT INTO devices (
            hostname, ip_address, department_id, unit_id, auto_assigned,
            enabled, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?5)
        "#,
        params![hostname, ip.to_string(), device.department_id, device.unit_id, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Sets the classification by hand. The device is excluded from
/// auto-assignment from then on.
pub fn set_manual_classification(
    conn: &Connection,
    id: i64,
    department_id: i64,
    unit_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_targets_exist(conn, department_id, unit_id)?;

    let changed = conn.execute(
        r#"
        UPDATE devices
        SET department_id = ?2, unit_id = ?3, auto_assigned = 0, updated_at = ?4
        WHERE id = ?1
        "#,
        params![id, department_id, unit_id, to_db_time(now)],
    )?;
    if changed == 0 {
        return Err(Error::NotFound { entity: "device", id });
    }
    Ok(())
}

/// Soft-retires a device; history is kept
pub fn retire_device(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE devices SET enabled = 0, updated_at = ?2 WHERE id = ?1",
        params![id, to_db_time(now)],
    )?;
    if changed == 0 {
        return Err(Error::NotFound { entity: "device", id });
    }
    Ok(())
}

/// Inserts a device created from a staged discovery
pub fn insert_discovered_device(conn: &Connection, draft: &DeviceDraft, now: DateTime<Utc>) -> Result<i64> {
    let now = to_db_time(now);
    let last_seen = draft.is_alive.then_some(now.as_str());

    conn.execute(
        r#"
        INSERT INTO devices (
            hostname, ip_address, department_id, unit_id, auto_assigned,
            is_alive, last_seen, snmp_available,
            sys_descr, sys_name, sys_contact, sys_object_id, sys_location,
            enabled, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13)
        "#,
        params![
            draft.hostname,
            draft.ip_address,
            draft.department_id,
            draft.unit_id,
            draft.is_alive as i32,
            last_seen,
            draft.snmp_available as i32,
            draft.info.sys_descr,
            draft.info.sys_name,
            draft.info.sys_contact,
            draft.info.sys_object_id,
            draft.info.sys_location,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Refreshes metadata and classification of an auto-assigned device from a
/// staged discovery. Liveness is left alone; transitions go through
/// [`set_liveness_if`] so each one gets a history row.
///
/// Returns false if the device is manual or retired.
pub fn update_discovered_device(
    conn: &Connection,
    id: i64,
    draft: &DeviceDraft,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now = to_db_time(now);
    let changed = conn.execute(
        r#"
        UPDATE devices SET
            hostname = ?2,
            department_id = ?3,
            unit_id = ?4,
            snmp_available = ?5,
            sys_descr = ?6,
            sys_name = ?7,
            sys_contact = ?8,
            sys_object_id = ?9,
            sys_location = ?10,
            updated_at = ?11
        WHERE id = ?1 AND auto_assigned = 1 AND enabled = 1
        "#,
        params![
            id,
            draft.hostname,
            draft.department_id,
            draft.unit_id,
            draft.snmp_available as i32,
            draft.info.sys_descr,
            draft.info.sys_name,
            draft.info.sys_contact,
            draft.info.sys_object_id,
            draft.info.sys_location,
            now,
        ],
    )?;
    Ok(changed == 1)
}

/// Moves an auto-assigned device to new classification targets.
///
/// Returns false if the device is manual or retired.
pub fn reclassify_device(
    conn: &Connection,
    id: i64,
    department_id: i64,
    unit_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        r#"
        UPDATE devices SET department_id = ?2, unit_id = ?3, updated_at = ?4
        WHERE id = ?1 AND auto_assigned = 1 AND enabled = 1
        "#,
        params![id, department_id, unit_id, to_db_time(now)],
    )?;
    Ok(changed == 1)
}

/// Compare-and-set on the stored liveness.
///
/// Writes `is_alive` only if it still equals `expected`. Returns false when
/// another writer got there first.
pub fn set_liveness_if(
    conn: &Connection,
    id: i64,
    expected: LivenessState,
    is_alive: bool,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now = to_db_time(now);
    let changed = conn.execute(
        r#"
        UPDATE devices SET is_alive = ?3, last_seen = ?4, updated_at = ?4
        WHERE id = ?1 AND is_alive IS ?2
        "#,
        params![id, expected.as_alive().map(|v| v as i32), is_alive as i32, now],
    )?;
    Ok(changed == 1)
}

/// Records a probe that confirmed the stored state
pub fn touch_last_seen(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE devices SET last_seen = ?2 WHERE id = ?1",
        params![id, to_db_time(now)],
    )?;
    Ok(())
}

pub fn device_counts(conn: &Connection) -> Result<DeviceCounts> {
    let counts = conn.query_row(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(enabled = 1), 0),
            COALESCE(SUM(enabled = 1 AND is_alive = 1), 0),
            COALESCE(SUM(enabled = 1 AND is_alive = 0), 0),
            COALESCE(SUM(enabled = 1 AND is_alive IS NULL), 0),
            COALESCE(SUM(auto_assigned = 1), 0),
            COALESCE(SUM(auto_assigned = 0), 0)
        FROM devices
        "#,
        [],
        |row| {
            Ok(DeviceCounts {
                total: row.get(0)?,
                enabled: row.get(1)?,
                online: row.get(2)?,
                offline: row.get(3)?,
                unknown: row.get(4)?,
                auto_assigned: row.get(5)?,
                manual: row.get(6)?,
            })
        },
    )?;
    Ok(counts)
}
