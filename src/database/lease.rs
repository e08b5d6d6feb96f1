//! Named run leases
//!
//! A lease is a row in `run_leases` that expires on its own, so a crashed
//! holder blocks others for at most one TTL. Acquisition is a single
//! conditional upsert and works across processes sharing the database file.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{parse_datetime_column, to_db_time};
use crate::error::Result;

/// Current holder of a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHolder {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Takes `name` for `owner` unless an unexpired lease is held by someone else.
///
/// Returns `Ok(None)` on success and the current holder otherwise.
pub fn try_acquire(
    conn: &Connection,
    name: &str,
    owner: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Option<LeaseHolder>> {
    let acquired = conn.execute(
        r#"
        INSERT INTO run_leases (name, owner, acquired_at, expires_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(name) DO UPDATE SET
            owner = excluded.owner,
            acquired_at = excluded.acquired_at,
            expires_at = excluded.expires_at
        WHERE run_leases.expires_at <= excluded.acquired_at
           OR run_leases.owner = excluded.owner
        "#,
        params![name, owner, to_db_time(now), to_db_time(now + ttl)],
    )?;

    if acquired == 1 {
        return Ok(None);
    }
    current_holder(conn, name)
}

/// Gives the lease back. Only the owner can release it.
pub fn release(conn: &Connection, name: &str, owner: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM run_leases WHERE name = ?1 AND owner = ?2",
        params![name, owner],
    )?;
    Ok(deleted == 1)
}

pub fn current_holder(conn: &Connection, name: &str) -> Result<Option<LeaseHolder>> {
    let holder = conn
        .query_row(
            "SELECT owner, acquired_at, expires_at FROM run_leases WHERE name = ?1",
            params![name],
            |row| {
                Ok(LeaseHolder {
                    owner: row.get(0)?,
                    acquired_at: parse_datetime_column(row.get(1)?, 1)?,
                    expires_at: parse_datetime_column(row.get(2)?, 2)?,
                })
            },
        )
        .optional()?;
    Ok(holder)
}
