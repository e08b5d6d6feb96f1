//! Database schema definitions
//!
//! Creates and manages the SQLite tables

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::config::{UNKNOWN_DEPARTMENT, UNKNOWN_UNIT};

/// Create all database tables and seed the "Unknown" classification rows
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Classification targets
        CREATE TABLE IF NOT EXISTS departments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            code TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS equipment_units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            code TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Staging queue: one row per probed address
        CREATE TABLE IF NOT EXISTS discovery_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ip_address TEXT UNIQUE NOT NULL,
            is_alive INTEGER NOT NULL DEFAULT 0,
            snmp_available INTEGER NOT NULL DEFAULT 0,
            response_time_ms INTEGER,
            sys_descr TEXT,
            sys_name TEXT,
            sys_contact TEXT,
            sys_object_id TEXT,
            sys_location TEXT,
            discovery_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (discovery_status IN ('pending', 'processed', 'failed')),
            discovered_at TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Inventory devices; classification columns are never NULL
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hostname TEXT NOT NULL,
            ip_address TEXT UNIQUE NOT NULL,
            department_id INTEGER NOT NULL REFERENCES departments(id),
            unit_id INTEGER NOT NULL REFERENCES equipment_units(id),
            auto_assigned INTEGER NOT NULL DEFAULT 0,
            is_alive INTEGER,
            last_seen TEXT,
            snmp_available INTEGER NOT NULL DEFAULT 0,
            sys_descr TEXT,
            sys_name TEXT,
            sys_contact TEXT,
            sys_object_id TEXT,
            sys_location TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only liveness transitions
        CREATE TABLE IF NOT EXISTS device_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            old_status TEXT NOT NULL CHECK (old_status IN ('unknown', 'online', 'offline')),
            status TEXT NOT NULL CHECK (status IN ('online', 'offline')),
            changed_at TEXT NOT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
        );

        -- Named run leases with expiry
        CREATE TABLE IF NOT EXISTS run_leases (
            name TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_queue_status ON discovery_queue(discovery_status);
        CREATE INDEX IF NOT EXISTS idx_queue_discovered ON discovery_queue(discovered_at);
        CREATE INDEX IF NOT EXISTS idx_devices_classification ON devices(auto_assigned, department_id, unit_id);
        CREATE INDEX IF NOT EXISTS idx_history_device_time ON device_status_history(device_id, changed_at);
        "#,
    )
    .context("Failed to create database tables")?;

    seed_sentinels(conn, UNKNOWN_DEPARTMENT, UNKNOWN_UNIT)?;

    Ok(())
}

/// Inserts the reserved "Unknown" department and unit if absent
pub fn seed_sentinels(conn: &Connection, department: &str, unit: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO departments (name, code) VALUES (?1, 'UNKNOWN')",
        params![department],
    )
    .context("Failed to seed unknown department")?;
    conn.execute(
        "INSERT OR IGNORE INTO equipment_units (name, code) VALUES (?1, 'UNKNOWN')",
        params![unit],
    )
    .context("Failed to seed unknown equipment unit")?;
    Ok(())
}
