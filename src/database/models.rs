//! Database models
//!
//! Structs for database records with serialization support

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scanner::SystemInfo;

/// Storage format for timestamps (UTC)
pub const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Staging queue status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    Pending,
    Processed,
    Failed,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Processed => "processed",
            DiscoveryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiscoveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DiscoveryStatus::Pending),
            "processed" => Ok(DiscoveryStatus::Processed),
            "failed" => Ok(DiscoveryStatus::Failed),
            _ => Err(format!("Unknown discovery status: {}", s)),
        }
    }
}

/// Device liveness state. `Unknown` until the first probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    Unknown,
    Online,
    Offline,
}

impl LivenessState {
    pub fn from_alive(is_alive: Option<bool>) -> Self {
        match is_alive {
            None => LivenessState::Unknown,
            Some(true) => LivenessState::Online,
            Some(false) => LivenessState::Offline,
        }
    }

    pub fn as_alive(&self) -> Option<bool> {
        match self {
            LivenessState::Unknown => None,
            LivenessState::Online => Some(true),
            LivenessState::Offline => Some(false),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessState::Unknown => "unknown",
            LivenessState::Online => "online",
            LivenessState::Offline => "offline",
        }
    }
}

impl std::fmt::Display for LivenessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LivenessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(LivenessState::Unknown),
            "online" => Ok(LivenessState::Online),
            "offline" => Ok(LivenessState::Offline),
            _ => Err(format!("Unknown liveness state: {}", s)),
        }
    }
}

/// Staged probe result awaiting classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryRecord {
    pub id: i64,
    pub ip_address: String,
    pub is_alive: bool,
    pub snmp_available: bool,
    pub response_time_ms: Option<i64>,
    pub sys_descr: Option<String>,
    pub sys_name: Option<String>,
    pub sys_contact: Option<String>,
    pub sys_object_id: Option<String>,
    pub sys_location: Option<String>,
    pub discovery_status: DiscoveryStatus,
    pub discovered_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscoveryRecord {
    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            sys_descr: self.sys_descr.clone(),
            sys_object_id: self.sys_object_id.clone(),
            sys_contact: self.sys_contact.clone(),
            sys_name: self.sys_name.clone(),
            sys_location: self.sys_location.clone(),
        }
    }
}

/// Probe data written by a staging upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDiscovery {
    pub ip_address: String,
    pub is_alive: bool,
    pub snmp_available: bool,
    pub response_time_ms: Option<i64>,
    pub info: SystemInfo,
}

/// Inventory device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: i64,
    pub hostname: String,
    pub ip_address: String,
    pub department_id: i64,
    pub unit_id: i64,
    pub auto_assigned: bool,
    pub liveness: LivenessState,
    pub last_seen: Option<DateTime<Utc>>,
    pub snmp_available: bool,
    pub sys_descr: Option<String>,
    pub sys_name: Option<String>,
    pub sys_contact: Option<String>,
    pub sys_object_id: Option<String>,
    pub sys_location: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            sys_descr: self.sys_descr.clone(),
            sys_object_id: self.sys_object_id.clone(),
            sys_contact: self.sys_contact.clone(),
            sys_name: self.sys_name.clone(),
            sys_location: self.sys_location.clone(),
        }
    }
}

/// Fields the classifier writes when it creates or refreshes a device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDraft {
    pub hostname: String,
    pub ip_address: String,
    pub department_id: i64,
    pub unit_id: i64,
    pub is_alive: bool,
    pub snmp_available: bool,
    pub info: SystemInfo,
}

/// Manually entered device
#[derive(Debug, Clone, PartialEq)]
pub struct ManualDevice {
    pub hostname: String,
    pub ip_address: String,
    pub department_id: i64,
    pub unit_id: i64,
}

/// One liveness transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryRecord {
    pub id: i64,
    pub device_id: i64,
    pub old_status: LivenessState,
    pub status: LivenessState,
    pub changed_at: DateTime<Utc>,
}

/// Classification target (department or equipment unit)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// Staging store counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processed: i64,
    pub failed: i64,
    pub alive: i64,
    pub dead: i64,
    pub snmp_available: i64,
    pub recent: i64,
}

/// Device inventory counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCounts {
    pub total: i64,
    pub enabled: i64,
    pub online: i64,
    pub offline: i64,
    pub unknown: i64,
    pub auto_assigned: i64,
    pub manual: i64,
}

/// Formats a timestamp for storage
pub fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Helper: Parse SQLite datetime string to chrono DateTime
pub(crate) fn parse_datetime_column(s: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(&s, DB_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_optional_datetime_column(
    s: Option<String>,
    column: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|raw| parse_datetime_column(raw, column)).transpose()
}

pub(crate) fn parse_enum_column<T>(s: String, column: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}
