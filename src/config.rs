//! Configuration constants and runtime overrides for discovery and monitoring

use std::path::PathBuf;
use std::time::Duration;

/// Maximum concurrent ICMP probes per scan
pub const MAX_CONCURRENT_PINGS: usize = 50;

/// Timeout for each ICMP echo request
pub const PING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Echo attempts per host before declaring it unreachable
pub const PING_RETRIES: u8 = 2;

/// Maximum hosts a single range may expand to (a /22 worth of hosts)
pub const MAX_SCAN_HOSTS: usize = 1022;

/// Overall budget for one subnet scan
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(300);

// ====== SNMP Configuration ======

/// Query SNMP on hosts that answer ICMP
pub const SNMP_ENABLED: bool = true;

/// SNMP community string for v2c
pub const SNMP_COMMUNITY: &str = "public";

/// Timeout for each SNMP GET
pub const SNMP_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempts per agent before recording it as unavailable
pub const SNMP_RETRIES: u8 = 1;

/// SNMP port
pub const SNMP_PORT: u16 = 161;

/// Maximum concurrent SNMP sessions
pub const MAX_CONCURRENT_SNMP: usize = 20;

// ====== Staging / Classification ======

/// Window used by "recent discoveries" counters
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// Lifetime of the auto-assignment run lease
pub const ASSIGNMENT_LEASE_SECS: i64 = 600;

/// Reserved department used when no rule matches
pub const UNKNOWN_DEPARTMENT: &str = "Unknown";

/// Reserved equipment unit used when no rule matches
pub const UNKNOWN_UNIT: &str = "Unknown";

// ====== Monitoring Configuration ======

/// Default monitoring interval in seconds
pub const DEFAULT_MONITOR_INTERVAL: u64 = 300;

/// Minimum monitoring interval in seconds
pub const MIN_MONITOR_INTERVAL: u64 = 10;

/// Maximum monitoring interval in seconds
pub const MAX_MONITOR_INTERVAL: u64 = 86_400;

/// Default trailing window for ping statistics
pub const DEFAULT_PING_STATS_DAYS: i64 = 7;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match env_var(name).and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    match env_var(name).and_then(|v| v.parse::<usize>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u16(name: &str, default: u16, min: u16, max: u16) -> u16 {
    match env_var(name).and_then(|v| v.parse::<u16>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u8(name: &str, default: u8, min: u8, max: u8) -> u8 {
    match env_var(name).and_then(|v| v.parse::<u8>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_i64(name: &str, default: i64, min: i64, max: i64) -> i64 {
    match env_var(name).and_then(|v| v.parse::<i64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_bool(name: &str, default: bool) -> bool {
    match env_var(name) {
        Some(value) => {
            let normalized = value.to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        }
        None => default,
    }
}

/// Env: `ASSETSCAN_MAX_CONCURRENT_PINGS`
pub fn max_concurrent_pings() -> usize {
    env_parse_usize("ASSETSCAN_MAX_CONCURRENT_PINGS", MAX_CONCURRENT_PINGS, 1, 1024)
}

/// Env: `ASSETSCAN_PING_TIMEOUT_MS`
pub fn ping_timeout() -> Duration {
    Duration::from_millis(env_parse_u64(
        "ASSETSCAN_PING_TIMEOUT_MS",
        PING_TIMEOUT.as_millis() as u64,
        50,
        10_000,
    ))
}

/// Env: `ASSETSCAN_PING_RETRIES`
pub fn ping_retries() -> u8 {
    env_parse_u8("ASSETSCAN_PING_RETRIES", PING_RETRIES, 1, 5)
}

/// Env: `ASSETSCAN_MAX_SCAN_HOSTS`
pub fn max_scan_hosts() -> usize {
    env_parse_usize("ASSETSCAN_MAX_SCAN_HOSTS", MAX_SCAN_HOSTS, 1, 65_534)
}

/// Env: `ASSETSCAN_SCAN_TIMEOUT_SECS`
pub fn scan_timeout() -> Duration {
    Duration::from_secs(env_parse_u64(
        "ASSETSCAN_SCAN_TIMEOUT_SECS",
        SCAN_TIMEOUT.as_secs(),
        5,
        86_400,
    ))
}

/// Env: `ASSETSCAN_SNMP_ENABLED`
pub fn snmp_enabled() -> bool {
    env_parse_bool("ASSETSCAN_SNMP_ENABLED", SNMP_ENABLED)
}

/// Env: `ASSETSCAN_SNMP_COMMUNITY`
pub fn snmp_community() -> String {
    env_var("ASSETSCAN_SNMP_COMMUNITY").unwrap_or_else(|| SNMP_COMMUNITY.to_string())
}

/// Env: `ASSETSCAN_SNMP_TIMEOUT_MS`
pub fn snmp_timeout() -> Duration {
    Duration::from_millis(env_parse_u64(
        "ASSETSCAN_SNMP_TIMEOUT_MS",
        SNMP_TIMEOUT.as_millis() as u64,
        100,
        10_000,
    ))
}

/// Env: `ASSETSCAN_SNMP_RETRIES`
pub fn snmp_retries() -> u8 {
    env_parse_u8("ASSETSCAN_SNMP_RETRIES", SNMP_RETRIES, 1, 5)
}

/// Env: `ASSETSCAN_SNMP_PORT`
pub fn snmp_port() -> u16 {
    env_parse_u16("ASSETSCAN_SNMP_PORT", SNMP_PORT, 1, u16::MAX)
}

/// Env: `ASSETSCAN_MAX_CONCURRENT_SNMP`
pub fn max_concurrent_snmp() -> usize {
    env_parse_usize("ASSETSCAN_MAX_CONCURRENT_SNMP", MAX_CONCURRENT_SNMP, 1, 256)
}

/// Env: `ASSETSCAN_RECENT_WINDOW_HOURS`
pub fn recent_window_hours() -> i64 {
    env_parse_i64("ASSETSCAN_RECENT_WINDOW_HOURS", RECENT_WINDOW_HOURS, 1, 24 * 365)
}

/// Env: `ASSETSCAN_ASSIGNMENT_LEASE_SECS`
pub fn assignment_lease_secs() -> i64 {
    env_parse_i64(
        "ASSETSCAN_ASSIGNMENT_LEASE_SECS",
        ASSIGNMENT_LEASE_SECS,
        10,
        86_400,
    )
}

/// Path of the JSON classification rule table, if configured.
/// Env: `ASSETSCAN_RULES_PATH`
pub fn rules_path() -> Option<PathBuf> {
    env_var("ASSETSCAN_RULES_PATH").map(PathBuf::from)
}

/// Env: `ASSETSCAN_DB_PATH`
pub fn database_path() -> Option<PathBuf> {
    env_var("ASSETSCAN_DB_PATH").map(PathBuf::from)
}

/// Env: `ASSETSCAN_UNKNOWN_DEPARTMENT`
pub fn unknown_department() -> String {
    env_var("ASSETSCAN_UNKNOWN_DEPARTMENT").unwrap_or_else(|| UNKNOWN_DEPARTMENT.to_string())
}

/// Env: `ASSETSCAN_UNKNOWN_UNIT`
pub fn unknown_unit() -> String {
    env_var("ASSETSCAN_UNKNOWN_UNIT").unwrap_or_else(|| UNKNOWN_UNIT.to_string())
}

/// Env: `ASSETSCAN_DEFAULT_MONITOR_INTERVAL`
pub fn default_monitor_interval() -> u64 {
    env_parse_u64(
        "ASSETSCAN_DEFAULT_MONITOR_INTERVAL",
        DEFAULT_MONITOR_INTERVAL,
        MIN_MONITOR_INTERVAL,
        MAX_MONITOR_INTERVAL,
    )
}

/// ICMP prober settings
#[derive(Debug, Clone)]
pub struct PingSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    pub retries: u8,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            concurrency: MAX_CONCURRENT_PINGS,
            timeout: PING_TIMEOUT,
            retries: PING_RETRIES,
        }
    }
}

/// SNMP prober settings
#[derive(Debug, Clone)]
pub struct SnmpSettings {
    pub enabled: bool,
    pub community: String,
    pub port: u16,
    pub timeout: Duration,
    pub retries: u8,
    pub concurrency: usize,
}

impl Default for SnmpSettings {
    fn default() -> Self {
        Self {
            enabled: SNMP_ENABLED,
            community: SNMP_COMMUNITY.to_string(),
            port: SNMP_PORT,
            timeout: SNMP_TIMEOUT,
            retries: SNMP_RETRIES,
            concurrency: MAX_CONCURRENT_SNMP,
        }
    }
}

/// Everything the discovery core needs, resolved once at startup
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub ping: PingSettings,
    pub snmp: SnmpSettings,
    pub max_scan_hosts: usize,
    pub scan_timeout: Duration,
    pub recent_window_hours: i64,
    pub assignment_lease_secs: i64,
    pub rules_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub unknown_department: String,
    pub unknown_unit: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ping: PingSettings::default(),
            snmp: SnmpSettings::default(),
            max_scan_hosts: MAX_SCAN_HOSTS,
            scan_timeout: SCAN_TIMEOUT,
            recent_window_hours: RECENT_WINDOW_HOURS,
            assignment_lease_secs: ASSIGNMENT_LEASE_SECS,
            rules_path: None,
            database_path: None,
            unknown_department: UNKNOWN_DEPARTMENT.to_string(),
            unknown_unit: UNKNOWN_UNIT.to_string(),
        }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        Self {
            ping: PingSettings {
                concurrency: max_concurrent_pings(),
                timeout: ping_timeout(),
                retries: ping_retries(),
            },
            snmp: SnmpSettings {
                enabled: snmp_enabled(),
                community: snmp_community(),
                port: snmp_port(),
                timeout: snmp_timeout(),
                retries: snmp_retries(),
                concurrency: max_concurrent_snmp(),
            },
            max_scan_hosts: max_scan_hosts(),
            scan_timeout: scan_timeout(),
            recent_window_hours: recent_window_hours(),
            assignment_lease_secs: assignment_lease_secs(),
            rules_path: rules_path(),
            database_path: database_path(),
            unknown_department: unknown_department(),
            unknown_unit: unknown_unit(),
        }
    }
}
