//! SNMP metadata probing for reachable hosts
//!
//! Queries the system group of the MIB-II tree:
//! - sysDescr (1.3.6.1.2.1.1.1.0)
//! - sysObjectID (1.3.6.1.2.1.1.2.0)
//! - sysContact (1.3.6.1.2.1.1.4.0)
//! - sysName (1.3.6.1.2.1.1.5.0)
//! - sysLocation (1.3.6.1.2.1.1.6.0)
//!
//! Agents frequently return text in legacy encodings or with embedded
//! control bytes, so every value goes through [`sanitize_text`].

use serde::{Deserialize, Serialize};
use snmp2::{AsyncSession, Oid, Value};
use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

use crate::config::SnmpSettings;
use crate::error::ProbeError;

const OID_SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const OID_SYS_OBJECT_ID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
const OID_SYS_CONTACT: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 4, 0];
const OID_SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];
const OID_SYS_LOCATION: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 6, 0];

/// Default OID set, in [`SystemField`] order
pub const SYSTEM_OIDS: [&[u64]; 5] = [
    OID_SYS_DESCR,
    OID_SYS_OBJECT_ID,
    OID_SYS_CONTACT,
    OID_SYS_NAME,
    OID_SYS_LOCATION,
];

/// Longest text value kept from an agent, in characters
pub const MAX_FIELD_CHARS: usize = 255;

/// Field of the system group, indexing [`SYSTEM_OIDS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemField {
    Descr = 0,
    ObjectId = 1,
    Contact = 2,
    Name = 3,
    Location = 4,
}

impl SystemField {
    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SystemField::Descr),
            1 => Some(SystemField::ObjectId),
            2 => Some(SystemField::Contact),
            3 => Some(SystemField::Name),
            4 => Some(SystemField::Location),
            _ => None,
        }
    }
}

/// A varbind value as returned by an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Octets(Vec<u8>),
    ObjectId(String),
    Integer(i64),
}

/// Values keyed by their index in the requested OID list
pub type SnmpValues = Vec<(usize, SnmpValue)>;

pub type SnmpFuture<'a> = Pin<Box<dyn Future<Output = Result<SnmpValues, ProbeError>> + Send + 'a>>;

/// SNMP GET against a single agent
pub trait SnmpTransport: Send + Sync {
    /// Fetches `oids`, bounding every request by `timeout`. OIDs the agent
    /// does not answer are left out of the result.
    fn get<'a>(
        &'a self,
        target: SocketAddr,
        community: &'a str,
        oids: &'a [&'static [u64]],
        timeout: Duration,
    ) -> SnmpFuture<'a>;
}

/// SNMPv2c transport backed by snmp2
pub struct Snmp2Transport;

impl SnmpTransport for Snmp2Transport {
    fn get<'a>(
        &'a self,
        target: SocketAddr,
        community: &'a str,
        oids: &'a [&'static [u64]],
        timeout_dur: Duration,
    ) -> SnmpFuture<'a> {
        Box::pin(async move {
            let mut session = match timeout(
                timeout_dur,
                AsyncSession::new_v2c(target, community.as_bytes(), 0),
            )
            .await
            {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => return Err(ProbeError::SnmpUnavailable(e.to_string())),
                Err(_) => return Err(ProbeError::SnmpUnavailable("session timed out".to_string())),
            };

            let mut values = Vec::with_capacity(oids.len());
            for (index, raw) in oids.iter().enumerate() {
                let Ok(oid) = Oid::from(*raw) else {
                    continue;
                };

                if let Ok(Ok(mut response)) = timeout(timeout_dur, session.get(&oid)).await
                    && let Some((_, value)) = response.varbinds.next()
                {
                    let converted = match value {
                        Value::OctetString(bytes) => Some(SnmpValue::Octets(bytes.to_vec())),
                        Value::ObjectIdentifier(id) => Some(SnmpValue::ObjectId(id.to_string())),
                        Value::Integer(n) => Some(SnmpValue::Integer(n)),
                        _ => None,
                    };
                    if let Some(converted) = converted {
                        values.push((index, converted));
                    }
                }
            }

            if values.is_empty() {
                return Err(ProbeError::SnmpUnavailable(
                    "agent returned no system values".to_string(),
                ));
            }
            Ok(values)
        })
    }
}

/// System identification fields of a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub sys_descr: Option<String>,
    pub sys_object_id: Option<String>,
    pub sys_contact: Option<String>,
    pub sys_name: Option<String>,
    pub sys_location: Option<String>,
}

impl SystemInfo {
    pub fn is_empty(&self) -> bool {
        self.sys_descr.is_none()
            && self.sys_object_id.is_none()
            && self.sys_contact.is_none()
            && self.sys_name.is_none()
            && self.sys_location.is_none()
    }

    fn set(&mut self, field: SystemField, text: Option<String>) {
        let slot = match field {
            SystemField::Descr => &mut self.sys_descr,
            SystemField::ObjectId => &mut self.sys_object_id,
            SystemField::Contact => &mut self.sys_contact,
            SystemField::Name => &mut self.sys_name,
            SystemField::Location => &mut self.sys_location,
        };
        *slot = text;
    }
}

/// SNMP result for one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnmpOutcome {
    pub available: bool,
    pub info: SystemInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeError>,
}

impl SnmpOutcome {
    fn unavailable(error: ProbeError) -> Self {
        Self {
            available: false,
            info: SystemInfo::default(),
            error: Some(error),
        }
    }
}

/// Re-encodes agent bytes as clean UTF-8.
///
/// Valid UTF-8 is kept; anything else is decoded as ISO-8859-1. Control
/// characters are dropped, whitespace is trimmed and the result is capped at
/// [`MAX_FIELD_CHARS`]. Blank values become `None`.
pub fn sanitize_text(bytes: &[u8]) -> Option<String> {
    let decoded: String = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    };

    let cleaned: String = decoded
        .chars()
        .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(trimmed.chars().take(MAX_FIELD_CHARS).collect::<String>().trim_end().to_string())
}

fn value_to_text(value: &SnmpValue) -> Option<String> {
    match value {
        SnmpValue::Octets(bytes) => sanitize_text(bytes),
        SnmpValue::ObjectId(id) => sanitize_text(id.as_bytes()),
        SnmpValue::Integer(n) => Some(n.to_string()),
    }
}

/// SNMP prober with its own timeout and retry budget
#[derive(Clone)]
pub struct MetadataProber {
    transport: Arc<dyn SnmpTransport>,
    settings: SnmpSettings,
}

impl MetadataProber {
    pub fn new(transport: Arc<dyn SnmpTransport>, settings: SnmpSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &SnmpSettings {
        &self.settings
    }

    /// Queries the system group of one host. Never fails: an unreachable
    /// agent or a wrong community yields `available: false`.
    pub async fn query(&self, ip: Ipv4Addr) -> SnmpOutcome {
        if !self.settings.enabled {
            return SnmpOutcome::unavailable(ProbeError::SnmpUnavailable(
                "snmp probing disabled".to_string(),
            ));
        }

        let target = SocketAddr::from((ip, self.settings.port));
        let per_query = self.settings.timeout;
        // Session setup plus one GET per OID, each individually bounded.
        let attempt_budget = per_query * (SYSTEM_OIDS.len() as u32 + 1);
        let mut last_error = ProbeError::SnmpUnavailable("no attempt made".to_string());

        for _ in 0..self.settings.retries.max(1) {
            let request =
                self.transport
                    .get(target, &self.settings.community, &SYSTEM_OIDS, per_query);
            match timeout(attempt_budget, request).await {
                Ok(Ok(values)) => {
                    let mut info = SystemInfo::default();
                    for (index, value) in &values {
                        if let Some(field) = SystemField::from_index(*index) {
                            info.set(field, value_to_text(value));
                        }
                    }
                    return SnmpOutcome {
                        available: true,
                        info,
                        error: None,
                    };
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = ProbeError::SnmpUnavailable("query timed out".to_string()),
            }
        }

        tracing::debug!("SNMP unavailable on {}: {}", ip, last_error);
        SnmpOutcome::unavailable(last_error)
    }

    /// Queries several hosts concurrently
    pub async fn query_all(&self, hosts: &[Ipv4Addr]) -> HashMap<Ipv4Addr, SnmpOutcome> {
        if hosts.is_empty() {
            return HashMap::new();
        }

        tracing::info!("SNMP querying {} hosts...", hosts.len());

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let results = Arc::new(Mutex::new(HashMap::new()));
        let mut handles = Vec::new();

        for &ip in hosts {
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let prober = self.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::warn!("SNMP semaphore acquire failed for {}: {}", ip, e);
                        return;
                    }
                };

                let outcome = prober.query(ip).await;
                results.lock().await.insert(ip, outcome);
            });

            handles.push(handle);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("SNMP task failed: {}", e);
            }
        }

        let mut map = results.lock().await.clone();
        for &ip in hosts {
            map.entry(ip).or_insert_with(|| {
                SnmpOutcome::unavailable(ProbeError::SnmpUnavailable("query task failed".to_string()))
            });
        }

        let available = map.values().filter(|o| o.available).count();
        tracing::info!("SNMP complete: {} hosts responded", available);

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAgent {
        values: SnmpValues,
    }

    impl SnmpTransport for FixedAgent {
        fn get<'a>(
            &'a self,
            _target: SocketAddr,
            community: &'a str,
            _oids: &'a [&'static [u64]],
            _timeout: Duration,
        ) -> SnmpFuture<'a> {
            Box::pin(async move {
                if community != "public" {
                    return Err(ProbeError::SnmpUnavailable("authentication failure".to_string()));
                }
                Ok(self.values.clone())
            })
        }
    }

    fn settings() -> SnmpSettings {
        SnmpSettings {
            timeout: Duration::from_millis(50),
            ..SnmpSettings::default()
        }
    }

    #[test]
    fn sanitize_keeps_valid_utf8() {
        assert_eq!(sanitize_text("Cisco IOS ü".as_bytes()), Some("Cisco IOS ü".to_string()));
    }

    #[test]
    fn sanitize_redecodes_latin1_and_strips_controls() {
        let raw = [b'H', b'P', 0x00, b' ', 0xE9, b'\r', b'\n', 0x07];
        assert_eq!(sanitize_text(&raw), Some("HP é".to_string()));
    }

    #[test]
    fn sanitize_blank_is_none_and_long_is_truncated() {
        assert_eq!(sanitize_text(b"  \0 \t"), None);
        let long = "x".repeat(600);
        assert_eq!(sanitize_text(long.as_bytes()).unwrap().chars().count(), MAX_FIELD_CHARS);
    }

    #[tokio::test]
    async fn query_maps_values_to_system_fields() {
        let agent = FixedAgent {
            values: vec![
                (0, SnmpValue::Octets(b"Cisco IOS Software".to_vec())),
                (1, SnmpValue::ObjectId("1.3.6.1.4.1.9.1.1208".to_string())),
                (3, SnmpValue::Octets(b"core-sw-01\0".to_vec())),
            ],
        };
        let prober = MetadataProber::new(Arc::new(agent), settings());

        let outcome = prober.query("10.0.0.5".parse().unwrap()).await;

        assert!(outcome.available);
        assert_eq!(outcome.info.sys_descr.as_deref(), Some("Cisco IOS Software"));
        assert_eq!(outcome.info.sys_object_id.as_deref(), Some("1.3.6.1.4.1.9.1.1208"));
        assert_eq!(outcome.info.sys_name.as_deref(), Some("core-sw-01"));
        assert_eq!(outcome.info.sys_location, None);
    }

    #[tokio::test]
    async fn wrong_community_is_not_fatal() {
        let agent = FixedAgent { values: Vec::new() };
        let mut settings = settings();
        settings.community = "private".to_string();
        let prober = MetadataProber::new(Arc::new(agent), settings);

        let outcome = prober.query("10.0.0.5".parse().unwrap()).await;

        assert!(!outcome.available);
        assert!(outcome.info.is_empty());
        assert!(matches!(outcome.error, Some(ProbeError::SnmpUnavailable(_))));
    }

    #[tokio::test]
    async fn disabled_prober_skips_the_agent() {
        let agent = FixedAgent {
            values: vec![(0, SnmpValue::Octets(b"x".to_vec()))],
        };
        let mut settings = settings();
        settings.enabled = false;
        let prober = MetadataProber::new(Arc::new(agent), settings);

        let outcome = prober.query("10.0.0.5".parse().unwrap()).await;
        assert!(!outcome.available);
    }

    #[tokio::test]
    async fn query_all_covers_every_host() {
        let agent = FixedAgent {
            values: vec![(4, SnmpValue::Octets(b"Server room".to_vec()))],
        };
        let prober = MetadataProber::new(Arc::new(agent), settings());
        let hosts: Vec<Ipv4Addr> = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];

        let results = prober.query_all(&hosts).await;

        assert_eq!(results.len(), 2);
        assert!(results.values().all(|o| o.info.sys_location.as_deref() == Some("Server room")));
    }
}
