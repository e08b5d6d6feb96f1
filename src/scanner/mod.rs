//! Scanner module - ICMP liveness and SNMP metadata probing

mod icmp;
mod snmp;

pub use icmp::{EchoFuture, EchoProbe, LivenessProber, ProbeBatch, ProbeOutcome, SurgeEchoProbe};
pub use snmp::{
    MAX_FIELD_CHARS, MetadataProber, SYSTEM_OIDS, Snmp2Transport, SnmpFuture, SnmpOutcome,
    SnmpTransport, SnmpValue, SnmpValues, SystemInfo, sanitize_text,
};
