//! ICMP liveness probing

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::PingSettings;
use crate::error::ProbeError;

pub type EchoFuture<'a> = Pin<Box<dyn Future<Output = Result<Duration, ProbeError>> + Send + 'a>>;

/// A single echo request/reply exchange
pub trait EchoProbe: Send + Sync {
    fn echo<'a>(&'a self, ip: Ipv4Addr, sequence: u16, timeout: Duration) -> EchoFuture<'a>;
}

/// Liveness result for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub address: Ipv4Addr,
    pub is_alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeError>,
}

impl ProbeOutcome {
    fn alive(address: Ipv4Addr, rtt: Duration) -> Self {
        Self {
            address,
            is_alive: true,
            rtt_ms: Some(rtt.as_millis() as u64),
            error: None,
        }
    }

    fn dead(address: Ipv4Addr, error: ProbeError) -> Self {
        Self {
            address,
            is_alive: false,
            rtt_ms: None,
            error: Some(error),
        }
    }
}

/// Results of a batch probe. Addresses skipped after cancellation are absent.
#[derive(Debug, Clone, Default)]
pub struct ProbeBatch {
    pub results: HashMap<Ipv4Addr, ProbeOutcome>,
    pub cancelled: bool,
}

impl ProbeBatch {
    pub fn alive_addresses(&self) -> Vec<Ipv4Addr> {
        let mut alive: Vec<Ipv4Addr> = self
            .results
            .values()
            .filter(|r| r.is_alive)
            .map(|r| r.address)
            .collect();
        alive.sort();
        alive
    }
}

/// Generates a ping identifier from the clock
fn rand_id() -> u16 {
    use std::time::SystemTime;
    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    ((duration.as_nanos() % 0xFFFF) as u16).wrapping_add(1)
}

/// Echo probe backed by a surge-ping ICMP socket
pub struct SurgeEchoProbe {
    client: Client,
}

impl SurgeEchoProbe {
    /// Opens the ICMP socket. Fails without raw/datagram ICMP privileges.
    pub fn new() -> std::io::Result<Self> {
        let client = Client::new(&Config::default())?;
        Ok(Self { client })
    }
}

impl EchoProbe for SurgeEchoProbe {
    fn echo<'a>(&'a self, ip: Ipv4Addr, sequence: u16, timeout: Duration) -> EchoFuture<'a> {
        Box::pin(async move {
            let payload = [0u8; 56];
            let mut pinger = self
                .client
                .pinger(IpAddr::V4(ip), PingIdentifier(rand_id()))
                .await;
            pinger.timeout(timeout);

            match pinger.ping(PingSequence(sequence), &payload).await {
                Ok((_packet, rtt)) => Ok(rtt),
                Err(SurgeError::Timeout { .. }) => Err(ProbeError::Timeout),
                Err(e) => Err(ProbeError::Unreachable(e.to_string())),
            }
        })
    }
}

/// Concurrent ICMP prober with per-host timeout and retries
#[derive(Clone)]
pub struct LivenessProber {
    probe: Arc<dyn EchoProbe>,
    settings: PingSettings,
}

impl LivenessProber {
    pub fn new(probe: Arc<dyn EchoProbe>, settings: PingSettings) -> Self {
        Self { probe, settings }
    }

    pub fn settings(&self) -> &PingSettings {
        &self.settings
    }

    /// Probes one address, retrying until a reply or the attempts run out.
    pub async fn probe(&self, ip: Ipv4Addr) -> ProbeOutcome {
        let attempts = self.settings.retries.max(1);
        let timeout = self.settings.timeout;
        let mut last_error = ProbeError::Timeout;

        for attempt in 0..attempts {
            // The probe is expected to honor `timeout`; this bound holds even if it does not.
            match tokio::time::timeout(timeout, self.probe.echo(ip, attempt as u16, timeout)).await {
                Ok(Ok(rtt)) => return ProbeOutcome::alive(ip, rtt),
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = ProbeError::Timeout,
            }
        }

        tracing::trace!("{} unreachable after {} attempts: {}", ip, attempts, last_error);
        ProbeOutcome::dead(ip, last_error)
    }

    /// Probes every address through a bounded worker pool.
    ///
    /// A failing host never fails the batch. Once `cancel` fires no further
    /// addresses are launched; in-flight probes run to completion.
    pub async fn probe_all(&self, ips: &[Ipv4Addr], cancel: &CancellationToken) -> ProbeBatch {
        let mut batch = ProbeBatch::default();
        if ips.is_empty() {
            return batch;
        }

        tracing::info!("ICMP probing {} hosts...", ips.len());

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut handles = Vec::with_capacity(ips.len());

        for &ip in ips {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    batch.cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::warn!("ICMP semaphore closed before {}: {}", ip, e);
                        batch.results.insert(ip, ProbeOutcome::dead(ip, ProbeError::Unreachable(e.to_string())));
                        continue;
                    }
                },
            };

            let prober = self.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                prober.probe(ip).await
            });
            handles.push((ip, handle));
        }

        for (ip, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    batch.results.insert(ip, outcome);
                }
                Err(e) => {
                    tracing::warn!("ICMP probe task for {} failed: {}", ip, e);
                    batch
                        .results
                        .insert(ip, ProbeOutcome::dead(ip, ProbeError::Unreachable(e.to_string())));
                }
            }
        }

        let alive = batch.results.values().filter(|r| r.is_alive).count();
        tracing::info!(
            "ICMP complete: {}/{} hosts responded{}",
            alive,
            batch.results.len(),
            if batch.cancelled { " (cancelled)" } else { "" }
        );

        batch
    }
}
