//! Address range expansion and validation

use ipnetwork::{IpNetwork, Ipv4Network};
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Error, Result};

/// Checks if an IP address is a network or broadcast address
pub fn is_special_address(ip: Ipv4Addr, subnet: &Ipv4Network) -> bool {
    ip == subnet.network() || ip == subnet.broadcast()
}

/// Number of probe targets a network expands to.
///
/// /31 keeps both addresses (point-to-point links), /32 is a single host,
/// anything wider drops the network and broadcast addresses.
pub fn usable_host_count(subnet: &Ipv4Network) -> u64 {
    let size = 1u64 << (32 - u32::from(subnet.prefix()));
    match subnet.prefix() {
        31 | 32 => size,
        _ => size - 2,
    }
}

/// Parses a single IPv4 address. A `/32` suffix is accepted.
pub fn parse_single_address(input: &str) -> Result<Ipv4Addr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("IP address is required"));
    }

    let candidate = trimmed.strip_suffix("/32").unwrap_or(trimmed);
    match candidate.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        Ok(IpAddr::V6(_)) => Err(Error::validation(format!(
            "'{}' is an IPv6 address; only IPv4 discovery is supported",
            trimmed
        ))),
        Err(_) => Err(Error::validation(format!(
            "'{}' is not a valid IPv4 address",
            trimmed
        ))),
    }
}

/// Parses an IPv4 CIDR (or a bare address, treated as /32) and normalizes
/// host bits away.
pub fn parse_network(input: &str) -> Result<Ipv4Network> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("address or CIDR range is required"));
    }

    let network = match trimmed.parse::<IpNetwork>() {
        Ok(IpNetwork::V4(net)) => net,
        Ok(IpNetwork::V6(_)) => {
            return Err(Error::validation(format!(
                "'{}' is an IPv6 range; only IPv4 discovery is supported",
                trimmed
            )));
        }
        Err(e) => {
            return Err(Error::validation(format!(
                "'{}' is not a valid IPv4 address or CIDR: {}",
                trimmed, e
            )));
        }
    };

    Ipv4Network::new(network.network(), network.prefix())
        .map_err(|e| Error::validation(format!("invalid network '{}': {}", trimmed, e)))
}

/// Expands an address or CIDR into the host addresses to probe.
///
/// The host count is checked against `max_hosts` before any address is
/// materialized; oversized ranges are rejected, never truncated.
pub fn expand_range(input: &str, max_hosts: usize) -> Result<Vec<Ipv4Addr>> {
    let subnet = parse_network(input)?;
    let requested = usable_host_count(&subnet);

    if requested > max_hosts as u64 {
        tracing::warn!(
            "Refusing to expand {}: {} hosts exceeds limit of {}",
            subnet,
            requested,
            max_hosts
        );
        return Err(Error::RangeTooLarge {
            requested,
            limit: max_hosts,
        });
    }

    let ips: Vec<Ipv4Addr> = if subnet.prefix() >= 31 {
        subnet.iter().collect()
    } else {
        subnet
            .iter()
            .filter(|ip| !is_special_address(*ip, &subnet))
            .collect()
    };

    tracing::debug!("Expanded {} to {} scannable hosts", subnet, ips.len());

    Ok(ips)
}

#[cfg(test)]
#[path = "range_tests.rs"]
mod range_tests;
