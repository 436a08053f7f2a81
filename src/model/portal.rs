//! iSCSI portal specifications
//!
//! A portal entry is `ip[/mask][:port]`, with IPv6 addresses in brackets.
//! Entries with a mask name a subnet and expand to every local address
//! inside it.

use super::ModelError;
use ipnetwork::{IpNetwork, Ipv4Network};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Default iSCSI port
pub const DEFAULT_PORT: u16 = 3260;

/// Portals used when the `portals` parameter is unset
pub const DEFAULT_PORTALS: &str = "0.0.0.0:3260";

/// One entry of the `portals` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalSpec {
    /// A single listening address
    Address(SocketAddr),
    /// Every local address inside `network`
    Network { network: IpNetwork, port: u16 },
}

impl PortalSpec {
    pub fn port(&self) -> u16 {
        match self {
            PortalSpec::Address(addr) => addr.port(),
            PortalSpec::Network { port, .. } => *port,
        }
    }
}

impl fmt::Display for PortalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalSpec::Address(addr) => write!(f, "{}", addr),
            PortalSpec::Network {
                network: IpNetwork::V6(net),
                port,
            } => write!(f, "[{}]/{}:{}", net.ip(), net.prefix(), port),
            PortalSpec::Network { network, port } => write!(f, "{}:{}", network, port),
        }
    }
}

impl FromStr for PortalSpec {
    type Err = String;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let (ip, rest): (IpAddr, &str) = if let Some(after) = token.strip_prefix('[') {
            let (inside, rest) = after
                .split_once(']')
                .ok_or_else(|| format!("unterminated IPv6 address in {:?}", token))?;
            let ip = inside
                .parse::<Ipv6Addr>()
                .map_err(|_| format!("bad IPv6 address {:?}", inside))?;
            (IpAddr::V6(ip), rest)
        } else {
            let end = token.find(['/', ':']).unwrap_or(token.len());
            let host = &token[..end];
            let ip = host
                .parse::<Ipv4Addr>()
                .map_err(|_| format!("bad IPv4 address {:?} (IPv6 needs brackets)", host))?;
            (IpAddr::V4(ip), &token[end..])
        };

        let (mask, rest) = match rest.strip_prefix('/') {
            Some(after) => {
                let end = after.find(':').unwrap_or(after.len());
                (Some(&after[..end]), &after[end..])
            }
            None => (None, rest),
        };

        let port = match rest {
            "" => DEFAULT_PORT,
            _ => rest
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .filter(|p| *p != 0)
                .ok_or_else(|| format!("bad port in {:?}", token))?,
        };

        match mask {
            None => Ok(PortalSpec::Address(SocketAddr::new(ip, port))),
            Some(mask) => Ok(PortalSpec::Network {
                network: parse_network(ip, mask)
                    .ok_or_else(|| format!("bad mask {:?} in {:?}", mask, token))?,
                port,
            }),
        }
    }
}

/// A mask is either a prefix length or, for IPv4, a dotted netmask
fn parse_network(ip: IpAddr, mask: &str) -> Option<IpNetwork> {
    match (ip, mask.parse::<Ipv4Addr>()) {
        (IpAddr::V4(v4), Ok(netmask)) => Ipv4Network::with_netmask(v4, netmask)
            .ok()
            .map(IpNetwork::V4),
        _ => {
            let prefix = mask.parse::<u8>().ok()?;
            IpNetwork::new(ip, prefix).ok()
        }
    }
}

/// Parse the whitespace separated `portals` parameter
pub fn parse_portals(portals: &str) -> Result<Vec<PortalSpec>, ModelError> {
    portals
        .split_whitespace()
        .map(|token| {
            token
                .parse::<PortalSpec>()
                .map_err(|reason| ModelError::invalid("portals", reason))
        })
        .collect()
}

/// Expand portal specifications against the host's local addresses
pub fn expand_portals(specs: &[PortalSpec], local: &[IpAddr]) -> BTreeSet<SocketAddr> {
    let mut portals = BTreeSet::new();

    for spec in specs {
        match spec {
            PortalSpec::Address(addr) => {
                portals.insert(*addr);
            }
            PortalSpec::Network { network, port } => {
                let matched: Vec<_> = local.iter().filter(|ip| network.contains(**ip)).collect();
                if matched.is_empty() {
                    log::warn!("No local address in {}, portal skipped", spec);
                }
                portals.extend(matched.into_iter().map(|ip| SocketAddr::new(*ip, *port)));
            }
        }
    }

    portals
}
