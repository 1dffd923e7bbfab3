//! Which address a request is attributed to.
//!
//! `X-Forwarded-For` is client-controlled. Trusting it unconditionally
//! ([`ForwardedPolicy::Always`]) lets any client pick the address the gate
//! sees, so it only belongs behind a proxy that overwrites the header.

use http::HeaderMap;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ForwardedPolicy {
    /// Ignore forwarding headers and use the transport peer.
    Never,
    /// Take the first `X-Forwarded-For` entry, then `X-Real-IP`, from anyone.
    #[default]
    Always,
    /// Honour forwarding headers only when the peer is one of these networks.
    TrustedProxies(Vec<IpNetwork>),
}

impl ForwardedPolicy {
    pub fn trusts_any_client(&self) -> bool {
        matches!(self, ForwardedPolicy::Always)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    policy: ForwardedPolicy,
}

impl ClientIpResolver {
    pub fn new(policy: ForwardedPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ForwardedPolicy {
        &self.policy
    }

    /// Resolves the client address for a request. `None` only when there is
    /// neither a usable header nor a peer address.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        let peer = peer.map(|p| p.to_canonical());
        match &self.policy {
            ForwardedPolicy::Never => peer,
            ForwardedPolicy::Always => forwarded_chain(headers)
                .into_iter()
                .next()
                .or_else(|| real_ip(headers))
                .or(peer),
            ForwardedPolicy::TrustedProxies(networks) => {
                let peer_addr = peer?;
                if !is_trusted(networks, peer_addr) {
                    return Some(peer_addr);
                }
                let chain = forwarded_chain(headers);
                // rightmost hop not added by one of our own proxies
                chain
                    .iter()
                    .rev()
                    .find(|ip| !is_trusted(networks, **ip))
                    .or_else(|| chain.first())
                    .copied()
                    .or_else(|| real_ip(headers))
                    .or(Some(peer_addr))
            }
        }
    }
}

fn is_trusted(networks: &[IpNetwork], ip: IpAddr) -> bool {
    networks.iter().any(|net| net.contains(ip))
}

/// All parseable `X-Forwarded-For` entries, leftmost (client side) first.
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(parse_entry)
        .collect()
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_REAL_IP)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_entry)
}

/// Accepts a bare address or an address with a port.
fn parse_entry(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .or_else(|_| raw.parse::<SocketAddr>().map(|s| s.ip()))
        .ok()
        .map(|ip| ip.to_canonical())
}
