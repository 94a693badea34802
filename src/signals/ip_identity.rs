// src/signals/ip_identity.rs
// Origin normalization, reserved-range checks and prefix bucketing.

use ipnet::IpNet;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};

const UNKNOWN_ORIGIN: &str = "unknown";
const FALLBACK_BUCKETS: u64 = 1024;

static PRIVATE_OR_RESERVED: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
        "2001:db8::/32",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse::<IpNet>().ok())
    .collect()
});

/// Parses an origin as an IP address, tolerating `ip:port` and `[v6]:port`.
pub fn parse_origin(origin: &str) -> Option<IpAddr> {
    let trimmed = origin.trim();
    if let Ok(addr) = trimmed.parse::<IpAddr>() {
        return Some(addr);
    }
    if let Ok(sock) = trimmed.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
}

/// Canonical origin key: the normalized IP when parsable, otherwise the
/// trimmed lowercase string (or `unknown` when empty).
pub fn normalize_origin(origin: &str) -> String {
    if let Some(addr) = parse_origin(origin) {
        return match addr {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4.to_string(),
                None => v6.to_string(),
            },
            IpAddr::V4(v4) => v4.to_string(),
        };
    }
    let trimmed = origin.trim();
    if trimmed.is_empty() {
        UNKNOWN_ORIGIN.to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

/// True for loopback, RFC1918, link-local, CGNAT, documentation, multicast
/// and other reserved ranges. Non-IP origins are never private.
pub fn is_private_or_reserved(origin: &str) -> bool {
    let Some(addr) = parse_origin(origin) else {
        return false;
    };
    let addr = match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    };
    PRIVATE_OR_RESERVED.iter().any(|net| net.contains(&addr))
}

/// Network-prefix bucket shared by every origin in the same /24 (IPv4) or
/// /64 (IPv6). Non-IP origins hash into one of 1024 `h{n}` buckets.
pub fn bucket_ip(ip: &str) -> String {
    if let Some(addr) = parse_origin(ip) {
        match addr {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                return format!("{}.{}.{}.0", o[0], o[1], o[2]);
            }
            IpAddr::V6(v6) => {
                let segs = v6.segments();
                return format!(
                    "{:x}:{:x}:{:x}:{:x}::/64",
                    segs[0], segs[1], segs[2], segs[3]
                );
            }
        }
    }
    let digest = Sha256::digest(ip.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    format!("h{}", u64::from_be_bytes(prefix) % FALLBACK_BUCKETS)
}
