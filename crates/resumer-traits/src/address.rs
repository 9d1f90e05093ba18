//! Advertised replica addresses and redirect targets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A replica address other replicas and clients can dial directly.
///
/// Hosts compare case-insensitively; ports compare exactly. The port is
/// always non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub host: String,
    pub port: u16,
}

impl RedirectTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Option<Self> {
        let host = normalize_host(&host.into());
        if host.is_empty() || port == 0 {
            return None;
        }
        Some(Self { host, port })
    }

    /// Parse `host:port`, accepting bracketed IPv6 hosts (`[::1]:9090`).
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let separator = find_port_separator(trimmed)?;
        if separator == 0 || separator >= trimmed.len() - 1 {
            return None;
        }
        let host = &trimmed[..separator];
        let port = trimmed[separator + 1..].trim().parse::<u16>().ok()?;
        Self::new(host, port)
    }

    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn matches(&self, other: &RedirectTarget) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Compare two advertised addresses the way ownership checks need to.
///
/// Addresses that parse as `host:port` are compared structurally; anything
/// else falls back to a trimmed, case-insensitive comparison. Blank
/// addresses never match.
pub fn same_address(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    match (RedirectTarget::parse(a), RedirectTarget::parse(b)) {
        (Some(left), Some(right)) => left.matches(&right),
        _ => a.eq_ignore_ascii_case(b),
    }
}

fn find_port_separator(value: &str) -> Option<usize> {
    if value.starts_with('[') {
        let close = value.find(']')?;
        if value[close + 1..].starts_with(':') {
            return Some(close + 1);
        }
        return None;
    }
    value.rfind(':')
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    if trimmed.len() > 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        return trimmed[1..trimmed.len() - 1].to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let target = RedirectTarget::parse("replica-2.internal:9090").unwrap();
        assert_eq!(target.host, "replica-2.internal");
        assert_eq!(target.port, 9090);
        assert_eq!(target.authority(), "replica-2.internal:9090");
    }

    #[test]
    fn test_parse_ipv6() {
        let target = RedirectTarget::parse("[::1]:7000").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 7000);
        assert_eq!(target.authority(), "[::1]:7000");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(RedirectTarget::parse("").is_none());
        assert!(RedirectTarget::parse("host-only").is_none());
        assert!(RedirectTarget::parse("host:").is_none());
        assert!(RedirectTarget::parse(":9090").is_none());
        assert!(RedirectTarget::parse("host:0").is_none());
        assert!(RedirectTarget::parse("host:abc").is_none());
        assert!(RedirectTarget::new("  ", 80).is_none());
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let a = RedirectTarget::parse("Replica-A:9090").unwrap();
        let b = RedirectTarget::parse("replica-a:9090").unwrap();
        let c = RedirectTarget::parse("replica-a:9091").unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_same_address() {
        assert!(same_address("HOST:1", " host:1 "));
        assert!(!same_address("host:1", "host:2"));
        assert!(same_address("unix-socket", "UNIX-SOCKET"));
        assert!(!same_address("", ""));
    }
}
