//! Rule evaluation against request attributes.
//!
//! # Responsibilities
//! - Match host (case-insensitive), path (case-sensitive), method, headers,
//!   query parameters and client IP
//! - Evaluate `&&`, `||`, `!` combinators
//!
//! # Design Decisions
//! - Used for route previews only; the proxy does the real matching
//! - A regex that fails to compile never matches

use std::collections::BTreeMap;
use std::net::IpAddr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::rule::{MatcherCall, MatcherKind, RuleExpr};

/// The parts of a request a rule can look at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestAttrs {
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub client_ip: Option<IpAddr>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestAttrs {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            method: default_method(),
            ..Default::default()
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Host without an optional `:port` suffix.
    fn bare_host(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => &self.host,
        }
    }
}

impl RuleExpr {
    /// Returns true if the request satisfies this rule.
    pub fn matches(&self, req: &RequestAttrs) -> bool {
        match self {
            RuleExpr::Matcher(call) => call.matches(req),
            RuleExpr::Not(inner) => !inner.matches(req),
            RuleExpr::And(l, r) => l.matches(req) && r.matches(req),
            RuleExpr::Or(l, r) => l.matches(req) || r.matches(req),
        }
    }
}

impl MatcherCall {
    pub fn matches(&self, req: &RequestAttrs) -> bool {
        let args = &self.args;
        match self.kind {
            MatcherKind::Host => args.iter().any(|h| h.eq_ignore_ascii_case(req.bare_host())),
            MatcherKind::HostRegexp => regex_matches(&args[0], &req.bare_host().to_lowercase()),
            MatcherKind::Path => args.iter().any(|p| *p == req.path),
            MatcherKind::PathPrefix => args.iter().any(|p| req.path.starts_with(p.as_str())),
            MatcherKind::PathRegexp => regex_matches(&args[0], &req.path),
            MatcherKind::Method => args.iter().any(|m| m.eq_ignore_ascii_case(&req.method)),
            MatcherKind::Header => req.header(&args[0]) == Some(args[1].as_str()),
            MatcherKind::HeaderRegexp => req
                .header(&args[0])
                .is_some_and(|v| regex_matches(&args[1], v)),
            MatcherKind::Query => match args.get(1) {
                Some(value) => req.query.get(&args[0]) == Some(value),
                None => req.query.contains_key(&args[0]),
            },
            MatcherKind::ClientIp => req.client_ip.is_some_and(|ip| {
                args.iter()
                    .filter_map(|r| parse_ip_range(r))
                    .any(|range| range.contains(ip))
            }),
        }
    }
}

fn regex_matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

/// An IP address or CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub network: IpAddr,
    pub prefix: u8,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix.min(32)))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix.min(128)))
    }
}

/// Parse `10.0.0.0/8`, `2001:db8::/32` or a single address.
pub fn parse_ip_range(text: &str) -> Option<IpRange> {
    let (addr, prefix) = match text.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (text, None),
    };
    let network: IpAddr = addr.trim().parse().ok()?;
    let max = if network.is_ipv4() { 32 } else { 128 };
    let prefix = match prefix {
        Some(p) => p.trim().parse::<u8>().ok().filter(|p| *p <= max)?,
        None => max,
    };
    Some(IpRange { network, prefix })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::rule::parse_rule;

    #[test]
    fn test_host_matcher() {
        let rule = parse_rule("Host(`example.com`)").unwrap();
        assert!(rule.matches(&RequestAttrs::new("example.com", "/")));
        assert!(rule.matches(&RequestAttrs::new("EXAMPLE.COM:8080", "/"))); // case insensitive, port ignored
        assert!(!rule.matches(&RequestAttrs::new("other.com", "/")));
    }

    #[test]
    fn test_path_matchers() {
        let prefix = parse_rule("PathPrefix(`/api`)").unwrap();
        assert!(prefix.matches(&RequestAttrs::new("x", "/api/v1")));
        assert!(!prefix.matches(&RequestAttrs::new("x", "/images")));

        let exact = parse_rule("Path(`/health`)").unwrap();
        assert!(exact.matches(&RequestAttrs::new("x", "/health")));
        assert!(!exact.matches(&RequestAttrs::new("x", "/health/live")));

        let re = parse_rule("PathRegexp(`^/v[0-9]+/`)").unwrap();
        assert!(re.matches(&RequestAttrs::new("x", "/v2/users")));
    }

    #[test]
    fn test_combinators_and_headers() {
        let rule = parse_rule("Host(`a.com`) && !Method(`DELETE`) && Header(`X-Env`, `prod`)").unwrap();
        let mut req = RequestAttrs::new("a.com", "/");
        req.headers.insert("x-env".into(), "prod".into());
        assert!(rule.matches(&req));

        req.method = "DELETE".into();
        assert!(!rule.matches(&req));
    }

    #[test]
    fn test_client_ip_ranges() {
        let rule = parse_rule("ClientIP(`10.0.0.0/8`, `192.168.1.7`)").unwrap();
        let mut req = RequestAttrs::new("a", "/");
        req.client_ip = Some("10.20.30.40".parse().unwrap());
        assert!(rule.matches(&req));
        req.client_ip = Some("192.168.1.8".parse().unwrap());
        assert!(!rule.matches(&req));

        assert!(parse_ip_range("10.0.0.0/33").is_none());
        assert!(parse_ip_range("2001:db8::/32").is_some());
        assert!(parse_ip_range("not-an-ip").is_none());
    }
}
