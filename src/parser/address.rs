//! Server address validation
//!
//! Host and port checks shared by every link format.

use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

/// Dot-separated labels of alphanumerics and inner hyphens, or a punycode
/// (`xn--`) name. Matched against the lower-cased host.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]*[a-z0-9])?$|^xn--([a-z0-9-]+\.)+[a-z0-9-]+$",
    )
    .expect("domain pattern is valid")
});

/// Checks that a host is an IP literal or a well-formed domain name
///
/// IPv6 literals are accepted with or without surrounding brackets. Single
/// label names such as `localhost` are rejected.
pub fn is_valid_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if unbracketed.parse::<IpAddr>().is_ok() {
        return true;
    }
    DOMAIN_RE.is_match(&host.to_ascii_lowercase())
}

/// Checks that a port number lies in 1..=65535
pub fn is_valid_port(port: i64) -> bool {
    (1..=65535).contains(&port)
}

/// Validated server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    /// Host without IPv6 brackets
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    /// Joins host and port, bracketing IPv6 literals
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
