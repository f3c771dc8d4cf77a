//! Protocol canonicalizers module
//!
//! This module contains canonicalizers for the supported proxy link formats.
//! Each one implements the `LinkCanonicalizer` trait: it parses a raw line,
//! runs the structural checks of its format, hands a flattened parameter map
//! to the policy engine, and re-serializes the link in a canonical form.
//!
//! Checks run in a fixed order and the first failure wins: length bound,
//! scheme, credentials, host and port, label filter, format-specific rules,
//! policy rule, then re-serialization.

mod hysteria2;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

pub use hysteria2::Hysteria2Canonicalizer;
pub use shadowsocks::ShadowsocksCanonicalizer;
pub use trojan::TrojanCanonicalizer;
pub use vless::VLessCanonicalizer;
pub use vmess::VMessCanonicalizer;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;
use url::{Host, Url, form_urlencoded};

use crate::filter::BannedWords;
use crate::policy::{ParameterMap, Rule, RuleSet, ValidationResult, validate};

use super::address::{HostPort, is_valid_host, is_valid_port};

/// Longest line accepted, in bytes
pub const MAX_LINE_LENGTH: usize = 4096;

// ============================================================================
// Rejection
// ============================================================================

/// Category of a per-line failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Unparseable URI, JSON or Base64
    Malformed,
    /// Absent credential, host, port or mandatory parameter
    MissingField,
    /// Invalid port or oversized input
    OutOfRange,
    /// Violates the configured policy rule
    Disallowed,
    /// Label contains a banned term
    BannedContent,
    /// No canonicalizer handles the scheme
    Unsupported,
}

/// Reason a line was not accepted
///
/// A rejection never aborts a batch; it is recorded next to the original line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    kind: RejectionKind,
    reason: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(RejectionKind::Malformed, reason)
    }

    pub fn missing(reason: impl Into<String>) -> Self {
        Self::new(RejectionKind::MissingField, reason)
    }

    pub fn out_of_range(reason: impl Into<String>) -> Self {
        Self::new(RejectionKind::OutOfRange, reason)
    }

    pub fn disallowed(reason: impl Into<String>) -> Self {
        Self::new(RejectionKind::Disallowed, reason)
    }

    pub fn banned(reason: impl Into<String>) -> Self {
        Self::new(RejectionKind::BannedContent, reason)
    }

    pub fn unsupported() -> Self {
        Self::new(RejectionKind::Unsupported, "unsupported protocol")
    }

    pub fn line_too_long() -> Self {
        Self::out_of_range("line too long")
    }

    pub fn kind(&self) -> RejectionKind {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for Rejection {}

// ============================================================================
// Canonicalizer Trait
// ============================================================================

/// Parses, validates and canonicalizes links of one format
///
/// Implementations hold only read-only configuration, so one instance can
/// serve many threads at once.
pub trait LinkCanonicalizer: Send + Sync {
    /// Returns the scheme this canonicalizer handles (e.g., "vless", "ss")
    fn scheme(&self) -> &str;

    /// Checks if this canonicalizer handles the given line
    fn matches(&self, line: &str) -> bool {
        has_scheme(line, self.scheme())
    }

    /// Returns the canonical form of a line, or the reason it was rejected
    fn process(&self, line: &str) -> Result<String, Rejection>;
}

// ============================================================================
// Link Policy
// ============================================================================

/// Read-only configuration a canonicalizer checks links against
#[derive(Debug, Clone, Default)]
pub struct LinkPolicy {
    rule: Option<Rule>,
    banned: Arc<BannedWords>,
}

impl LinkPolicy {
    pub fn new(rule: Rule, banned: Arc<BannedWords>) -> Self {
        Self {
            rule: Some(rule),
            banned,
        }
    }

    /// Policy for one protocol drawn from a loaded rule set
    ///
    /// A protocol with no configured rule, or an empty one, is left
    /// unconstrained.
    pub fn for_protocol(rules: &RuleSet, protocol: &str, banned: Arc<BannedWords>) -> Self {
        Self {
            rule: rules.get(protocol).filter(|rule| !rule.is_empty()).cloned(),
            banned,
        }
    }

    /// Rejects a label that contains a banned term
    pub fn check_label(&self, label: &str) -> Result<(), Rejection> {
        match self.banned.find_in_label(label) {
            Some(word) => Err(Rejection::banned(format!("bad word in name: {word:?}"))),
            None => Ok(()),
        }
    }

    /// Evaluates the protocol rule, prefixing a failure with the protocol name
    pub fn enforce(&self, protocol: &str, params: &ParameterMap) -> Result<(), Rejection> {
        trace!("Evaluating {} rule over {} parameter(s)", protocol, params.len());
        match validate(params, self.rule.as_ref()) {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(reason) => {
                Err(Rejection::disallowed(format!("{protocol}: {reason}")))
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Multi-valued query parameters, sorted by name
pub type QueryValues = BTreeMap<String, Vec<String>>;

/// Checks for a case-insensitive `scheme://` prefix
pub fn has_scheme(line: &str, scheme: &str) -> bool {
    let bytes = line.as_bytes();
    let n = scheme.len();
    bytes.len() >= n + 3
        && bytes[..n].eq_ignore_ascii_case(scheme.as_bytes())
        && &bytes[n..n + 3] == b"://"
}

/// Removes a case-insensitive `scheme://` prefix
pub fn strip_scheme<'a>(line: &'a str, scheme: &str) -> Option<&'a str> {
    if has_scheme(line, scheme) {
        line.get(scheme.len() + 3..)
    } else {
        None
    }
}

/// Rejects lines over the length bound
pub fn check_length(line: &str) -> Result<(), Rejection> {
    if line.len() > MAX_LINE_LENGTH {
        return Err(Rejection::line_too_long());
    }
    Ok(())
}

/// Parses a line as a URL of any scheme
///
/// A numeric port above 65535 fails URL parsing; it is reported as out of
/// range rather than as a malformed link.
pub fn parse_url(line: &str, protocol: &str) -> Result<Url, Rejection> {
    Url::parse(line).map_err(|e| {
        trace!("Failed to parse {} URL: {}", protocol, e);
        if authority_port_overflows(line) {
            Rejection::out_of_range(format!("{protocol}: port out of range"))
        } else {
            Rejection::malformed(format!("invalid {protocol} URL format"))
        }
    })
}

/// Parses a line as a URL of the expected scheme
pub fn parse_link(line: &str, scheme: &str, protocol: &str) -> Result<Url, Rejection> {
    let url = parse_url(line, protocol)?;
    if url.scheme() != scheme {
        return Err(Rejection::malformed(format!("invalid {protocol} URL scheme")));
    }
    Ok(url)
}

/// Checks whether the authority carries an all-digit port too large for u16
fn authority_port_overflows(line: &str) -> bool {
    let Some((_, rest)) = line.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let server = authority.rsplit_once('@').map_or(authority, |(_, server)| server);
    let Some((host, port)) = server.rsplit_once(':') else {
        return false;
    };
    // colon inside an IPv6 literal
    if host.starts_with('[') && !host.ends_with(']') {
        return false;
    }
    !port.is_empty()
        && port.bytes().all(|b| b.is_ascii_digit())
        && !port.parse::<u32>().is_ok_and(|port| port <= 65535)
}

/// Extracts and validates the server host and port of a URL
pub fn host_port(url: &Url, protocol: &str) -> Result<HostPort, Rejection> {
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        _ => return Err(Rejection::missing(format!("{protocol}: missing host"))),
    };

    let port = url
        .port()
        .ok_or_else(|| Rejection::missing(format!("{protocol}: missing port")))?;

    if !is_valid_port(i64::from(port)) {
        return Err(Rejection::out_of_range(format!("{protocol}: port out of range")));
    }
    if !is_valid_host(&host) {
        return Err(Rejection::malformed(format!("{protocol}: invalid host")));
    }

    Ok(HostPort { host, port })
}

/// Collects query parameters, keeping every value of repeated names
pub fn query_values(url: &Url) -> QueryValues {
    let mut values = QueryValues::new();
    for (name, value) in url.query_pairs() {
        values
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    values
}

/// Flattens query parameters to their first value per name
pub fn flatten_query(values: &QueryValues) -> ParameterMap {
    values
        .iter()
        .filter_map(|(name, list)| list.first().map(|v| (name.clone(), v.clone())))
        .collect()
}

/// Form-encodes query parameters in lexicographic name order
pub fn encode_query(values: &QueryValues) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, list) in values {
        for value in list {
            serializer.append_pair(name, value);
        }
    }
    serializer.finish()
}

/// Assembles `scheme://userinfo@host:port[path][?query][#fragment]`
pub fn assemble_link(
    scheme: &str,
    userinfo: &str,
    server: &HostPort,
    path: &str,
    query: &QueryValues,
    fragment: Option<&str>,
) -> String {
    let mut link = format!("{scheme}://{userinfo}@{server}{path}");
    if !query.is_empty() {
        link.push('?');
        link.push_str(&encode_query(query));
    }
    if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
        link.push('#');
        link.push_str(fragment);
    }
    link
}
