//! Trojan protocol canonicalizer
//!
//! Format: trojan://password@host:port?params#tag

use tracing::trace;

use super::{
    LinkCanonicalizer, LinkPolicy, Rejection, assemble_link, check_length, flatten_query,
    host_port, parse_link, query_values,
};

// ============================================================================
// Trojan Canonicalizer
// ============================================================================

/// Canonicalizer for Trojan (trojan://) links
///
/// Any path on the input is dropped from the canonical form.
pub struct TrojanCanonicalizer {
    policy: LinkPolicy,
}

impl TrojanCanonicalizer {
    pub fn new(policy: LinkPolicy) -> Self {
        Self { policy }
    }
}

impl LinkCanonicalizer for TrojanCanonicalizer {
    fn scheme(&self) -> &str {
        "trojan"
    }

    fn process(&self, line: &str) -> Result<String, Rejection> {
        check_length(line)?;
        trace!("Canonicalizing Trojan link");
        let url = parse_link(line, "trojan", "Trojan")?;

        let password = url.username();
        if password.is_empty() {
            return Err(Rejection::missing("Trojan: missing password"));
        }

        let server = host_port(&url, "Trojan")?;

        self.policy.check_label(url.fragment().unwrap_or_default())?;

        let query = query_values(&url);
        self.policy.enforce("Trojan", &flatten_query(&query))?;

        Ok(assemble_link(
            "trojan",
            password,
            &server,
            "",
            &query,
            url.fragment(),
        ))
    }
}
