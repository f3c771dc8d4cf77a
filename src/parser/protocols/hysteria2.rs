//! Hysteria2 protocol canonicalizer
//!
//! Format: hysteria2://auth@host:port?obfs=salamander&obfs-password=...#tag
//! The short scheme `hy2://` is accepted and kept as written.

use tracing::trace;

use crate::policy::ParameterMap;

use super::{
    LinkCanonicalizer, LinkPolicy, Rejection, assemble_link, check_length, flatten_query,
    has_scheme, host_port, parse_url, query_values,
};

/// The only obfuscation method allowed in public subscriptions
const SALAMANDER: &str = "salamander";

// ============================================================================
// Hysteria2 Canonicalizer
// ============================================================================

/// Canonicalizer for Hysteria2 (hysteria2:// and hy2://) links
///
/// Unlike the other formats, obfuscation is checked unconditionally before the
/// configured rule runs: links without salamander obfuscation are rejected.
pub struct Hysteria2Canonicalizer {
    policy: LinkPolicy,
}

impl Hysteria2Canonicalizer {
    pub fn new(policy: LinkPolicy) -> Self {
        Self { policy }
    }
}

impl LinkCanonicalizer for Hysteria2Canonicalizer {
    fn scheme(&self) -> &str {
        "hysteria2"
    }

    fn matches(&self, line: &str) -> bool {
        has_scheme(line, "hysteria2") || has_scheme(line, "hy2")
    }

    fn process(&self, line: &str) -> Result<String, Rejection> {
        check_length(line)?;
        trace!("Canonicalizing Hysteria2 link");

        let url = parse_url(line, "Hysteria2")?;
        if !matches!(url.scheme(), "hysteria2" | "hy2") {
            return Err(Rejection::malformed(
                "invalid Hysteria2 scheme (expected 'hysteria2' or 'hy2')",
            ));
        }

        let userinfo = match url.password() {
            Some(password) => format!("{}:{}", url.username(), password),
            None => url.username().to_string(),
        };
        if url.username().is_empty() && url.password().is_none() {
            return Err(Rejection::missing(
                "missing auth info (UUID or username) in Hysteria2",
            ));
        }

        let server = host_port(&url, "Hysteria2")?;

        self.policy.check_label(url.fragment().unwrap_or_default())?;

        let query = query_values(&url);
        let params = flatten_query(&query);
        check_obfuscation(&params)?;
        self.policy.enforce("Hysteria2", &params)?;

        Ok(assemble_link(
            url.scheme(),
            &userinfo,
            &server,
            "",
            &query,
            url.fragment(),
        ))
    }
}

/// Requires salamander obfuscation with a password
fn check_obfuscation(params: &ParameterMap) -> Result<(), Rejection> {
    let obfs = params.get("obfs").map(String::as_str).unwrap_or_default();
    if obfs.is_empty() {
        return Err(Rejection::missing(
            "Hysteria2: obfs parameter is missing (required for public subscriptions)",
        ));
    }
    if obfs != SALAMANDER {
        return Err(Rejection::disallowed(format!(
            "Hysteria2: unsupported obfs method {obfs:?} (only 'salamander' allowed)"
        )));
    }

    let has_password = params
        .get("obfs-password")
        .is_some_and(|password| !password.is_empty());
    if !has_password {
        return Err(Rejection::missing(
            "Hysteria2: obfs-password is missing (required when obfs is used)",
        ));
    }
    Ok(())
}
