//! VLESS protocol canonicalizer
//!
//! This module provides canonicalization for VLESS (vless://) links.
//! Format: vless://uuid@host:port[/path]?params#tag

use tracing::trace;

use super::{
    LinkCanonicalizer, LinkPolicy, QueryValues, Rejection, assemble_link, check_length,
    flatten_query, host_port, parse_link, query_values,
};

const MAX_ID_LENGTH: usize = 64;

/// Certificate-verification toggles that are never forwarded
const STRIPPED_PARAMS: [&str; 2] = ["insecure", "allowInsecure"];

// ============================================================================
// VLESS Canonicalizer
// ============================================================================

/// Canonicalizer for VLESS (vless://) links
///
/// The identifier is only checked for presence; its format is left to the
/// configured policy. A missing `security` parameter is evaluated as `none`.
pub struct VLessCanonicalizer {
    policy: LinkPolicy,
}

impl VLessCanonicalizer {
    pub fn new(policy: LinkPolicy) -> Self {
        Self { policy }
    }
}

impl LinkCanonicalizer for VLessCanonicalizer {
    fn scheme(&self) -> &str {
        "vless"
    }

    fn process(&self, line: &str) -> Result<String, Rejection> {
        check_length(line)?;
        trace!("Canonicalizing VLESS link");
        let url = parse_link(line, "vless", "VLESS")?;

        let uuid = url.username();
        if uuid.is_empty() || uuid.len() > MAX_ID_LENGTH {
            return Err(Rejection::missing("VLESS: missing or invalid UUID"));
        }

        let server = host_port(&url, "VLESS")?;

        self.policy.check_label(url.fragment().unwrap_or_default())?;

        let mut query = query_values(&url);
        for name in STRIPPED_PARAMS {
            query.remove(name);
        }
        collapse_alpn(&mut query);

        let mut params = flatten_query(&query);
        params
            .entry("security".to_string())
            .or_insert_with(|| "none".to_string());
        self.policy.enforce("VLESS", &params)?;

        Ok(assemble_link(
            "vless",
            uuid,
            &server,
            url.path(),
            &query,
            url.fragment(),
        ))
    }
}

/// Keeps only the first protocol of an `alpn` list, dropping an empty list
fn collapse_alpn(query: &mut QueryValues) {
    let first = query.get("alpn").map(|values| {
        values
            .first()
            .and_then(|list| list.split(',').map(str::trim).find(|p| !p.is_empty()))
            .map(str::to_string)
    });

    match first {
        Some(Some(protocol)) => {
            query.insert("alpn".to_string(), vec![protocol]);
        }
        Some(None) => {
            query.remove("alpn");
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::filter::BannedWords;
    use crate::parser::RejectionKind;
    use crate::policy::Rule;

    const UUID: &str = "11111111-1111-1111-1111-111111111111";

    fn canonicalizer(rule: Rule) -> VLessCanonicalizer {
        VLessCanonicalizer::new(LinkPolicy::new(
            rule,
            Arc::new(BannedWords::from_words(["blocked"])),
        ))
    }

    fn forbid_security_none() -> Rule {
        Rule {
            forbidden_values: BTreeMap::from([("security".to_string(), vec!["none".to_string()])]),
            ..Default::default()
        }
    }

    #[test]
    fn test_vless_basic_sorted_query() {
        let parser = canonicalizer(Rule::default());
        let uri = format!(
            "vless://{UUID}@example.com:443?security=tls&sni=example.com&encryption=none#ok"
        );
        let canonical = parser.process(&uri).unwrap();
        assert_eq!(
            canonical,
            format!("vless://{UUID}@example.com:443?encryption=none&security=tls&sni=example.com#ok")
        );
    }

    #[test]
    fn test_vless_idempotent() {
        let parser = canonicalizer(Rule::default());
        let uri = format!(
            "VLESS://{UUID}@example.com:443/path?type=ws&path=%2Fws%3Fed%3D2048&alpn=h2,http/1.1#My%20Node"
        );
        let first = parser.process(&uri).unwrap();
        let second = parser.process(&first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_vless_strips_insecure_toggles() {
        let parser = canonicalizer(Rule::default());
        let uri = format!(
            "vless://{UUID}@example.com:443?security=tls&insecure=1&allowInsecure=true&sni=a.example.com"
        );
        let canonical = parser.process(&uri).unwrap();
        assert!(!canonical.contains("insecure"));
        assert!(!canonical.contains("allowInsecure"));
        assert!(canonical.contains("sni=a.example.com"));
    }

    #[test]
    fn test_vless_toggles_stripped_before_policy() {
        // A rule forbidding the toggle never sees it
        let rule = Rule {
            forbidden_values: BTreeMap::from([("allowInsecure".to_string(), vec!["1".to_string()])]),
            ..Default::default()
        };
        let parser = canonicalizer(rule);
        let uri = format!("vless://{UUID}@example.com:443?security=tls&allowInsecure=1");
        assert!(parser.process(&uri).is_ok());
    }

    #[test]
    fn test_vless_missing_security_defaults_to_none() {
        let parser = canonicalizer(forbid_security_none());
        let uri = format!("vless://{UUID}@example.com:443?sni=example.com");
        let err = parser.process(&uri).unwrap_err();
        assert_eq!(err.reason(), "VLESS: forbidden value for security: \"none\"");
        assert_eq!(err.kind(), RejectionKind::Disallowed);
    }

    #[test]
    fn test_vless_default_security_not_serialized() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@example.com:443?sni=example.com");
        let canonical = parser.process(&uri).unwrap();
        assert!(!canonical.contains("security"));
    }

    #[test]
    fn test_vless_required_sni() {
        let rule = Rule {
            conditional: vec![crate::policy::Condition {
                when: BTreeMap::from([("security".to_string(), "tls".to_string())]),
                require: vec!["sni".to_string()],
            }],
            ..Default::default()
        };
        let parser = canonicalizer(rule);
        let uri = format!("vless://{UUID}@example.com:443?security=tls&encryption=none");
        let err = parser.process(&uri).unwrap_err();
        assert!(err.reason().contains("sni"));
    }

    #[test]
    fn test_vless_alpn_collapsed() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@example.com:443?security=tls&alpn=h2,http/1.1");
        let canonical = parser.process(&uri).unwrap();
        assert!(canonical.contains("alpn=h2&"), "{canonical}");
        assert!(!canonical.contains("http"));
    }

    #[test]
    fn test_vless_empty_alpn_dropped() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@example.com:443?alpn=,&security=tls");
        let canonical = parser.process(&uri).unwrap();
        assert!(!canonical.contains("alpn"));
    }

    #[test]
    fn test_vless_path_preserved() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@example.com:443/sub?security=tls#x");
        let canonical = parser.process(&uri).unwrap();
        assert_eq!(
            canonical,
            format!("vless://{UUID}@example.com:443/sub?security=tls#x")
        );
    }

    #[test]
    fn test_vless_ipv6_host() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@[::1]:443?security=tls#ipv6-node");
        let canonical = parser.process(&uri).unwrap();
        assert!(canonical.contains("@[::1]:443?"));
    }

    #[test]
    fn test_vless_banned_label() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@example.com:443?security=tls#%2562locked-server");
        let err = parser.process(&uri).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::BannedContent);
    }

    #[test]
    fn test_vless_missing_uuid() {
        let parser = canonicalizer(Rule::default());
        let err = parser.process("vless://@example.com:443").unwrap_err();
        assert_eq!(err.reason(), "VLESS: missing or invalid UUID");
    }

    #[test]
    fn test_vless_oversized_uuid() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{}@example.com:443", "a".repeat(65));
        assert!(parser.process(&uri).is_err());
    }

    #[test]
    fn test_vless_missing_port() {
        let parser = canonicalizer(Rule::default());
        let err = parser.process("vless://uuid@example.com").unwrap_err();
        assert_eq!(err.reason(), "VLESS: missing port");
    }

    #[test]
    fn test_vless_invalid_host() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@localhost:443?security=tls&sni=localhost");
        let err = parser.process(&uri).unwrap_err();
        assert!(err.reason().contains("invalid host"));
    }

    #[test]
    fn test_vless_invalid_uri() {
        let parser = canonicalizer(Rule::default());
        assert!(parser.process("vless://").is_err());
        assert!(parser.process("not-a-uri").is_err());
    }

    #[test]
    fn test_vless_line_too_long() {
        let parser = canonicalizer(Rule::default());
        let uri = format!("vless://{UUID}@example.com:443#{}", "a".repeat(4096));
        assert_eq!(parser.process(&uri).unwrap_err().reason(), "line too long");
    }

    #[test]
    fn test_scheme() {
        assert_eq!(canonicalizer(Rule::default()).scheme(), "vless");
    }

    #[test]
    fn test_matches() {
        let parser = canonicalizer(Rule::default());
        assert!(parser.matches("vless://uuid@host:443"));
        assert!(parser.matches("Vless://uuid@host:443"));
        assert!(!parser.matches("vmess://abc"));
        assert!(!parser.matches("not-a-uri"));
    }
}
