//! VMess protocol canonicalizer
//!
//! This module provides canonicalization for VMess (vmess://) links.
//! VMess links carry a Base64 encoded JSON object with the connection details.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use tracing::trace;

use crate::parser::address::{is_valid_host, is_valid_port};
use crate::parser::base64::{decode_flexible, encode_standard};
use crate::policy::ParameterMap;

use super::{LinkCanonicalizer, LinkPolicy, Rejection, check_length, strip_scheme};

// ============================================================================
// VMess Canonicalizer
// ============================================================================

/// Canonicalizer for VMess (vmess://) links
///
/// Format: vmess://BASE64({ "v": "2", "ps": "name", "add": "host", "port": 443, ... })
///
/// Every string or number field of the payload is exposed to the policy rule
/// under its JSON key. The accepted payload is re-serialized with sorted keys
/// and padded standard Base64.
pub struct VMessCanonicalizer {
    policy: LinkPolicy,
}

impl VMessCanonicalizer {
    pub fn new(policy: LinkPolicy) -> Self {
        Self { policy }
    }
}

impl LinkCanonicalizer for VMessCanonicalizer {
    fn scheme(&self) -> &str {
        "vmess"
    }

    fn process(&self, line: &str) -> Result<String, Rejection> {
        check_length(line)?;
        trace!("Canonicalizing VMess link");

        let payload = strip_scheme(line, "vmess")
            .ok_or_else(|| Rejection::malformed("not a VMess link"))?;
        if payload.is_empty() {
            return Err(Rejection::missing("empty VMess payload"));
        }

        let decoded = decode_flexible(payload).map_err(|e| {
            trace!("VMess payload is not Base64: {}", e);
            Rejection::malformed("invalid VMess base64 encoding")
        })?;

        let fields = match serde_json::from_slice::<Value>(&decoded) {
            Ok(Value::Object(fields)) => fields,
            _ => return Err(Rejection::malformed("invalid VMess JSON format")),
        };

        let address = string_field(&fields, "add");
        let id = string_field(&fields, "id");
        if address.is_empty() || id.is_empty() {
            return Err(Rejection::missing("missing server address or UUID"));
        }

        let port = parse_port(fields.get("port"))?;
        if !is_valid_port(port) {
            return Err(Rejection::out_of_range("invalid port number"));
        }
        if !is_valid_host(address) {
            return Err(Rejection::malformed("invalid server host"));
        }
        trace!("VMess server {}:{}", address, port);

        self.policy.check_label(string_field(&fields, "ps"))?;

        self.policy.enforce("VMess", &flatten_fields(&fields))?;

        // Sort explicitly so the output does not depend on serde_json's map type
        let ordered: BTreeMap<&String, &Value> = fields.iter().collect();
        let json = serde_json::to_string(&ordered)
            .map_err(|_| Rejection::malformed("failed to re-encode VMess config"))?;

        Ok(format!("vmess://{}", encode_standard(json)))
    }
}

// ============================================================================
// Field Helpers
// ============================================================================

/// String value of a field, empty when absent or not a string
fn string_field<'a>(fields: &'a Map<String, Value>, name: &str) -> &'a str {
    fields.get(name).and_then(Value::as_str).unwrap_or_default()
}

/// Reads the port from a JSON number or numeric string
fn parse_port(value: Option<&Value>) -> Result<i64, Rejection> {
    let port = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<f64>()
                .map_err(|_| Rejection::malformed("invalid port in VMess config"))?,
        ),
        _ => None,
    }
    .ok_or_else(|| Rejection::missing("missing or invalid port in VMess config"))?;

    if !port.is_finite() || port.fract() != 0.0 {
        return Err(Rejection::out_of_range("invalid port number"));
    }
    Ok(port as i64)
}

/// Flattens string and number fields into policy parameters
///
/// Numbers with an integral value are written without a fractional part.
fn flatten_fields(fields: &Map<String, Value>) -> ParameterMap {
    fields
        .iter()
        .filter_map(|(name, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => format_number(n),
                _ => return None,
            };
            Some((name.clone(), text))
        })
        .collect()
}

fn format_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::filter::BannedWords;
    use crate::parser::RejectionKind;
    use crate::parser::base64::{STANDARD, URL_SAFE_NO_PAD};
    use crate::policy::Rule;
    use base64::Engine;

    const VALID_JSON: &str = r#"{"v":"2","ps":"my-server","add":"example.com","port":443,"id":"12345678-1234-1234-1234-123456789abc","aid":"0","net":"tcp","type":"none","host":"","path":"","tls":"tls"}"#;

    fn encode_vmess_json(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    fn canonicalizer(rule: Rule) -> VMessCanonicalizer {
        VMessCanonicalizer::new(LinkPolicy::new(
            rule,
            Arc::new(BannedWords::from_words(["blocked"])),
        ))
    }

    fn tls_rule() -> Rule {
        Rule {
            required_params: vec!["tls".to_string()],
            allowed_values: BTreeMap::from([("tls".to_string(), vec!["tls".to_string()])]),
            ..Default::default()
        }
    }

    fn decode_output(link: &str) -> Value {
        let payload = link.strip_prefix("vmess://").unwrap();
        serde_json::from_slice(&STANDARD.decode(payload).unwrap()).unwrap()
    }

    #[test]
    fn test_vmess_basic() {
        let parser = canonicalizer(tls_rule());
        let canonical = parser.process(&encode_vmess_json(VALID_JSON)).unwrap();
        let json = decode_output(&canonical);
        assert_eq!(json["add"], "example.com");
        assert_eq!(json["id"], "12345678-1234-1234-1234-123456789abc");
        assert_eq!(json["port"], 443);
    }

    #[test]
    fn test_vmess_keys_sorted() {
        let parser = canonicalizer(Rule::default());
        let json = r#"{"v":"2","port":443,"id":"uuid","add":"example.com"}"#;
        let canonical = parser.process(&encode_vmess_json(json)).unwrap();
        let payload = canonical.strip_prefix("vmess://").unwrap();
        let text = String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(text, r#"{"add":"example.com","id":"uuid","port":443,"v":"2"}"#);
    }

    #[test]
    fn test_vmess_idempotent() {
        let parser = canonicalizer(Rule::default());
        let json = r#"{"ps":"n","add":"example.com","port":"8443","id":"uuid","scale":1.5}"#;
        let first = parser.process(&encode_vmess_json(json)).unwrap();
        let second = parser.process(&first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_vmess_port_as_string() {
        let parser = canonicalizer(Rule::default());
        let json = r#"{"add":"example.com","port":"8443","id":"uuid"}"#;
        let canonical = parser.process(&encode_vmess_json(json)).unwrap();
        // The payload is not rewritten, only validated
        assert_eq!(decode_output(&canonical)["port"], "8443");
    }

    #[test]
    fn test_vmess_port_invalid() {
        let parser = canonicalizer(Rule::default());
        let json = r#"{"add":"example.com","port":"abc","id":"uuid"}"#;
        let err = parser.process(&encode_vmess_json(json)).unwrap_err();
        assert_eq!(err.reason(), "invalid port in VMess config");

        let json = r#"{"add":"example.com","port":70000,"id":"uuid"}"#;
        let err = parser.process(&encode_vmess_json(json)).unwrap_err();
        assert_eq!(err.reason(), "invalid port number");

        let json = r#"{"add":"example.com","port":443.5,"id":"uuid"}"#;
        assert!(parser.process(&encode_vmess_json(json)).is_err());
    }

    #[test]
    fn test_vmess_port_missing() {
        let parser = canonicalizer(Rule::default());
        let json = r#"{"add":"example.com","id":"uuid"}"#;
        let err = parser.process(&encode_vmess_json(json)).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::MissingField);
    }

    #[test]
    fn test_vmess_missing_address() {
        let parser = canonicalizer(Rule::default());
        let json = r#"{"add":"","port":443,"id":"uuid"}"#;
        let err = parser.process(&encode_vmess_json(json)).unwrap_err();
        assert_eq!(err.reason(), "missing server address or UUID");
    }

    #[test]
    fn test_vmess_invalid_host() {
        let parser = canonicalizer(Rule::default());
        let json = VALID_JSON.replace(r#""add":"example.com""#, r#""add":"exa..mple.com""#);
        let err = parser.process(&encode_vmess_json(&json)).unwrap_err();
        assert_eq!(err.reason(), "invalid server host");
    }

    #[test]
    fn test_vmess_banned_name() {
        let parser = canonicalizer(Rule::default());
        let json = VALID_JSON.replace(r#""ps":"my-server""#, r#""ps":"Blocked-server""#);
        let err = parser.process(&encode_vmess_json(&json)).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::BannedContent);
    }

    #[test]
    fn test_vmess_policy_tls_empty() {
        let parser = canonicalizer(tls_rule());
        let json = VALID_JSON.replace(r#""tls":"tls""#, r#""tls":"""#);
        let err = parser.process(&encode_vmess_json(&json)).unwrap_err();
        assert!(err.reason().contains("invalid value for tls"), "{}", err);
    }

    #[test]
    fn test_vmess_policy_tls_missing() {
        let parser = canonicalizer(tls_rule());
        let json = r#"{"v":"2","ps":"s","add":"e.com","port":443,"id":"uuid","net":"tcp"}"#;
        let err = parser.process(&encode_vmess_json(json)).unwrap_err();
        assert_eq!(err.reason(), "VMess: missing required parameter: tls");
    }

    #[test]
    fn test_vmess_numbers_flattened_as_integers() {
        let rule = Rule {
            allowed_values: BTreeMap::from([
                ("aid".to_string(), vec!["0".to_string()]),
                ("port".to_string(), vec!["443".to_string()]),
            ]),
            ..Default::default()
        };
        let parser = canonicalizer(rule);
        let json = r#"{"add":"example.com","port":443.0,"id":"uuid","aid":0}"#;
        assert!(parser.process(&encode_vmess_json(json)).is_ok());
    }

    #[test]
    fn test_format_number() {
        let parse = |s: &str| serde_json::from_str::<Number>(s).unwrap();
        assert_eq!(format_number(&parse("443")), "443");
        assert_eq!(format_number(&parse("-2")), "-2");
        assert_eq!(format_number(&parse("443.0")), "443");
        assert_eq!(format_number(&parse("1.5")), "1.5");
    }

    #[test]
    fn test_vmess_url_safe_payload() {
        let parser = canonicalizer(Rule::default());
        // "?>" forces URL-safe-only characters into the encoding
        let json = r#"{"add":"example.com","port":443,"id":"uuid","ps":"??>>"}"#;
        let uri = format!("vmess://{}", URL_SAFE_NO_PAD.encode(json));
        assert!(uri.contains(['-', '_']));
        assert!(parser.process(&uri).is_ok());
    }

    #[test]
    fn test_vmess_invalid_payloads() {
        let parser = canonicalizer(Rule::default());
        assert_eq!(
            parser.process("vmess://").unwrap_err().reason(),
            "empty VMess payload"
        );
        assert_eq!(
            parser.process("vmess://not-base64!@#$").unwrap_err().reason(),
            "invalid VMess base64 encoding"
        );
        assert_eq!(
            parser.process(&encode_vmess_json("not json")).unwrap_err().reason(),
            "invalid VMess JSON format"
        );
        assert_eq!(
            parser.process(&encode_vmess_json("[1,2]")).unwrap_err().reason(),
            "invalid VMess JSON format"
        );
        assert!(parser.process("ss://wrong-scheme").is_err());
    }

    #[test]
    fn test_scheme() {
        assert_eq!(canonicalizer(Rule::default()).scheme(), "vmess");
    }

    #[test]
    fn test_matches() {
        let parser = canonicalizer(Rule::default());
        assert!(parser.matches("vmess://abc"));
        assert!(parser.matches("VMESS://abc"));
        assert!(!parser.matches("ss://abc"));
    }
}
