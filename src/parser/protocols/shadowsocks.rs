//! Shadowsocks protocol canonicalizer
//!
//! Accepted input forms:
//! - SIP002: ss://BASE64(cipher:password)@host:port[/][?plugin=...]#tag
//! - Plain userinfo: ss://cipher:password@host:port#tag
//! - Legacy: ss://BASE64(cipher:password@host:port)#tag
//!
//! All of them are written back in the SIP002 form with unpadded URL-safe
//! Base64 userinfo.

use std::borrow::Cow;

use tracing::trace;

use crate::parser::base64::{decode_flexible, encode_url_safe_no_pad};

use super::{
    LinkCanonicalizer, LinkPolicy, Rejection, assemble_link, check_length, flatten_query,
    host_port, parse_link, query_values, strip_scheme,
};

// ============================================================================
// Shadowsocks Canonicalizer
// ============================================================================

/// Canonicalizer for Shadowsocks (ss://) links
///
/// The cipher is exposed to the policy rule as the `method` parameter,
/// alongside the query parameters.
pub struct ShadowsocksCanonicalizer {
    policy: LinkPolicy,
}

impl ShadowsocksCanonicalizer {
    pub fn new(policy: LinkPolicy) -> Self {
        Self { policy }
    }
}

impl LinkCanonicalizer for ShadowsocksCanonicalizer {
    fn scheme(&self) -> &str {
        "ss"
    }

    fn process(&self, line: &str) -> Result<String, Rejection> {
        check_length(line)?;
        trace!("Canonicalizing Shadowsocks link");

        let line = expand_legacy(line)?;
        let url = parse_link(&line, "ss", "Shadowsocks")?;

        if url.username().is_empty() {
            return Err(Rejection::missing("Shadowsocks: missing user info"));
        }
        let (cipher, password) = decode_credentials(url.username(), url.password())?;

        if cipher.is_empty() || password.is_empty() {
            return Err(Rejection::missing("Shadowsocks: missing cipher or password"));
        }

        let server = host_port(&url, "Shadowsocks")?;

        self.policy.check_label(url.fragment().unwrap_or_default())?;

        if !is_valid_cipher(&cipher) {
            return Err(Rejection::malformed("Shadowsocks: invalid cipher"));
        }

        let query = query_values(&url);
        let mut params = flatten_query(&query);
        params.insert("method".to_string(), cipher.clone());
        self.policy.enforce("Shadowsocks", &params)?;

        let userinfo = encode_url_safe_no_pad(format!("{cipher}:{password}"));
        Ok(assemble_link(
            "ss",
            &userinfo,
            &server,
            "",
            &query,
            url.fragment(),
        ))
    }
}

// ============================================================================
// Userinfo Decoding
// ============================================================================

/// Rewrites a legacy whole-payload link into SIP002 form
///
/// A link is legacy when the part before any `#` or `?` has no `@`. Other
/// links are returned unchanged.
fn expand_legacy(line: &str) -> Result<Cow<'_, str>, Rejection> {
    let rest = strip_scheme(line, "ss")
        .ok_or_else(|| Rejection::malformed("invalid Shadowsocks URL scheme"))?;

    let (body, fragment) = match rest.split_once('#') {
        Some((body, fragment)) => (body, Some(fragment)),
        None => (rest, None),
    };
    let (payload, query) = match body.split_once('?') {
        Some((payload, query)) => (payload, Some(query)),
        None => (body, None),
    };
    if payload.contains('@') {
        return Ok(Cow::Borrowed(line));
    }

    trace!("Expanding legacy Shadowsocks payload");
    let decoded = decode_flexible(payload)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| Rejection::malformed("Shadowsocks: invalid base64 payload"))?;
    let (credentials, server) = decoded
        .rsplit_once('@')
        .ok_or_else(|| Rejection::malformed("Shadowsocks: invalid legacy payload"))?;

    let mut expanded = format!("ss://{}@{}", encode_url_safe_no_pad(credentials), server);
    if let Some(query) = query {
        expanded.push('?');
        expanded.push_str(query);
    }
    if let Some(fragment) = fragment {
        expanded.push('#');
        expanded.push_str(fragment);
    }
    Ok(Cow::Owned(expanded))
}

/// Extracts cipher and password from the URL userinfo
///
/// With a password component the userinfo is plain percent-encoded text;
/// otherwise the username is Base64 of `cipher:password`.
fn decode_credentials(username: &str, password: Option<&str>) -> Result<(String, String), Rejection> {
    let percent_decode = |s: &str| {
        urlencoding::decode(s)
            .map(Cow::into_owned)
            .map_err(|_| Rejection::malformed("Shadowsocks: invalid user info encoding"))
    };

    if let Some(password) = password {
        return Ok((percent_decode(username)?, percent_decode(password)?));
    }

    let encoded = percent_decode(username)?;
    let decoded = decode_flexible(&encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| Rejection::malformed("Shadowsocks: invalid base64 user info"))?;

    decoded
        .split_once(':')
        .map(|(cipher, password)| (cipher.to_string(), password.to_string()))
        .ok_or_else(|| Rejection::malformed("Shadowsocks: invalid user info format"))
}

/// Cipher names are limited to alphanumerics and `_`, `+`, `-`
fn is_valid_cipher(cipher: &str) -> bool {
    cipher
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}
