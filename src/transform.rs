//! Accepted-link transformation utilities
//!
//! This module provides the post-processing applied to canonical links:
//! - Link identity keys (what makes two links "the same server")
//! - Choosing the better of two duplicate links
//! - Order-preserving deduplication

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use tracing::{debug, info};
use url::Url;

// ============================================================================
// Link Identity
// ============================================================================

/// Builds the identity key of a link
///
/// The key is `scheme://host[:port][path][?k=v&...]` with a lower-cased
/// scheme and host. The port defaults to 80/443 for http/https, a `/` path is
/// treated as empty, query keys are sorted with their first value, and the
/// fragment and userinfo are left out.
pub fn link_identity_key(line: &str) -> Result<String> {
    let url = Url::parse(line).map_err(|e| anyhow!("failed to parse URL: {}", e))?;

    let scheme = url.scheme().to_ascii_lowercase();
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| anyhow!("URL has no host"))?
        .to_lowercase();

    let port = url.port().or(match scheme.as_str() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    });
    let host_with_port = match port {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };

    let path = match url.path() {
        "/" => "",
        path => path,
    };

    let mut params: Vec<(String, String)> = Vec::new();
    for (name, value) in url.query_pairs() {
        if !params.iter().any(|(existing, _)| *existing == name) {
            params.push((name.into_owned(), value.into_owned()));
        }
    }
    params.sort();

    let query = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    if query.is_empty() {
        Ok(format!("{scheme}://{host_with_port}{path}"))
    } else {
        Ok(format!("{scheme}://{host_with_port}{path}?{query}"))
    }
}

/// Key used for deduplication
///
/// VMess payloads are opaque to URL parsing, so those lines (and any line
/// whose identity key cannot be built) are keyed by their full text.
fn dedup_key(line: &str) -> String {
    if line
        .get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("vmess://"))
    {
        return line.to_string();
    }
    link_identity_key(line).unwrap_or_else(|e| {
        debug!("No identity key for line, using full text: {}", e);
        line.to_string()
    })
}

// ============================================================================
// Duplicate Selection
// ============================================================================

/// Scores a link by how much transport security its query declares
///
/// A `security` value other than `none` weighs 50, a non-empty `tls` weighs
/// 10, and each distinct query key adds 1.
fn security_score(url: &Url) -> usize {
    let mut first_values: HashMap<String, String> = HashMap::new();
    for (name, value) in url.query_pairs() {
        first_values
            .entry(name.into_owned())
            .or_insert_with(|| value.into_owned());
    }

    let mut score = first_values.len();
    if let Some(security) = first_values.get("security")
        && !security.is_empty()
        && !security.eq_ignore_ascii_case("none")
    {
        score += 50;
    }
    if first_values.get("tls").is_some_and(|tls| !tls.is_empty()) {
        score += 10;
    }
    score
}

/// Picks the better of two duplicate links
///
/// The higher-scoring link wins; ties keep `existing`. An unparseable link
/// always loses.
pub fn select_better<'a>(current: &'a str, existing: &'a str) -> &'a str {
    let current_url = match Url::parse(current) {
        Ok(url) => url,
        Err(_) => return existing,
    };
    let existing_url = match Url::parse(existing) {
        Ok(url) => url,
        Err(_) => return current,
    };

    if security_score(&current_url) > security_score(&existing_url) {
        current
    } else {
        existing
    }
}

// ============================================================================
// Deduplication
// ============================================================================

/// Removes duplicate links, keeping the best member of each group
///
/// Each surviving link takes the position of the first-seen member of its
/// group.
pub fn dedup_links(lines: Vec<String>) -> Vec<String> {
    let total = lines.len();
    let mut slots: Vec<String> = Vec::with_capacity(total);
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for line in lines {
        let key = dedup_key(&line);
        match index_by_key.get(&key) {
            Some(&index) => {
                if select_better(&line, &slots[index]) == line {
                    debug!("Replacing duplicate link for key {:?}", key);
                    slots[index] = line;
                }
            }
            None => {
                index_by_key.insert(key, slots.len());
                slots.push(line);
            }
        }
    }

    let removed = total - slots.len();
    if removed > 0 {
        info!("Removed {} duplicate link(s), {} remaining", removed, slots.len());
    }
    slots
}
