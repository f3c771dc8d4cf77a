//! Subscription format detection
//!
//! This module provides functionality for detecting whether a subscription body
//! is a plain URI list or a Base64-wrapped one, unwrapping it when needed, and
//! splitting it into candidate link lines.

use tracing::debug;

use super::base64::auto_decode_base64;

/// Scheme markers whose presence identifies a readable URI list
pub const SCHEME_MARKERS: [&str; 6] = [
    "vless://",
    "vmess://",
    "trojan://",
    "ss://",
    "hysteria2://",
    "hy2://",
];

// ============================================================================
// Subscription Type Detection
// ============================================================================

/// Detected subscription content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Plain text URI list (one URI per line)
    PlainUriList,
    /// Base64 encoded URI list
    Base64UriList,
    /// Unknown format
    Unknown,
}

impl std::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionType::PlainUriList => write!(f, "Plain URI List"),
            SubscriptionType::Base64UriList => write!(f, "Base64 URI List"),
            SubscriptionType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Checks if raw content contains any known scheme marker
pub fn contains_proxy_links(content: &[u8]) -> bool {
    SCHEME_MARKERS.iter().any(|marker| {
        content
            .windows(marker.len())
            .any(|window| window == marker.as_bytes())
    })
}

/// Detects the type of subscription content
pub fn detect_subscription_type(content: &[u8]) -> SubscriptionType {
    debug!(
        "Detecting subscription type, content length: {} bytes",
        content.len()
    );

    if contains_proxy_links(content) {
        debug!("Detected plain URI list format");
        return SubscriptionType::PlainUriList;
    }

    if contains_proxy_links(&auto_decode_base64(content)) {
        debug!("Detected Base64 encoded URI list format");
        return SubscriptionType::Base64UriList;
    }

    debug!("Unable to detect subscription format");
    SubscriptionType::Unknown
}

/// Returns the subscription body as text, unwrapping Base64 if needed
///
/// The decoded form is used only when it is the one carrying scheme markers;
/// anything undetected is passed through so each line is rejected on its own.
/// Invalid UTF-8 is replaced lossily.
pub fn prepare_content(content: &[u8]) -> String {
    match detect_subscription_type(content) {
        SubscriptionType::Base64UriList => {
            String::from_utf8_lossy(&auto_decode_base64(content)).into_owned()
        }
        SubscriptionType::PlainUriList | SubscriptionType::Unknown => {
            String::from_utf8_lossy(content).into_owned()
        }
    }
}

/// Splits content into candidate link lines
///
/// A trailing carriage return is removed. Blank lines and `#` comment lines
/// are skipped.
pub fn content_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::base64::encode_standard;

    const PLAIN: &str = "vless://uuid@example.com:443#a\ntrojan://pw@example.com:443#b\n";

    #[test]
    fn test_detect_plain_uri_list() {
        assert_eq!(
            detect_subscription_type(PLAIN.as_bytes()),
            SubscriptionType::PlainUriList
        );
    }

    #[test]
    fn test_detect_base64_uri_list() {
        let encoded = encode_standard(PLAIN);
        assert_eq!(
            detect_subscription_type(encoded.as_bytes()),
            SubscriptionType::Base64UriList
        );
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(
            detect_subscription_type(b"just some text"),
            SubscriptionType::Unknown
        );
        assert_eq!(detect_subscription_type(b""), SubscriptionType::Unknown);
    }

    #[test]
    fn test_contains_proxy_links() {
        assert!(contains_proxy_links(b"junk\nhy2://a@b.com:1"));
        assert!(!contains_proxy_links(b"http://example.com"));
        assert!(!contains_proxy_links(b"ssr://abc"));
    }

    #[test]
    fn test_prepare_content_plain_untouched() {
        assert_eq!(prepare_content(PLAIN.as_bytes()), PLAIN);
    }

    #[test]
    fn test_prepare_content_base64_with_line_breaks() {
        let encoded = encode_standard(PLAIN);
        let (head, tail) = encoded.split_at(10);
        let wrapped = format!("{head}\r\n{tail}\n");
        assert_eq!(prepare_content(wrapped.as_bytes()), PLAIN);
    }

    #[test]
    fn test_prepare_content_base64_without_links_untouched() {
        let encoded = encode_standard("hello world, nothing here");
        assert_eq!(prepare_content(encoded.as_bytes()), encoded);
    }

    #[test]
    fn test_prepare_content_lossy_utf8() {
        let content = b"vless://a@b.com:1#\xff\n";
        assert!(prepare_content(content).contains('\u{fffd}'));
    }

    #[test]
    fn test_content_lines() {
        let content = "# header\r\nvless://a\r\n\n   \nvmess://b\n#comment\ntrojan://c";
        let lines: Vec<&str> = content_lines(content).collect();
        assert_eq!(lines, vec!["vless://a", "vmess://b", "trojan://c"]);
    }

    #[test]
    fn test_content_lines_keeps_inner_whitespace() {
        let lines: Vec<&str> = content_lines(" vless://a \n").collect();
        assert_eq!(lines, vec![" vless://a "]);
    }

    #[test]
    fn test_subscription_type_display() {
        assert_eq!(
            format!("{}", SubscriptionType::Base64UriList),
            "Base64 URI List"
        );
        assert_eq!(
            format!("{}", SubscriptionType::PlainUriList),
            "Plain URI List"
        );
        assert_eq!(format!("{}", SubscriptionType::Unknown), "Unknown");
    }
}
