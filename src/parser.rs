//! Subscription and Link Parsing Module
//!
//! This module provides functionality for:
//! - Decoding subscription bodies (plain or Base64-wrapped URI lists)
//! - Validating server addresses shared by every link format
//! - Canonicalizing protocol links (vless://, vmess://, trojan://, ss://, hysteria2://)
//! - Dispatching each line to the canonicalizer for its scheme

pub mod address;
pub mod base64;
pub mod detection;
pub mod dispatch;
pub mod protocols;

pub use address::{HostPort, is_valid_host, is_valid_port};
pub use detection::{SubscriptionType, content_lines, detect_subscription_type, prepare_content};
pub use dispatch::Dispatcher;
pub use protocols::{
    Hysteria2Canonicalizer, LinkCanonicalizer, LinkPolicy, MAX_LINE_LENGTH, Rejection,
    RejectionKind, ShadowsocksCanonicalizer, TrojanCanonicalizer, VLessCanonicalizer,
    VMessCanonicalizer,
};
