//! Base64 decoding utilities
//!
//! Subscription links carry Base64 in several dialects: standard or URL-safe
//! alphabet, with or without padding. This module picks the dialect from the
//! shape of the input, and provides the whole-document auto-decode used when a
//! subscription body is served Base64-wrapped.

use std::borrow::Cow;

use anyhow::{Result, anyhow};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::trace;

// ============================================================================
// Engines
// ============================================================================

// Publishers often emit a non-zero final sextet; accept it rather than reject
// an otherwise readable credential.
const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true);

const PADDED: GeneralPurposeConfig =
    LENIENT.with_decode_padding_mode(DecodePaddingMode::RequireCanonical);

const UNPADDED: GeneralPurposeConfig = LENIENT
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::RequireNone);

/// Standard alphabet, `=` padding required
pub const STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PADDED);
/// Standard alphabet, no padding
pub const STANDARD_NO_PAD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, UNPADDED);
/// URL-safe alphabet, `=` padding required
pub const URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, PADDED);
/// URL-safe alphabet, no padding
pub const URL_SAFE_NO_PAD: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, UNPADDED);

// ============================================================================
// Variant Detection
// ============================================================================

/// Base64 dialect, inferred from the encoded text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Variant {
    Standard,
    StandardNoPad,
    UrlSafe,
    UrlSafeNoPad,
}

impl Base64Variant {
    /// Infers the dialect: `-`/`_` select the URL-safe alphabet, a trailing
    /// `=` selects the padded form.
    pub fn detect(s: &str) -> Self {
        let url_safe = s.contains(['-', '_']);
        let padded = s.ends_with('=');
        match (url_safe, padded) {
            (true, true) => Self::UrlSafe,
            (true, false) => Self::UrlSafeNoPad,
            (false, true) => Self::Standard,
            (false, false) => Self::StandardNoPad,
        }
    }

    fn engine(self) -> &'static GeneralPurpose {
        match self {
            Self::Standard => &STANDARD,
            Self::StandardNoPad => &STANDARD_NO_PAD,
            Self::UrlSafe => &URL_SAFE,
            Self::UrlSafeNoPad => &URL_SAFE_NO_PAD,
        }
    }
}

/// Decodes Base64 using the dialect inferred from the input shape
///
/// Unlike a try-everything decoder, exactly one dialect is attempted, so a
/// string mixing alphabets or with misplaced padding is rejected.
pub fn decode_flexible(s: &str) -> Result<Vec<u8>> {
    let variant = Base64Variant::detect(s);
    trace!("Decoding {} bytes of Base64 as {:?}", s.len(), variant);
    variant
        .engine()
        .decode(s)
        .map_err(|e| anyhow!("invalid Base64 ({:?}): {}", variant, e))
}

/// Encodes bytes as unpadded URL-safe Base64, the canonical userinfo form
pub fn encode_url_safe_no_pad(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Encodes bytes as padded standard Base64
pub fn encode_standard(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

// ============================================================================
// Whole-Document Decoding
// ============================================================================

/// Adds proper padding to Base64 string if missing
///
/// Base64 strings should have a length that is a multiple of 4.
/// This function adds '=' padding characters as needed.
pub fn add_base64_padding(s: &str) -> String {
    let mut result = s.to_string();
    while !result.len().is_multiple_of(4) {
        result.push('=');
    }
    result
}

/// Checks that every byte is printable ASCII, allowing tab, CR and LF
pub fn is_printable_ascii(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| (32..=126).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r'))
}

/// Decodes an entire subscription body if it is Base64-wrapped
///
/// All whitespace is removed and the text padded to a multiple of four before
/// trying standard, then unpadded standard Base64. The decoded bytes are only
/// used if they are printable ASCII; otherwise the input is returned as-is.
pub fn auto_decode_base64(data: &[u8]) -> Cow<'_, [u8]> {
    let cleaned: String = String::from_utf8_lossy(data)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let padded = add_base64_padding(&cleaned);

    let decoded = STANDARD
        .decode(&padded)
        .or_else(|_| STANDARD_NO_PAD.decode(&padded));

    match decoded {
        Ok(bytes) if is_printable_ascii(&bytes) => {
            trace!("Auto-decoded {} bytes of Base64 content", data.len());
            Cow::Owned(bytes)
        }
        Ok(_) => {
            trace!("Base64 content decoded to non-printable bytes, keeping original");
            Cow::Borrowed(data)
        }
        Err(_) => Cow::Borrowed(data),
    }
}
