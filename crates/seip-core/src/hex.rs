//! Hex encoding for APDU payloads carried in the JSON `data` field.
//!
//! Thin layer over the `hex` crate that fixes the conventions used on the
//! wire: upper-case digits when encoding, whitespace and either case
//! accepted when decoding.

pub use ::hex::FromHexError;

/// Encodes `bytes` as upper-case hex, two digits per byte.
pub fn encode(bytes: &[u8]) -> String {
    ::hex::encode_upper(bytes)
}

/// Decodes a hex string, so `"00 A4 04 00"` and `"00a40400"` decode to the
/// same bytes.
///
/// # Errors
///
/// Returns [`FromHexError`] on an odd digit count or a non-hex character.
/// Reported positions count digits only, whitespace excluded.
pub fn decode(text: &str) -> Result<Vec<u8>, FromHexError> {
    let digits: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    ::hex::decode(digits)
}
