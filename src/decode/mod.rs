//! C2 — Body Decoder Registry.
//!
//! Maps a canonical media type to a decoder function producing a
//! [`crate::value::Value`] tree. Every decoder must not panic on malformed
//! input: it returns a [`DecodeError`] and lets the binder (C3) decide the
//! failure mode (spec §4.2).

mod bson_decoder;
mod cbor_decoder;
mod csv_decoder;
mod form;
mod json;
mod xml;
mod yaml;

pub use bson_decoder::decode as decode_bson;
pub use cbor_decoder::decode as decode_cbor;
pub use csv_decoder::decode as decode_csv;
pub use form::decode as decode_form;
pub use json::decode as decode_json;
pub use xml::decode as decode_xml;
pub(crate) use xml::unwrap_wrapped_array as unwrap_xml_wrapped_array;
pub use yaml::decode as decode_yaml;

use crate::error::DecodeError;
use crate::media_type;
use crate::value::Value;

/// Decode a raw body given its canonical media type.
pub fn decode(canonical_media_type: &str, body: &[u8]) -> Result<Value, DecodeError> {
    match canonical_media_type {
        media_type::JSON => decode_json(body),
        media_type::YAML => decode_yaml(body),
        media_type::XML => decode_xml(body),
        media_type::FORM_URLENCODED => decode_form(body),
        media_type::BSON => decode_bson(body),
        media_type::CBOR => decode_cbor(body),
        media_type::CSV => decode_csv(body),
        media_type::OCTET_STREAM => Ok(Value::Bytes(body.to_vec())),
        other => Err(DecodeError::Unregistered(other.to_string())),
    }
}

/// Interpret a body that's logically bytes (BSON/CBOR inputs) from a string
/// the way the spec describes (§4.2): optional `base64:` prefix strip,
/// then try base64, then hex (optional `0x` prefix, even length),
/// otherwise raw UTF-8 bytes of the trimmed string.
pub(crate) fn sniff_bytes(body: &[u8]) -> Vec<u8> {
    // Binary formats (CBOR, raw octet-stream bodies routed through here)
    // are rarely valid UTF-8; only attempt the text-sniffing heuristics
    // when the body actually decodes as a string, otherwise pass the
    // original bytes through untouched.
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(_) => return body.to_vec(),
    };
    let trimmed = text.trim();

    let candidate = trimmed.strip_prefix("base64:").unwrap_or(trimmed);

    // An explicit `0x` prefix unambiguously signals hex, which otherwise
    // overlaps the base64 alphabet (hex digits are all alphanumeric).
    if let Some(hex_candidate) = candidate.strip_prefix("0x") {
        if is_hex_grammar(hex_candidate) {
            if let Ok(bytes) = hex::decode(hex_candidate) {
                return bytes;
            }
        }
    }

    if is_base64_grammar(candidate) {
        use base64::Engine;
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(candidate) {
            return bytes;
        }
    }

    if is_hex_grammar(candidate) {
        if let Ok(bytes) = hex::decode(candidate) {
            return bytes;
        }
    }

    trimmed.as_bytes().to_vec()
}

fn is_base64_grammar(s: &str) -> bool {
    !s.is_empty()
        && s.len() % 4 == 0
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
}

fn is_hex_grammar(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_bytes_strips_base64_prefix() {
        let out = sniff_bytes(b"base64:aGVsbG8=");
        assert_eq!(out, b"hello");
    }

    #[test]
    fn sniff_bytes_detects_hex() {
        let out = sniff_bytes(b"0x68656c6c6f");
        assert_eq!(out, b"hello");
    }

    #[test]
    fn sniff_bytes_falls_back_to_utf8() {
        let out = sniff_bytes(b"not base64 or hex!!");
        assert_eq!(out, b"not base64 or hex!!");
    }
}
