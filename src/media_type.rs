//! C1 — Media Type Negotiator.
//!
//! Canonicalizes `Content-Type` values and checks them against a route's
//! allowed list (spec §4.1).

use crate::error::ScriptHostError;

/// Canonical media types the server understands (spec §6).
pub const JSON: &str = "application/json";
pub const YAML: &str = "application/yaml";
pub const XML: &str = "application/xml";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";
pub const MULTIPART_MIXED: &str = "multipart/mixed";
pub const BSON: &str = "application/bson";
pub const CBOR: &str = "application/cbor";
pub const CSV: &str = "text/csv";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Strip `; charset=...` parameters, lowercase, and collapse known aliases
/// to one canonical form (spec §4.1).
pub fn canonicalize(raw: &str) -> Option<String> {
    let base = raw.split(';').next()?.trim().to_ascii_lowercase();
    if base.is_empty() {
        return None;
    }
    let canonical = match base.as_str() {
        "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => YAML,
        "application/xml" | "text/xml" => XML,
        "application/json" | "text/json" => JSON,
        "application/x-www-form-urlencoded" => FORM_URLENCODED,
        "multipart/form-data" => MULTIPART_FORM_DATA,
        "multipart/mixed" => MULTIPART_MIXED,
        "application/bson" => BSON,
        "application/cbor" => CBOR,
        "text/csv" => CSV,
        "application/octet-stream" => OCTET_STREAM,
        other => return Some(other.to_string()),
    };
    Some(canonical.to_string())
}

/// Outcome of negotiating a request's `Content-Type` against a route's
/// allowed list.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    Ok(Option<String>),
    Missing,
    Malformed(String),
    Unsupported(String),
}

/// Whether the request is considered to "have a body" per spec §4.1:
/// `Content-Length > 0` or any `Transfer-Encoding` header present.
pub fn has_body(content_length: Option<u64>, has_transfer_encoding: bool) -> bool {
    content_length.unwrap_or(0) > 0 || has_transfer_encoding
}

/// Negotiate a request's raw `Content-Type` header against the allowed set.
///
/// If `allowed` is empty, negotiation always succeeds (spec §4.1). A
/// missing content type is only an error when the request has a body and
/// `allowed` is non-empty.
pub fn check(raw_content_type: Option<&str>, allowed: &[String], request_has_body: bool) -> Negotiation {
    if allowed.is_empty() {
        return Negotiation::Ok(raw_content_type.and_then(canonicalize));
    }

    let Some(raw) = raw_content_type else {
        return if request_has_body {
            Negotiation::Missing
        } else {
            Negotiation::Ok(None)
        };
    };

    let Some(canonical) = canonicalize(raw) else {
        return Negotiation::Malformed(raw.to_string());
    };

    if allowed.iter().any(|a| a == &canonical) {
        Negotiation::Ok(Some(canonical))
    } else {
        Negotiation::Unsupported(raw.to_string())
    }
}

/// Turn a [`Negotiation`] outcome into a taxonomy error, or `Ok` with the
/// canonical content type (if any).
pub fn check_or_error(
    raw_content_type: Option<&str>,
    allowed: &[String],
    request_has_body: bool,
) -> Result<Option<String>, ScriptHostError> {
    match check(raw_content_type, allowed, request_has_body) {
        Negotiation::Ok(ct) => Ok(ct),
        Negotiation::Missing => Err(ScriptHostError::MissingContentType {
            allowed: allowed.join(", "),
        }),
        Negotiation::Malformed(raw) => Err(ScriptHostError::MalformedContentType { raw }),
        Negotiation::Unsupported(raw) => Err(ScriptHostError::UnsupportedContentType {
            raw,
            allowed: allowed.join(", "),
        }),
    }
}
