//! BSON decoder (spec §4.2). The body arrives as text (base64, hex, or raw
//! bytes reinterpreted as a string) and is sniffed via
//! [`super::sniff_bytes`] before being parsed as a BSON document.

use bson::{decode_document, Bson};

use crate::error::DecodeError;
use crate::value::{Value, ValueMap};

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let bytes = super::sniff_bytes(body);
    let doc = decode_document(&mut bytes.as_slice()).map_err(|e| DecodeError::Malformed {
        media_type: "application/bson".to_string(),
        reason: e.to_string(),
    })?;
    let mut out = ValueMap::new();
    for (k, v) in doc.iter() {
        out.insert(k.clone(), convert(v.clone()));
    }
    Ok(Value::Map(out))
}

fn convert(v: Bson) -> Value {
    match v {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::I32(i) => Value::Int(i as i64),
        Bson::I64(i) => Value::Int(i),
        Bson::TimeStamp(i) => Value::Int(i),
        Bson::FloatingPoint(f) => Value::Float(f),
        Bson::String(s) => Value::Str(s),
        Bson::Array(items) => Value::List(items.into_iter().map(convert).collect()),
        Bson::Document(doc) => {
            let mut out = ValueMap::new();
            for (k, v) in doc.iter() {
                out.insert(k.clone(), convert(v.clone()));
            }
            Value::Map(out)
        }
        Bson::Binary(_, bytes) => Value::Bytes(bytes),
        other => Value::Str(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, encode_document};

    #[test]
    fn decodes_document_roundtrip() {
        let document = doc! { "name": "A", "age": 30 };
        let mut bytes = Vec::new();
        encode_document(&mut bytes, &document).unwrap();

        let v = decode(&bytes).unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get("name").unwrap().as_str(), Some("A"));
    }

    #[test]
    fn malformed_bson_is_error() {
        assert!(decode(b"not bson at all").is_err());
    }
}
