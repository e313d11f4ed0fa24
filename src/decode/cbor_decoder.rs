//! CBOR decoder (spec §4.2). Same text-sniffing rule as BSON
//! (see [`super::sniff_bytes`]) before handing the bytes to `serde_cbor`.

use crate::error::DecodeError;
use crate::value::{Value, ValueMap};

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let bytes = super::sniff_bytes(body);
    let cbor: serde_cbor::Value =
        serde_cbor::from_slice(&bytes).map_err(|e| DecodeError::Malformed {
            media_type: "application/cbor".to_string(),
            reason: e.to_string(),
        })?;
    Ok(convert(cbor))
}

fn convert(v: serde_cbor::Value) -> Value {
    match v {
        serde_cbor::Value::Null => Value::Null,
        serde_cbor::Value::Bool(b) => Value::Bool(b),
        serde_cbor::Value::Integer(i) => Value::Int(i as i64),
        serde_cbor::Value::Float(f) => Value::Float(f),
        serde_cbor::Value::Bytes(b) => Value::Bytes(b),
        serde_cbor::Value::Text(s) => Value::Str(s),
        serde_cbor::Value::Array(items) => Value::List(items.into_iter().map(convert).collect()),
        serde_cbor::Value::Map(map) => {
            let mut out = ValueMap::new();
            for (k, v) in map {
                let key = match k {
                    serde_cbor::Value::Text(s) => s,
                    other => format!("{:?}", other),
                };
                out.insert(key, convert(v));
            }
            Value::Map(out)
        }
        serde_cbor::Value::Tag(_, inner) => convert(*inner),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_map_roundtrip() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(serde_cbor::Value::Text("name".to_string()), serde_cbor::Value::Text("A".to_string()));
        let cbor = serde_cbor::Value::Map(map.into_iter().collect());
        let bytes = serde_cbor::to_vec(&cbor).unwrap();

        let v = decode(&bytes).unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get("name").unwrap().as_str(), Some("A"));
    }

    #[test]
    fn malformed_cbor_is_error() {
        assert!(decode(b"\xff\xff\xff not cbor").is_err());
    }
}
