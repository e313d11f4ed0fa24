//! JSON decoder (spec §4.2): objects→map, arrays→list, integral numbers
//! stay `int64`, everything else numeric becomes `float64`.

use crate::error::DecodeError;
use crate::value::Value;

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed {
            media_type: "application/json".to_string(),
            reason: e.to_string(),
        })?;
    Ok(Value::from(json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_object() {
        let v = decode(br#"{"Name":"A","Age":30}"#).unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get("name").unwrap().as_str(), Some("A"));
        assert_eq!(m.get("age"), Some(&crate::value::Value::Int(30)));
    }

    #[test]
    fn malformed_json_is_error_not_panic() {
        assert!(decode(b"{not json").is_err());
    }
}
