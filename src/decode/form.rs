//! `application/x-www-form-urlencoded` decoder (spec §4.2). Every value
//! decodes as a string; repeated keys collapse into a list, matching the
//! XML decoder's sibling-collapsing rule so the binder can treat both the
//! same way.

use crate::error::DecodeError;
use crate::value::{Value, ValueMap};

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(body).map_err(|e| DecodeError::Malformed {
            media_type: "application/x-www-form-urlencoded".to_string(),
            reason: e.to_string(),
        })?;

    let mut map = ValueMap::new();
    for (key, value) in pairs {
        match map.get(&key).cloned() {
            Some(Value::List(mut items)) => {
                items.push(Value::Str(value));
                map.insert(key, Value::List(items));
            }
            Some(existing) => {
                map.insert(key, Value::List(vec![existing, Value::Str(value)]));
            }
            None => {
                map.insert(key, Value::Str(value));
            }
        }
    }
    Ok(Value::Map(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_pairs() {
        let v = decode(b"name=A&age=30").unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get("name").unwrap().as_str(), Some("A"));
        assert_eq!(m.get("age").unwrap().as_str(), Some("30"));
    }

    #[test]
    fn repeated_keys_collapse_to_list() {
        let v = decode(b"tag=a&tag=b").unwrap();
        let m = v.as_map().unwrap();
        assert_eq!(m.get("tag").unwrap().as_list().unwrap().len(), 2);
    }
}
