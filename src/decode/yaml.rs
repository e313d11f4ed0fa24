//! YAML decoder (spec §4.2). Decodes to the same tree as JSON; top-level
//! keys are matched case-insensitively by [`crate::value::ValueMap`], which
//! gives "camel-case key normalization" for free when the binder later
//! matches against an `Object`-kind target's property names.

use crate::error::DecodeError;
use crate::value::{Value, ValueMap};

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(body).map_err(|e| DecodeError::Malformed {
        media_type: "application/yaml".to_string(),
        reason: e.to_string(),
    })?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| DecodeError::Malformed {
            media_type: "application/yaml".to_string(),
            reason: e.to_string(),
        })?;
    Ok(convert(yaml))
}

fn convert(v: serde_yaml::Value) -> Value {
    match v {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_yaml::Value::String(s) => Value::Str(s),
        serde_yaml::Value::Sequence(items) => Value::List(items.into_iter().map(convert).collect()),
        serde_yaml::Value::Mapping(map) => {
            let mut out = ValueMap::new();
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    other => yaml_scalar_to_string(&other),
                };
                out.insert(key, convert(v));
            }
            Value::Map(out)
        }
        serde_yaml::Value::Tagged(tagged) => convert(tagged.value),
    }
}

fn yaml_scalar_to_string(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        _ => String::new(),
    }
}
