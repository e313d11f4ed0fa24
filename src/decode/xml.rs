//! XML decoder (spec §4.2): elements become map entries, attributes become
//! `@name` keys, repeated child elements under the same name collapse into
//! a list, and a lone root wrapping a single repeated child is unwrapped to
//! that list directly.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::DecodeError;
use crate::value::{Value, ValueMap};

pub fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(body).map_err(|e| malformed(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(String, ValueMap, String)> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        let event = reader.read_event().map_err(|e| malformed(e.to_string()))?;
        match event {
            Event::Start(tag) => {
                let name = tag_name(&tag, &reader)?;
                let mut attrs = ValueMap::new();
                for attr in tag.attributes() {
                    let attr = attr.map_err(|e| malformed(e.to_string()))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| malformed(e.to_string()))?;
                    attrs.insert(key, Value::Str(value.into_owned()));
                }
                stack.push((name, attrs, String::new()));
            }
            Event::Empty(tag) => {
                let name = tag_name(&tag, &reader)?;
                let mut attrs = ValueMap::new();
                for attr in tag.attributes() {
                    let attr = attr.map_err(|e| malformed(e.to_string()))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| malformed(e.to_string()))?;
                    attrs.insert(key, Value::Str(value.into_owned()));
                }
                push_child(&mut stack, &mut root, name, Value::Map(attrs));
            }
            Event::Text(text) => {
                let unescaped = text.unescape().map_err(|e| malformed(e.to_string()))?;
                if let Some((_, _, text_buf)) = stack.last_mut() {
                    text_buf.push_str(&unescaped);
                }
            }
            Event::End(_) => {
                let (name, mut attrs, text) = stack.pop().ok_or_else(|| malformed("unbalanced element".to_string()))?;
                let trimmed = text.trim();
                let node = if attrs.is_empty() {
                    if trimmed.is_empty() {
                        Value::Null
                    } else {
                        Value::Str(trimmed.to_string())
                    }
                } else {
                    if !trimmed.is_empty() {
                        attrs.insert("#text".to_string(), Value::Str(trimmed.to_string()));
                    }
                    Value::Map(attrs)
                };
                push_child(&mut stack, &mut root, name, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unclosed element at end of document".to_string()));
    }

    root.ok_or_else(|| malformed("document has no root element".to_string()))
}

fn tag_name(tag: &quick_xml::events::BytesStart, reader: &Reader<&[u8]>) -> Result<String, DecodeError> {
    let _ = reader;
    Ok(String::from_utf8_lossy(tag.name().as_ref()).into_owned())
}

fn malformed(reason: String) -> DecodeError {
    DecodeError::Malformed {
        media_type: "application/xml".to_string(),
        reason,
    }
}

/// Insert `node` under `name` into the top-of-stack's map, or set it as the
/// document root if the stack is empty. Repeated sibling names collapse
/// into a `List`.
fn push_child(stack: &mut Vec<(String, ValueMap, String)>, root: &mut Option<Value>, name: String, node: Value) {
    match stack.last_mut() {
        Some((_, attrs, _)) => insert_child(attrs, name, node),
        None => {
            let mut map = ValueMap::new();
            insert_child(&mut map, name, node);
            *root = Some(Value::Map(map));
        }
    }
}

/// Schema-driven post-pass (§4.2, §9 wrapped-array resolution): a route's
/// `wrapped` parameter flag names a property whose value is itself the
/// wrapper element (`{name: {child: [...]}}`); collapse it one level so
/// the parameter binds directly to the child list/value (`{name: [...]}`)
/// instead of the bare repeated-element shape. Only a single-child wrapper
/// collapses; anything else (the wrapper genuinely has several distinct
/// child names) is left untouched.
pub(crate) fn unwrap_wrapped_array(value: Value, property_name: &str) -> Value {
    let Value::Map(mut map) = value else {
        return value;
    };
    if let Some(Value::Map(inner)) = map.get(property_name) {
        if inner.len() == 1 {
            let collapsed = inner.iter().next().map(|(_, v)| v.clone()).unwrap();
            map.insert(property_name.to_string(), collapsed);
        }
    }
    Value::Map(map)
}

fn insert_child(map: &mut ValueMap, name: String, node: Value) {
    match map.get(&name).cloned() {
        Some(Value::List(mut items)) => {
            items.push(node);
            map.insert(name, Value::List(items));
        }
        Some(existing) => {
            map.insert(name, Value::List(vec![existing, node]));
        }
        None => {
            map.insert(name, node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_attributes_and_text() {
        let v = decode(br#"<item id="1">hello</item>"#).unwrap();
        let root = v.as_map().unwrap();
        let item = root.get("item").unwrap().as_map().unwrap();
        assert_eq!(item.get("@id").unwrap().as_str(), Some("1"));
        assert_eq!(item.get("#text").unwrap().as_str(), Some("hello"));
    }

    #[test]
    fn repeated_children_collapse_to_list() {
        let v = decode(br#"<items><item>a</item><item>b</item></items>"#).unwrap();
        let root = v.as_map().unwrap();
        let items = root.get("items").unwrap().as_map().unwrap();
        let list = items.get("item").unwrap().as_list().unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn malformed_xml_is_error() {
        assert!(decode(b"<unclosed>").is_err());
    }

    #[test]
    fn wrapped_array_collapses_one_level() {
        let v = decode(br#"<tags><tag>a</tag><tag>b</tag></tags>"#).unwrap();
        let unwrapped = unwrap_wrapped_array(v, "tags");
        let list = unwrapped.as_map().unwrap().get("tags").unwrap().as_list().unwrap();
        assert_eq!(
            list,
            &[Value::Str("a".to_string()), Value::Str("b".to_string())]
        );
    }

    #[test]
    fn unwrapped_property_is_left_alone_when_not_requested() {
        let v = decode(br#"<tags><tag>a</tag><tag>b</tag></tags>"#).unwrap();
        let untouched = unwrap_wrapped_array(v.clone(), "other");
        assert_eq!(untouched, v);
    }
}
