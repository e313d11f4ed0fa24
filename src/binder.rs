//! C3 — Parameter Binder (§4.3). Locates each declared parameter's raw
//! value in the request, normalizes and coerces it to the parameter's
//! schema kind, fanning out to C2 for `Object`-kind bodies.

use std::collections::HashMap;

use axum::http::HeaderMap;
use tracing::debug;

use crate::error::ScriptHostError;
use crate::media_type;
use crate::route::{FormOptions, Location, ParameterDescriptor, RouteDescriptor, SchemaKind};
use crate::value::{Value, ValueMap};

/// Maximum recursion depth for object-tree binding (§4.3 step 6, §8).
const MAX_BIND_DEPTH: u32 = 32;

/// Maximum recursion depth for nested multipart fields (§4.3 step 7, §8).
const MAX_MULTIPART_DEPTH: u32 = 4;

/// A single multipart part, spooled in memory (bounded by request size
/// limits upstream in `axum::extract::Multipart`).
#[derive(Debug, Clone)]
pub struct RawPart {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// The request's body as it arrives at the binder: either not present,
/// raw bytes (to be decoded per the negotiated content type), or an
/// already-extracted multipart field list (extraction itself requires
/// ownership of the `axum::Request` body stream, so it happens in
/// [`crate::delegate`] before the binder runs).
pub enum RawBody {
    None,
    Bytes(Vec<u8>),
    Multipart(Vec<RawPart>),
}

/// Everything about the inbound request the binder needs that isn't
/// already captured by the route descriptor.
pub struct RequestParts<'a> {
    pub path_params: &'a HashMap<String, String>,
    pub query: &'a str,
    pub headers: &'a HeaderMap,
    /// The request's raw `Content-Type` header value, if present.
    pub content_type: Option<&'a str>,
    pub body: RawBody,
}

/// The populated parameters record (§3): one `body` slot plus a
/// name-keyed map for everything else.
#[derive(Debug, Default)]
pub struct BoundParameters {
    pub body: Option<Value>,
    pub named: ValueMap,
}

/// Bind every declared parameter on `route` against `request`.
pub fn bind(route: &RouteDescriptor, request: &RequestParts<'_>) -> Result<BoundParameters, ScriptHostError> {
    let mut out = BoundParameters::default();

    for param in &route.parameters {
        let value = bind_one(param, request)?;
        debug!(
            name = %param.name,
            schema_kind = ?param.schema_kind,
            location = ?param.location,
            "bound parameter"
        );
        if param.is_body() {
            out.body = Some(value);
        } else {
            out.named.insert(param.name.clone(), value);
        }
    }

    Ok(out)
}

fn bind_one(param: &ParameterDescriptor, request: &RequestParts<'_>) -> Result<Value, ScriptHostError> {
    if param.is_body() {
        return bind_body(param, request);
    }

    let (single, multi) = locate(param, request);

    let (single, multi) = if single.is_none() && multi.is_empty() {
        match &param.default_value {
            Some(default) => return Ok(default.clone()),
            None => (None, Vec::new()),
        }
    } else {
        (single, multi)
    };

    Ok(coerce_scalar_or_array(param.schema_kind, single, multi))
}

/// Step 1: locate the raw value by location (§4.3).
fn locate(param: &ParameterDescriptor, request: &RequestParts<'_>) -> (Option<String>, Vec<String>) {
    match param.location {
        Location::Path => {
            let value = request
                .path_params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&param.name))
                .map(|(_, v)| v.clone());
            (value, Vec::new())
        }
        Location::Query => {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(request.query).unwrap_or_default();
            let values: Vec<String> = pairs
                .into_iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case(&param.name))
                .map(|(_, v)| v)
                .collect();
            (values.first().cloned(), values)
        }
        Location::Header => {
            let value = request
                .headers
                .get(&param.name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            (value, Vec::new())
        }
        Location::Cookie => {
            let value = cookies(request.headers).remove(&param.name.to_ascii_lowercase());
            (value, Vec::new())
        }
        Location::Body => (None, Vec::new()),
    }
}

fn cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                out.insert(
                    name.trim().to_ascii_lowercase(),
                    value.trim().to_string(),
                );
            }
        }
    }
    out
}

/// Steps 3-4: normalize and coerce a scalar/array parameter.
fn coerce_scalar_or_array(
    schema_kind: SchemaKind,
    single: Option<String>,
    multi: Vec<String>,
) -> Value {
    match schema_kind {
        SchemaKind::Integer => single
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(Value::Int)
            .unwrap_or(Value::Null),
        SchemaKind::Number => single
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(Value::Float)
            .unwrap_or(Value::Null),
        SchemaKind::Boolean => single
            .and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            })
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        SchemaKind::Array => {
            if !multi.is_empty() {
                Value::List(multi.into_iter().map(Value::Str).collect())
            } else {
                match single {
                    Some(s) => Value::List(vec![Value::Str(s)]),
                    None => Value::Null,
                }
            }
        }
        SchemaKind::Object => single.map(Value::Str).unwrap_or(Value::Null),
        SchemaKind::String | SchemaKind::None => single.map(Value::Str).unwrap_or(Value::Null),
    }
}

/// Steps 5-7: bind the unique body parameter, deciding its content type
/// and fanning out to C2 (or to multipart field binding).
fn bind_body(param: &ParameterDescriptor, request: &RequestParts<'_>) -> Result<Value, ScriptHostError> {
    if !matches!(param.schema_kind, SchemaKind::Object) {
        return match &request.body {
            RawBody::Bytes(bytes) => Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned())),
            RawBody::Multipart(_) | RawBody::None => Ok(Value::Null),
        };
    }

    match &request.body {
        RawBody::None => Ok(param.default_value.clone().unwrap_or(Value::Null)),
        RawBody::Multipart(parts) => {
            let options = param.form_options.clone().unwrap_or_default();
            bind_multipart(parts, &options, 0)
        }
        RawBody::Bytes(bytes) => {
            let canonical = resolve_body_content_type(param, request.content_type)?;
            let tree = crate::decode::decode(&canonical, bytes).map_err(|e| {
                ScriptHostError::ParameterBindingFailure {
                    name: param.name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let tree = clamp_depth(tree, 0);
            // §4.2/§9: a `wrapped` XML body property collapses its wrapper
            // element down to the child list/value directly.
            let tree = if param.wrapped && canonical == media_type::XML {
                crate::decode::unwrap_xml_wrapped_array(tree, &param.name)
            } else {
                tree
            };
            Ok(tree)
        }
    }
}

/// Step 5: decide the body's content type. Header present → canonicalize;
/// else if the parameter declares exactly one acceptable content type,
/// infer it; else fail.
fn resolve_body_content_type(
    param: &ParameterDescriptor,
    raw_content_type: Option<&str>,
) -> Result<String, ScriptHostError> {
    if let Some(raw) = raw_content_type {
        return media_type::canonicalize(raw).ok_or_else(|| ScriptHostError::MalformedContentType {
            raw: raw.to_string(),
        });
    }
    if param.content_types.len() == 1 {
        return media_type::canonicalize(&param.content_types[0]).ok_or_else(|| {
            ScriptHostError::MalformedContentType {
                raw: param.content_types[0].clone(),
            }
        });
    }
    Err(ScriptHostError::MissingContentType {
        allowed: param.content_types.join(", "),
    })
}

/// Step 6: enforce the maximum recursion depth by nulling out whatever is
/// past it, rather than rejecting the whole body (§8: "returns null for
/// the offending sub-tree").
fn clamp_depth(value: Value, depth: u32) -> Value {
    if depth >= MAX_BIND_DEPTH {
        return Value::Null;
    }
    match value {
        Value::List(items) => {
            Value::List(items.into_iter().map(|v| clamp_depth(v, depth + 1)).collect())
        }
        Value::Map(map) => {
            let mut out = ValueMap::new();
            for (k, v) in map.iter() {
                out.insert(k, clamp_depth(v.clone(), depth + 1));
            }
            Value::Map(out)
        }
        other => other,
    }
}

/// Step 7: bind multipart fields by name. String fields read as UTF-8;
/// fields named in `nested_fields` recurse into nested multipart (bounded
/// depth); JSON parts decode into a map; unmatched fields land in the
/// `additional_properties` bag when declared.
fn bind_multipart(
    parts: &[RawPart],
    options: &FormOptions,
    depth: u32,
) -> Result<Value, ScriptHostError> {
    let mut out = ValueMap::new();
    let mut additional = ValueMap::new();

    for part in parts {
        let is_nested = options
            .nested_fields
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&part.name));

        let value = if is_nested && depth < MAX_MULTIPART_DEPTH {
            match &part.content_type {
                Some(ct) if media_type::canonicalize(ct).as_deref() == Some(media_type::MULTIPART_FORM_DATA) => {
                    let nested = parse_nested_multipart(&part.bytes, ct);
                    bind_multipart(&nested, options, depth + 1)?
                }
                _ => Value::Str(String::from_utf8_lossy(&part.bytes).into_owned()),
            }
        } else if part
            .content_type
            .as_deref()
            .and_then(media_type::canonicalize)
            .as_deref()
            == Some(media_type::JSON)
        {
            crate::decode::decode_json(&part.bytes).unwrap_or(Value::Null)
        } else {
            Value::Str(String::from_utf8_lossy(&part.bytes).into_owned())
        };

        if out.get(&part.name).is_some() || known_field(options, &part.name) {
            out.insert(part.name.clone(), value);
        } else if let Some(bag_name) = &options.additional_properties {
            if let Value::Map(bag) = additional
                .get(bag_name)
                .cloned()
                .unwrap_or_else(|| Value::Map(ValueMap::new()))
            {
                let mut bag = bag;
                bag.insert(part.name.clone(), value);
                additional.insert(bag_name.clone(), Value::Map(bag));
            }
        } else {
            out.insert(part.name.clone(), value);
        }
    }

    for (k, v) in additional.iter() {
        out.insert(k, v.clone());
    }

    Ok(Value::Map(out))
}

fn known_field(options: &FormOptions, name: &str) -> bool {
    options.nested_fields.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Parse a nested multipart part's own bytes into its child parts,
/// reading the boundary from its `Content-Type`. Used only past the
/// top-level multipart extraction, which already happened in the
/// delegate (§4.2: nested multipart fields recurse, bounded depth 4).
fn parse_nested_multipart(bytes: &[u8], content_type: &str) -> Vec<RawPart> {
    let Some(boundary) = content_type
        .split(';')
        .find_map(|seg| seg.trim().strip_prefix("boundary="))
    else {
        return Vec::new();
    };
    let boundary = boundary.trim_matches('"');

    parse_multipart_body(bytes, boundary)
}

/// A minimal synchronous multipart/form-data body parser for nested
/// parts, where no async stream is available (the outer body has
/// already been fully read).
fn parse_multipart_body(bytes: &[u8], boundary: &str) -> Vec<RawPart> {
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(bytes);
    let mut parts = Vec::new();

    for segment in text.split(&delimiter) {
        let segment = segment.trim_start_matches("\r\n").trim_end_matches("\r\n");
        if segment.is_empty() || segment == "--" {
            continue;
        }
        let Some((headers_block, body)) = segment.split_once("\r\n\r\n") else {
            continue;
        };
        let mut name = None;
        let mut content_type = None;
        for line in headers_block.lines() {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("content-disposition") {
                if let Some(n) = extract_disposition_field(line, "name") {
                    name = Some(n);
                }
            } else if lower.starts_with("content-type:") {
                content_type = line.split_once(':').map(|(_, v)| v.trim().to_string());
            }
        }
        if let Some(name) = name {
            parts.push(RawPart {
                name,
                content_type,
                bytes: body.trim_end_matches("\r\n").as_bytes().to_vec(),
            });
        }
    }

    parts
}

fn extract_disposition_field(line: &str, field: &str) -> Option<String> {
    let marker = format!("{field}=\"");
    let start = line.find(&marker)? + marker.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Style;

    fn param(name: &str, schema_kind: SchemaKind, location: Location) -> ParameterDescriptor {
        ParameterDescriptor {
            name: name.to_string(),
            schema_kind,
            location,
            default_value: None,
            explode: false,
            style: Style::Form,
            content_types: Vec::new(),
            form_options: None,
            wrapped: false,
        }
    }

    fn route_with(parameters: Vec<ParameterDescriptor>) -> RouteDescriptor {
        RouteDescriptor {
            method: "GET".into(),
            pattern: "/".into(),
            guest_language: crate::route::GuestLanguage::Shell,
            script: String::new(),
            parameters,
            request_body: None,
            allowed_request_content_types: Vec::new(),
            arguments: HashMap::new(),
            locals: HashMap::new(),
            auth_requirement: None,
            request_culture: None,
        }
    }

    #[test]
    fn missing_path_value_with_no_default_is_null() {
        let route = route_with(vec![param("id", SchemaKind::Integer, Location::Path)]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: None,
            body: RawBody::None,
        };
        let bound = bind(&route, &request).unwrap();
        assert_eq!(bound.named.get("id"), Some(&Value::Null));
    }

    #[test]
    fn integer_path_param_parses() {
        let route = route_with(vec![param("id", SchemaKind::Integer, Location::Path)]);
        let mut path_params = HashMap::new();
        path_params.insert("id".to_string(), "42".to_string());
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: None,
            body: RawBody::None,
        };
        let bound = bind(&route, &request).unwrap();
        assert_eq!(bound.named.get("id"), Some(&Value::Int(42)));
    }

    #[test]
    fn malformed_integer_path_param_is_null() {
        let route = route_with(vec![param("id", SchemaKind::Integer, Location::Path)]);
        let mut path_params = HashMap::new();
        path_params.insert("id".to_string(), "x".to_string());
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: None,
            body: RawBody::None,
        };
        let bound = bind(&route, &request).unwrap();
        assert_eq!(bound.named.get("id"), Some(&Value::Null));
    }

    #[test]
    fn repeated_query_params_become_array() {
        let route = route_with(vec![param("tag", SchemaKind::Array, Location::Query)]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "tag=a&tag=b&tag=c",
            headers: &HeaderMap::new(),
            content_type: None,
            body: RawBody::None,
        };
        let bound = bind(&route, &request).unwrap();
        assert_eq!(
            bound.named.get("tag"),
            Some(&Value::List(vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ]))
        );
    }

    #[test]
    fn json_body_decodes_to_case_insensitive_map() {
        let mut body_param = param("body", SchemaKind::Object, Location::Body);
        body_param.content_types = vec!["application/json".to_string()];
        let route = route_with(vec![body_param]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: Some("application/json"),
            body: RawBody::Bytes(br#"{"Name":"A","Age":30}"#.to_vec()),
        };
        let bound = bind(&route, &request).unwrap();
        let body = bound.body.unwrap();
        let map = body.as_map().unwrap();
        assert_eq!(map.get("name"), Some(&Value::Str("A".to_string())));
        assert_eq!(map.get("age"), Some(&Value::Int(30)));
    }

    #[test]
    fn wrapped_xml_body_collapses_to_a_list() {
        let mut body_param = param("tags", SchemaKind::Object, Location::Body);
        body_param.content_types = vec!["application/xml".to_string()];
        body_param.wrapped = true;
        let route = route_with(vec![body_param]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: Some("application/xml"),
            body: RawBody::Bytes(br#"<tags><tag>a</tag><tag>b</tag></tags>"#.to_vec()),
        };
        let bound = bind(&route, &request).unwrap();
        let body = bound.body.unwrap();
        let map = body.as_map().unwrap();
        assert_eq!(
            map.get("tags"),
            Some(&Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]))
        );
    }

    #[test]
    fn yaml_body_decodes_to_same_shape_as_json() {
        let mut body_param = param("body", SchemaKind::Object, Location::Body);
        body_param.content_types = vec!["application/yaml".to_string()];
        let route = route_with(vec![body_param]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: Some("application/yaml"),
            body: RawBody::Bytes(b"name: A\nage: 30\n".to_vec()),
        };
        let bound = bind(&route, &request).unwrap();
        let body = bound.body.unwrap();
        let map = body.as_map().unwrap();
        assert_eq!(map.get("name"), Some(&Value::Str("A".to_string())));
        assert_eq!(map.get("age"), Some(&Value::Int(30)));
    }

    #[test]
    fn missing_content_type_with_single_declared_type_is_inferred() {
        let mut body_param = param("body", SchemaKind::Object, Location::Body);
        body_param.content_types = vec!["application/json".to_string()];
        let route = route_with(vec![body_param]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: None,
            body: RawBody::Bytes(br#"{"a":1}"#.to_vec()),
        };
        let bound = bind(&route, &request).unwrap();
        assert!(bound.body.unwrap().as_map().is_some());
    }

    #[test]
    fn missing_content_type_with_multiple_declared_types_fails() {
        let mut body_param = param("body", SchemaKind::Object, Location::Body);
        body_param.content_types = vec!["application/json".to_string(), "application/yaml".to_string()];
        let route = route_with(vec![body_param]);
        let path_params = HashMap::new();
        let request = RequestParts {
            path_params: &path_params,
            query: "",
            headers: &HeaderMap::new(),
            content_type: None,
            body: RawBody::Bytes(br#"{"a":1}"#.to_vec()),
        };
        let result = bind(&route, &request);
        assert!(matches!(result, Err(ScriptHostError::MissingContentType { .. })));
    }

    #[test]
    fn depth_beyond_max_is_nulled_not_rejected() {
        let mut nested = Value::Int(1);
        for _ in 0..(MAX_BIND_DEPTH + 5) {
            let mut map = ValueMap::new();
            map.insert("child", nested);
            nested = Value::Map(map);
        }
        let clamped = clamp_depth(nested, 0);
        // Walk down MAX_BIND_DEPTH levels; beyond that it must be Null.
        let mut current = &clamped;
        for _ in 0..MAX_BIND_DEPTH {
            current = current.as_map().unwrap().get("child").unwrap();
        }
        assert_eq!(*current, Value::Null);
    }

    #[test]
    fn multipart_string_fields_bind_by_name() {
        let parts = vec![RawPart {
            name: "title".to_string(),
            content_type: None,
            bytes: b"hello".to_vec(),
        }];
        let options = FormOptions::default();
        let value = bind_multipart(&parts, &options, 0).unwrap();
        assert_eq!(
            value.as_map().unwrap().get("title"),
            Some(&Value::Str("hello".to_string()))
        );
    }
}
