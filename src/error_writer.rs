//! C8 — Error Response Writer (§4.8, §7). Renders the default JSON error
//! body for every taxonomy error, with an optional script-hook override.

use serde::Serialize;

use crate::error::ScriptHostError;
use crate::response::ResponseModel;
use crate::value::Value;

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    error: &'static str,
    message: String,
}

/// Build the default `{status, error, message}` JSON error response.
pub fn default_error_response(err: &ScriptHostError) -> ResponseModel {
    let status = err.status();
    let body = ErrorBody {
        status: status.as_u16(),
        error: err.code(),
        message: err.to_string(),
    };
    let json = serde_json::to_value(&body).unwrap_or_default();
    ResponseModel {
        status: status.as_u16(),
        content_type: Some("application/json".to_string()),
        body: Some(Value::from(json)),
        ..Default::default()
    }
}

/// Bindings handed to a custom `error_response_script` hook (§4.8).
pub fn error_hook_bindings(err: &ScriptHostError) -> Vec<(String, Value)> {
    vec![
        ("status_code".to_string(), Value::Int(err.status().as_u16() as i64)),
        ("error_message".to_string(), Value::Str(err.to_string())),
        ("exception".to_string(), Value::Str(err.code().to_string())),
    ]
}
