//! C7 — Response Adapter (§3, §4.7, §9). Collapses a script's side effects
//! (return value, explicit writes, redirects) into an outgoing
//! `axum::response::Response`.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::value::Value;

/// A postponed write's outcome — a sum type, not two separate optional
/// fields, per the Open Question resolution in §9.
#[derive(Debug, Clone)]
pub enum PostponedWrite {
    Ok { payload: Value, media_type: String },
    Error(i32),
}

/// The response model a script mutates over the course of a request (§3).
#[derive(Debug, Clone)]
pub struct ResponseModel {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Option<Value>,
    pub redirect_url: Option<String>,
    pub has_started: bool,
    pub postponed_write: Option<PostponedWrite>,
}

impl Default for ResponseModel {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            content_type: None,
            body: None,
            redirect_url: None,
            has_started: false,
            postponed_write: None,
        }
    }
}

impl ResponseModel {
    /// Apply the model to an outgoing response (§4.7): write headers, then
    /// status, then body. A redirect supersedes body/headers; a response
    /// that has already started (a streaming write) is returned untouched.
    pub fn apply(self) -> Response {
        if self.has_started {
            return Response::new(Body::empty());
        }

        if let Some(url) = self.redirect_url {
            let status = if self.status == 200 { 302 } else { self.status };
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::FOUND);
            let mut builder = Response::builder().status(status);
            if let Ok(value) = HeaderValue::from_str(&url) {
                builder = builder.header(axum::http::header::LOCATION, value);
            }
            return builder.body(Body::empty()).unwrap_or_else(|_| Response::new(Body::empty()));
        }

        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut builder = Response::builder().status(status);

        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value),
            ) {
                builder = builder.header(name, value);
            }
        }

        let content_type = self
            .content_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string());
        builder = builder.header(axum::http::header::CONTENT_TYPE, content_type.as_str());

        let body = match &self.body {
            Some(Value::Bytes(bytes)) => Body::from(bytes.clone()),
            Some(Value::Str(s)) if content_type != "application/json" => Body::from(s.clone()),
            Some(value) => {
                let json: serde_json::Value = value.into();
                Body::from(serde_json::to_vec(&json).unwrap_or_default())
            }
            None => Body::empty(),
        };

        builder.body(body).unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn redirect_supersedes_body() {
        let model = ResponseModel {
            redirect_url: Some("https://example.com".to_string()),
            body: Some(Value::Str("ignored".to_string())),
            ..Default::default()
        };
        let response = model.apply();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn started_response_is_returned_untouched() {
        let model = ResponseModel {
            has_started: true,
            status: 500,
            ..Default::default()
        };
        let response = model.apply();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
