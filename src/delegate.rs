//! C6 — Request Delegate (§4.6). Assembles the per-route `axum` handler
//! from a compiled artifact, a route descriptor, and the interpreter
//! pool, mirroring the teacher's `spawn_blocking`-wrapped tool dispatch
//! (`tool_script.rs::execute_tool`) generalized to a full request cycle.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::binder::{self, RawBody, RawPart, RequestParts};
use crate::error::ScriptHostError;
use crate::error_writer::{default_error_response, error_hook_bindings};
use crate::guest::{CompiledArtifact, GuestContext};
use crate::media_type;
use crate::pool::InterpreterPool;
use crate::route::RouteDescriptor;
use crate::value::{Value, ValueMap};

/// Everything a route's delegate closure needs, shared immutably across
/// every request that matches it (§3).
pub struct RouteHandler {
    pub route: Arc<RouteDescriptor>,
    pub artifact: Arc<CompiledArtifact>,
    pub pool: Arc<InterpreterPool<GuestContext>>,
    pub shared_state: crate::shared_state::SharedState,
    pub propagate_script_errors: bool,
    /// Compiled `error_response_script` for this route's guest-language
    /// family, if the host configured one (§4.8). Run on a context leased
    /// from the same `pool` as the route itself.
    pub error_hook: Option<Arc<CompiledArtifact>>,
}

/// Content negotiated upfront so the request body can be read the right
/// way (bytes vs. multipart) before the binder ever runs.
fn request_has_body(headers: &HeaderMap) -> bool {
    let content_length = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let has_transfer_encoding = headers.contains_key(axum::http::header::TRANSFER_ENCODING);
    media_type::has_body(content_length, has_transfer_encoding)
}

/// Step 3-11 of §4.6, given the request already split into its parts.
/// `body_source` carries ownership of whichever axum extractor already
/// consumed the request body (bytes or multipart), decided by the
/// route's declared allowed content types before the handler ran.
pub async fn handle(
    handler: Arc<RouteHandler>,
    path_params: HashMap<String, String>,
    query: Option<String>,
    headers: HeaderMap,
    body: RawBody,
    cancel: CancellationToken,
) -> Response {
    let route = &handler.route;
    let content_type_header = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let has_body = request_has_body(&headers);

    // Step 3: C1 check against the route's allowed content types.
    let negotiated = media_type::check_or_error(
        content_type_header,
        &route.allowed_request_content_types,
        has_body,
    );
    if let Err(err) = negotiated {
        return render_error(&handler, err, false, &cancel).await;
    }

    // Step 2/1: acquire a lease, observing cancellation.
    let mut lease = match handler.pool.lease(&cancel).await {
        Ok(lease) => lease,
        Err(ScriptHostError::RequestCancelled) => {
            warn!("request cancelled before interpreter lease was acquired");
            return Response::new(axum::body::Body::empty());
        }
        Err(err) => return render_error(&handler, err, false, &cancel).await,
    };

    // Step 4: bind parameters (fans out to C2).
    let request_parts = RequestParts {
        path_params: &path_params,
        query: query.as_deref().unwrap_or(""),
        headers: &headers,
        content_type: content_type_header,
        body,
    };
    let bound = match binder::bind(route, &request_parts) {
        Ok(bound) => bound,
        Err(err) => {
            // Drop the lease before rendering so the hook (below) can lease
            // its own context from the same pool without self-deadlocking
            // against the permit this request is still holding.
            drop(lease);
            return render_error(&handler, err, false, &cancel).await;
        }
    };

    // Step 5: seed the leased interpreter's globals from the route's
    // `arguments` plus the bound parameters, snapshotting shared state
    // first so scripts see a stable view for their whole execution. If the
    // route binds a request culture, push it onto the interpreter too,
    // for this request's execution only (globals are rebuilt from scratch
    // on every call, so nothing survives past this request).
    let mut globals = ValueMap::new();
    for (name, value) in handler.shared_state.snapshot().iter() {
        globals.insert(name, value.clone());
    }
    for (name, value) in &route.arguments {
        globals.insert(name.clone(), value.clone());
    }
    for (name, value) in &route.locals {
        globals.insert(name.clone(), value.clone());
    }
    for (name, value) in bound.named.iter() {
        globals.insert(name, value.clone());
    }
    if let Some(body_value) = bound.body {
        globals.insert("body", body_value);
    }
    if let Some(culture) = &route.request_culture {
        globals.insert("request_culture", Value::Str(culture.clone()));
    }

    // Step 6: execute the compiled artifact, respecting cancellation. The
    // context is moved into `spawn_blocking` (mirrors the teacher's
    // `tool_script.rs::execute_tool` dispatch of blocking `mlua` work off
    // the async runtime) and restored to the lease once the call returns.
    let artifact = Arc::clone(&handler.artifact);
    let context = lease.take_context();
    let exec_result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScriptHostError::RequestCancelled),
        result = run_blocking(context, artifact, globals, cancel.clone()) => result,
    };

    let outcome = match exec_result {
        Ok((context, outcome)) => {
            lease.restore(context);
            outcome
        }
        Err(ScriptHostError::RequestCancelled) => {
            warn!("request cancelled during script execution");
            return Response::new(axum::body::Body::empty());
        }
        Err(err) => {
            lease.poison();
            drop(lease);
            return render_error(&handler, err, false, &cancel).await;
        }
    };

    drop(lease);

    // Steps 8-11: redirect / has_started / postponed write / apply.
    // The script's return value becomes the response body (C7) unless the
    // script already wrote one explicitly via the `response` object.
    let mut response = outcome.response;
    if response.body.is_none() && response.redirect_url.is_none() {
        response.body = Some(outcome.return_value);
    }
    if let Some(write) = response.postponed_write.take() {
        match write {
            crate::response::PostponedWrite::Error(code) => {
                return render_error(
                    &handler,
                    ScriptHostError::PostponedWriteError { code },
                    response.has_started,
                    &cancel,
                )
                .await;
            }
            crate::response::PostponedWrite::Ok { payload, media_type } => {
                response.body = Some(payload);
                response.content_type = Some(media_type);
            }
        }
    }

    response.apply()
}

/// `GuestContext::execute` is blocking (it calls into `mlua`/`rhai`
/// synchronously); the call is dispatched onto `tokio::task::spawn_blocking`,
/// the same pattern the teacher uses for Lua tool/connector scripts (§5).
/// The context is moved in and handed back alongside the result so the
/// caller can restore it to its lease.
async fn run_blocking(
    mut context: GuestContext,
    artifact: Arc<CompiledArtifact>,
    globals: ValueMap,
    cancel: CancellationToken,
) -> Result<(GuestContext, crate::guest::ExecutionOutcome), ScriptHostError> {
    let joined = tokio::task::spawn_blocking(move || {
        let result = context.execute(&artifact, &globals, &cancel);
        (context, result)
    })
    .await;

    match joined {
        Ok((context, Ok(outcome))) => Ok((context, outcome)),
        Ok((_, Err(err))) => Err(err),
        Err(join_err) => Err(ScriptHostError::ScriptRuntimeFailure {
            message: format!("interpreter task panicked: {join_err}"),
        }),
    }
}

async fn render_error(
    handler: &Arc<RouteHandler>,
    err: ScriptHostError,
    has_started: bool,
    cancel: &CancellationToken,
) -> Response {
    if matches!(err, ScriptHostError::RequestCancelled) {
        return Response::new(axum::body::Body::empty());
    }
    if has_started {
        warn!(error = %err, "error after response already started; swallowing");
        return Response::new(axum::body::Body::empty());
    }
    if matches!(err, ScriptHostError::ScriptRuntimeFailure { .. }) && handler.propagate_script_errors {
        error!(error = %err, "propagating script runtime failure upstream");
    }

    if let Some(artifact) = handler.error_hook.as_ref() {
        match run_error_hook(handler, artifact, &err, cancel).await {
            Ok(response) => return response.apply(),
            Err(hook_err) => {
                error!(error = %hook_err, "error_response_script hook failed; falling back to default error body");
            }
        }
    }

    default_error_response(&err).apply()
}

/// §4.8 custom override: lease a context from the same pool the failing
/// route uses (same guest-language family), seed it with
/// `{status_code, error_message, exception}`, and run the configured hook
/// script. Its return value/`response` writes replace the default error
/// body; a postponed write from the hook itself is not honored (the hook
/// is an error renderer, not a route).
async fn run_error_hook(
    handler: &Arc<RouteHandler>,
    artifact: &Arc<CompiledArtifact>,
    err: &ScriptHostError,
    cancel: &CancellationToken,
) -> Result<crate::response::ResponseModel, ScriptHostError> {
    let mut lease = handler.pool.lease(cancel).await?;
    let context = lease.take_context();
    let mut globals: ValueMap = error_hook_bindings(err).into_iter().collect();
    if let Some(culture) = &handler.route.request_culture {
        globals.insert("request_culture", Value::Str(culture.clone()));
    }

    let (context, outcome) = run_blocking(context, Arc::clone(artifact), globals, cancel.clone()).await?;
    lease.restore(context);

    let mut response = outcome.response;
    if response.body.is_none() && response.redirect_url.is_none() {
        response.body = Some(outcome.return_value);
    }
    Ok(response)
}

/// Extract the request's path params, raw query string, headers, and
/// body (bytes or multipart, decided by whether the negotiated content
/// type is a multipart family) ahead of calling [`handle`]. Kept
/// separate from `handle` so `handle` itself stays a plain async
/// function the tests can drive directly with hand-built parts.
pub async fn extract_and_handle(
    handler: Arc<RouteHandler>,
    Path(path_params): Path<HashMap<String, String>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    cancel: CancellationToken,
    request: axum::extract::Request,
) -> Response {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(media_type::canonicalize);

    let body = if matches!(
        content_type.as_deref(),
        Some(media_type::MULTIPART_FORM_DATA) | Some(media_type::MULTIPART_MIXED)
    ) {
        match Multipart::from_request(request, &State(())).await {
            Ok(mut multipart) => {
                let mut parts = Vec::new();
                while let Ok(Some(field)) = multipart.next_field().await {
                    let name = field.name().unwrap_or_default().to_string();
                    let content_type = field.content_type().map(|s| s.to_string());
                    let bytes = field.bytes().await.unwrap_or_default().to_vec();
                    parts.push(RawPart {
                        name,
                        content_type,
                        bytes,
                    });
                }
                RawBody::Multipart(parts)
            }
            Err(_) => RawBody::None,
        }
    } else {
        match Bytes::from_request(request, &State(())).await {
            Ok(bytes) => {
                if bytes.is_empty() {
                    RawBody::None
                } else {
                    RawBody::Bytes(bytes.to_vec())
                }
            }
            Err(_) => RawBody::None,
        }
    };

    handle(handler, path_params, query, headers, body, cancel).await
}
