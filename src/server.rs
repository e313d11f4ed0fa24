//! HTTP server assembly (§4.6, §6).
//!
//! Builds one `axum` handler per configured route: compiles its script
//! once via C5, wires it to a per-guest-language interpreter pool (C4),
//! and registers it on the router under its declared method and pattern.
//! CORS stays permissive, matching the teacher's own MCP server posture.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::delegate::{self, RouteHandler};
use crate::guest::{CompiledArtifact, GuestContext};
use crate::pool::InterpreterPool;
use crate::route::{GuestLanguage, RouteDescriptor};
use crate::shared_state::SharedState;

/// Which pooled-context family a route's guest language belongs to.
/// `Managed` and `ManagedAlt` share one `RhaiContext` type and therefore
/// one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Family {
    Lua,
    Rhai,
}

impl From<GuestLanguage> for Family {
    fn from(language: GuestLanguage) -> Self {
        match language {
            GuestLanguage::Shell => Family::Lua,
            GuestLanguage::Managed | GuestLanguage::ManagedAlt => Family::Rhai,
        }
    }
}

#[derive(Clone)]
struct AppState;

/// Prepare every configured route's compiled artifact and pool handle,
/// then build the `axum::Router` (§4.6: assembled once per route at
/// registration).
pub fn build_router(config: &Config) -> anyhow::Result<Router> {
    let shared_state = SharedState::new();
    let rhai_engine = crate::guest::rhai_managed::build_engine();

    let mut pools: HashMap<Family, Arc<InterpreterPool<GuestContext>>> = HashMap::new();
    let families: HashSet<Family> = config
        .routes
        .iter()
        .map(|r| Family::from(r.guest_language))
        .collect();
    for family in families {
        let language = match family {
            Family::Lua => GuestLanguage::Shell,
            Family::Rhai => GuestLanguage::Managed,
        };
        let pool = InterpreterPool::new(config.server.interpreter_pool_max, move || {
            GuestContext::new(language)
        });
        pools.insert(family, pool);
    }

    // §4.8: compile the host's custom error-response script once per guest
    // family actually present, so it can run on a context leased from that
    // family's own pool without knowing which route failed.
    let mut error_hooks: HashMap<Family, Arc<CompiledArtifact>> = HashMap::new();
    if let Some(script) = config.server.error_response_script.as_deref() {
        let bindings = vec![
            "status_code".to_string(),
            "error_message".to_string(),
            "exception".to_string(),
        ];
        for family in pools.keys().copied().collect::<Vec<_>>() {
            let language = match family {
                Family::Lua => GuestLanguage::Shell,
                Family::Rhai => GuestLanguage::Managed,
            };
            let artifact = Arc::new(CompiledArtifact::compile(
                language,
                script,
                &bindings,
                &rhai_engine,
            )?);
            error_hooks.insert(family, artifact);
        }
    }

    let mut app = Router::new().route("/health", on(MethodFilter::GET, health));

    for route in &config.routes {
        let route = Arc::new(normalize_route(route, &config.server));
        let binding_names: Vec<String> = route
            .arguments
            .keys()
            .chain(route.locals.keys())
            .cloned()
            .collect();
        let artifact = Arc::new(CompiledArtifact::compile(
            route.guest_language,
            &route.script,
            &binding_names,
            &rhai_engine,
        )?);
        let family = Family::from(route.guest_language);
        let pool = pools
            .get(&family)
            .expect("pool built for every guest language present in the route table")
            .clone();
        let error_hook = error_hooks.get(&family).cloned();

        let handler = Arc::new(RouteHandler {
            route: Arc::clone(&route),
            artifact,
            pool,
            shared_state: shared_state.clone(),
            propagate_script_errors: config.server.propagate_script_errors,
            error_hook,
        });

        let method_filter = parse_method(&route.method)?;
        let axum_pattern = route.pattern.clone();
        app = app.route(
            &axum_pattern,
            on(method_filter, move |path, query, headers, request| {
                dispatch(handler, path, query, headers, request)
            }),
        );

        info!(method = %route.method, pattern = %route.pattern, guest_language = ?route.guest_language, "registered route");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(app.layer(cors).with_state(AppState))
}

/// Apply the host's default allowed-content-types list to routes that
/// didn't declare their own (§6 host-level config surface).
fn normalize_route(route: &RouteDescriptor, host: &crate::config::HostConfig) -> RouteDescriptor {
    let mut route = route.clone();
    if route.allowed_request_content_types.is_empty() {
        route.allowed_request_content_types = host.allowed_request_content_types_default.clone();
    }
    route
}

fn parse_method(method: &str) -> anyhow::Result<MethodFilter> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid HTTP method '{method}'"))?;
    MethodFilter::try_from(method).map_err(|_| anyhow::anyhow!("unsupported HTTP method"))
}

async fn dispatch(
    handler: Arc<RouteHandler>,
    Path(path_params): Path<HashMap<String, String>>,
    RawQuery(query): RawQuery,
    headers: axum::http::HeaderMap,
    request: axum::extract::Request,
) -> Response {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let result = delegate::extract_and_handle(handler, Path(path_params), RawQuery(query), headers, cancel, request)
        .await;
    drop(guard);
    result
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health(State(_): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Start the server: build the router from `config` and serve it until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = build_router(config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "scripthost listening");
    axum::serve(listener, app).await?;
    Ok(())
}
