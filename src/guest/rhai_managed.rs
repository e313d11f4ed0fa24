//! Managed families (§4.5, §9): `Managed` and `ManagedAlt` share one
//! `rhai::Engine`, differing only in how the user's source text is
//! wrapped before compilation. Cancellation uses `Engine::on_progress`,
//! which is registered once on the shared engine and reads a thread-local
//! flag set for the duration of each blocking call — the engine itself
//! can't carry per-request state since it's shared across concurrent
//! leases.

use std::cell::RefCell;
use std::sync::Arc;

use rhai::{Dynamic, Engine, Scope, AST};
use tokio_util::sync::CancellationToken;

use super::ExecutionOutcome;
use crate::error::ScriptHostError;
use crate::response::{PostponedWrite, ResponseModel};
use crate::value::{Value, ValueMap};

thread_local! {
    static CURRENT_CANCEL: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// Marker line inserted before user source in the `ManagedAlt` dialect so
/// compile diagnostics can be offset back to the user's line 1 (§4.5
/// step 4).
const MANAGED_ALT_MARKER: &str = "/* user source begins */";

/// Build the single engine shared by the `Managed` and `ManagedAlt`
/// dialects. `on_progress` is wired once here to the thread-local
/// cancellation flag checked by [`RhaiContext::execute`].
pub fn build_engine() -> Arc<Engine> {
    let mut engine = Engine::new();
    engine.on_progress(|_ops| {
        let cancelled = CURRENT_CANCEL.with(|c| {
            c.borrow()
                .as_ref()
                .map(|t| t.is_cancelled())
                .unwrap_or(false)
        });
        if cancelled {
            Some(Dynamic::from("cancelled".to_string()))
        } else {
            None
        }
    });
    Arc::new(engine)
}

pub struct RhaiArtifact {
    engine: Arc<Engine>,
    ast: AST,
}

impl RhaiArtifact {
    /// Compile `source` for either dialect (§4.5 steps 1-5): generate a
    /// preamble line per known binding name, wrap for `ManagedAlt`, then
    /// compile and surface parse failures as a registration-time
    /// diagnostics error.
    pub fn compile(
        engine: &Arc<Engine>,
        source: &str,
        binding_names: &[String],
        wrap_in_function: bool,
    ) -> Result<Self, ScriptHostError> {
        let preamble: String = binding_names
            .iter()
            .map(|name| format!("let {name} = bindings[\"{name}\"];\n"))
            .collect();

        // Rhai's `fn`-defined functions are pure: they never see the
        // enclosing call's scope, so `bindings` has to be threaded in as
        // an explicit parameter rather than relied upon as a closure
        // capture (there is no `response` access inside the wrapped
        // function for the same reason; `ManagedAlt` scripts only see
        // `bindings`, matching the original dialect pairing's narrower
        // front end).
        let unit = if wrap_in_function {
            format!(
                "fn __route_body(bindings) {{\n{preamble}{MANAGED_ALT_MARKER}\n{source}\n}}\n__route_body(bindings)"
            )
        } else {
            format!("{preamble}{source}")
        };

        let ast = engine.compile(&unit).map_err(|e| ScriptHostError::ScriptDiagnosticsFailure {
            diagnostics: e.to_string(),
        })?;

        Ok(Self {
            engine: Arc::clone(engine),
            ast,
        })
    }
}

/// A pooled Rhai scope. The engine is shared (immutable, `Arc`); only the
/// scope is exclusively owned by the leasing request.
pub struct RhaiContext {
    scope: Scope<'static>,
}

impl Default for RhaiContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiContext {
    pub fn new() -> Self {
        Self {
            scope: Scope::new(),
        }
    }

    pub fn execute(
        &mut self,
        artifact: &RhaiArtifact,
        globals: &ValueMap,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ScriptHostError> {
        self.scope.clear();

        let bindings = value_map_to_rhai_map(globals);
        self.scope.push("bindings", bindings);

        let response_map = default_response_map();
        self.scope.push("response", response_map);

        CURRENT_CANCEL.with(|c| *c.borrow_mut() = Some(cancel.clone()));
        let result = artifact
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &artifact.ast);
        CURRENT_CANCEL.with(|c| *c.borrow_mut() = None);

        let return_value = match result {
            Ok(dynamic) => dynamic_to_value(dynamic),
            Err(e) => {
                if e.to_string().contains("cancelled") {
                    return Err(ScriptHostError::RequestCancelled);
                }
                return Err(ScriptHostError::ScriptRuntimeFailure {
                    message: e.to_string(),
                });
            }
        };

        let response_map = self
            .scope
            .get_value::<rhai::Map>("response")
            .unwrap_or_default();
        let response = rhai_map_to_response(&response_map);

        Ok(ExecutionOutcome {
            return_value,
            response,
        })
    }
}

fn default_response_map() -> rhai::Map {
    let mut map = rhai::Map::new();
    map.insert("status".into(), Dynamic::from(200_i64));
    map.insert("headers".into(), Dynamic::UNIT);
    map.insert("content_type".into(), Dynamic::UNIT);
    map.insert("body".into(), Dynamic::UNIT);
    map.insert("redirect_url".into(), Dynamic::UNIT);
    map.insert("has_started".into(), Dynamic::from(false));
    map.insert("postponed_write".into(), Dynamic::UNIT);
    map
}

fn rhai_map_to_response(map: &rhai::Map) -> ResponseModel {
    let status = map
        .get("status")
        .and_then(|d| d.as_int().ok())
        .unwrap_or(200);
    let content_type = map
        .get("content_type")
        .and_then(|d| d.clone().into_string().ok());
    let redirect_url = map
        .get("redirect_url")
        .and_then(|d| d.clone().into_string().ok());
    let has_started = map
        .get("has_started")
        .and_then(|d| d.as_bool().ok())
        .unwrap_or(false);

    let headers = map
        .get("headers")
        .filter(|d| d.is_map())
        .and_then(|d| d.clone().try_cast::<rhai::Map>())
        .map(|m| {
            m.into_iter()
                .filter_map(|(k, v)| v.into_string().ok().map(|v| (k.to_string(), v)))
                .collect()
        })
        .unwrap_or_default();

    let body = map
        .get("body")
        .filter(|d| !d.is_unit())
        .map(|d| dynamic_to_value(d.clone()));

    let postponed_write = map.get("postponed_write").filter(|d| d.is_map()).and_then(|d| {
        let m = d.clone().try_cast::<rhai::Map>()?;
        let error = m.get("error").and_then(|d| d.as_int().ok()).unwrap_or(0);
        if error != 0 {
            Some(PostponedWrite::Error(error as i32))
        } else {
            let payload = m
                .get("payload")
                .cloned()
                .map(dynamic_to_value)
                .unwrap_or(Value::Null);
            let media_type = m
                .get("media_type")
                .and_then(|d| d.clone().into_string().ok())
                .unwrap_or_else(|| "application/json".to_string());
            Some(PostponedWrite::Ok { payload, media_type })
        }
    });

    ResponseModel {
        status: status as u16,
        headers,
        content_type,
        body,
        redirect_url,
        has_started,
        postponed_write,
    }
}

fn value_map_to_rhai_map(map: &ValueMap) -> rhai::Map {
    let mut out = rhai::Map::new();
    for (k, v) in map.iter() {
        out.insert(k.into(), value_to_dynamic(v));
    }
    out
}

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::Bytes(b) => Dynamic::from_blob(b.clone()),
        Value::List(items) => Dynamic::from_array(items.iter().map(value_to_dynamic).collect()),
        Value::Map(map) => Dynamic::from_map(value_map_to_rhai_map(map)),
    }
}

fn dynamic_to_value(dynamic: Dynamic) -> Value {
    if dynamic.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = dynamic.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = dynamic.as_int() {
        return Value::Int(i);
    }
    if let Ok(f) = dynamic.as_float() {
        return Value::Float(f);
    }
    if dynamic.is_blob() {
        if let Some(blob) = dynamic.clone().try_cast::<rhai::Blob>() {
            return Value::Bytes(blob);
        }
    }
    if dynamic.is_array() {
        if let Some(items) = dynamic.clone().try_cast::<rhai::Array>() {
            return Value::List(items.into_iter().map(dynamic_to_value).collect());
        }
    }
    if dynamic.is_map() {
        if let Some(map) = dynamic.clone().try_cast::<rhai::Map>() {
            let mut out = ValueMap::new();
            for (k, v) in map {
                out.insert(k.to_string(), dynamic_to_value(v));
            }
            return Value::Map(out);
        }
    }
    dynamic
        .into_string()
        .map(Value::Str)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn raw_dialect_sees_bindings_via_preamble() {
        let engine = build_engine();
        let artifact = RhaiArtifact::compile(&engine, "id + 1", &["id".to_string()], false).unwrap();
        let mut ctx = RhaiContext::new();
        let mut globals = ValueMap::new();
        globals.insert("id", Value::Int(41));

        let outcome = ctx.execute(&artifact, &globals, &no_cancel()).unwrap();
        assert_eq!(outcome.return_value, Value::Int(42));
    }

    #[test]
    fn wrapped_dialect_executes_function_template() {
        let engine = build_engine();
        let artifact =
            RhaiArtifact::compile(&engine, "id * 2", &["id".to_string()], true).unwrap();
        let mut ctx = RhaiContext::new();
        let mut globals = ValueMap::new();
        globals.insert("id", Value::Int(21));

        let outcome = ctx.execute(&artifact, &globals, &no_cancel()).unwrap();
        assert_eq!(outcome.return_value, Value::Int(42));
    }

    #[test]
    fn response_map_mutations_are_read_back() {
        let engine = build_engine();
        let artifact = RhaiArtifact::compile(
            &engine,
            r#"response["status"] = 201; response["body"] = #{ok: true};"#,
            &[],
            false,
        )
        .unwrap();
        let mut ctx = RhaiContext::new();
        let globals = ValueMap::new();

        let outcome = ctx.execute(&artifact, &globals, &no_cancel()).unwrap();
        assert_eq!(outcome.response.status, 201);
        assert!(outcome.response.body.is_some());
    }

    #[test]
    fn malformed_script_is_a_diagnostics_failure() {
        let engine = build_engine();
        let result = RhaiArtifact::compile(&engine, "let x = ", &[], false);
        assert!(matches!(
            result,
            Err(ScriptHostError::ScriptDiagnosticsFailure { .. })
        ));
    }
}
