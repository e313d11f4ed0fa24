//! Shell family (§4.5): Lua via `mlua`. The compiled artifact is the
//! source text itself; bindings are injected as Lua globals on the leased
//! context before calling the chunk, the way the teacher's tool/connector
//! scripts set up their VM per invocation (`tool_script.rs::run_lua_tool`).

use std::collections::HashSet;

use mlua::prelude::*;
use mlua::{HookTriggers, VmState};
use tokio_util::sync::CancellationToken;

use super::ExecutionOutcome;
use crate::error::ScriptHostError;
use crate::response::{PostponedWrite, ResponseModel};
use crate::value::{Value, ValueMap};

/// Every `every_nth_instruction(N)` tick, the hook checks the
/// cancellation token (§4.4, generalized from the teacher's wall-clock
/// deadline check in `tool_script.rs` to a `CancellationToken`).
const INSTRUCTION_CHECK_INTERVAL: u32 = 10_000;

pub struct ShellArtifact {
    source: String,
}

impl ShellArtifact {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }
}

/// A pooled Lua VM. `baseline_globals` records the global keys present
/// right after sandboxing, so a later request's locals can be discarded
/// by diffing against it (§4.4: "locals from the previous request are
/// cleared by discarding the mutable globals table").
pub struct LuaContext {
    lua: Lua,
    baseline_globals: HashSet<String>,
}

impl Default for LuaContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaContext {
    pub fn new() -> Self {
        let lua = Lua::new();
        sandbox_globals(&lua);
        let baseline_globals = global_keys(&lua);
        Self {
            lua,
            baseline_globals,
        }
    }

    pub fn execute(
        &mut self,
        artifact: &ShellArtifact,
        globals: &ValueMap,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ScriptHostError> {
        self.reset_globals();
        self.seed_bindings(globals)?;

        let response_table = self
            .lua
            .create_table()
            .map_err(lua_err_to_runtime_failure)?;
        apply_default_response(&response_table).map_err(lua_err_to_runtime_failure)?;
        self.lua
            .globals()
            .set("response", response_table.clone())
            .map_err(lua_err_to_runtime_failure)?;

        let cancel = cancel.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(INSTRUCTION_CHECK_INTERVAL),
            move |_lua, _debug| {
                if cancel.is_cancelled() {
                    Err(mlua::Error::RuntimeError("cancelled".to_string()))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        let result: LuaResult<LuaValue> = self.lua.load(&artifact.source).eval();
        self.lua.remove_hook();

        let return_value = match result {
            Ok(v) => lua_value_to_value(v).map_err(lua_err_to_runtime_failure)?,
            Err(e) if is_cancelled_error(&e) => return Err(ScriptHostError::RequestCancelled),
            Err(e) => {
                return Err(ScriptHostError::ScriptRuntimeFailure {
                    message: e.to_string(),
                })
            }
        };

        let response = read_response(&response_table).map_err(lua_err_to_runtime_failure)?;

        Ok(ExecutionOutcome {
            return_value,
            response,
        })
    }

    fn reset_globals(&self) {
        let globals = self.lua.globals();
        let stale: Vec<String> = globals
            .pairs::<String, LuaValue>()
            .filter_map(|pair| pair.ok())
            .map(|(k, _)| k)
            .filter(|k| !self.baseline_globals.contains(k))
            .collect();
        for key in stale {
            let _ = globals.set(key, LuaValue::Nil);
        }
    }

    fn seed_bindings(&self, globals: &ValueMap) -> Result<(), ScriptHostError> {
        let lua_globals = self.lua.globals();
        for (name, value) in globals.iter() {
            let lua_value = value_to_lua(&self.lua, value).map_err(lua_err_to_runtime_failure)?;
            lua_globals
                .set(name, lua_value)
                .map_err(lua_err_to_runtime_failure)?;
        }
        Ok(())
    }
}

/// The instruction hook's cancellation error reaches `eval()` wrapped in
/// `Error::CallbackError` (mlua always wraps hook/callback failures with
/// a traceback), so a plain `RuntimeError` match never sees it.
fn is_cancelled_error(e: &mlua::Error) -> bool {
    match e {
        mlua::Error::RuntimeError(msg) => msg == "cancelled",
        mlua::Error::CallbackError { cause, .. } => is_cancelled_error(cause),
        _ => false,
    }
}

fn lua_err_to_runtime_failure(e: mlua::Error) -> ScriptHostError {
    ScriptHostError::ScriptRuntimeFailure {
        message: e.to_string(),
    }
}

/// Remove dangerous standard library functions (mirrors
/// `lua_runtime::sandbox_globals`: no guest-script filesystem/process
/// access is part of this host's contract).
fn sandbox_globals(lua: &Lua) {
    let globals = lua.globals();
    let _ = globals.set("os", LuaValue::Nil);
    let _ = globals.set("io", LuaValue::Nil);
    let _ = globals.set("loadfile", LuaValue::Nil);
    let _ = globals.set("dofile", LuaValue::Nil);
    let _ = globals.set("debug", LuaValue::Nil);
}

fn global_keys(lua: &Lua) -> HashSet<String> {
    lua.globals()
        .pairs::<String, LuaValue>()
        .filter_map(|pair| pair.ok())
        .map(|(k, _)| k)
        .collect()
}

fn apply_default_response(table: &LuaTable) -> LuaResult<()> {
    table.set("status", 200i64)?;
    table.set("headers", LuaValue::Nil)?;
    table.set("content_type", LuaValue::Nil)?;
    table.set("body", LuaValue::Nil)?;
    table.set("redirect_url", LuaValue::Nil)?;
    table.set("has_started", false)?;
    table.set("postponed_write", LuaValue::Nil)?;
    Ok(())
}

fn read_response(table: &LuaTable) -> LuaResult<ResponseModel> {
    let status: i64 = table.get("status").unwrap_or(200);
    let content_type: Option<String> = table.get("content_type").ok();
    let redirect_url: Option<String> = table.get("redirect_url").ok();
    let has_started: bool = table.get("has_started").unwrap_or(false);

    let headers = match table.get::<LuaTable>("headers") {
        Ok(t) => t
            .pairs::<String, String>()
            .filter_map(|pair| pair.ok())
            .collect(),
        Err(_) => Vec::new(),
    };

    let body = match table.get::<LuaValue>("body") {
        Ok(LuaValue::Nil) | Err(_) => None,
        Ok(v) => Some(lua_value_to_value(v)?),
    };

    let postponed_write = match table.get::<LuaTable>("postponed_write") {
        Ok(t) => {
            let error: i64 = t.get("error").unwrap_or(0);
            if error != 0 {
                Some(PostponedWrite::Error(error as i32))
            } else {
                let payload: LuaValue = t.get("payload").unwrap_or(LuaValue::Nil);
                let media_type: String = t
                    .get("media_type")
                    .unwrap_or_else(|_| "application/json".to_string());
                Some(PostponedWrite::Ok {
                    payload: lua_value_to_value(payload)?,
                    media_type,
                })
            }
        }
        Err(_) => None,
    };

    Ok(ResponseModel {
        status: status as u16,
        headers,
        content_type,
        body,
        redirect_url,
        has_started,
        postponed_write,
    })
}

fn value_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Int(i) => Ok(LuaValue::Integer(*i)),
        Value::Float(f) => Ok(LuaValue::Number(*f)),
        Value::Str(s) => lua.create_string(s).map(LuaValue::String),
        Value::Bytes(b) => lua.create_string(b).map(LuaValue::String),
        Value::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i as i64 + 1, value_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Map(map) => {
            let table = lua.create_table()?;
            for (k, v) in map.iter() {
                table.set(k, value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

fn lua_value_to_value(value: LuaValue) -> LuaResult<Value> {
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Int(i)),
        LuaValue::Number(n) => Ok(Value::Float(n)),
        LuaValue::String(s) => Ok(Value::Str(s.to_str()?.to_string())),
        LuaValue::Table(t) => {
            let len = t.raw_len();
            if len > 0 {
                let mut items = Vec::new();
                for i in 1..=len {
                    items.push(lua_value_to_value(t.raw_get(i)?)?);
                }
                Ok(Value::List(items))
            } else {
                let mut map = ValueMap::new();
                for pair in t.pairs::<String, LuaValue>() {
                    let (k, v) = pair?;
                    map.insert(k, lua_value_to_value(v)?);
                }
                Ok(Value::Map(map))
            }
        }
        _ => Ok(Value::Null),
    }
}
