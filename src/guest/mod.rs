//! Guest-language compilation and execution (C5, part of C4's pooled
//! contexts). Two families are supported: the dynamic `Shell` family
//! (Lua, via `mlua`) and the compiled-once `Managed`/`ManagedAlt`
//! families (Rhai, via the `rhai` crate, sharing one `rhai::Engine`).

pub mod lua;
pub mod rhai_managed;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ScriptHostError;
use crate::response::ResponseModel;
use crate::route::GuestLanguage;
use crate::value::{Value, ValueMap};

/// The result of running a compiled artifact once: the script's return
/// value plus whatever it did to the response model (§3).
pub struct ExecutionOutcome {
    pub return_value: Value,
    pub response: ResponseModel,
}

/// A route's prepared script, ready to run on any context of the matching
/// guest language (§3: "shared across requests, read-only after
/// creation").
pub enum CompiledArtifact {
    Shell(lua::ShellArtifact),
    Managed(rhai_managed::RhaiArtifact),
    ManagedAlt(rhai_managed::RhaiArtifact),
}

impl CompiledArtifact {
    pub fn compile(
        language: GuestLanguage,
        source: &str,
        binding_names: &[String],
        rhai_engine: &Arc<rhai::Engine>,
    ) -> Result<Self, ScriptHostError> {
        match language {
            GuestLanguage::Shell => Ok(CompiledArtifact::Shell(lua::ShellArtifact::new(source))),
            GuestLanguage::Managed => {
                rhai_managed::RhaiArtifact::compile(rhai_engine, source, binding_names, false)
                    .map(CompiledArtifact::Managed)
            }
            GuestLanguage::ManagedAlt => {
                rhai_managed::RhaiArtifact::compile(rhai_engine, source, binding_names, true)
                    .map(CompiledArtifact::ManagedAlt)
            }
        }
    }

    pub fn language(&self) -> GuestLanguage {
        match self {
            CompiledArtifact::Shell(_) => GuestLanguage::Shell,
            CompiledArtifact::Managed(_) => GuestLanguage::Managed,
            CompiledArtifact::ManagedAlt(_) => GuestLanguage::ManagedAlt,
        }
    }
}

/// A pooled execution context, exclusively owned by the current request
/// between lease and release (§3).
pub enum GuestContext {
    Lua(lua::LuaContext),
    Rhai(rhai_managed::RhaiContext),
}

impl GuestContext {
    pub fn new(language: GuestLanguage) -> Self {
        match language {
            GuestLanguage::Shell => GuestContext::Lua(lua::LuaContext::new()),
            GuestLanguage::Managed | GuestLanguage::ManagedAlt => {
                GuestContext::Rhai(rhai_managed::RhaiContext::new())
            }
        }
    }

    /// Run `artifact` with `globals` seeded as bindings (§4.4: shared-state
    /// snapshot union route `arguments`/`locals`, locals winning), honoring
    /// `cancel` cooperatively.
    pub fn execute(
        &mut self,
        artifact: &CompiledArtifact,
        globals: &ValueMap,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ScriptHostError> {
        if cancel.is_cancelled() {
            return Err(ScriptHostError::RequestCancelled);
        }
        match (self, artifact) {
            (GuestContext::Lua(ctx), CompiledArtifact::Shell(artifact)) => {
                ctx.execute(artifact, globals, cancel)
            }
            (GuestContext::Rhai(ctx), CompiledArtifact::Managed(artifact))
            | (GuestContext::Rhai(ctx), CompiledArtifact::ManagedAlt(artifact)) => {
                ctx.execute(artifact, globals, cancel)
            }
            _ => Err(ScriptHostError::ScriptRuntimeFailure {
                message: "guest context / artifact language mismatch".to_string(),
            }),
        }
    }
}
