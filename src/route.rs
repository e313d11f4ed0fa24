//! Route and parameter descriptors (§3). Built once at registration time
//! from [`crate::config`] and shared read-only (`Arc`) across every
//! request that matches the route.

use std::collections::HashMap;

use serde::Deserialize;

use crate::value::Value;

/// Which embedded guest language (and dialect) a route's script runs in
/// (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestLanguage {
    /// Dynamic shell-style language. Backed by `mlua`.
    Shell,
    /// Managed language, raw top-level compilation unit. Backed by `rhai`.
    Managed,
    /// Managed language, function-template-wrapped compilation unit.
    /// Shares the same `rhai::Engine` as `Managed`.
    ManagedAlt,
}

/// Where a parameter's raw value is located in the request (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

/// Target shape a raw value is coerced into (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Integer,
    Number,
    Boolean,
    String,
    Array,
    Object,
    None,
}

/// Binding style for multi-valued parameters (query/header explode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    #[default]
    Form,
    Simple,
}

/// Multipart binding options for a body parameter (§4.3 step 7).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FormOptions {
    /// Field names bound as nested-multipart (recursed, depth ≤ 4).
    #[serde(default)]
    pub nested_fields: Vec<String>,
    /// When set, unrecognized fields are collected under this property
    /// name instead of being dropped.
    #[serde(default)]
    pub additional_properties: Option<String>,
}

/// A single declared route parameter (§3).
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub schema_kind: SchemaKind,
    pub location: Location,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub explode: bool,
    #[serde(default)]
    pub style: Style,
    /// Body-only: content types this parameter will accept.
    #[serde(default)]
    pub content_types: Vec<String>,
    /// Body-only, multipart targets.
    #[serde(default)]
    pub form_options: Option<FormOptions>,
    /// Schema-side metadata resolving the XML wrapped-array open question
    /// (§9): when set, `<wrapper><item/>…</wrapper>` collapses to a list
    /// under this property name instead of the bare repeated-element form.
    #[serde(default)]
    pub wrapped: bool,
}

impl ParameterDescriptor {
    pub fn is_body(&self) -> bool {
        matches!(self.location, Location::Body)
    }
}

/// Request-body-only descriptor, layered on top of a `Body`-location
/// [`ParameterDescriptor`] (§3 invariant: `location=Body` iff this is the
/// unique body parameter).
#[derive(Debug, Clone, Deserialize)]
pub struct RequestBodyDescriptor {
    pub parameter: ParameterDescriptor,
}

/// A route, built once at registration and shared immutably thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDescriptor {
    pub method: String,
    pub pattern: String,
    pub guest_language: GuestLanguage,
    pub script: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default)]
    pub request_body: Option<RequestBodyDescriptor>,
    #[serde(default)]
    pub allowed_request_content_types: Vec<String>,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
    #[serde(default)]
    pub locals: HashMap<String, Value>,
    #[serde(default)]
    pub auth_requirement: Option<String>,
    #[serde(default)]
    pub request_culture: Option<String>,
}

impl RouteDescriptor {
    /// The parameter describing the body, if any (§3: at most one).
    pub fn body_parameter(&self) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.is_body())
    }
}
