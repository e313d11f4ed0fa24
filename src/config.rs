//! Configuration parsing and validation.
//!
//! `scripthost` is configured via a TOML file (default: `config/scripthost.toml`)
//! that declares the host's bind address, interpreter pool size, and the
//! route table — each route a `{method, pattern, guest_language, script,
//! parameters[], ...}` entry (§6).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::route::RouteDescriptor;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: HostConfig,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteDescriptor>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    pub bind: String,
    #[serde(default = "default_pool_max")]
    pub interpreter_pool_max: usize,
    #[serde(default)]
    pub allowed_request_content_types_default: Vec<String>,
    /// Guest-language script run by C8 to render a custom error body
    /// (§4.8). Shares the route's guest-language family conventions.
    #[serde(default)]
    pub error_response_script: Option<String>,
    #[serde(default)]
    pub propagate_script_errors: bool,
}

fn default_pool_max() -> usize {
    16
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.server.interpreter_pool_max == 0 {
        anyhow::bail!("server.interpreter_pool_max must be > 0");
    }

    for route in &config.routes {
        if route.pattern.is_empty() {
            anyhow::bail!("route pattern must not be empty");
        }
        if route.script.trim().is_empty() {
            anyhow::bail!("route '{}' has an empty script", route.pattern);
        }
        let body_params = route.parameters.iter().filter(|p| p.is_body()).count();
        if body_params > 1 {
            anyhow::bail!(
                "route '{}' declares {} body parameters; at most one is allowed",
                route.pattern,
                body_params
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_host_and_route() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            bind = "127.0.0.1:8080"

            [[route]]
            method = "GET"
            pattern = "/items/{{id}}"
            guest_language = "shell"
            script = "return id"

            [[route.parameters]]
            name = "id"
            schema_kind = "integer"
            location = "path"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].parameters.len(), 1);
    }

    #[test]
    fn rejects_multiple_body_parameters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            bind = "127.0.0.1:8080"

            [[route]]
            method = "POST"
            pattern = "/u"
            guest_language = "shell"
            script = "return 1"

            [[route.parameters]]
            name = "a"
            schema_kind = "object"
            location = "body"

            [[route.parameters]]
            name = "b"
            schema_kind = "object"
            location = "body"
            "#
        )
        .unwrap();

        assert!(load_config(file.path()).is_err());
    }
}
