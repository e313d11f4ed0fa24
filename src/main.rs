//! # scripthost
//!
//! An HTTP application server whose distinguishing feature is per-request
//! script execution in embedded guest languages: a dynamic shell-style
//! language (Lua, via `mlua`) and a managed language compiled on the fly
//! in two dialects (Rhai, via the `rhai` crate).
//!
//! ## Architecture
//!
//! ```text
//! Request -> C1 negotiate -> C4 lease -> C3 bind (-> C2 decode) -> C5 execute -> C7/C8 respond
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation (host + route table)
//! - [`route`] — Route and parameter descriptors
//! - [`media_type`] — C1: Content-Type canonicalization and negotiation
//! - [`decode`] — C2: body decoders (JSON/YAML/XML/form/multipart/BSON/CBOR/CSV)
//! - [`binder`] — C3: parameter location, defaulting, coercion
//! - [`pool`] — C4: interpreter context pooling
//! - [`guest`] — C5: Lua (`mlua`) and Rhai (`rhai`) compilation/execution
//! - [`delegate`] — C6: per-route request handler assembly
//! - [`response`] — C7: response model application
//! - [`error`] / [`error_writer`] — C8: error taxonomy and default rendering
//! - [`shared_state`] — process-wide shared state snapshot
//! - [`server`] — `axum` router assembly and serve loop

use scripthost::config;
use scripthost::guest::CompiledArtifact;
use scripthost::server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "scripthost",
    about = "HTTP application server with per-request script execution in embedded guest languages",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/scripthost.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,

    /// Compile every configured route's script without binding a socket,
    /// reporting registration-time diagnostics (§4.5, §10 CLI).
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Check => {
            check_routes(&cfg)?;
        }
    }

    Ok(())
}

fn check_routes(cfg: &config::Config) -> anyhow::Result<()> {
    let rhai_engine = scripthost::guest::rhai_managed::build_engine();
    let mut failures = 0;

    for route in &cfg.routes {
        let binding_names: Vec<String> = route
            .arguments
            .keys()
            .chain(route.locals.keys())
            .cloned()
            .collect();
        match CompiledArtifact::compile(
            route.guest_language,
            &route.script,
            &binding_names,
            &rhai_engine,
        ) {
            Ok(_) => println!("ok   {} {}", route.method, route.pattern),
            Err(err) => {
                failures += 1;
                println!("FAIL {} {}: {err}", route.method, route.pattern);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} route(s) failed diagnostics");
    }
    println!("{} route(s) checked, all ok", cfg.routes.len());
    Ok(())
}
