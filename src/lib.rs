//! # scripthost
//!
//! An HTTP application server whose routes are implemented as scripts
//! executed in embedded guest languages rather than compiled handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Route     │──▶│  Binder   │──▶│ Interpreter│──▶│ Response │
//! │  Table     │   │ (C3)      │   │ Pool (C4)  │   │ (C7)     │
//! └────────────┘   └───────────┘   └────────────┘   └──────────┘
//!        ▲                                │
//!        │                                ▼
//!  TOML config                     Shared State (C5)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`value`] | Language-neutral value tree shared by every body decoder |
//! | [`error`] | Error taxonomy and HTTP status mapping |
//! | [`media_type`] | Content-Type canonicalization and negotiation (C1) |
//! | [`decode`] | Body decoder registry (C2) |
//! | [`route`] | Route and parameter descriptors |
//! | [`binder`] | Parameter binding pipeline (C3) |
//! | [`shared_state`] | Process-wide shared state map (C5) |
//! | [`pool`] | Interpreter pool and lease guard (C4) |
//! | [`guest`] | Guest-language compilation and execution |
//! | [`response`] | Response model and postponed writes (C7) |
//! | [`error_writer`] | Default and scripted error responses (C8) |
//! | [`delegate`] | Per-route request handler assembly (C6) |
//! | [`server`] | Axum router construction and serve loop |
//! | [`config`] | TOML configuration parsing and validation |

pub mod binder;
pub mod config;
pub mod decode;
pub mod delegate;
pub mod error;
pub mod error_writer;
pub mod guest;
pub mod media_type;
pub mod pool;
pub mod response;
pub mod route;
pub mod server;
pub mod shared_state;
pub mod value;
