//! # Hubbub Server
//!
//! WebSocket front end for the Hubbub chat relay. The binary in `main.rs`
//! wires these modules together; they are exposed as a library so the
//! relay can be embedded and driven end-to-end from tests.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
