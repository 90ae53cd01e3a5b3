//! # nanoclaw-bridge
//!
//! Host side of the boundary between an orchestrator and the sandboxed
//! containers running its agent sessions.
//!
//! ## Usage
//!
//! ```bash
//! nanoclaw-bridge watch [--once]
//! some-agent | nanoclaw-bridge demux [--nonce N]
//! nanoclaw-bridge run [--nonce N] -- <program> [args...]
//! ```
//!
//! ## Modules
//!
//! - `ipc` - Guarded reading, listing and quarantining of JSON command files
//!   dropped by containers, plus the polling watcher that dispatches them
//! - `subprocess` - Sentinel-delimited output demultiplexing, ordered event
//!   delivery and the container session runner
//! - `config` - TOML configuration with `NANOCLAW_*` environment overrides
//! - `app` - Logging setup, startup and fatal error reporting
//! - `error` - Crate-level error type and process exit codes
pub mod app;
pub mod config;
pub mod error;
pub mod ipc;
pub mod subprocess;

pub use error::BridgeError;
