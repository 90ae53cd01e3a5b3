//! Application module
//!
//! This module contains application-level functionality including:
//! - Verbosity and config-file selection
//! - Logging setup
//! - Startup (config loading)
//! - Fatal error reporting and exit codes

pub mod config;
pub mod error_handling;
pub mod logging;
pub mod runtime;

// Re-export main application functions
pub use config::AppConfig;
pub use error_handling::{exit_code_for, handle_fatal_error};
pub use logging::init_logging;
pub use runtime::initialize_app;
