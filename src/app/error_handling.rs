//! Error handling utilities
//!
//! This module provides centralized error handling for the application.

use crate::error::{BridgeError, EXIT_CONFIG, EXIT_GENERAL};
use tracing::error;

/// Exit status for an error reaching `main`
///
/// A `BridgeError` anywhere in the chain decides; otherwise clap-style usage
/// problems map to the argument exit code.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    if let Some(bridge_err) = error.chain().find_map(|e| e.downcast_ref::<BridgeError>()) {
        return bridge_err.exit_code();
    }
    if error.downcast_ref::<clap::Error>().is_some() {
        return EXIT_CONFIG;
    }
    EXIT_GENERAL
}

/// Handle fatal errors and exit with appropriate status code
///
/// # Verbose Mode Behavior
/// - `verbose = 0`: User-friendly message only
/// - `verbose >= 1`: Includes the full error chain
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {:#}", error);

    match error.chain().find_map(|e| e.downcast_ref::<BridgeError>()) {
        Some(bridge_err) => eprintln!("{}", bridge_err.user_message()),
        None => eprintln!("Error: {error}"),
    }

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code_for(&error))
}
