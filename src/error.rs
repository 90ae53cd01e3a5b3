use crate::config::ConfigError;
use crate::ipc::QuarantineError;
use crate::subprocess::streaming::DeliveryError;
use thiserror::Error;

/// Exit status for configuration and argument problems
pub const EXIT_CONFIG: i32 = 2;
/// Exit status when a rejected file could not be moved out of the drop directory
pub const EXIT_STORAGE: i32 = 3;
pub const EXIT_GENERAL: i32 = 1;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Quarantine failed: {0}")]
    Quarantine(#[from] QuarantineError),

    #[error("Output delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl BridgeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidArgument(_) => EXIT_CONFIG,
            Self::Quarantine(_) => EXIT_STORAGE,
            Self::Delivery(_) => EXIT_GENERAL,
        }
    }

    /// Message shown to the operator without the error chain
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(e) => format!("Configuration problem: {e}"),
            Self::InvalidArgument(msg) => format!("Invalid argument: {msg}"),
            Self::Quarantine(e) => format!(
                "Could not quarantine a rejected IPC file; refusing to keep polling: {e}"
            ),
            Self::Delivery(e) => format!("Output delivery failed: {e}"),
        }
    }
}
