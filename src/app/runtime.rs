//! Startup: configuration loading and logging

use crate::app::{config::AppConfig, logging::init_logging};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use tracing::debug;

/// Load the bridge configuration and initialize logging
///
/// Configuration is loaded first so its log level can apply; a load failure is
/// returned before any subscriber is installed.
pub fn initialize_app(app: AppConfig) -> Result<BridgeConfig, BridgeError> {
    let config = BridgeConfig::load(app.config_path.as_deref())?;

    let app = app.with_log_filter(config.log_level.clone());
    init_logging(&app);

    debug!(
        data_dir = %config.data_dir.display(),
        main_group = %config.main_group,
        "Configuration loaded"
    );
    Ok(config)
}
