//! Application configuration
//!
//! Command-line level settings that decide how the bridge starts up.

use std::path::PathBuf;

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Explicit config file; the platform default is used when unset
    pub config_path: Option<PathBuf>,
    /// Log filter from the bridge config, used when no `-v` flag is given
    pub log_filter: Option<String>,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    /// Get the log filter based on verbosity
    pub fn log_level(&self) -> &str {
        match (self.verbose, self.log_filter.as_deref()) {
            (0, Some(filter)) => filter,
            (0, None) => "info",
            (1, _) => "debug",
            _ => "trace",
        }
    }
}
