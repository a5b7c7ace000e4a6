//! Global configuration loader for taskgate.
//!
//! Reads a TOML file into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::Path;
use std::time::Duration;

use taskgate_core::task::ReconcileTiming;
use taskgate_types::config::GlobalConfig;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "taskgate.toml";

/// Floor for the controller resync interval.
const MIN_RESYNC_SECS: u64 = 5;

/// Load global configuration from `path`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_global_config(path: &Path) -> GlobalConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GlobalConfig::default()
        }
    }
}

/// Reconciler requeue intervals from the controller section.
pub fn reconcile_timing(config: &GlobalConfig) -> ReconcileTiming {
    ReconcileTiming::from_config(&config.controller)
}

pub fn resync_interval(config: &GlobalConfig) -> Duration {
    Duration::from_secs(config.controller.resync_interval_secs.max(MIN_RESYNC_SECS))
}
