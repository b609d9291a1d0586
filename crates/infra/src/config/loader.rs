//! Configuration loader
//!
//! Loads [`PermsSyncConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Every loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! - `PERMSYNC_SCHEDULE_INTERVAL`: Scheduling interval in seconds (required)
//! - `PERMSYNC_METRICS_INTERVAL`: Metrics interval in seconds
//! - `PERMSYNC_OLDEST_PERMS_LIMIT`: Oldest users/repos picked per pass
//! - `PERMSYNC_STALE_PERMS_THRESHOLD`: Age in seconds after which permissions
//!   count as stale
//! - `PERMSYNC_REPO_SPEC_BATCH_SIZE`: Repository identifiers per store lookup
//! - `PERMSYNC_PERMISSIONS_USER_MAPPING`: Explicit permissions API enabled
//!   (true/false)
//! - `PERMSYNC_DISABLE_AUTO_CODE_HOST_SYNCS`: Kill switch (true/false)
//! - `PERMSYNC_ENFORCE_LICENSE`: Whether licensing is enforced (true/false)
//! - `PERMSYNC_ACLS_LICENSED`: Whether the ACLs feature is licensed
//!   (true/false)
//! - `PERMSYNC_RATE_LIMIT_UNLIMITED`: Disable the default rate limit
//!   (true/false)
//! - `PERMSYNC_RATE_LIMIT_CAPACITY`: Default burst capacity
//! - `PERMSYNC_RATE_LIMIT_REFILL_AMOUNT`: Default tokens per refill
//! - `PERMSYNC_RATE_LIMIT_REFILL_INTERVAL_MS`: Default refill interval
//!
//! Per-service rate limits can only be set from a file.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./permsync.json` or `./permsync.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names in the parent and grandparent directories
//! 4. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use permsync_domain::{PermsSyncConfig, PermsSyncError, Result};

const FILE_NAMES: [&str; 4] = ["permsync.json", "permsync.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If the required
/// variable is missing or a value is invalid, falls back to loading from a
/// config file.
///
/// # Errors
/// Returns `PermsSyncError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - A value fails validation
pub fn load() -> Result<PermsSyncConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// Only `PERMSYNC_SCHEDULE_INTERVAL` is required; everything else falls back
/// to its default.
///
/// # Errors
/// Returns `PermsSyncError::Config` if the required variable is missing, a
/// value cannot be parsed, or the result fails validation.
pub fn load_from_env() -> Result<PermsSyncConfig> {
    let defaults = PermsSyncConfig::default();
    let mut config = PermsSyncConfig {
        schedule_interval_secs: env_var("PERMSYNC_SCHEDULE_INTERVAL").and_then(|s| {
            parse_value(&s, "PERMSYNC_SCHEDULE_INTERVAL")
        })?,
        metrics_interval_secs: env_parse("PERMSYNC_METRICS_INTERVAL", defaults.metrics_interval_secs)?,
        oldest_perms_limit: env_parse("PERMSYNC_OLDEST_PERMS_LIMIT", defaults.oldest_perms_limit)?,
        stale_perms_threshold_secs: env_parse(
            "PERMSYNC_STALE_PERMS_THRESHOLD",
            defaults.stale_perms_threshold_secs,
        )?,
        repo_spec_batch_size: env_parse(
            "PERMSYNC_REPO_SPEC_BATCH_SIZE",
            defaults.repo_spec_batch_size,
        )?,
        ..defaults
    };

    let gate = &mut config.feature_gate;
    gate.permissions_user_mapping =
        env_bool("PERMSYNC_PERMISSIONS_USER_MAPPING", gate.permissions_user_mapping);
    gate.disable_auto_code_host_syncs =
        env_bool("PERMSYNC_DISABLE_AUTO_CODE_HOST_SYNCS", gate.disable_auto_code_host_syncs);
    gate.enforce_license = env_bool("PERMSYNC_ENFORCE_LICENSE", gate.enforce_license);
    gate.acls_licensed = env_bool("PERMSYNC_ACLS_LICENSED", gate.acls_licensed);

    let limit = &mut config.rate_limits.default;
    limit.unlimited = env_bool("PERMSYNC_RATE_LIMIT_UNLIMITED", limit.unlimited);
    limit.capacity = env_parse("PERMSYNC_RATE_LIMIT_CAPACITY", limit.capacity)?;
    limit.refill_amount = env_parse("PERMSYNC_RATE_LIMIT_REFILL_AMOUNT", limit.refill_amount)?;
    limit.refill_interval_ms =
        env_parse("PERMSYNC_RATE_LIMIT_REFILL_INTERVAL_MS", limit.refill_interval_ms)?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `PermsSyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - A value fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<PermsSyncConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(PermsSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            PermsSyncError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| PermsSyncError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`); a missing
/// extension is read as JSON.
fn parse_config(contents: &str, path: &Path) -> Result<PermsSyncConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| PermsSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| PermsSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(PermsSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory, its parent and grandparent, then
/// the same locations relative to the executable.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut bases = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            bases.push(exe_dir.to_path_buf());
        }
    }

    bases
        .iter()
        .flat_map(|base| [base.clone(), base.join(".."), base.join("../..")])
        .flat_map(|dir| FILE_NAMES.map(|name| dir.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `PermsSyncError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        PermsSyncError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Parse an optional environment variable, falling back to `default`.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => parse_value(&value, key),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(value: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| PermsSyncError::Config(format!("Invalid value for {key}: {e}")))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
