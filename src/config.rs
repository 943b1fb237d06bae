//! Engine configuration.
//!
//! Handles loading, validating, and merging `engine.toml`. Stock defaults are
//! serialized to a TOML table and the user file is merged on top, so a file
//! needs only the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [cache]
//! enabled = true              # false hands every module a no-op cache
//!
//! [execution]
//! continue_on_error = false   # true runs remaining pipelines after a failure
//!
//! [processing]
//! max_processes = 4           # Max parallel workers (omit for auto = CPU cores)
//!
//! [metadata]
//! Title = "My Site"           # Seeds the engine's global metadata
//! ```
//!
//! Values under `[metadata]` are converted to JSON values and pushed as one
//! layer underneath every document the engine creates. Datetimes become
//! their RFC 3339 string form.
//!
//! Unknown keys outside `[metadata]` are rejected to catch typos early.

use crate::metadata::{Metadata, MetadataError, MetadataItem, item};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name looked up by [`load_settings`].
pub const CONFIG_FILE: &str = "engine.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine settings loaded from `engine.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Execution cache settings.
    pub cache: CacheConfig,
    /// Failure policy.
    pub execution: ExecutionConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Global metadata seeded before the first pipeline runs.
    pub metadata: toml::Table,
}

impl EngineSettings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if let Some(key) = self.metadata.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "metadata key {key:?} must not be blank"
            )));
        }
        Ok(())
    }

    /// The `[metadata]` table as metadata items, in key order.
    pub fn metadata_items(&self) -> Vec<MetadataItem> {
        self.metadata
            .iter()
            .map(|(key, value)| item(key.as_str(), toml_to_json(value)))
            .collect()
    }

    /// The `[metadata]` table as a single-layer stack.
    pub fn global_metadata(&self) -> Result<Metadata, MetadataError> {
        Metadata::from_items(self.metadata_items())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false, every module receives a cache that never stores anything.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Keep running later pipelines after one fails and report every
    /// failure together.
    pub continue_on_error: bool,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of worker threads available to modules.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Convert a TOML value into the JSON value model used by metadata.
pub fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Returns the stock default settings as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(EngineSettings::default()).expect("default settings must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `engine.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no `engine.toml`.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_settings(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<EngineSettings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: EngineSettings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `engine.toml` in the given directory, falling back to
/// stock defaults when the file is absent.
pub fn load_settings(dir: &Path) -> Result<EngineSettings, ConfigError> {
    resolve_settings(stock_defaults_value(), load_raw_config(dir)?)
}

/// Parse settings from TOML text, merged over stock defaults.
pub fn parse_settings(text: &str) -> Result<EngineSettings, ConfigError> {
    let overlay: toml::Value = toml::from_str(text)?;
    resolve_settings(stock_defaults_value(), Some(overlay))
}

/// Returns a fully-commented stock `engine.toml`.
pub fn stock_config_toml() -> &'static str {
    r##"# Folio Engine Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Execution cache
# ---------------------------------------------------------------------------
[cache]
# Per-module caches survive between runs of the same engine. Entries not
# touched during a run are evicted when the run completes successfully.
# Set to false to hand every module a cache that never stores anything.
enabled = true

# ---------------------------------------------------------------------------
# Failure policy
# ---------------------------------------------------------------------------
[execution]
# false: the first failing pipeline aborts the run.
# true:  remaining pipelines still run; all failures are reported together.
continue_on_error = false

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum worker threads for modules that process documents in parallel.
# Omit to use all CPU cores. Values above the core count are clamped.
# max_processes = 4

# ---------------------------------------------------------------------------
# Global metadata
# ---------------------------------------------------------------------------
[metadata]
# Every key here is visible on every document created during a run,
# underneath any metadata the modules add.
# Title = "My Site"
# BaseUrl = "https://example.com"
"##
}
