//! Engine settings.
//!
//! Handles loading, validating, and merging `ca-images.toml`. Stock defaults
//! are serialized to a TOML table and the user file is merged on top, so a
//! config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [markup]
//! placeholder_class = "ca-images-noscript"  # Class marking <noscript> placeholders
//! image_class = "ca-images-image"           # Class added to every materialized <img>
//!
//! [loading]
//! default_trigger = "lazy"   # lazy | on_ready | external
//! default_fade_ms = 300      # Fade-in when data-fade-time is absent
//! resize_debounce_ms = 100   # Quiet window before a resize pass runs
//!
//! [lazy_load]
//! ahead_viewports = 1.5      # Load-ahead margin below the fold
//! behind_viewports = 1.0     # Margin above the current scroll position
//!
//! [density]
//! high_density_query_ratio = 1.5  # min-device-pixel-ratio media query threshold
//! fallback_ratio = 1.5            # Used when the device ratio is unknown
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::types::LoadTrigger;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine settings loaded from `ca-images.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Class names that tie the engine to the page markup.
    pub markup: MarkupConfig,
    /// Defaults applied to placeholders that omit attributes.
    pub loading: LoadingConfig,
    /// Lazy-load margins, in viewport heights.
    pub lazy_load: LazyLoadConfig,
    /// Display density detection.
    pub density: DensityConfig,
}

impl Settings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markup.placeholder_class.trim().is_empty() {
            return Err(ConfigError::Validation(
                "markup.placeholder_class must not be empty".into(),
            ));
        }
        if self.markup.image_class.trim().is_empty() {
            return Err(ConfigError::Validation(
                "markup.image_class must not be empty".into(),
            ));
        }
        for (name, value) in [
            ("lazy_load.ahead_viewports", self.lazy_load.ahead_viewports),
            ("lazy_load.behind_viewports", self.lazy_load.behind_viewports),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }
        if !self.density.fallback_ratio.is_finite() || self.density.fallback_ratio < 1.0 {
            return Err(ConfigError::Validation(
                "density.fallback_ratio must be at least 1.0".into(),
            ));
        }
        if !self.density.high_density_query_ratio.is_finite()
            || self.density.high_density_query_ratio <= 1.0
        {
            return Err(ConfigError::Validation(
                "density.high_density_query_ratio must be greater than 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkupConfig {
    pub placeholder_class: String,
    pub image_class: String,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            placeholder_class: "ca-images-noscript".to_string(),
            image_class: "ca-images-image".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadingConfig {
    /// Trigger used when `data-load-trigger` is absent.
    pub default_trigger: LoadTrigger,
    /// Fade-in duration in milliseconds when `data-fade-time` is absent.
    pub default_fade_ms: u64,
    /// Resize events are coalesced until this many milliseconds pass quietly.
    pub resize_debounce_ms: u64,
}

impl LoadingConfig {
    pub fn default_fade(&self) -> Duration {
        Duration::from_millis(self.default_fade_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            default_trigger: LoadTrigger::Lazy,
            default_fade_ms: 300,
            resize_debounce_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LazyLoadConfig {
    /// How many viewport heights below the fold still count as "in view".
    pub ahead_viewports: f64,
    /// How many viewport heights above the scroll position still count.
    pub behind_viewports: f64,
}

impl Default for LazyLoadConfig {
    fn default() -> Self {
        Self {
            ahead_viewports: 1.5,
            behind_viewports: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DensityConfig {
    /// Threshold passed to the `min-device-pixel-ratio` media query probe.
    pub high_density_query_ratio: f64,
    /// High-density multiplier base when the device ratio is unknown.
    pub fallback_ratio: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            high_density_query_ratio: 1.5,
            fallback_ratio: 1.5,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key-by-key; any other overlay value replaces the base value.
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

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_settings(overlay: Option<toml::Value>) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from a TOML file.
///
/// A missing file yields the stock defaults; a present but invalid file is an error.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return resolve_settings(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_settings(Some(value))
}

/// Returns a fully-commented stock `ca-images.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# ca-images configuration
# =======================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Markup
# ---------------------------------------------------------------------------
[markup]
# Class on the <noscript> elements that carry image data attributes.
placeholder_class = "ca-images-noscript"

# Class added to every <img> the engine inserts.
image_class = "ca-images-image"

# ---------------------------------------------------------------------------
# Loading defaults
# ---------------------------------------------------------------------------
[loading]
# Trigger for placeholders without data-load-trigger: lazy | on_ready | external
default_trigger = "lazy"

# Fade-in duration (ms) for placeholders without data-fade-time.
default_fade_ms = 300

# Resize events are coalesced until this many milliseconds pass without one.
resize_debounce_ms = 100

# ---------------------------------------------------------------------------
# Lazy loading
# ---------------------------------------------------------------------------
[lazy_load]
# Containers starting within this many viewport heights below the scroll
# position begin loading.
ahead_viewports = 1.5

# Containers ending within this many viewport heights above the scroll
# position still load.
behind_viewports = 1.0

# ---------------------------------------------------------------------------
# Display density
# ---------------------------------------------------------------------------
[density]
# Media-query threshold for classifying a display as high density.
high_density_query_ratio = 1.5

# Multiplier base for high-density displays when the device pixel ratio
# cannot be read.
fallback_ratio = 1.5
"##
}
