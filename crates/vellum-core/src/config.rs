//! Editor configuration.
//!
//! Provides the options accepted by the editor composition root, their
//! defaults, loading from TOML and environment overrides. The visual options
//! are passed through to the rendering collaborator untouched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid editor options: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// History defaults.
pub mod history {
    /// Default bound of the undo stack.
    pub const DEFAULT_MAX_HISTORY_SIZE: usize = 50;
}

/// Environment variable names.
pub mod env_vars {
    use super::history;

    pub const MAX_HISTORY: &str = "VELLUM_MAX_HISTORY";
    pub const READONLY: &str = "VELLUM_READONLY";
    pub const GRID: &str = "VELLUM_GRID";
    pub const MIN_SCALE: &str = "VELLUM_MIN_SCALE";
    pub const MAX_SCALE: &str = "VELLUM_MAX_SCALE";
    pub const LOG_JSON: &str = "VELLUM_LOG_JSON";

    /// Undo stack bound from the environment, or the default.
    pub fn max_history_size() -> usize {
        std::env::var(MAX_HISTORY)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(history::DEFAULT_MAX_HISTORY_SIZE)
    }

    /// Whether JSON log output was requested.
    pub fn log_json() -> bool {
        parse_var(LOG_JSON).unwrap_or(false)
    }

    pub(crate) fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }
}

fn default_true() -> bool {
    true
}

fn default_grid_size() -> u32 {
    20
}

fn default_grid_color() -> String {
    "#e0e0e0".to_string()
}

fn default_rule_color() -> String {
    "#888".to_string()
}

fn default_background_color() -> String {
    "#ffffff".to_string()
}

fn default_scale() -> f64 {
    1.0
}

fn default_min_scale() -> f64 {
    0.1
}

fn default_max_scale() -> f64 {
    5.0
}

/// Visual and behavioural editor options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorOptions {
    #[serde(default = "default_true")]
    pub grid: bool,
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    #[serde(default = "default_grid_color")]
    pub grid_color: String,
    #[serde(default = "default_true")]
    pub rule: bool,
    #[serde(default = "default_rule_color")]
    pub rule_color: String,
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_min_scale")]
    pub min_scale: f64,
    #[serde(default = "default_max_scale")]
    pub max_scale: f64,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            grid: true,
            grid_size: default_grid_size(),
            grid_color: default_grid_color(),
            rule: true,
            rule_color: default_rule_color(),
            background_color: default_background_color(),
            background_image: None,
            readonly: false,
            scale: default_scale(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
        }
    }
}

/// Partial options, merged over the current ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorOptionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<f64>,
}

impl From<&EditorOptions> for EditorOptionsPatch {
    /// A patch that sets every field to the value in `options`.
    fn from(options: &EditorOptions) -> Self {
        Self {
            grid: Some(options.grid),
            grid_size: Some(options.grid_size),
            grid_color: Some(options.grid_color.clone()),
            rule: Some(options.rule),
            rule_color: Some(options.rule_color.clone()),
            background_color: Some(options.background_color.clone()),
            background_image: options.background_image.clone(),
            readonly: Some(options.readonly),
            scale: Some(options.scale),
            min_scale: Some(options.min_scale),
            max_scale: Some(options.max_scale),
        }
    }
}

impl EditorOptions {
    /// Apply every field set in `patch`.
    pub fn merge(&mut self, patch: &EditorOptionsPatch) {
        if let Some(v) = patch.grid {
            self.grid = v;
        }
        if let Some(v) = patch.grid_size {
            self.grid_size = v;
        }
        if let Some(v) = &patch.grid_color {
            self.grid_color = v.clone();
        }
        if let Some(v) = patch.rule {
            self.rule = v;
        }
        if let Some(v) = &patch.rule_color {
            self.rule_color = v.clone();
        }
        if let Some(v) = &patch.background_color {
            self.background_color = v.clone();
        }
        if let Some(v) = &patch.background_image {
            self.background_image = Some(v.clone());
        }
        if let Some(v) = patch.readonly {
            self.readonly = v;
        }
        if let Some(v) = patch.scale {
            self.scale = v;
        }
        if let Some(v) = patch.min_scale {
            self.min_scale = v;
        }
        if let Some(v) = patch.max_scale {
            self.max_scale = v;
        }
    }

    /// Copy of `self` with `patch` applied.
    pub fn merged(&self, patch: &EditorOptionsPatch) -> Self {
        let mut options = self.clone();
        options.merge(patch);
        options
    }

    /// Check the scale bounds and grid size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size == 0 {
            return Err(ConfigError::Invalid("gridSize must be positive".to_string()));
        }
        if self.min_scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "minScale must be positive, got {}",
                self.min_scale
            )));
        }
        if self.min_scale > self.max_scale {
            return Err(ConfigError::Invalid(format!(
                "minScale {} exceeds maxScale {}",
                self.min_scale, self.max_scale
            )));
        }
        if self.scale < self.min_scale || self.scale > self.max_scale {
            return Err(ConfigError::Invalid(format!(
                "scale {} outside [{}, {}]",
                self.scale, self.min_scale, self.max_scale
            )));
        }
        Ok(())
    }

    /// Clamp a zoom level into the configured bounds.
    pub fn clamp_scale(&self, scale: f64) -> f64 {
        scale.max(self.min_scale).min(self.max_scale)
    }

    /// Parse options from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let options: EditorOptions = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Override fields from `VELLUM_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_vars::parse_var(env_vars::READONLY) {
            self.readonly = v;
        }
        if let Some(v) = env_vars::parse_var(env_vars::GRID) {
            self.grid = v;
        }
        if let Some(v) = env_vars::parse_var(env_vars::MIN_SCALE) {
            self.min_scale = v;
        }
        if let Some(v) = env_vars::parse_var(env_vars::MAX_SCALE) {
            self.max_scale = v;
        }
    }
}
