// Configuration loading and parsing (config/gaffer.toml).
//
// The file is optional: every key has a default matching the original
// pipeline's conventions, so a bare checkout runs without any config.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::ingest::DEFAULT_API_BASE;
use crate::optimizer::SelectionConfig;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    Validation { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Filesystem layout of the pipeline artifacts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub raw_dir: String,
    pub features_path: String,
    pub predictions_dir: String,
    pub model_path: String,
}

impl Default for DataPaths {
    fn default() -> Self {
        DataPaths {
            raw_dir: "data/raw/current".into(),
            features_path: "data/processed/features.csv".into(),
            predictions_dir: "data/predictions".into(),
            model_path: "models/points_model.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: DEFAULT_API_BASE.into(),
        }
    }
}

/// The assembled application config.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub data: DataPaths,
    pub selection: SelectionConfig,
    pub api: ApiConfig,
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    data: DataPaths,
    selection: SelectionConfig,
    solver: SolverSection,
    api: ApiConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SolverSection {
    timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `config/gaffer.toml` under `base_dir`, falling
/// back to full defaults when the file does not exist.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("gaffer.toml");
    if !path.exists() {
        return Ok(Config::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.clone(),
        source: e,
    })?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        source: e,
    })?;

    let mut selection = file.selection;
    if file.solver.timeout_secs.is_some() {
        selection.solver_timeout_secs = file.solver.timeout_secs;
    }

    let config = Config {
        data: file.data,
        selection,
        api: file.api,
    };
    validate(&config)?;
    Ok(config)
}

/// Convenience wrapper: loads config relative to the current working
/// directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Read {
        path: PathBuf::from("."),
        source: e,
    })?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let path_fields: &[(&str, &str)] = &[
        ("data.raw_dir", &config.data.raw_dir),
        ("data.features_path", &config.data.features_path),
        ("data.predictions_dir", &config.data.predictions_dir),
        ("data.model_path", &config.data.model_path),
    ];
    for (name, value) in path_fields {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: (*name).to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    if config.api.base_url.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "api.base_url".into(),
            message: "must not be empty".into(),
        });
    }

    if config.selection.budget < 0.0 {
        return Err(ConfigError::Validation {
            field: "selection.budget".into(),
            message: format!("must be non-negative, got {}", config.selection.budget),
        });
    }

    // Quota/size consistency is deliberately not checked here: it belongs to
    // `SelectionConfig::validate`, which runs at optimization time and
    // surfaces the dedicated inconsistency error.
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
