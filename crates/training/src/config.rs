use std::{
    fs,
    path::{Path, PathBuf},
};

use parametrize::{Sym, SymF, Symmetric, TransformSpec};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// A full training run: which map to register, on which layer, and how to fit it.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    pub parametrization: ParametrizationConfig,
    pub layer: LayerConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParametrizationConfig {
    Sym {
        #[serde(default = "default_lower")]
        lower: bool,
    },
    Symmetric {
        #[serde(default = "default_lower")]
        lower: bool,
    },
    SymF {
        rank: usize,
        transform: TransformSpec,
        #[serde(default = "default_lower")]
        lower: bool,
    },
}

impl ParametrizationConfig {
    pub fn lower(&self) -> bool {
        match self {
            ParametrizationConfig::Sym { lower }
            | ParametrizationConfig::Symmetric { lower }
            | ParametrizationConfig::SymF { lower, .. } => *lower,
        }
    }
}

/// Built map, kept concrete so the trainer can register it by value.
#[derive(Debug, Clone)]
pub enum BuiltParametrization {
    Sym(Sym),
    SymF(SymF),
}

impl ParametrizationConfig {
    /// Constructs the map for an `n x n` weight.
    pub fn build(&self, n: usize) -> Result<BuiltParametrization, TrainingError> {
        let size = [n, n];
        let built = match self {
            ParametrizationConfig::Sym { lower } => BuiltParametrization::Sym(Sym::new(&size, *lower)?),
            ParametrizationConfig::Symmetric { lower } => {
                BuiltParametrization::Sym(Symmetric::new(&size, *lower)?)
            }
            ParametrizationConfig::SymF {
                rank,
                transform,
                lower,
            } => BuiltParametrization::SymF(SymF::new(&size, *rank, transform.clone(), *lower)?),
        };
        Ok(built)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    pub size: usize,
    #[serde(default = "default_bias")]
    pub bias: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub clip_global_norm: Option<f64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            momentum: 0.0,
            weight_decay: 0.0,
            clip_global_norm: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Cpu,
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_log_every")]
    pub log_every_n_steps: usize,
    #[serde(default = "default_cached")]
    pub cached: bool,
    #[serde(default = "default_symmetry_tolerance")]
    pub symmetry_tolerance: f64,
    #[serde(default = "default_device")]
    pub device: DeviceChoice,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            batch_size: default_batch_size(),
            log_every_n_steps: default_log_every(),
            cached: default_cached(),
            symmetry_tolerance: default_symmetry_tolerance(),
            device: default_device(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    /// JSON-lines file receiving one record per step.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
    #[serde(default = "default_flush_every")]
    pub flush_every_n: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_stdout: default_enable_stdout(),
            metrics_path: None,
            flush_every_n: default_flush_every(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::load_with_overrides(path, &[])
    }

    /// Reads the file into a JSON tree, applies `path = value` overrides, then
    /// deserializes and validates.
    pub fn load_with_overrides(
        path: impl AsRef<Path>,
        overrides: &[(String, Value)],
    ) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut tree: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        for (key, value) in overrides {
            set_value_at_path(&mut tree, key, value.clone())?;
        }

        let mut config: ExperimentConfig = serde_json::from_value(tree)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Resolves relative paths against the directory holding the config file.
    pub fn apply_base_path(&mut self, base_dir: &Path) {
        if let Some(path) = self.logging.metrics_path.as_mut() {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if self.layer.size == 0 {
            errors.push("layer.size must be greater than 0".to_string());
        }

        if let ParametrizationConfig::SymF { rank, .. } = &self.parametrization {
            if *rank == 0 || *rank > self.layer.size {
                errors.push(format!(
                    "parametrization.rank must be in (0, {}], got {}",
                    self.layer.size, rank
                ));
            }
        }

        if self.optimizer.learning_rate <= 0.0 {
            errors.push("optimizer.learning_rate must be greater than 0".to_string());
        }

        if !(0.0..1.0).contains(&self.optimizer.momentum) {
            errors.push("optimizer.momentum must be in [0, 1)".to_string());
        }

        if self.optimizer.weight_decay < 0.0 {
            errors.push("optimizer.weight_decay must be >= 0".to_string());
        }

        if let Some(norm) = self.optimizer.clip_global_norm {
            if norm <= 0.0 {
                errors.push("optimizer.clip_global_norm must be greater than 0".to_string());
            }
        }

        if self.runtime.steps == 0 {
            errors.push("runtime.steps must be greater than 0".to_string());
        }

        if self.runtime.batch_size == 0 {
            errors.push("runtime.batch_size must be greater than 0".to_string());
        }

        if self.runtime.log_every_n_steps == 0 {
            errors.push("runtime.log_every_n_steps must be greater than 0".to_string());
        }

        if self.runtime.symmetry_tolerance < 0.0 {
            errors.push("runtime.symmetry_tolerance must be >= 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrainingError::validation(errors))
        }
    }
}

fn set_value_at_path(tree: &mut Value, path: &str, new_value: Value) -> Result<(), TrainingError> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(TrainingError::runtime(format!(
            "invalid override path '{}'",
            path
        )));
    }

    let mut current = tree;
    for (idx, segment) in segments.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().ok_or_else(|| {
            TrainingError::runtime(format!(
                "override path segment '{}' points to non-object value",
                segment
            ))
        })?;
        if idx + 1 == segments.len() {
            map.insert(segment.to_string(), new_value);
            return Ok(());
        }
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    Ok(())
}

/// Interprets a command-line override value as JSON where possible.
pub fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn default_lower() -> bool {
    true
}

fn default_bias() -> bool {
    true
}

fn default_learning_rate() -> f64 {
    1.0
}

fn default_steps() -> usize {
    2
}

fn default_batch_size() -> usize {
    5
}

fn default_log_every() -> usize {
    1
}

fn default_cached() -> bool {
    true
}

fn default_symmetry_tolerance() -> f64 {
    1e-6
}

fn default_device() -> DeviceChoice {
    DeviceChoice::Cpu
}

fn default_enable_stdout() -> bool {
    true
}

fn default_flush_every() -> usize {
    16
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("trainer initialization failed: {0}")]
    Initialization(String),

    #[error("training failed: {0}")]
    Runtime(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<parametrize::ConfigurationError> for TrainingError {
    fn from(value: parametrize::ConfigurationError) -> Self {
        TrainingError::Initialization(value.to_string())
    }
}

impl From<parametrize::ParametrizeError> for TrainingError {
    fn from(value: parametrize::ParametrizeError) -> Self {
        TrainingError::Initialization(value.to_string())
    }
}

impl From<candle_core::Error> for TrainingError {
    fn from(value: candle_core::Error) -> Self {
        TrainingError::Runtime(value.to_string())
    }
}
