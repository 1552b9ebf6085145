//! Configuration parsing and validation.
//!
//! # Example
//!
//! ```rust
//! use dynsys_model_rs::config::ModelStateConfig;
//!
//! let yaml = r#"
//! seed: 7
//! init_lr: 0.001
//! optimizer:
//!   name: adam
//! model:
//!   model: tcn
//!   num_inputs: 1
//!   num_outputs: 1
//!   ar: true
//!   io_delay: 1
//!   tcn:
//!     num_levels: 3
//! "#;
//! let config: ModelStateConfig = serde_yaml::from_str(yaml).unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.model.num_model_inputs(), 2);
//! assert_eq!(config.model.tcn.kernel_size, 2);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DynSysError, DynSysResult};
use crate::predictor::{LstmConfig, MlpConfig, ModelKind, TcnConfig};

/// Configuration of a [`DynamicModel`](crate::DynamicModel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicModelConfig {
    /// Predictor architecture name (`mlp`, `tcn` or `lstm`)
    pub model: String,
    /// Number of process input channels
    pub num_inputs: usize,
    /// Number of process output channels
    pub num_outputs: usize,
    /// Feed past outputs back as extra predictor inputs
    #[serde(default)]
    pub ar: bool,
    /// Signed input/output delay in steps
    #[serde(default)]
    pub io_delay: isize,
    /// MLP hyper-parameters (used when `model` is `mlp`)
    #[serde(default)]
    pub mlp: MlpConfig,
    /// TCN hyper-parameters (used when `model` is `tcn`)
    #[serde(default)]
    pub tcn: TcnConfig,
    /// LSTM hyper-parameters (used when `model` is `lstm`)
    #[serde(default)]
    pub lstm: LstmConfig,
}

impl Default for DynamicModelConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Tcn.to_string(),
            num_inputs: 1,
            num_outputs: 1,
            ar: false,
            io_delay: 0,
            mlp: MlpConfig::default(),
            tcn: TcnConfig::default(),
            lstm: LstmConfig::default(),
        }
    }
}

impl DynamicModelConfig {
    /// Channels the predictor consumes: inputs, plus outputs when
    /// autoregressive.
    pub fn num_model_inputs(&self) -> usize {
        if self.ar {
            self.num_inputs + self.num_outputs
        } else {
            self.num_inputs
        }
    }

    /// Resolve the architecture name.
    pub fn kind(&self) -> DynSysResult<ModelKind> {
        self.model.parse()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DynSysResult<()> {
        let kind = self.kind()?;
        if self.num_inputs == 0 {
            return Err(DynSysError::invalid_config("num_inputs must be > 0"));
        }
        if self.num_outputs == 0 {
            return Err(DynSysError::invalid_config("num_outputs must be > 0"));
        }
        match kind {
            ModelKind::Mlp => self.mlp.validate(),
            ModelKind::Tcn => self.tcn.validate(),
            ModelKind::Lstm => self.lstm.validate(),
        }
    }
}

/// Optimizer selection and hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Optimizer name (`adam`, `adamw` or `sgd`)
    #[serde(default = "default_optimizer")]
    pub name: String,
    /// Beta1 for Adam
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    /// Beta2 for Adam
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    /// Epsilon for numerical stability
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Weight decay (Adam only)
    #[serde(default)]
    pub weight_decay: f64,
}

fn default_optimizer() -> String {
    "adam".into()
}
fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_eps() -> f64 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            name: default_optimizer(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: 0.0,
        }
    }
}

/// Everything needed to build a [`ModelState`](crate::ModelState).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStateConfig {
    /// Seed for parameter initialization
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Optimizer settings
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Initial learning rate
    #[serde(default = "default_init_lr")]
    pub init_lr: f64,
    /// Dynamic model settings
    pub model: DynamicModelConfig,
}

fn default_seed() -> u64 {
    42
}
fn default_init_lr() -> f64 {
    1e-3
}

impl ModelStateConfig {
    /// Default settings around the given model configuration.
    pub fn new(model: DynamicModelConfig) -> Self {
        Self {
            seed: default_seed(),
            optimizer: OptimizerConfig::default(),
            init_lr: default_init_lr(),
            model,
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> DynSysResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> DynSysResult<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DynSysResult<()> {
        if !(self.init_lr.is_finite() && self.init_lr > 0.0) {
            return Err(DynSysError::invalid_config(format!(
                "init_lr must be finite and > 0, got {}",
                self.init_lr
            )));
        }
        self.model.validate()
    }
}
