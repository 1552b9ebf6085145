//! Model state: parameters, optimizer and checkpoint persistence.
//!
//! A checkpoint is two files side by side:
//!
//! - `<name>`: predictor parameters in safetensors format, written straight
//!   from the [`VarMap`].
//! - `<name>` with a `json` extension: epoch, validation loss, elapsed
//!   time and optimizer state.
//!
//! ```rust,no_run
//! use candle_core::Device;
//! use dynsys_model_rs::{DynamicModelConfig, ModelState, ModelStateConfig};
//!
//! let config = ModelStateConfig::new(DynamicModelConfig::default());
//! let mut state = ModelState::new(config, &Device::Cpu).unwrap();
//! state.save_model(3, 0.25, 12.5, "runs/exp1", "model.safetensors").unwrap();
//! let epoch = state.load_model("runs/exp1", "model.safetensors").unwrap();
//! assert_eq!(epoch, 3);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use candle_core::{DType, Device};
use candle_nn::{Optimizer, ParamsAdamW, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::config::{ModelStateConfig, OptimizerConfig};
use crate::dynamic_model::DynamicModel;
use crate::error::{DynSysError, DynSysResult};
use crate::init::reseed_parameters;
use crate::predictor::Predictor;

/// File name used when a checkpoint directory is given without a name.
pub const DEFAULT_CHECKPOINT_NAME: &str = "model.safetensors";

/// Supported optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam with decoupled weight decay
    AdamW,
    /// Plain stochastic gradient descent
    Sgd,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdamW => f.write_str("adamw"),
            Self::Sgd => f.write_str("sgd"),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = DynSysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" | "adamw" => Ok(Self::AdamW),
            "sgd" => Ok(Self::Sgd),
            _ => Err(DynSysError::UnsupportedOptimizer(s.to_string())),
        }
    }
}

/// Optimizer over the parameters of a [`ModelState`].
pub enum ModelOptimizer {
    /// AdamW
    AdamW(candle_nn::AdamW),
    /// SGD
    Sgd(candle_nn::SGD),
}

impl ModelOptimizer {
    /// Create the optimizer named in `config` over every variable in `varmap`.
    pub fn build(config: &OptimizerConfig, lr: f64, varmap: &VarMap) -> DynSysResult<Self> {
        let vars = varmap.all_vars();
        let optimizer = match config.name.parse::<OptimizerKind>()? {
            OptimizerKind::AdamW => {
                let params = ParamsAdamW {
                    lr,
                    beta1: config.beta1,
                    beta2: config.beta2,
                    eps: config.eps,
                    weight_decay: config.weight_decay,
                };
                Self::AdamW(candle_nn::AdamW::new(vars, params)?)
            }
            OptimizerKind::Sgd => Self::Sgd(candle_nn::SGD::new(vars, lr)?),
        };
        Ok(optimizer)
    }

    /// Which optimizer this is.
    pub fn kind(&self) -> OptimizerKind {
        match self {
            Self::AdamW(_) => OptimizerKind::AdamW,
            Self::Sgd(_) => OptimizerKind::Sgd,
        }
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::AdamW(opt) => opt.learning_rate(),
            Self::Sgd(opt) => opt.learning_rate(),
        }
    }

    /// Set the learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::AdamW(opt) => opt.set_learning_rate(lr),
            Self::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}

/// Persisted optimizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Optimizer the checkpoint was written with
    pub kind: OptimizerKind,
    /// Learning rate at save time
    pub learning_rate: f64,
}

/// Metadata stored next to the checkpoint weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Epoch counter
    pub epoch: usize,
    /// Validation loss
    pub vloss: f64,
    /// Elapsed training time in seconds
    pub elapsed_time: f64,
    /// Optimizer state
    pub optimizer: OptimizerState,
}

/// Owns a model, its parameters and its optimizer.
pub struct ModelState {
    config: ModelStateConfig,
    device: Device,
    varmap: VarMap,
    model: DynamicModel<Predictor>,
    optimizer: ModelOptimizer,
}

impl ModelState {
    /// Build the model and optimizer described by `config` on `device`.
    pub fn new(config: ModelStateConfig, device: &Device) -> DynSysResult<Self> {
        config.validate()?;
        // CUDA and Metal sample on the device; the CPU RNG cannot be seeded and
        // the parameters are redrawn below instead
        if !device.is_cpu() {
            if let Err(err) = device.set_seed(config.seed) {
                tracing::warn!(seed = config.seed, %err, "failed to seed device");
            }
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = DynamicModel::from_config(&config.model, vb)?;
        reseed_parameters(&varmap, config.seed)?;
        let optimizer = ModelOptimizer::build(&config.optimizer, config.init_lr, &varmap)?;

        tracing::info!(
            seed = config.seed,
            optimizer = %optimizer.kind(),
            lr = config.init_lr,
            parameters = varmap.all_vars().len(),
            "initialized model state"
        );

        Ok(Self {
            config,
            device: device.clone(),
            varmap,
            model,
            optimizer,
        })
    }

    /// Configuration the state was built from.
    pub fn config(&self) -> &ModelStateConfig {
        &self.config
    }

    /// Seed used at construction.
    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Device holding the parameters.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The model.
    pub fn model(&self) -> &DynamicModel<Predictor> {
        &self.model
    }

    /// Mutable access to the model (mode switches).
    pub fn model_mut(&mut self) -> &mut DynamicModel<Predictor> {
        &mut self.model
    }

    /// Parameter store.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// The optimizer.
    pub fn optimizer(&self) -> &ModelOptimizer {
        &self.optimizer
    }

    /// Mutable access to the optimizer.
    pub fn optimizer_mut(&mut self) -> &mut ModelOptimizer {
        &mut self.optimizer
    }

    /// Write a checkpoint to `dir/name` and return the weights path.
    ///
    /// `dir` is created when missing. Only the optimizer kind and learning
    /// rate are saved: candle keeps the AdamW moment estimates private, so a
    /// resumed run restarts them from zero.
    pub fn save_model<P: AsRef<Path>>(
        &self,
        epoch: usize,
        vloss: f64,
        elapsed_time: f64,
        dir: P,
        name: &str,
    ) -> DynSysResult<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let weights = dir.join(name);
        let meta_path = meta_path(&weights)?;

        self.varmap.save(&weights).map_err(|e| {
            DynSysError::checkpoint(format!("failed to write {}: {e}", weights.display()))
        })?;

        let meta = CheckpointMeta {
            epoch,
            vloss,
            elapsed_time,
            optimizer: OptimizerState {
                kind: self.optimizer.kind(),
                learning_rate: self.optimizer.learning_rate(),
            },
        };
        std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;

        tracing::info!(epoch, vloss, path = %weights.display(), "saved checkpoint");
        Ok(weights)
    }

    /// Restore a checkpoint and return its epoch counter.
    ///
    /// `path` is used as is when it names a file, otherwise `path/name` is
    /// loaded. Parameters are overwritten in place, so the model keeps its
    /// current mode.
    pub fn load_model<P: AsRef<Path>>(&mut self, path: P, name: &str) -> DynSysResult<usize> {
        let path = path.as_ref();
        let weights = if path.is_file() {
            path.to_path_buf()
        } else {
            path.join(name)
        };
        if !weights.is_file() {
            return Err(DynSysError::ModelNotFound { path: weights });
        }

        let meta = read_meta(&meta_path(&weights)?)?;
        self.varmap.load(&weights).map_err(|e| {
            DynSysError::checkpoint(format!("failed to read {}: {e}", weights.display()))
        })?;

        if meta.optimizer.kind != self.optimizer.kind() {
            tracing::warn!(
                saved = %meta.optimizer.kind,
                current = %self.optimizer.kind(),
                "checkpoint was written with a different optimizer"
            );
        }
        self.optimizer.set_learning_rate(meta.optimizer.learning_rate);

        tracing::info!(epoch = meta.epoch, vloss = meta.vloss, path = %weights.display(), "loaded checkpoint");
        Ok(meta.epoch)
    }
}

fn meta_path(weights: &Path) -> DynSysResult<PathBuf> {
    let meta = weights.with_extension("json");
    if meta == weights {
        return Err(DynSysError::invalid_config(format!(
            "checkpoint name {} clashes with its metadata file",
            weights.display()
        )));
    }
    Ok(meta)
}

fn read_meta(path: &Path) -> DynSysResult<CheckpointMeta> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DynSysError::checkpoint(format!("failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| DynSysError::checkpoint(format!("failed to parse {}: {e}", path.display())))
}
