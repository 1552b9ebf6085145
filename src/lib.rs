//! Dynamic system models on candle
//!
//! This crate wraps a trainable sequence predictor into a model of a dynamic
//! system driven by an input signal, providing:
//! - One-step-ahead prediction (teacher forcing on the true past output)
//! - Free-running simulation feeding predictions back as output history
//! - Signed input/output delays with zero-filled edges
//! - MLP, TCN and LSTM predictors behind one capability contract
//! - Per-channel normalization at the model boundary
//! - Checkpointing of parameters and optimizer state
//!
//! # Example
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use dynsys_model_rs::{DynamicModelConfig, ModelState, ModelStateConfig, RunMode};
//!
//! let config = ModelStateConfig::new(DynamicModelConfig {
//!     model: "tcn".into(),
//!     ar: true,
//!     io_delay: 1,
//!     ..DynamicModelConfig::default()
//! });
//! let mut state = ModelState::new(config, &Device::Cpu).unwrap();
//!
//! let u = Tensor::randn(0f32, 1.0, (4, 1, 100), &Device::Cpu).unwrap();
//! let y = Tensor::randn(0f32, 1.0, (4, 1, 100), &Device::Cpu).unwrap();
//!
//! let model = state.model_mut();
//! let y_osa = model.forward(&u, Some(&y)).unwrap();
//! model.set_mode(RunMode::FreeRunSimulation, false);
//! let y_sim = model.forward(&u, Some(&y)).unwrap();
//! ```
//!
//! # Signals
//!
//! Every signal is a `(batch, channel, time)` `f32` tensor. Autoregressive
//! models feed the predictor the delayed input channels followed by the past
//! output channels.

pub mod config;
pub mod dynamic_model;
pub mod error;
pub mod init;
pub mod mode;
pub mod model_state;
pub mod normalizer;
pub mod predictor;
pub mod signal;
pub mod simulation;

pub use config::{DynamicModelConfig, ModelStateConfig, OptimizerConfig};
pub use dynamic_model::DynamicModel;
pub use error::{DynSysError, DynSysResult, ErrorKind};
pub use init::reseed_parameters;
pub use mode::{RequestedOutput, RunConfig, RunMode};
pub use model_state::{
    CheckpointMeta, ModelOptimizer, ModelState, OptimizerKind, DEFAULT_CHECKPOINT_NAME,
};
pub use normalizer::Normalizer;
pub use predictor::{
    HiddenState, ModelKind, Predictor, SequencePredictor, StateCapability,
};
pub use signal::DelayShifter;
pub use simulation::{FreeRunSimulation, OneStepAhead};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{DynamicModelConfig, ModelStateConfig};
    pub use crate::dynamic_model::DynamicModel;
    pub use crate::error::{DynSysError, DynSysResult};
    pub use crate::mode::{RunConfig, RunMode};
    pub use crate::model_state::ModelState;
    pub use crate::normalizer::Normalizer;
    pub use crate::predictor::{HiddenState, SequencePredictor, StateCapability};
}
