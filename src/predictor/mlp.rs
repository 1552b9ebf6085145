//! Window multilayer perceptron.
//!
//! Each output step is an MLP of the last `max_past_input` input steps. The
//! first layer is a convolution whose kernel spans the whole window; the
//! remaining layers are point-wise (kernel 1) convolutions, so one call maps a
//! full sequence at once.

use candle_core::{Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use super::{causal_input, trailing_output, SequencePredictor, StateCapability};
use crate::error::{DynSysError, DynSysResult};
use crate::mode::RequestedOutput;

/// Hidden-layer non-linearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Logistic sigmoid
    #[default]
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Rectified linear unit
    Relu,
}

impl Activation {
    fn apply(self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Sigmoid => candle_nn::ops::sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Relu => x.relu(),
        }
    }
}

/// Hyper-parameters of [`MlpPredictor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Width of each hidden layer
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Number of hidden layers (at least 1)
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Input window length seen by each output step
    #[serde(default = "default_max_past_input")]
    pub max_past_input: usize,
    /// Hidden-layer activation
    #[serde(default)]
    pub activation: Activation,
}

fn default_hidden_size() -> usize {
    16
}
fn default_num_layers() -> usize {
    1
}
fn default_max_past_input() -> usize {
    4
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
            num_layers: default_num_layers(),
            max_past_input: default_max_past_input(),
            activation: Activation::default(),
        }
    }
}

impl MlpConfig {
    /// Validate hyper-parameters.
    pub fn validate(&self) -> DynSysResult<()> {
        if self.hidden_size == 0 {
            return Err(DynSysError::invalid_config("mlp.hidden_size must be > 0"));
        }
        if self.num_layers == 0 {
            return Err(DynSysError::invalid_config("mlp.num_layers must be > 0"));
        }
        if self.max_past_input == 0 {
            return Err(DynSysError::invalid_config("mlp.max_past_input must be > 0"));
        }
        Ok(())
    }
}

/// Stateless window MLP.
pub struct MlpPredictor {
    window: Conv1d,
    hidden: Vec<Conv1d>,
    output: Conv1d,
    activation: Activation,
    num_inputs: usize,
    num_outputs: usize,
    max_past_input: usize,
    requested_output: RequestedOutput,
}

impl MlpPredictor {
    /// Create an MLP with parameters registered under `vb`.
    pub fn new(
        num_inputs: usize,
        num_outputs: usize,
        config: &MlpConfig,
        vb: VarBuilder,
    ) -> DynSysResult<Self> {
        config.validate()?;
        let cfg = Conv1dConfig::default();
        let hidden_size = config.hidden_size;

        let window = conv1d(num_inputs, hidden_size, config.max_past_input, cfg, vb.pp("window"))?;
        let hidden = (1..config.num_layers)
            .map(|i| conv1d(hidden_size, hidden_size, 1, cfg, vb.pp(format!("hidden.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let output = conv1d(hidden_size, num_outputs, 1, cfg, vb.pp("output"))?;

        Ok(Self {
            window,
            hidden,
            output,
            activation: config.activation,
            num_inputs,
            num_outputs,
            max_past_input: config.max_past_input,
            requested_output: RequestedOutput::Same,
        })
    }

    /// Input window length.
    pub fn max_past_input(&self) -> usize {
        self.max_past_input
    }
}

impl SequencePredictor for MlpPredictor {
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn capability(&self) -> StateCapability {
        StateCapability::Stateless
    }

    fn requested_output(&self) -> RequestedOutput {
        self.requested_output
    }

    fn set_requested_output(&mut self, requested: RequestedOutput) {
        self.requested_output = requested;
    }

    fn requested_input(&self, requested_output: usize) -> usize {
        requested_output + self.max_past_input - 1
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = causal_input(x, self.max_past_input, self.requested_output)?;
        let mut h = self.activation.apply(&self.window.forward(&x)?)?;
        for layer in &self.hidden {
            h = self.activation.apply(&layer.forward(&h)?)?;
        }
        let y = self.output.forward(&h)?;
        trailing_output(&y, self.requested_output)
    }
}
