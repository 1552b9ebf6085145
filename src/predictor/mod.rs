//! Sequence predictors and the capability contract the simulation core uses.
//!
//! The executors in [`crate::simulation`] only ever talk to a predictor through
//! [`SequencePredictor`]. The one architecture-dependent decision they make,
//! whether to thread an internal state through the calls, is read from
//! [`SequencePredictor::capability`] rather than from the concrete type.
//!
//! Three architectures ship with the crate and are selected by name through
//! [`ModelKind`]:
//!
//! | Name   | Type               | State     | `requested_input(n)` |
//! |--------|--------------------|-----------|----------------------|
//! | `mlp`  | [`MlpPredictor`]   | stateless | `n + max_past_input - 1` |
//! | `tcn`  | [`TcnPredictor`]   | stateless | `n + rf - 1` |
//! | `lstm` | [`LstmPredictor`]  | stateful  | `n` |

mod lstm;
mod mlp;
mod tcn;

pub use lstm::{LstmConfig, LstmPredictor};
pub use mlp::{Activation, MlpConfig, MlpPredictor};
pub use tcn::{TcnConfig, TcnPredictor};

use std::fmt;
use std::str::FromStr;

use candle_core::{Device, Result, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::config::DynamicModelConfig;
use crate::error::{DynSysError, DynSysResult};
use crate::mode::RequestedOutput;
use crate::signal::{time_len, TIME_AXIS};

/// Whether a predictor carries state from one invocation to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCapability {
    /// Output depends only on the input window.
    Stateless,
    /// Output depends on the input window and a [`HiddenState`].
    Stateful,
}

impl StateCapability {
    /// True for [`StateCapability::Stateful`].
    #[inline]
    pub const fn is_stateful(self) -> bool {
        matches!(self, Self::Stateful)
    }
}

/// Opaque per-batch internal state of a stateful predictor.
///
/// Created by [`SequencePredictor::init_hidden`], consumed and re-produced by
/// every [`SequencePredictor::forward_with_state`] call. Only the predictor
/// that created a state knows how to read it.
#[derive(Debug, Clone, Default)]
pub struct HiddenState {
    tensors: Vec<Tensor>,
}

impl HiddenState {
    /// Wrap the tensors making up a state.
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    /// State of a stateless predictor.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when the state holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// The tensors in the order the owning predictor stored them.
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Take the tensors out of the state.
    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }
}

/// Capability contract of a trainable sequence predictor.
///
/// Inputs and outputs are `(batch, channel, time)` signals. The length of the
/// output follows the current [`RequestedOutput`]: the input length for
/// [`RequestedOutput::Same`], exactly `n` steps for
/// [`RequestedOutput::Steps`] when the input holds `requested_input(n)` steps.
pub trait SequencePredictor {
    /// Number of input channels the predictor consumes.
    fn num_inputs(&self) -> usize;

    /// Number of output channels the predictor produces.
    fn num_outputs(&self) -> usize;

    /// Stateless or stateful invocation path.
    fn capability(&self) -> StateCapability;

    /// Shorthand for `capability().is_stateful()`.
    fn has_internal_state(&self) -> bool {
        self.capability().is_stateful()
    }

    /// Current requested-output configuration.
    fn requested_output(&self) -> RequestedOutput;

    /// Reconfigure how many output steps each invocation produces.
    fn set_requested_output(&mut self, requested: RequestedOutput);

    /// Trailing input steps needed to produce `requested_output` output steps.
    fn requested_input(&self, requested_output: usize) -> usize;

    /// Fresh zeroed state for `batch` sequences.
    fn init_hidden(&self, _batch: usize, _device: &Device) -> Result<HiddenState> {
        Ok(HiddenState::empty())
    }

    /// Stateless invocation.
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// Stateful invocation. Stateless predictors hand the state back untouched.
    fn forward_with_state(&self, x: &Tensor, state: HiddenState) -> Result<(Tensor, HiddenState)> {
        Ok((self.forward(x)?, state))
    }
}

/// Predictor architectures selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Window multilayer perceptron
    Mlp,
    /// Temporal convolutional network
    Tcn,
    /// Long short-term memory network
    Lstm,
}

impl ModelKind {
    /// Lowercase architecture name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mlp => "mlp",
            Self::Tcn => "tcn",
            Self::Lstm => "lstm",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = DynSysError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mlp" => Ok(Self::Mlp),
            "tcn" => Ok(Self::Tcn),
            "lstm" => Ok(Self::Lstm),
            _ => Err(DynSysError::UnsupportedModel(s.to_string())),
        }
    }
}

/// One of the built-in predictor architectures.
pub enum Predictor {
    /// Window MLP
    Mlp(MlpPredictor),
    /// Temporal convolutional network
    Tcn(TcnPredictor),
    /// LSTM
    Lstm(LstmPredictor),
}

impl Predictor {
    /// Build the architecture named in `config`, consuming
    /// `config.num_model_inputs()` channels.
    pub fn from_config(config: &DynamicModelConfig, vb: VarBuilder) -> DynSysResult<Self> {
        let kind: ModelKind = config.model.parse()?;
        let num_inputs = config.num_model_inputs();
        let num_outputs = config.num_outputs;
        let predictor = match kind {
            ModelKind::Mlp => {
                Self::Mlp(MlpPredictor::new(num_inputs, num_outputs, &config.mlp, vb.pp("mlp"))?)
            }
            ModelKind::Tcn => {
                Self::Tcn(TcnPredictor::new(num_inputs, num_outputs, &config.tcn, vb.pp("tcn"))?)
            }
            ModelKind::Lstm => Self::Lstm(LstmPredictor::new(
                num_inputs,
                num_outputs,
                &config.lstm,
                vb.pp("lstm"),
            )?),
        };
        Ok(predictor)
    }

    /// Architecture of this predictor.
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Mlp(_) => ModelKind::Mlp,
            Self::Tcn(_) => ModelKind::Tcn,
            Self::Lstm(_) => ModelKind::Lstm,
        }
    }

    fn inner(&self) -> &dyn SequencePredictor {
        match self {
            Self::Mlp(m) => m,
            Self::Tcn(m) => m,
            Self::Lstm(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SequencePredictor {
        match self {
            Self::Mlp(m) => m,
            Self::Tcn(m) => m,
            Self::Lstm(m) => m,
        }
    }
}

impl SequencePredictor for Predictor {
    fn num_inputs(&self) -> usize {
        self.inner().num_inputs()
    }

    fn num_outputs(&self) -> usize {
        self.inner().num_outputs()
    }

    fn capability(&self) -> StateCapability {
        self.inner().capability()
    }

    fn requested_output(&self) -> RequestedOutput {
        self.inner().requested_output()
    }

    fn set_requested_output(&mut self, requested: RequestedOutput) {
        self.inner_mut().set_requested_output(requested);
    }

    fn requested_input(&self, requested_output: usize) -> usize {
        self.inner().requested_input(requested_output)
    }

    fn init_hidden(&self, batch: usize, device: &Device) -> Result<HiddenState> {
        self.inner().init_hidden(batch, device)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.inner().forward(x)
    }

    fn forward_with_state(&self, x: &Tensor, state: HiddenState) -> Result<(Tensor, HiddenState)> {
        self.inner().forward_with_state(x, state)
    }
}

/// Left-pad `x` so a receptive field of `rf` yields one output per input step
/// under [`RequestedOutput::Same`]; leave it untouched otherwise.
pub(crate) fn causal_input(x: &Tensor, rf: usize, requested: RequestedOutput) -> Result<Tensor> {
    match requested {
        RequestedOutput::Same if rf > 1 => x.pad_with_zeros(TIME_AXIS, rf - 1, 0),
        _ => Ok(x.clone()),
    }
}

/// Keep the trailing `n` steps of `y` under [`RequestedOutput::Steps`].
pub(crate) fn trailing_output(y: &Tensor, requested: RequestedOutput) -> Result<Tensor> {
    match requested {
        RequestedOutput::Steps(n) => {
            let time = time_len(y)?;
            if time < n {
                candle_core::bail!("predictor produced {time} steps, {n} were requested");
            }
            y.narrow(TIME_AXIS, time - n, n)
        }
        RequestedOutput::Same => Ok(y.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn build(model: &str, ar: bool) -> DynSysResult<Predictor> {
        let config = DynamicModelConfig {
            model: model.to_string(),
            num_inputs: 2,
            num_outputs: 1,
            ar,
            ..DynamicModelConfig::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Predictor::from_config(&config, vb)
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("TCN".parse::<ModelKind>().unwrap(), ModelKind::Tcn);
        assert_eq!(" lstm ".parse::<ModelKind>().unwrap(), ModelKind::Lstm);
        let err = "transformer".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, DynSysError::UnsupportedModel(ref m) if m == "transformer"));
    }

    #[test]
    fn test_from_config_selects_architecture() {
        for (name, kind, stateful) in [
            ("mlp", ModelKind::Mlp, false),
            ("tcn", ModelKind::Tcn, false),
            ("lstm", ModelKind::Lstm, true),
        ] {
            let predictor = build(name, true).unwrap();
            assert_eq!(predictor.kind(), kind);
            assert_eq!(predictor.has_internal_state(), stateful);
            // autoregressive models consume inputs plus outputs
            assert_eq!(predictor.num_inputs(), 3);
            assert_eq!(predictor.num_outputs(), 1);
        }
    }

    #[test]
    fn test_from_config_rejects_unknown_architecture() {
        assert!(matches!(
            build("wavenet", false),
            Err(DynSysError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_causal_input_only_pads_same() {
        let x = Tensor::ones((1, 2, 5), DType::F32, &Device::Cpu).unwrap();
        let padded = causal_input(&x, 3, RequestedOutput::Same).unwrap();
        assert_eq!(padded.dims(), &[1, 2, 7]);
        let valid = causal_input(&x, 3, RequestedOutput::Steps(1)).unwrap();
        assert_eq!(valid.dims(), &[1, 2, 5]);
    }

    #[test]
    fn test_trailing_output() {
        let y = Tensor::arange(0f32, 6.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 6))
            .unwrap();
        let last = trailing_output(&y, RequestedOutput::Steps(2)).unwrap();
        assert_eq!(last.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![4.0, 5.0]);
        assert!(trailing_output(&y, RequestedOutput::Steps(7)).is_err());
    }
}
