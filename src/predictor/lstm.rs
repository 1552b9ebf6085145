//! Stacked LSTM with a linear read-out.
//!
//! The cell follows the standard equations:
//! - i = σ(W_i·x + U_i·h + b_i)  [input gate]
//! - f = σ(W_f·x + U_f·h + b_f)  [forget gate]
//! - g = tanh(W_g·x + U_g·h + b_g)  [candidate]
//! - o = σ(W_o·x + U_o·h + b_o)  [output gate]
//! - c' = f⊙c + i⊙g,  h' = o⊙tanh(c')
//!
//! The state of every layer, `(h, c)`, is packed into a
//! [`HiddenState`] as `[h_0, c_0, h_1, c_1, ...]` with each tensor shaped
//! `(batch, hidden_size)`.

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{linear, linear_no_bias, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use super::{trailing_output, HiddenState, SequencePredictor, StateCapability};
use crate::error::{DynSysError, DynSysResult};
use crate::mode::RequestedOutput;
use crate::signal::TIME_AXIS;

/// Hyper-parameters of [`LstmPredictor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmConfig {
    /// Hidden state width
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Number of stacked layers
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
}

fn default_hidden_size() -> usize {
    16
}
fn default_num_layers() -> usize {
    1
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
            num_layers: default_num_layers(),
        }
    }
}

impl LstmConfig {
    /// Validate hyper-parameters.
    pub fn validate(&self) -> DynSysResult<()> {
        if self.hidden_size == 0 {
            return Err(DynSysError::invalid_config("lstm.hidden_size must be > 0"));
        }
        if self.num_layers == 0 {
            return Err(DynSysError::invalid_config("lstm.num_layers must be > 0"));
        }
        Ok(())
    }
}

/// Single LSTM layer.
struct LstmCell {
    input_proj: Linear,
    hidden_proj: Linear,
}

impl LstmCell {
    fn new(input_dim: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            input_proj: linear(input_dim, 4 * hidden_size, vb.pp("input_proj"))?,
            hidden_proj: linear_no_bias(hidden_size, 4 * hidden_size, vb.pp("hidden_proj"))?,
        })
    }

    /// One step. `x`: (batch, input_dim), `h`/`c`: (batch, hidden_size).
    fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor)> {
        let gates = self.input_proj.forward(x)?.add(&self.hidden_proj.forward(h)?)?;
        let gates = gates.chunk(4, D::Minus1)?;
        let input_gate = candle_nn::ops::sigmoid(&gates[0])?;
        let forget_gate = candle_nn::ops::sigmoid(&gates[1])?;
        let candidate = gates[2].tanh()?;
        let output_gate = candle_nn::ops::sigmoid(&gates[3])?;

        let c_next = forget_gate.mul(c)?.add(&input_gate.mul(&candidate)?)?;
        let h_next = output_gate.mul(&c_next.tanh()?)?;
        Ok((h_next, c_next))
    }
}

/// Stateful LSTM predictor.
pub struct LstmPredictor {
    cells: Vec<LstmCell>,
    readout: Linear,
    num_inputs: usize,
    num_outputs: usize,
    hidden_size: usize,
    dtype: DType,
    requested_output: RequestedOutput,
}

impl LstmPredictor {
    /// Create an LSTM with parameters registered under `vb`.
    pub fn new(
        num_inputs: usize,
        num_outputs: usize,
        config: &LstmConfig,
        vb: VarBuilder,
    ) -> DynSysResult<Self> {
        config.validate()?;
        let cells = (0..config.num_layers)
            .map(|layer| {
                let input_dim = if layer == 0 { num_inputs } else { config.hidden_size };
                LstmCell::new(input_dim, config.hidden_size, vb.pp(format!("layer.{layer}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let readout = linear(config.hidden_size, num_outputs, vb.pp("readout"))?;

        Ok(Self {
            cells,
            readout,
            num_inputs,
            num_outputs,
            hidden_size: config.hidden_size,
            dtype: vb.dtype(),
            requested_output: RequestedOutput::Same,
        })
    }

    /// Hidden state width.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn run(&self, x: &Tensor, state: HiddenState) -> Result<(Tensor, HiddenState)> {
        let (batch, _, time) = x.dims3()?;
        let mut tensors = state.into_tensors();
        if tensors.len() != 2 * self.cells.len() {
            candle_core::bail!(
                "lstm state holds {} tensors, expected {}",
                tensors.len(),
                2 * self.cells.len()
            );
        }

        let mut outputs = Vec::with_capacity(time);
        for t in 0..time {
            let mut input = x.narrow(TIME_AXIS, t, 1)?.squeeze(TIME_AXIS)?;
            for (layer, cell) in self.cells.iter().enumerate() {
                let (h, c) = cell.step(&input, &tensors[2 * layer], &tensors[2 * layer + 1])?;
                input = h.clone();
                tensors[2 * layer] = h;
                tensors[2 * layer + 1] = c;
            }
            outputs.push(self.readout.forward(&input)?);
        }

        let y = if outputs.is_empty() {
            Tensor::zeros((batch, self.num_outputs, 0), x.dtype(), x.device())?
        } else {
            Tensor::stack(&outputs, TIME_AXIS)?
        };
        Ok((trailing_output(&y, self.requested_output)?, HiddenState::new(tensors)))
    }
}

impl SequencePredictor for LstmPredictor {
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn capability(&self) -> StateCapability {
        StateCapability::Stateful
    }

    fn requested_output(&self) -> RequestedOutput {
        self.requested_output
    }

    fn set_requested_output(&mut self, requested: RequestedOutput) {
        self.requested_output = requested;
    }

    fn requested_input(&self, requested_output: usize) -> usize {
        requested_output
    }

    fn init_hidden(&self, batch: usize, device: &Device) -> Result<HiddenState> {
        let mut tensors = Vec::with_capacity(2 * self.cells.len());
        for _ in &self.cells {
            tensors.push(Tensor::zeros((batch, self.hidden_size), self.dtype, device)?);
            tensors.push(Tensor::zeros((batch, self.hidden_size), self.dtype, device)?);
        }
        Ok(HiddenState::new(tensors))
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, _, _) = x.dims3()?;
        let state = self.init_hidden(batch, x.device())?;
        Ok(self.run(x, state)?.0)
    }

    fn forward_with_state(&self, x: &Tensor, state: HiddenState) -> Result<(Tensor, HiddenState)> {
        self.run(x, state)
    }
}
