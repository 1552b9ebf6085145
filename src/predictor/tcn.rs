//! Temporal convolutional network.
//!
//! A stack of residual blocks, each made of two dilated causal convolutions.
//! Block `i` uses dilation `dilation_base^i`, so the receptive field grows
//! geometrically with depth:
//!
//! ```text
//! rf = 1 + sum_i 2 * (kernel_size - 1) * dilation_base^i
//! ```
//!
//! Under [`RequestedOutput::Same`] every convolution is left-padded by
//! `(kernel_size - 1) * dilation` so the output keeps the input length. Under
//! [`RequestedOutput::Steps`] nothing is padded: each convolution shortens the
//! sequence and the residual path is cropped to match.

use candle_core::{Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use super::{trailing_output, SequencePredictor, StateCapability};
use crate::error::{DynSysError, DynSysResult};
use crate::mode::RequestedOutput;
use crate::signal::{time_len, TIME_AXIS};

/// Hyper-parameters of [`TcnPredictor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcnConfig {
    /// Channels inside each residual block
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Number of residual blocks
    #[serde(default = "default_num_levels")]
    pub num_levels: usize,
    /// Convolution kernel size
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    /// Dilation growth factor between blocks
    #[serde(default = "default_dilation_base")]
    pub dilation_base: usize,
}

fn default_hidden_size() -> usize {
    16
}
fn default_num_levels() -> usize {
    2
}
fn default_kernel_size() -> usize {
    2
}
fn default_dilation_base() -> usize {
    2
}

impl Default for TcnConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
            num_levels: default_num_levels(),
            kernel_size: default_kernel_size(),
            dilation_base: default_dilation_base(),
        }
    }
}

impl TcnConfig {
    /// Validate hyper-parameters.
    pub fn validate(&self) -> DynSysResult<()> {
        if self.hidden_size == 0 {
            return Err(DynSysError::invalid_config("tcn.hidden_size must be > 0"));
        }
        if self.num_levels == 0 {
            return Err(DynSysError::invalid_config("tcn.num_levels must be > 0"));
        }
        if self.kernel_size == 0 {
            return Err(DynSysError::invalid_config("tcn.kernel_size must be > 0"));
        }
        if self.dilation_base == 0 {
            return Err(DynSysError::invalid_config("tcn.dilation_base must be > 0"));
        }
        if self.checked_receptive_field().is_none() {
            return Err(DynSysError::invalid_config(format!(
                "tcn receptive field overflows usize (num_levels {}, kernel_size {}, dilation_base {})",
                self.num_levels, self.kernel_size, self.dilation_base
            )));
        }
        Ok(())
    }

    fn checked_dilation(&self, level: usize) -> Option<usize> {
        u32::try_from(level)
            .ok()
            .and_then(|level| self.dilation_base.checked_pow(level))
    }

    fn checked_receptive_field(&self) -> Option<usize> {
        let taps = self.kernel_size.checked_sub(1)?.checked_mul(2)?;
        (0..self.num_levels).try_fold(1usize, |rf, level| {
            rf.checked_add(taps.checked_mul(self.checked_dilation(level)?)?)
        })
    }

    /// Dilation used by block `level`. Saturates for configurations that
    /// fail [`validate`](Self::validate).
    pub fn dilation(&self, level: usize) -> usize {
        self.checked_dilation(level).unwrap_or(usize::MAX)
    }

    /// Receptive field of the whole network. Saturates for configurations
    /// that fail [`validate`](Self::validate).
    pub fn receptive_field(&self) -> usize {
        self.checked_receptive_field().unwrap_or(usize::MAX)
    }
}

/// Two dilated causal convolutions with a residual connection.
struct TemporalBlock {
    conv1: Conv1d,
    conv2: Conv1d,
    downsample: Option<Conv1d>,
    /// Left padding that keeps one convolution length-preserving
    pad: usize,
}

impl TemporalBlock {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv1dConfig {
            dilation,
            ..Default::default()
        };
        let conv1 = conv1d(in_channels, out_channels, kernel_size, cfg, vb.pp("conv1"))?;
        let conv2 = conv1d(out_channels, out_channels, kernel_size, cfg, vb.pp("conv2"))?;
        let downsample = if in_channels != out_channels {
            Some(conv1d(
                in_channels,
                out_channels,
                1,
                Conv1dConfig::default(),
                vb.pp("downsample"),
            )?)
        } else {
            None
        };
        Ok(Self {
            conv1,
            conv2,
            downsample,
            pad: (kernel_size - 1) * dilation,
        })
    }

    fn causal_conv(&self, conv: &Conv1d, x: &Tensor, padded: bool) -> Result<Tensor> {
        if padded && self.pad > 0 {
            conv.forward(&x.pad_with_zeros(TIME_AXIS, self.pad, 0)?)
        } else {
            conv.forward(x)
        }
    }

    fn forward(&self, x: &Tensor, padded: bool) -> Result<Tensor> {
        let h = self.causal_conv(&self.conv1, x, padded)?.relu()?;
        let h = self.causal_conv(&self.conv2, &h, padded)?.relu()?;

        let residual = match &self.downsample {
            Some(ds) => ds.forward(x)?,
            None => x.clone(),
        };
        // unpadded convolutions drop the oldest steps; align on the newest
        let out_len = time_len(&h)?;
        let res_len = time_len(&residual)?;
        let residual = residual.narrow(TIME_AXIS, res_len - out_len, out_len)?;

        h.add(&residual)?.relu()
    }
}

/// Stateless temporal convolutional network.
pub struct TcnPredictor {
    blocks: Vec<TemporalBlock>,
    output: Conv1d,
    num_inputs: usize,
    num_outputs: usize,
    receptive_field: usize,
    requested_output: RequestedOutput,
}

impl TcnPredictor {
    /// Create a TCN with parameters registered under `vb`.
    pub fn new(
        num_inputs: usize,
        num_outputs: usize,
        config: &TcnConfig,
        vb: VarBuilder,
    ) -> DynSysResult<Self> {
        config.validate()?;
        let mut blocks = Vec::with_capacity(config.num_levels);
        for level in 0..config.num_levels {
            let in_channels = if level == 0 { num_inputs } else { config.hidden_size };
            blocks.push(TemporalBlock::new(
                in_channels,
                config.hidden_size,
                config.kernel_size,
                config.dilation(level),
                vb.pp(format!("block.{level}")),
            )?);
        }
        let output = conv1d(
            config.hidden_size,
            num_outputs,
            1,
            Conv1dConfig::default(),
            vb.pp("output"),
        )?;

        Ok(Self {
            blocks,
            output,
            num_inputs,
            num_outputs,
            receptive_field: config.receptive_field(),
            requested_output: RequestedOutput::Same,
        })
    }

    /// Receptive field of the network.
    pub fn receptive_field(&self) -> usize {
        self.receptive_field
    }
}

impl SequencePredictor for TcnPredictor {
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
        requested_output + self.receptive_field - 1
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let padded = matches!(self.requested_output, RequestedOutput::Same);
        if !padded && time_len(x)? < self.receptive_field {
            candle_core::bail!(
                "tcn needs at least {} input steps, got {}",
                self.receptive_field,
                time_len(x)?
            );
        }
        let mut h = x.clone();
        for block in &self.blocks {
            h = block.forward(&h, padded)?;
        }
        let y = self.output.forward(&h)?;
        trailing_output(&y, self.requested_output)
    }
}
