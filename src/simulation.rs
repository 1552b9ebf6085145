//! One-step-ahead and free-run simulation executors.
//!
//! Both executors take the raw input signal, apply the model's
//! [`DelayShifter`], and drive a [`SequencePredictor`] through its capability
//! contract. They differ in where the predictor's output history comes from:
//!
//! - [`OneStepAhead`] feeds the true past output (teacher forcing) and calls
//!   the predictor once over the whole sequence.
//! - [`FreeRunSimulation`] steps through time and feeds back its own
//!   predictions, windowed to the receptive field the predictor declares.
//!
//! # Free-run windows
//!
//! With `rf = requested_input(1)`, step `i` sees
//!
//! ```text
//! input  window: u_delayed[i - rf + 1 ..= i]   (current input visible)
//! output window: y_sim[i - rf .. i]            (current output not visible)
//! ```
//!
//! Positions before time 0 are zero-filled. The simulated output is an
//! append-only log: the warm-up prefix (true outputs, when not starting from a
//! zero initial state) followed by one prediction per step.

use candle_core::Tensor;

use crate::error::{DynSysError, DynSysResult};
use crate::mode::RunMode;
use crate::predictor::{HiddenState, SequencePredictor};
use crate::signal::{causal_window, time_len, DelayShifter, CHANNEL_AXIS, TIME_AXIS};

fn missing_target(mode: RunMode) -> DynSysError {
    DynSysError::MissingTarget {
        mode: mode.to_string(),
    }
}

/// Teacher-forced one-step-ahead executor.
#[derive(Debug, Clone, Copy)]
pub struct OneStepAhead {
    shifter: DelayShifter,
    ar: bool,
}

impl OneStepAhead {
    /// Executor for a model with the given delay and autoregressive flag.
    pub const fn new(shifter: DelayShifter, ar: bool) -> Self {
        Self { shifter, ar }
    }

    /// Predict every step of the sequence from the true past outputs.
    ///
    /// `y` is required when the model is autoregressive. The result has the
    /// same time length as `u`.
    pub fn run<P>(&self, predictor: &P, u: &Tensor, y: Option<&Tensor>) -> DynSysResult<Tensor>
    where
        P: SequencePredictor + ?Sized,
    {
        let (batch, _, time) = u.dims3()?;
        let u_delayed = self.shifter.shift(u)?;

        let x = if self.ar {
            let y = y.ok_or_else(|| missing_target(RunMode::OneStepAhead))?;
            // past outputs lag by exactly one step, independent of io_delay
            let y_delayed = if time == 0 {
                y.clone()
            } else {
                y.narrow(TIME_AXIS, 0, time - 1)?.pad_with_zeros(TIME_AXIS, 1, 0)?
            };
            Tensor::cat(&[&u_delayed, &y_delayed], CHANNEL_AXIS)?
        } else {
            u_delayed
        };

        tracing::debug!(batch, time, ar = self.ar, "one-step-ahead prediction");
        let y_pred = if predictor.has_internal_state() {
            let state = predictor.init_hidden(batch, x.device())?;
            let (y_pred, _final_state) = predictor.forward_with_state(&x, state)?;
            y_pred
        } else {
            predictor.forward(&x)?
        };
        Ok(y_pred)
    }
}

/// Recursive free-run simulation executor.
#[derive(Debug, Clone, Copy)]
pub struct FreeRunSimulation {
    shifter: DelayShifter,
    ar: bool,
    zero_initial_state: bool,
}

impl FreeRunSimulation {
    /// Executor for a model with the given delay, autoregressive flag and
    /// warm-up policy.
    pub const fn new(shifter: DelayShifter, ar: bool, zero_initial_state: bool) -> Self {
        Self {
            shifter,
            ar,
            zero_initial_state,
        }
    }

    /// First step that gets predicted for a sequence of length `time`.
    ///
    /// Steps before it are copied from the true output.
    pub fn start_index(&self, rf: usize, time: usize) -> usize {
        if self.zero_initial_state {
            0
        } else {
            rf.min(time)
        }
    }

    /// Simulate the output of the process driven by `u`.
    ///
    /// Non-autoregressive models have no output feedback, so this is exactly
    /// [`OneStepAhead::run`]. Autoregressive models need `y` to seed the
    /// warm-up window; with `zero_initial_state` the values of `y` are never
    /// read, only its shape.
    pub fn run<P>(&self, predictor: &P, u: &Tensor, y: Option<&Tensor>) -> DynSysResult<Tensor>
    where
        P: SequencePredictor + ?Sized,
    {
        if !self.ar {
            return OneStepAhead::new(self.shifter, false).run(predictor, u, y);
        }
        let y = y.ok_or_else(|| missing_target(RunMode::FreeRunSimulation))?;

        let rf = predictor.requested_input(1);
        let (batch, _, time) = u.dims3()?;
        let u_delayed = self.shifter.shift(u)?;
        let start = self.start_index(rf, time);

        tracing::debug!(batch, time, rf, start, "free-run simulation");

        // one (batch, outputs, 1) column per simulated step
        let mut log = Vec::with_capacity(time);
        for j in 0..start {
            log.push(y.narrow(TIME_AXIS, j, 1)?);
        }

        let mut state = if predictor.has_internal_state() {
            predictor.init_hidden(batch, u.device())?
        } else {
            HiddenState::empty()
        };

        for i in start..time {
            let u_in = causal_window(&u_delayed, i + 1, rf)?;
            let y_in = output_window(&log, i, rf, y)?;
            let x = Tensor::cat(&[&u_in, &y_in], CHANNEL_AXIS)?;

            let y_next = if predictor.has_internal_state() {
                let (y_next, next_state) = predictor.forward_with_state(&x, state)?;
                state = next_state;
                y_next
            } else {
                predictor.forward(&x)?
            };

            let steps = time_len(&y_next)?;
            let last = steps.checked_sub(1).ok_or_else(|| {
                DynSysError::shape_mismatch("predictor output", "at least 1 step", "0 steps")
            })?;
            tracing::trace!(step = i, "simulated step");
            log.push(y_next.narrow(TIME_AXIS, last, 1)?);
        }

        if log.is_empty() {
            return Ok(y.clone());
        }
        Ok(Tensor::cat(&log, TIME_AXIS)?)
    }
}

/// The `width` logged outputs before step `i`, zero-padded on the left.
fn output_window(log: &[Tensor], i: usize, width: usize, like: &Tensor) -> DynSysResult<Tensor> {
    let (batch, channels, _) = like.dims3()?;
    let available = i.min(width);
    let pad = width - available;
    if available == 0 {
        return Ok(Tensor::zeros(
            (batch, channels, width),
            like.dtype(),
            like.device(),
        )?);
    }
    let history = Tensor::cat(&log[i - available..i], TIME_AXIS)?;
    Ok(history.pad_with_zeros(TIME_AXIS, pad, 0)?)
}
