//! The dynamic model façade.
//!
//! [`DynamicModel`] owns a predictor, the input/output delay and the active
//! [`RunConfig`]. A `forward` call normalizes the signals at the boundary,
//! dispatches to the executor selected by the run mode and maps the
//! prediction back to raw space.
//!
//! # Example
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use dynsys_model_rs::{DynamicModel, DynamicModelConfig, RunConfig};
//!
//! let config = DynamicModelConfig {
//!     model: "mlp".into(),
//!     ar: true,
//!     io_delay: 1,
//!     ..DynamicModelConfig::default()
//! };
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let mut model = DynamicModel::from_config(&config, vb).unwrap();
//!
//! let u = Tensor::randn(0f32, 1.0, (2, 1, 12), &Device::Cpu).unwrap();
//! let y = Tensor::randn(0f32, 1.0, (2, 1, 12), &Device::Cpu).unwrap();
//! let y_sim = model.forward_with(&u, Some(&y), RunConfig::free_run(false)).unwrap();
//! assert_eq!(y_sim.dims(), &[2, 1, 12]);
//! ```

use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::DynamicModelConfig;
use crate::error::{DynSysError, DynSysResult};
use crate::mode::{RequestedOutput, RunConfig, RunMode};
use crate::normalizer::Normalizer;
use crate::predictor::{Predictor, SequencePredictor};
use crate::signal::DelayShifter;
use crate::simulation::{FreeRunSimulation, OneStepAhead};

/// Predictor plus delay, mode and normalization.
///
/// The façade is single-threaded and stateful: [`set_mode`](Self::set_mode)
/// reconfigures the owned predictor, and `forward` reads the mode it left
/// behind. Use [`forward_with`](Self::forward_with) to make the regime of a
/// call explicit. Concurrent streams need independent models.
pub struct DynamicModel<P = Predictor> {
    predictor: P,
    num_inputs: usize,
    num_outputs: usize,
    ar: bool,
    shifter: DelayShifter,
    run_config: RunConfig,
    input_normalizer: Option<Arc<Normalizer>>,
    output_normalizer: Option<Arc<Normalizer>>,
}

impl DynamicModel<Predictor> {
    /// Build the predictor named in `config` and wrap it.
    pub fn from_config(config: &DynamicModelConfig, vb: VarBuilder) -> DynSysResult<Self> {
        config.validate()?;
        let predictor = Predictor::from_config(config, vb)?;
        tracing::info!(
            model = %predictor.kind(),
            num_inputs = config.num_inputs,
            num_outputs = config.num_outputs,
            ar = config.ar,
            io_delay = config.io_delay,
            "built dynamic model"
        );
        Self::new(
            predictor,
            config.num_inputs,
            config.num_outputs,
            config.ar,
            config.io_delay,
        )
    }
}

impl<P: SequencePredictor> DynamicModel<P> {
    /// Wrap an existing predictor.
    ///
    /// The predictor must consume `num_inputs` channels, plus `num_outputs`
    /// more when `ar` is set, and produce `num_outputs` channels. The model
    /// starts in one-step-ahead mode.
    pub fn new(
        predictor: P,
        num_inputs: usize,
        num_outputs: usize,
        ar: bool,
        io_delay: isize,
    ) -> DynSysResult<Self> {
        let expected_inputs = if ar { num_inputs + num_outputs } else { num_inputs };
        if predictor.num_inputs() != expected_inputs {
            return Err(DynSysError::invalid_config(format!(
                "predictor consumes {} channels, model feeds {expected_inputs}",
                predictor.num_inputs()
            )));
        }
        if predictor.num_outputs() != num_outputs {
            return Err(DynSysError::invalid_config(format!(
                "predictor produces {} channels, model expects {num_outputs}",
                predictor.num_outputs()
            )));
        }

        let mut model = Self {
            predictor,
            num_inputs,
            num_outputs,
            ar,
            shifter: DelayShifter::new(io_delay),
            run_config: RunConfig::default(),
            input_normalizer: None,
            output_normalizer: None,
        };
        model.apply_run_config(RunConfig::default());
        Ok(model)
    }

    /// Attach normalizers applied at the model boundary.
    pub fn with_normalizers(
        mut self,
        input: Option<Arc<Normalizer>>,
        output: Option<Arc<Normalizer>>,
    ) -> DynSysResult<Self> {
        self.set_normalizers(input, output)?;
        Ok(self)
    }

    /// Replace the boundary normalizers. `None` disables a side.
    pub fn set_normalizers(
        &mut self,
        input: Option<Arc<Normalizer>>,
        output: Option<Arc<Normalizer>>,
    ) -> DynSysResult<()> {
        if let Some(norm) = &input {
            check_channels("input normalizer", self.num_inputs, norm.num_channels())?;
        }
        if let Some(norm) = &output {
            check_channels("output normalizer", self.num_outputs, norm.num_channels())?;
        }
        self.input_normalizer = input;
        self.output_normalizer = output;
        Ok(())
    }

    /// Process input channels.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Process output channels.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Channels fed to the predictor.
    pub fn num_model_inputs(&self) -> usize {
        self.predictor.num_inputs()
    }

    /// True when past outputs are fed back to the predictor.
    pub fn ar(&self) -> bool {
        self.ar
    }

    /// Signed input/output delay.
    pub fn io_delay(&self) -> isize {
        self.shifter.delay()
    }

    /// Active mode and warm-up policy.
    pub fn run_config(&self) -> RunConfig {
        self.run_config
    }

    /// Active mode.
    pub fn mode(&self) -> RunMode {
        self.run_config.mode
    }

    /// The wrapped predictor.
    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    /// Mutable access to the wrapped predictor.
    ///
    /// Changing its requested output here makes the next `forward` fail with
    /// [`DynSysError::UnsupportedMode`] until [`set_mode`](Self::set_mode) is
    /// called again.
    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
    }

    /// Input normalizer, if any.
    pub fn input_normalizer(&self) -> Option<&Arc<Normalizer>> {
        self.input_normalizer.as_ref()
    }

    /// Output normalizer, if any.
    pub fn output_normalizer(&self) -> Option<&Arc<Normalizer>> {
        self.output_normalizer.as_ref()
    }

    /// Switch the run mode and push the matching requested output into the
    /// predictor.
    pub fn set_mode(&mut self, mode: RunMode, zero_initial_state: bool) {
        self.apply_run_config(RunConfig {
            mode,
            zero_initial_state,
        });
    }

    /// [`set_mode`](Self::set_mode) from a mode name such as
    /// `"one-step-ahead"` or `"free-run-simulation"`.
    pub fn set_mode_by_name(&mut self, mode: &str, zero_initial_state: bool) -> DynSysResult<()> {
        let mode: RunMode = mode.parse()?;
        self.set_mode(mode, zero_initial_state);
        Ok(())
    }

    fn apply_run_config(&mut self, config: RunConfig) {
        let requested = self.required_output(config.mode);
        tracing::debug!(
            mode = %config.mode,
            zero_initial_state = config.zero_initial_state,
            %requested,
            "set run mode"
        );
        self.predictor.set_requested_output(requested);
        self.run_config = config;
    }

    /// Requested output the predictor must be in to serve `mode`.
    ///
    /// Without output feedback free-run simulation is one-step-ahead
    /// prediction over the whole sequence, so the predictor stays in
    /// [`RequestedOutput::Same`].
    pub fn required_output(&self, mode: RunMode) -> RequestedOutput {
        if self.ar {
            mode.requested_output()
        } else {
            RequestedOutput::Same
        }
    }

    /// Predict the output of the process driven by `u` in the active mode.
    ///
    /// One-step-ahead prediction always needs the true output `y`; free-run
    /// simulation needs it only for autoregressive models. Both signals are
    /// `(batch, channel, time)` and must agree on batch and time.
    pub fn forward(&self, u: &Tensor, y: Option<&Tensor>) -> DynSysResult<Tensor> {
        let mode = self.run_config.mode;
        let needed = self.required_output(mode);
        let actual = self.predictor.requested_output();
        if actual != needed {
            return Err(DynSysError::UnsupportedMode {
                mode: mode.to_string(),
                reason: format!("predictor requests {actual} output steps, mode needs {needed}"),
            });
        }

        self.check_signals(u, y)?;
        if mode == RunMode::OneStepAhead && y.is_none() {
            return Err(DynSysError::MissingTarget {
                mode: mode.to_string(),
            });
        }

        let u = match &self.input_normalizer {
            Some(norm) => norm.normalize(u)?,
            None => u.clone(),
        };
        let y = match (y, &self.output_normalizer) {
            (Some(y), Some(norm)) => Some(norm.normalize(y)?),
            (Some(y), None) => Some(y.clone()),
            (None, _) => None,
        };

        let y_pred = match mode {
            RunMode::OneStepAhead => {
                OneStepAhead::new(self.shifter, self.ar).run(&self.predictor, &u, y.as_ref())?
            }
            RunMode::FreeRunSimulation => FreeRunSimulation::new(
                self.shifter,
                self.ar,
                self.run_config.zero_initial_state,
            )
            .run(&self.predictor, &u, y.as_ref())?,
        };

        match &self.output_normalizer {
            Some(norm) => Ok(norm.unnormalize(&y_pred)?),
            None => Ok(y_pred),
        }
    }

    /// Apply `config` and run [`forward`](Self::forward) in one call.
    ///
    /// The configuration stays active afterwards.
    pub fn forward_with(
        &mut self,
        u: &Tensor,
        y: Option<&Tensor>,
        config: RunConfig,
    ) -> DynSysResult<Tensor> {
        self.apply_run_config(config);
        self.forward(u, y)
    }

    /// Teacher-forced prediction of every step of the sequence.
    pub fn one_step_ahead(&mut self, u: &Tensor, y: &Tensor) -> DynSysResult<Tensor> {
        self.forward_with(u, Some(y), RunConfig::one_step_ahead())
    }

    /// Free-running simulation of the process driven by `u`.
    pub fn free_run_simulation(
        &mut self,
        u: &Tensor,
        y: Option<&Tensor>,
        zero_initial_state: bool,
    ) -> DynSysResult<Tensor> {
        self.forward_with(u, y, RunConfig::free_run(zero_initial_state))
    }

    fn check_signals(&self, u: &Tensor, y: Option<&Tensor>) -> DynSysResult<()> {
        let (batch, channels, time) = u.dims3()?;
        check_channels("input signal", self.num_inputs, channels)?;
        if let Some(y) = y {
            let dims = y.dims3()?;
            if dims != (batch, self.num_outputs, time) {
                return Err(DynSysError::shape_mismatch(
                    "target signal",
                    format!("({batch}, {}, {time})", self.num_outputs),
                    format!("{dims:?}"),
                ));
            }
        }
        Ok(())
    }
}

fn check_channels(what: &str, expected: usize, got: usize) -> DynSysResult<()> {
    if expected != got {
        return Err(DynSysError::shape_mismatch(
            what,
            format!("{expected} channels"),
            format!("{got} channels"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::StateCapability;
    use candle_core::{DType, Device, Result};
    use candle_nn::VarMap;

    /// `y = u + y_prev`, one channel each.
    struct Accumulator {
        requested: RequestedOutput,
    }

    impl SequencePredictor for Accumulator {
        fn num_inputs(&self) -> usize {
            2
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn capability(&self) -> StateCapability {
            StateCapability::Stateless
        }
        fn requested_output(&self) -> RequestedOutput {
            self.requested
        }
        fn set_requested_output(&mut self, requested: RequestedOutput) {
            self.requested = requested;
        }
        fn requested_input(&self, requested_output: usize) -> usize {
            requested_output
        }
        fn forward(&self, x: &Tensor) -> Result<Tensor> {
            let u = x.narrow(1, 0, 1)?;
            let y = x.narrow(1, 1, 1)?;
            u.add(&y)
        }
    }

    fn accumulator(io_delay: isize) -> DynamicModel<Accumulator> {
        DynamicModel::new(
            Accumulator {
                requested: RequestedOutput::Same,
            },
            1,
            1,
            true,
            io_delay,
        )
        .unwrap()
    }

    fn signal(values: &[f32]) -> Tensor {
        Tensor::from_vec(values.to_vec(), (1, 1, values.len()), &Device::Cpu).unwrap()
    }

    fn series(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_new_checks_predictor_channels() {
        let err = DynamicModel::new(
            Accumulator {
                requested: RequestedOutput::Same,
            },
            1,
            1,
            false,
            0,
        )
        .err()
        .unwrap();
        assert!(matches!(err, DynSysError::InvalidConfig(_)));
    }

    #[test]
    fn test_set_mode_pushes_requested_output() {
        let mut model = accumulator(0);
        assert_eq!(model.predictor().requested_output(), RequestedOutput::Same);
        model.set_mode(RunMode::FreeRunSimulation, true);
        assert_eq!(model.predictor().requested_output(), RequestedOutput::Steps(1));
        assert_eq!(model.run_config(), RunConfig::free_run(true));
        model.set_mode_by_name("one_step_ahead", false).unwrap();
        assert_eq!(model.predictor().requested_output(), RequestedOutput::Same);
    }

    #[test]
    fn test_set_mode_by_name_rejects_unknown() {
        let mut model = accumulator(0);
        let err = model.set_mode_by_name("multi-step", false).unwrap_err();
        assert!(matches!(err, DynSysError::InvalidMode(_)));
        assert_eq!(model.mode(), RunMode::OneStepAhead);
    }

    #[test]
    fn test_one_step_ahead_uses_true_history() {
        let mut model = accumulator(0);
        let u = signal(&[1.0, 1.0, 1.0, 1.0]);
        let y = signal(&[5.0, 6.0, 7.0, 8.0]);
        let out = model.one_step_ahead(&u, &y).unwrap();
        assert_eq!(series(&out), vec![1.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_free_run_accumulates_predictions() {
        let mut model = accumulator(0);
        let u = signal(&[1.0, 1.0, 1.0, 1.0]);
        let y = signal(&[5.0, 6.0, 7.0, 8.0]);
        // rf = 1: y[0] is copied, then y_sim[i] = u[i] + y_sim[i - 1]
        let out = model.free_run_simulation(&u, Some(&y), false).unwrap();
        assert_eq!(series(&out), vec![5.0, 6.0, 7.0, 8.0]);
        let out = model.free_run_simulation(&u, Some(&y), true).unwrap();
        assert_eq!(series(&out), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_forward_requires_target() {
        let mut model = accumulator(0);
        let u = signal(&[1.0, 2.0]);
        let err = model.forward(&u, None).unwrap_err();
        assert!(matches!(err, DynSysError::MissingTarget { .. }));
        model.set_mode(RunMode::FreeRunSimulation, false);
        let err = model.forward(&u, None).unwrap_err();
        assert!(matches!(err, DynSysError::MissingTarget { .. }));
    }

    #[test]
    fn test_forward_rejects_mismatched_target() {
        let model = accumulator(0);
        let u = signal(&[1.0, 2.0, 3.0]);
        let y = signal(&[1.0, 2.0]);
        let err = model.forward(&u, Some(&y)).unwrap_err();
        assert!(matches!(err, DynSysError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_forward_detects_reconfigured_predictor() {
        let mut model = accumulator(0);
        model
            .predictor_mut()
            .set_requested_output(RequestedOutput::Steps(1));
        let u = signal(&[1.0, 2.0]);
        let err = model.forward(&u, Some(&u)).unwrap_err();
        assert!(matches!(err, DynSysError::UnsupportedMode { .. }));

        model.set_mode(RunMode::OneStepAhead, false);
        assert!(model.forward(&u, Some(&u)).is_ok());
    }

    #[test]
    fn test_normalizers_are_applied_at_the_boundary() {
        let input = Arc::new(Normalizer::new(vec![1.0], vec![2.0]).unwrap());
        let output = Arc::new(Normalizer::new(vec![10.0], vec![5.0]).unwrap());
        let mut model = accumulator(0)
            .with_normalizers(Some(input), Some(output))
            .unwrap();

        let u = signal(&[3.0, 5.0]);
        let y = signal(&[15.0, 20.0]);
        // normalized: u = [1, 2], y = [1, 2]; osa = [1 + 0, 2 + 1] = [1, 3]
        let out = model.one_step_ahead(&u, &y).unwrap();
        assert_eq!(series(&out), vec![15.0, 25.0]);
    }

    #[test]
    fn test_normalizer_channels_are_checked() {
        let norm = Arc::new(Normalizer::identity(3));
        let err = accumulator(0)
            .with_normalizers(Some(norm), None)
            .err()
            .unwrap();
        assert!(matches!(err, DynSysError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_non_autoregressive_free_run_keeps_same_output() {
        let config = DynamicModelConfig {
            model: "tcn".into(),
            ..DynamicModelConfig::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut model = DynamicModel::from_config(&config, vb).unwrap();
        model.set_mode(RunMode::FreeRunSimulation, false);
        assert_eq!(model.predictor().requested_output(), RequestedOutput::Same);

        let u = Tensor::randn(0f32, 1.0, (2, 1, 9), &Device::Cpu).unwrap();
        assert_eq!(model.forward(&u, None).unwrap().dims(), &[2, 1, 9]);
    }
}
