//! Run modes and the requested-output configuration they push into a predictor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DynSysError;

/// How a [`DynamicModel`](crate::DynamicModel) services `forward` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Teacher-forced prediction over the whole sequence in one predictor call.
    #[default]
    OneStepAhead,
    /// Recursive rollout feeding predictions back as output history.
    FreeRunSimulation,
}

impl RunMode {
    /// Requested-output configuration this mode pushes into the predictor.
    pub const fn requested_output(self) -> RequestedOutput {
        match self {
            Self::OneStepAhead => RequestedOutput::Same,
            Self::FreeRunSimulation => RequestedOutput::Steps(1),
        }
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneStepAhead => "one-step-ahead",
            Self::FreeRunSimulation => "free-run-simulation",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = DynSysError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "one-step-ahead" | "osa" => Ok(Self::OneStepAhead),
            "free-run-simulation" | "free-run" | "simulation" => Ok(Self::FreeRunSimulation),
            _ => Err(DynSysError::InvalidMode(s.to_string())),
        }
    }
}

/// Number of output steps a predictor is asked to produce per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedOutput {
    /// As many outputs as input steps (causally padded).
    #[default]
    Same,
    /// Exactly this many trailing output steps.
    Steps(usize),
}

impl fmt::Display for RequestedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same => f.write_str("same"),
            Self::Steps(n) => write!(f, "{n}"),
        }
    }
}

/// Mode plus the warm-up policy used by free-run simulation.
///
/// Passing a `RunConfig` to
/// [`DynamicModel::forward_with`](crate::DynamicModel::forward_with) makes the
/// regime of a call explicit instead of relying on earlier `set_mode` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Active run mode
    pub mode: RunMode,
    /// Start free-run simulation at step 0 with causal zero history instead of
    /// copying the first `rf` true outputs
    #[serde(default)]
    pub zero_initial_state: bool,
}

impl RunConfig {
    /// Teacher-forced one-step-ahead prediction.
    pub const fn one_step_ahead() -> Self {
        Self {
            mode: RunMode::OneStepAhead,
            zero_initial_state: false,
        }
    }

    /// Free-running simulation.
    pub const fn free_run(zero_initial_state: bool) -> Self {
        Self {
            mode: RunMode::FreeRunSimulation,
            zero_initial_state,
        }
    }
}
