//! Seeded parameter initialization.
//!
//! candle's CPU backend cannot be seeded, so layers built through a
//! [`VarBuilder`](candle_nn::VarBuilder) start from an unseeded thread RNG.
//! [`reseed_parameters`] overwrites every variable of a [`VarMap`] from a
//! ChaCha stream instead, using the distributions candle's layer constructors
//! use:
//!
//! - weights (rank >= 2): `N(0, 2 / fan_in)` (Kaiming normal, fan-in, ReLU gain)
//! - biases (rank 1): `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`, with `fan_in`
//!   taken from the sibling `weight` variable
//!
//! Variables are visited in name order so the result only depends on the seed
//! and the set of parameter names.

use std::collections::HashMap;

use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{DynSysError, DynSysResult};

/// Uniform sample in `[0, 1)`.
fn unit(rng: &mut ChaCha8Rng) -> f64 {
    (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// Standard normal sample (Box-Muller).
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1 = 1.0 - unit(rng);
    let u2 = unit(rng);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Product of all dimensions but the first.
fn fan_in(dims: &[usize]) -> usize {
    dims.iter().skip(1).product::<usize>().max(1)
}

/// Overwrite every variable in `varmap` with values drawn from `seed`.
///
/// Returns the number of variables written.
pub fn reseed_parameters(varmap: &VarMap, seed: u64) -> DynSysResult<usize> {
    let vars: HashMap<String, Var> = varmap
        .data()
        .lock()
        .map_err(|_| DynSysError::invalid_config("parameter store lock is poisoned"))?
        .clone();

    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for name in &names {
        let var = &vars[*name];
        let dims = var.dims().to_vec();
        let count: usize = dims.iter().product();

        let values: Vec<f32> = if dims.len() >= 2 {
            let std = (2.0 / fan_in(&dims) as f64).sqrt();
            (0..count)
                .map(|_| (standard_normal(&mut rng) * std) as f32)
                .collect()
        } else {
            let sibling = name
                .strip_suffix("bias")
                .map(|prefix| format!("{prefix}weight"))
                .and_then(|weight| vars.get(&weight));
            let fan = sibling.map_or(count.max(1), |w| fan_in(w.dims()));
            let bound = 1.0 / (fan as f64).sqrt();
            (0..count)
                .map(|_| ((unit(&mut rng) * 2.0 - 1.0) * bound) as f32)
                .collect()
        };

        let values = Tensor::from_vec(values, dims.as_slice(), var.device())?.to_dtype(var.dtype())?;
        var.set(&values)?;
    }

    tracing::debug!(seed, parameters = names.len(), "reseeded parameters");
    Ok(names.len())
}
