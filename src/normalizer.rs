//! Per-channel signal normalization.
//!
//! A [`Normalizer`] is a pure, exactly invertible affine map applied at the
//! [`DynamicModel`](crate::DynamicModel) boundary. The simulation loop itself
//! always runs in normalized space.

use std::path::Path;

use candle_core::{DType, Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{DynSysError, DynSysResult};

/// Smallest scale a fitted channel may get; constant channels would
/// otherwise divide by zero.
const MIN_SCALE: f32 = 1e-8;

/// Per-channel `(x - mean) / scale` transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl Normalizer {
    /// Build from explicit per-channel offsets and scales.
    pub fn new(mean: Vec<f32>, scale: Vec<f32>) -> DynSysResult<Self> {
        if mean.len() != scale.len() {
            return Err(DynSysError::shape_mismatch(
                "normalizer scale",
                format!("{} channels", mean.len()),
                format!("{} channels", scale.len()),
            ));
        }
        if let Some(bad) = scale.iter().find(|s| !s.is_finite() || **s == 0.0) {
            return Err(DynSysError::invalid_config(format!(
                "normalizer scale must be finite and non-zero, got {bad}"
            )));
        }
        Ok(Self { mean, scale })
    }

    /// Transform that leaves `channels` channels unchanged.
    pub fn identity(channels: usize) -> Self {
        Self {
            mean: vec![0.0; channels],
            scale: vec![1.0; channels],
        }
    }

    /// Fit mean and standard deviation per channel over batch and time.
    pub fn fit(signal: &Tensor) -> DynSysResult<Self> {
        let (batch, channels, time) = signal.dims3()?;
        let count = batch * time;
        if count == 0 {
            return Err(DynSysError::shape_mismatch(
                "normalizer fit signal",
                "at least one sample",
                format!("({batch}, {channels}, {time})"),
            ));
        }
        // half precision and integer signals are reduced in f32
        let signal = match signal.dtype() {
            DType::F32 | DType::F64 => signal.clone(),
            _ => signal.to_dtype(DType::F32)?,
        };

        let mean = signal.mean_keepdim(2)?.mean_keepdim(0)?;
        let var = signal
            .broadcast_sub(&mean)?
            .sqr()?
            .mean_keepdim(2)?
            .mean_keepdim(0)?;
        let std = var.sqrt()?;

        let read = |t: &Tensor| -> Result<Vec<f32>> {
            t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()
        };
        let mean = read(&mean)?;
        let scale = read(&std)?.into_iter().map(|s| s.max(MIN_SCALE)).collect();
        Ok(Self { mean, scale })
    }

    /// Number of channels this normalizer applies to.
    pub fn num_channels(&self) -> usize {
        self.mean.len()
    }

    /// Per-channel offsets.
    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    /// Per-channel scales.
    pub fn scale(&self) -> &[f32] {
        &self.scale
    }

    fn broadcast_params(&self, signal: &Tensor) -> Result<(Tensor, Tensor)> {
        let channels = self.mean.len();
        let mean = Tensor::from_slice(&self.mean, (1, channels, 1), signal.device())?
            .to_dtype(signal.dtype())?;
        let scale = Tensor::from_slice(&self.scale, (1, channels, 1), signal.device())?
            .to_dtype(signal.dtype())?;
        Ok((mean, scale))
    }

    /// Map a raw signal into normalized space.
    pub fn normalize(&self, signal: &Tensor) -> Result<Tensor> {
        let (mean, scale) = self.broadcast_params(signal)?;
        signal.broadcast_sub(&mean)?.broadcast_div(&scale)
    }

    /// Map a normalized signal back to raw space.
    pub fn unnormalize(&self, signal: &Tensor) -> Result<Tensor> {
        let (mean, scale) = self.broadcast_params(signal)?;
        signal.broadcast_mul(&scale)?.broadcast_add(&mean)
    }

    /// Load parameters from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> DynSysResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let parsed: Self = serde_json::from_str(&content)?;
        Self::new(parsed.mean, parsed.scale)
    }

    /// Save parameters to a JSON file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> DynSysResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_fit_recovers_channel_statistics() {
        // channel 0: 1..=4 in both batches, channel 1 constant 5
        let data = vec![1f32, 2.0, 3.0, 4.0, 5.0, 5.0, 5.0, 5.0];
        let one = Tensor::from_vec(data, (1, 2, 4), &Device::Cpu).unwrap();
        let signal = Tensor::cat(&[&one, &one], 0).unwrap();

        let norm = Normalizer::fit(&signal).unwrap();
        assert!((norm.mean()[0] - 2.5).abs() < 1e-6);
        assert!((norm.scale()[0] - 1.25f32.sqrt()).abs() < 1e-6);
        assert!((norm.mean()[1] - 5.0).abs() < 1e-6);
        assert_eq!(norm.scale()[1], MIN_SCALE);
    }

    #[test]
    fn test_fit_accepts_f64_signal() {
        let data = vec![-1f64, 1.0, -1.0, 1.0, 10.0, 10.0, 14.0, 14.0];
        let signal = Tensor::from_vec(data, (1, 2, 4), &Device::Cpu).unwrap();

        let norm = Normalizer::fit(&signal).unwrap();
        assert_eq!(norm.mean(), &[0.0f32, 12.0]);
        assert_eq!(norm.scale(), &[1.0f32, 2.0]);

        let out = norm.normalize(&signal).unwrap();
        assert_eq!(out.dtype(), DType::F64);
        assert_eq!(
            out.flatten_all().unwrap().to_vec1::<f64>().unwrap(),
            vec![-1.0, 1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_normalize_unnormalize_inverse() {
        let signal = Tensor::randn(3f32, 2.0, (2, 3, 10), &Device::Cpu).unwrap();
        let norm = Normalizer::fit(&signal).unwrap();
        let restored = norm.unnormalize(&norm.normalize(&signal).unwrap()).unwrap();

        let a = signal.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = restored.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (a, b) in a.iter().zip(&b) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_identity_is_noop() {
        let signal = Tensor::randn(0f32, 1.0, (1, 2, 5), &Device::Cpu).unwrap();
        let out = Normalizer::identity(2).normalize(&signal).unwrap();
        assert_eq!(
            out.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            signal.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_new_rejects_zero_scale() {
        assert!(Normalizer::new(vec![0.0], vec![0.0]).is_err());
        assert!(matches!(
            Normalizer::new(vec![0.0, 1.0], vec![1.0]),
            Err(DynSysError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normalizer_output.json");
        let norm = Normalizer::new(vec![1.5, -2.0], vec![0.5, 3.0]).unwrap();
        norm.to_file(&path).unwrap();
        assert_eq!(Normalizer::from_file(&path).unwrap(), norm);
    }
}
