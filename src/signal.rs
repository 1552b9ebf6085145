//! Signal helpers: delay shifting and causal windowing.
//!
//! A signal is a `(batch, channel, time)` tensor. Everything here works on the
//! time axis only and never changes batch or channel extents.

use candle_core::{Result, Tensor};

/// Channel axis of a signal.
pub const CHANNEL_AXIS: usize = 1;
/// Time axis of a signal.
pub const TIME_AXIS: usize = 2;

/// Number of time steps in a signal.
pub fn time_len(signal: &Tensor) -> Result<usize> {
    let (_, _, time) = signal.dims3()?;
    Ok(time)
}

/// Time-shifts a signal by a fixed input/output delay.
///
/// Positive delays lag the signal (output at `t` is input at `t - delay`),
/// negative delays lead it (output at `t` is input at `t + |delay|`). The edge
/// exposed by the shift is zero-filled. A delay whose magnitude reaches the
/// sequence length yields an all-zero signal.
///
/// # Example
///
/// ```rust
/// use candle_core::{Device, Tensor};
/// use dynsys_model_rs::DelayShifter;
///
/// let u = Tensor::new(&[[[1.0f32, 2.0, 3.0, 4.0]]], &Device::Cpu).unwrap();
/// let lagged = DelayShifter::new(1).shift(&u).unwrap();
/// assert_eq!(lagged.to_vec3::<f32>().unwrap(), vec![vec![vec![0.0, 1.0, 2.0, 3.0]]]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelayShifter {
    delay: isize,
}

impl DelayShifter {
    /// Create a shifter for the given signed delay.
    pub const fn new(delay: isize) -> Self {
        Self { delay }
    }

    /// The configured delay.
    #[inline]
    pub const fn delay(&self) -> isize {
        self.delay
    }

    /// Apply the configured delay to `signal`.
    pub fn shift(&self, signal: &Tensor) -> Result<Tensor> {
        shift(signal, self.delay)
    }
}

/// Shift `signal` along time by `delay` steps, zero-padding the exposed edge.
pub fn shift(signal: &Tensor, delay: isize) -> Result<Tensor> {
    let time = time_len(signal)?;
    let steps = delay.unsigned_abs();
    if delay == 0 || time == 0 {
        return Ok(signal.clone());
    }
    if steps >= time {
        return signal.zeros_like();
    }

    let kept = time - steps;
    if delay > 0 {
        signal
            .narrow(TIME_AXIS, 0, kept)?
            .pad_with_zeros(TIME_AXIS, steps, 0)
    } else {
        signal
            .narrow(TIME_AXIS, steps, kept)?
            .pad_with_zeros(TIME_AXIS, 0, steps)
    }
}

/// The `width` samples of `signal` that end just before `end`, left-padded
/// with zeros where the window reaches back before time 0.
///
/// `end` is exclusive and must not exceed the sequence length. A zero width
/// gives an empty window.
pub fn causal_window(signal: &Tensor, end: usize, width: usize) -> Result<Tensor> {
    let (batch, channels, time) = signal.dims3()?;
    if end > time {
        candle_core::bail!("window end {end} is past the sequence length {time}");
    }
    if width == 0 {
        return Tensor::zeros((batch, channels, 0), signal.dtype(), signal.device());
    }

    let available = end.min(width);
    if available == 0 {
        return Tensor::zeros((batch, channels, width), signal.dtype(), signal.device());
    }
    signal
        .narrow(TIME_AXIS, end - available, available)?
        .pad_with_zeros(TIME_AXIS, width - available, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn ramp(batch: usize, channels: usize, time: usize) -> Tensor {
        let data: Vec<f32> = (0..batch * channels * time).map(|v| v as f32 + 1.0).collect();
        Tensor::from_vec(data, (batch, channels, time), &Device::Cpu).unwrap()
    }

    fn series(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_zero_delay_is_identity() {
        let u = ramp(2, 3, 7);
        let out = shift(&u, 0).unwrap();
        assert_eq!(series(&out), series(&u));
    }

    #[test]
    fn test_positive_delay_lags() {
        let u = ramp(1, 1, 5);
        let out = shift(&u, 2).unwrap();
        assert_eq!(series(&out), vec![0.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_negative_delay_leads() {
        let u = ramp(1, 1, 5);
        let out = shift(&u, -2).unwrap();
        assert_eq!(series(&out), vec![3.0, 4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_delay_past_sequence_length_zeroes_everything() {
        let u = ramp(2, 2, 4);
        for delay in [4, 9, -4, -9] {
            let out = shift(&u, delay).unwrap();
            assert_eq!(out.dims(), u.dims());
            assert!(series(&out).iter().all(|v| *v == 0.0), "delay {delay}");
        }
    }

    #[test]
    fn test_shift_keeps_batches_and_channels_apart() {
        // batch 0: channel 0 = 1..=4, channel 1 = 5..=8; batch 1: 9..=16
        let u = ramp(2, 2, 4);
        let out = shift(&u, 1).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(out[0][1], vec![0.0, 5.0, 6.0, 7.0]);
        assert_eq!(out[1][0], vec![0.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_causal_window_pads_before_time_zero() {
        let y = ramp(1, 1, 6);
        // window of 3 ending before step 1 holds only y[0]
        let w = causal_window(&y, 1, 3).unwrap();
        assert_eq!(series(&w), vec![0.0, 0.0, 1.0]);
        let w = causal_window(&y, 5, 3).unwrap();
        assert_eq!(series(&w), vec![3.0, 4.0, 5.0]);
        let w = causal_window(&y, 0, 2).unwrap();
        assert_eq!(series(&w), vec![0.0, 0.0]);
    }

    #[test]
    fn test_causal_window_zero_width_is_empty() {
        let y = ramp(2, 3, 4);
        let w = causal_window(&y, 2, 0).unwrap();
        assert_eq!(w.dims(), &[2, 3, 0]);
    }

    #[test]
    fn test_causal_window_rejects_end_past_sequence() {
        let y = ramp(1, 1, 3);
        assert!(causal_window(&y, 4, 2).is_err());
    }
}
