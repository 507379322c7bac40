//! Sample rate conversion between the 24 kHz radio interface and the
//! 8 kHz vocoder rate
//!
//! [`Decimator`] and [`Interpolator`] are streaming FIR converters that carry
//! filter memory across blocks, so consecutive blocks join without clicks.
//! Their memory is zeroed at the start of every burst.
//!
//! [`resample_audio`] and [`downmix`] are one-shot helpers for
//! bringing recorded audio files to the radio rate.

use crate::error::{DStarError, Result};
use crate::{DECIMATION_FACTOR, FILTER_TAPS, MEM_24, MEM_8};
use std::f32::consts::PI;

/// Hamming-windowed sinc low-pass with unity DC gain
///
/// # Arguments
/// * `num_taps` - Filter length
/// * `cutoff` - Cutoff frequency as a fraction of the sample rate (0.0 - 0.5)
pub fn lowpass_taps(num_taps: usize, cutoff: f32) -> Vec<f32> {
    let center = (num_taps as f32 - 1.0) / 2.0;
    let mut taps: Vec<f32> = (0..num_taps)
        .map(|n| {
            let x = n as f32 - center;
            let sinc = if x == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * x).sin() / (PI * x)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * n as f32 / (num_taps as f32 - 1.0)).cos();
            sinc * window
        })
        .collect();

    let sum: f32 = taps.iter().sum();
    for tap in taps.iter_mut() {
        *tap /= sum;
    }
    taps
}

/// Keep the newest `history.len()` samples of `history ++ input` in `history`
fn advance_history(history: &mut [f32], input: &[f32]) {
    let keep = history.len();
    if input.len() >= keep {
        history.copy_from_slice(&input[input.len() - keep..]);
    } else {
        history.copy_within(input.len().., 0);
        history[keep - input.len()..].copy_from_slice(input);
    }
}

/// Sample `n` of the current block, reaching back into filter memory for n < 0
#[inline]
fn sample_at(history: &[f32], input: &[f32], n: isize) -> f32 {
    if n >= 0 {
        input[n as usize]
    } else {
        history[(history.len() as isize + n) as usize]
    }
}

/// 24 kHz -> 8 kHz decimating low-pass filter
pub struct Decimator {
    taps: Vec<f32>,
    history: Vec<f32>,
    factor: usize,
}

impl Decimator {
    pub fn new() -> Self {
        let taps = lowpass_taps(FILTER_TAPS, 0.5 / DECIMATION_FACTOR as f32);
        Self {
            history: vec![0.0; MEM_24],
            taps,
            factor: DECIMATION_FACTOR,
        }
    }

    /// Decimate `input` into `output`; `input.len()` must be `factor * output.len()`
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() * self.factor {
            return Err(DStarError::InvalidInputSize);
        }

        for (i, out) in output.iter_mut().enumerate() {
            let newest = (i * self.factor) as isize;
            *out = self
                .taps
                .iter()
                .enumerate()
                .map(|(k, &tap)| tap * sample_at(&self.history, input, newest - k as isize))
                .sum();
        }

        advance_history(&mut self.history, input);
        Ok(())
    }

    /// Zero the filter memory
    pub fn reset(&mut self) {
        self.history.fill(0.0);
    }
}

impl Default for Decimator {
    fn default() -> Self {
        Self::new()
    }
}

/// 8 kHz -> 24 kHz interpolating low-pass filter (polyphase)
pub struct Interpolator {
    taps: Vec<f32>,
    history: Vec<f32>,
    factor: usize,
}

impl Interpolator {
    pub fn new() -> Self {
        let taps = lowpass_taps(FILTER_TAPS, 0.5 / DECIMATION_FACTOR as f32);
        Self {
            history: vec![0.0; MEM_8],
            taps,
            factor: DECIMATION_FACTOR,
        }
    }

    /// Interpolate `input` into `output`; `output.len()` must be `factor * input.len()`
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if output.len() != input.len() * self.factor {
            return Err(DStarError::InvalidInputSize);
        }

        let gain = self.factor as f32;
        for i in 0..input.len() {
            for phase in 0..self.factor {
                let mut acc = 0.0;
                let mut k = phase;
                let mut j = 0isize;
                while k < self.taps.len() {
                    acc += self.taps[k] * sample_at(&self.history, input, i as isize - j);
                    k += self.factor;
                    j += 1;
                }
                output[i * self.factor + phase] = gain * acc;
            }
        }

        advance_history(&mut self.history, input);
        Ok(())
    }

    /// Zero the filter memory
    pub fn reset(&mut self) {
        self.history.fill(0.0);
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

/// Mix interleaved multi-channel audio to mono by averaging each frame
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    // A trailing partial frame is dropped
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample a whole recording with linear interpolation.
///
/// Good enough for bringing a capture to 24 kHz before replaying it; the
/// real-time path uses [`Decimator`] / [`Interpolator`].
pub fn resample_audio(samples: &[f32], from_rate: usize, to_rate: usize) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_length = (samples.len() as f64 * ratio).ceil() as usize;

    (0..new_length)
        .map(|i| {
            let src = i as f64 / ratio;
            let floor = src.floor() as usize;
            let fraction = (src - floor as f64) as f32;
            match (samples.get(floor), samples.get(floor + 1)) {
                (Some(&a), Some(&b)) => a * (1.0 - fraction) + b * fraction,
                (Some(&a), None) => a,
                _ => samples[samples.len() - 1],
            }
        })
        .collect()
}
