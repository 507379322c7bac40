//! GMSK baseband modem for 4800 bit/s D-STAR at the 24 kHz radio rate
//!
//! The radio hands us FM-discriminator audio, so the modem works on the
//! frequency waveform directly: the modulator Gaussian-filters NRZ symbols,
//! the demodulator filters the same way, slices on sign, and recovers the bit
//! clock with a small phase-locked loop nudged by every zero crossing.

use crate::{GMSK_BT, GMSK_SAMPLES_PER_BIT};

/// Span of the Gaussian pulse in bit periods
const PULSE_SPAN_BITS: usize = 3;

const PLL_MAX: u32 = 0x10000;
/// Fraction of a bit period the clock is pulled on each transition
const PLL_NUDGE_DIVISOR: u32 = 32;

/// Q(x) = 0.5 * erfc(x / sqrt(2))
fn q_function(x: f64) -> f64 {
    0.5 * erfc_approx(x / std::f64::consts::SQRT_2)
}

/// Abramowitz and Stegun 7.1.26, max error 1.5e-7
fn erfc_approx(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc_approx(-x);
    }
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592 + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    poly * (-x * x).exp()
}

/// Gaussian frequency pulse, normalized to unit sum
///
/// ```text
/// g(t) = Q(2*pi*B*(t - T/2)/sqrt(ln2)) - Q(2*pi*B*(t + T/2)/sqrt(ln2))
/// ```
pub fn gaussian_pulse(bt: f64, span: usize, samples_per_bit: usize) -> Vec<f32> {
    let len = span * samples_per_bit + 1;
    let half = (len - 1) as f64 / 2.0;
    let sps = samples_per_bit as f64;
    let scale = 2.0 * std::f64::consts::PI * bt / 2.0_f64.ln().sqrt();

    let pulse: Vec<f64> = (0..len)
        .map(|i| {
            let t = (i as f64 - half) / sps;
            q_function(scale * (t - 0.5)) - q_function(scale * (t + 0.5))
        })
        .collect();

    let sum: f64 = pulse.iter().sum();
    pulse.iter().map(|&p| (p / sum) as f32).collect()
}

/// Outcome of feeding one sample to the demodulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodState {
    /// No bit decision at this sample
    Unknown,
    One,
    Zero,
}

impl DemodState {
    pub fn bit(self) -> Option<bool> {
        match self {
            DemodState::Unknown => None,
            DemodState::One => Some(true),
            DemodState::Zero => Some(false),
        }
    }
}

/// Sample-by-sample GMSK demodulator
pub struct GmskDemodulator {
    taps: Vec<f32>,
    history: Vec<f32>,
    pll: u32,
    pll_inc: u32,
    prev: bool,
}

impl GmskDemodulator {
    pub fn new() -> Self {
        let taps = gaussian_pulse(GMSK_BT, PULSE_SPAN_BITS, GMSK_SAMPLES_PER_BIT);
        Self {
            history: vec![0.0; taps.len()],
            taps,
            pll: 0,
            pll_inc: PLL_MAX / GMSK_SAMPLES_PER_BIT as u32,
            prev: false,
        }
    }

    /// Feed one discriminator sample; yields a bit once per bit period
    pub fn decode(&mut self, sample: f32) -> DemodState {
        self.history.rotate_right(1);
        self.history[0] = sample;
        let filtered: f32 = self
            .taps
            .iter()
            .zip(self.history.iter())
            .map(|(t, x)| t * x)
            .sum();

        let bit = filtered > 0.0;
        if bit != self.prev {
            let nudge = self.pll_inc / PLL_NUDGE_DIVISOR;
            if self.pll < PLL_MAX / 2 {
                self.pll += nudge;
            } else {
                self.pll -= nudge;
            }
        }
        self.prev = bit;

        self.pll += self.pll_inc;
        if self.pll >= PLL_MAX {
            self.pll -= PLL_MAX;
            if bit {
                DemodState::One
            } else {
                DemodState::Zero
            }
        } else {
            DemodState::Unknown
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pll = 0;
        self.prev = false;
    }
}

impl Default for GmskDemodulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Bits to Gaussian-filtered NRZ frequency waveform
pub struct GmskModulator {
    taps: Vec<f32>,
}

impl GmskModulator {
    pub fn new() -> Self {
        Self {
            taps: gaussian_pulse(GMSK_BT, PULSE_SPAN_BITS, GMSK_SAMPLES_PER_BIT),
        }
    }

    /// Modulate `bits` to `bits.len() * GMSK_SAMPLES_PER_BIT` samples,
    /// aligned so the filter delay is removed
    pub fn modulate(&self, bits: &[bool]) -> Vec<f32> {
        let nrz: Vec<f32> = bits
            .iter()
            .flat_map(|&b| std::iter::repeat(if b { 1.0 } else { -1.0 }).take(GMSK_SAMPLES_PER_BIT))
            .collect();

        let delay = (self.taps.len() - 1) / 2;
        (delay..nrz.len() + delay)
            .map(|n| {
                self.taps
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n && n - k < nrz.len())
                    .map(|(k, &tap)| tap * nrz[n - k])
                    .sum()
            })
            .collect()
    }
}

impl Default for GmskModulator {
    fn default() -> Self {
        Self::new()
    }
}
