use crate::error::{DStarError, Result};
use crate::{HEADER_DECODED_BITS, HEADER_ENCODED_BITS};

/// Number of trellis states, 2^(K-1) for constraint length 3
const NUM_STATES: usize = 4;

/// Convolutional code rate 1/2 with constraint length 3
/// Generator polynomials: G1 = 1 + D + D^2 (111)
///                        G2 = 1 + D^2     (101)
///
/// This creates a Trellis diagram with 4 states. Each input bit produces
/// 2 output bits (rate 1/2).
pub struct ConvolutionalEncoder {
    d1: bool,
    d2: bool,
}

impl ConvolutionalEncoder {
    pub fn new() -> Self {
        Self { d1: false, d2: false }
    }

    /// Encode a single bit, returns the G1 and G2 outputs
    pub fn encode_bit(&mut self, input: bool) -> [bool; 2] {
        let out = [input ^ self.d1 ^ self.d2, input ^ self.d2];
        self.d2 = self.d1;
        self.d1 = input;
        out
    }

    /// Encode a bit sequence. No tail is appended; the caller terminates
    /// the trellis by ending `bits` with two zeros.
    pub fn encode(&mut self, bits: &[bool]) -> Vec<bool> {
        let mut output = Vec::with_capacity(bits.len() * 2);
        for &bit in bits {
            output.extend_from_slice(&self.encode_bit(bit));
        }
        output
    }

    /// Reset encoder state for new message
    pub fn reset(&mut self) {
        self.d1 = false;
        self.d2 = false;
    }
}

impl Default for ConvolutionalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Survivor memory and path metrics, reused across headers
pub struct FecState {
    /// For each state and step, which predecessor survived (its oldest bit)
    memory: [Vec<bool>; NUM_STATES],
    metrics: [u32; NUM_STATES],
}

impl FecState {
    pub fn new() -> Self {
        Self {
            memory: std::array::from_fn(|_| vec![false; HEADER_DECODED_BITS]),
            metrics: [0; NUM_STATES],
        }
    }

    pub fn reset(&mut self) {
        for column in self.memory.iter_mut() {
            column.fill(false);
        }
        self.metrics = [0; NUM_STATES];
    }
}

impl Default for FecState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded bits plus the metric of the surviving path
#[derive(Debug, Clone)]
pub struct FecOutput {
    pub bits: Vec<bool>,
    /// Hamming distance between the received word and the re-encoded
    /// survivor. Zero for a clean channel.
    pub path_metric: u32,
}

/// Hard-decision Viterbi decoder for the header code
pub struct ViterbiDecoder {
    state: FecState,
}

impl ViterbiDecoder {
    pub fn new() -> Self {
        Self {
            state: FecState::new(),
        }
    }

    /// Decode `encoded` (pairs of G1, G2 bits) to one bit per pair.
    ///
    /// All metrics start at zero, so the decoder may lock onto any starting
    /// state. Ties between predecessors go to the one whose oldest bit is
    /// zero, ties between final states to the lowest index.
    pub fn decode(&mut self, encoded: &[bool]) -> Result<FecOutput> {
        if encoded.len() < 2 {
            return Err(DStarError::InsufficientData);
        }
        if encoded.len() % 2 != 0 || encoded.len() > HEADER_ENCODED_BITS {
            return Err(DStarError::FecError(format!(
                "expected an even number of bits up to {}, got {}",
                HEADER_ENCODED_BITS,
                encoded.len()
            )));
        }

        self.state.reset();
        let steps = encoded.len() / 2;

        for (t, pair) in encoded.chunks_exact(2).enumerate() {
            let received = [pair[0], pair[1]];
            let mut next = [0u32; NUM_STATES];

            for (ns, metric) in next.iter_mut().enumerate() {
                let d = ns >> 1 == 1;
                let d1 = ns & 1 == 1;

                let mut best = u32::MAX;
                let mut survivor = false;
                for d2 in [false, true] {
                    let ps = ((d1 as usize) << 1) | d2 as usize;
                    let expected = [d ^ d1 ^ d2, d ^ d2];
                    let candidate = self.state.metrics[ps] + branch_metric(expected, received);
                    if candidate < best {
                        best = candidate;
                        survivor = d2;
                    }
                }

                *metric = best;
                self.state.memory[ns][t] = survivor;
            }

            self.state.metrics = next;
        }

        let (mut s, path_metric) = self
            .state
            .metrics
            .iter()
            .enumerate()
            .min_by_key(|&(index, &metric)| (metric, index))
            .map(|(index, &metric)| (index, metric))
            .ok_or(DStarError::InsufficientData)?;

        let mut bits = vec![false; steps];
        for t in (0..steps).rev() {
            bits[t] = s >> 1 == 1;
            s = ((s & 1) << 1) | self.state.memory[s][t] as usize;
        }

        log::debug!("viterbi decoded {} bits, path metric {}", steps, path_metric);
        Ok(FecOutput { bits, path_metric })
    }
}

impl Default for ViterbiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming distance between expected and received bit pairs
fn branch_metric(expected: [bool; 2], received: [bool; 2]) -> u32 {
    (expected[0] != received[0]) as u32 + (expected[1] != received[1]) as u32
}
