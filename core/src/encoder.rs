use crate::gmsk::GmskModulator;
use crate::header::{bytes_to_bits, DStarHeader};
use crate::interleave::interleave;
use crate::scramble::scramble;
use crate::sync::sync_pattern;
use crate::trellis::ConvolutionalEncoder;
use crate::HEADER_ENCODED_BITS;
use crate::error::Result;

/// Idle `1,0` bits sent around a header so the receiver's bit clock can settle
const IDLE_BITS: usize = 40;

/// Builds the transmit side of a radio header: FEC, interleave, scramble,
/// and optionally GMSK
pub struct HeaderEncoder {
    modulator: GmskModulator,
}

impl HeaderEncoder {
    pub fn new() -> Self {
        Self {
            modulator: GmskModulator::new(),
        }
    }

    /// The 660 air bits for `header`, without sync
    pub fn encode_air_bits(&self, header: &DStarHeader) -> Result<Vec<bool>> {
        let mut bits = bytes_to_bits(&header.to_bytes());
        // Two zero tail bits return the trellis to state 0
        bits.extend_from_slice(&[false, false]);

        let coded = ConvolutionalEncoder::new().encode(&bits);
        debug_assert_eq!(coded.len(), HEADER_ENCODED_BITS);

        let mut air = interleave(&coded)?;
        scramble(&mut air);
        Ok(air)
    }

    /// Sync pattern followed by the 660 air bits
    pub fn encode(&self, header: &DStarHeader) -> Result<Vec<bool>> {
        let mut bits = sync_pattern();
        bits.extend(self.encode_air_bits(header)?);
        Ok(bits)
    }

    /// Frequency waveform at the radio rate: idle bits, sync, header, idle bits
    pub fn encode_waveform(&self, header: &DStarHeader) -> Result<Vec<f32>> {
        let idle: Vec<bool> = (0..IDLE_BITS).map(|i| i % 2 == 0).collect();
        let mut bits = idle.clone();
        bits.extend(self.encode(header)?);
        bits.extend(idle);
        Ok(self.modulator.modulate(&bits))
    }
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new()
    }
}
