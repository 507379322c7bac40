use crate::error::{DStarError, Result};
use crate::header::{bits_to_bytes, hex_dump, DStarHeader};
use crate::interleave::deinterleave;
use crate::scramble::descramble;
use crate::sync::FrameSynchronizer;
use crate::trellis::ViterbiDecoder;
use crate::{HEADER_BYTES, HEADER_ENCODED_BITS};

/// Where the decoder is in the header cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPhase {
    /// Watching the bitstream for the sync pattern
    Searching,
    /// Sync seen, collecting the 660 encoded header bits
    Accumulating,
}

/// A radio header recovered from the air
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    pub header: DStarHeader,
    /// FEC output, 328 header bits plus the two tail bits
    pub bits: Vec<bool>,
    /// Channel bit errors the Viterbi decoder corrected along its survivor path
    pub path_metric: u32,
    pub checksum_ok: bool,
}

pub struct HeaderDecoder {
    sync: FrameSynchronizer,
    viterbi: ViterbiDecoder,
    phase: HeaderPhase,
    bits: Vec<bool>,
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            sync: FrameSynchronizer::new(),
            viterbi: ViterbiDecoder::new(),
            phase: HeaderPhase::Searching,
            bits: Vec::with_capacity(HEADER_ENCODED_BITS),
        }
    }

    pub fn phase(&self) -> HeaderPhase {
        self.phase
    }

    /// Encoded bits collected since the last sync lock
    pub fn bits_accumulated(&self) -> usize {
        self.bits.len()
    }

    /// Feed one demodulated bit.
    ///
    /// Returns a header on the bit that completes a 660-bit cycle. After
    /// each cycle, decoded or not, the decoder goes back to searching.
    pub fn push_bit(&mut self, bit: bool) -> Option<DecodedHeader> {
        match self.phase {
            HeaderPhase::Searching => {
                if self.sync.feed(bit) {
                    self.phase = HeaderPhase::Accumulating;
                    self.bits.clear();
                }
                None
            }
            HeaderPhase::Accumulating => {
                self.bits.push(bit);
                if self.bits.len() < HEADER_ENCODED_BITS {
                    return None;
                }

                let air = std::mem::take(&mut self.bits);
                let result = self.decode_air_bits(&air);
                self.bits = air;
                self.reset();

                match result {
                    Ok(decoded) => {
                        log::debug!(
                            "radio header: {} (metric {}, checksum {})",
                            decoded.header,
                            decoded.path_metric,
                            if decoded.checksum_ok { "ok" } else { "bad" }
                        );
                        Some(decoded)
                    }
                    Err(e) => {
                        log::warn!("header decode failed: {}", e);
                        None
                    }
                }
            }
        }
    }

    /// Feed a run of bits, collecting every header completed along the way
    pub fn push_bits(&mut self, bits: &[bool]) -> Vec<DecodedHeader> {
        bits.iter().filter_map(|&bit| self.push_bit(bit)).collect()
    }

    /// Descramble, deinterleave and FEC-decode one block of 660 air bits
    pub fn decode_air_bits(&mut self, air: &[bool]) -> Result<DecodedHeader> {
        if air.len() != HEADER_ENCODED_BITS {
            return Err(DStarError::InvalidInputSize);
        }

        let mut bits = air.to_vec();
        descramble(&mut bits);
        log::trace!("descrambled: {}", hex_dump(&bits_to_bytes(&bits)));

        let bits = deinterleave(&bits)?;
        log::trace!("deinterleaved: {}", hex_dump(&bits_to_bytes(&bits)));

        let fec = self.viterbi.decode(&bits)?;
        let bytes = bits_to_bytes(&fec.bits[..HEADER_BYTES * 8]);
        log::trace!("header bytes: {}", hex_dump(&bytes));

        let header = DStarHeader::from_bytes(&bytes)?;
        Ok(DecodedHeader {
            checksum_ok: header.checksum_ok(),
            header,
            bits: fec.bits,
            path_metric: fec.path_metric,
        })
    }

    /// Drop any partial header and go back to searching
    pub fn reset(&mut self) {
        self.sync.reset();
        self.bits.clear();
        self.phase = HeaderPhase::Searching;
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::HeaderEncoder;
    use crate::sync::sync_pattern;
    use std::sync::Mutex;

    static RECORDS: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

    struct RecordingLogger;

    impl log::Log for RecordingLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            RECORDS
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static LOGGER: RecordingLogger = RecordingLogger;

    fn sample_header() -> DStarHeader {
        DStarHeader::new("N0CALL", "CQCQCQ", "W1AW  B", "W1AW  G").with_suffix("TEST")
    }

    #[test]
    fn test_ignores_bits_until_sync() {
        let mut decoder = HeaderDecoder::new();
        for i in 0..500 {
            assert!(decoder.push_bit(i % 3 == 0).is_none());
        }
        assert_eq!(decoder.phase(), HeaderPhase::Searching);
        assert_eq!(decoder.bits_accumulated(), 0);
    }

    #[test]
    fn test_enters_accumulating_on_sync() {
        let mut decoder = HeaderDecoder::new();
        for bit in sync_pattern() {
            decoder.push_bit(bit);
        }
        assert_eq!(decoder.phase(), HeaderPhase::Accumulating);

        decoder.push_bits(&[true, false, true]);
        assert_eq!(decoder.bits_accumulated(), 3);
    }

    #[test]
    fn test_decodes_encoded_header() {
        let header = sample_header();
        let mut stream: Vec<bool> = vec![false, true, true, false, false];
        stream.extend(HeaderEncoder::new().encode(&header).unwrap());
        stream.extend([true, false].repeat(10));

        let mut decoder = HeaderDecoder::new();
        let decoded = decoder.push_bits(&stream);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].header.my_call(), "N0CALL");
        assert_eq!(decoded[0].header.my_suffix(), "TEST");
        assert_eq!(decoded[0].header.rpt2(), "W1AW  G");
        assert!(decoded[0].checksum_ok);
        assert_eq!(decoded[0].path_metric, 0);
        assert_eq!(decoder.phase(), HeaderPhase::Searching);
    }

    #[test]
    fn test_sync_inside_header_does_not_relock() {
        // A sync pattern carried in the header body must not restart the cycle
        let mut decoder = HeaderDecoder::new();
        let mut stream = sync_pattern();
        stream.extend(sync_pattern());
        stream.extend(vec![false; HEADER_ENCODED_BITS - sync_pattern().len()]);

        for bit in &stream[..stream.len() - 1] {
            assert!(decoder.push_bit(*bit).is_none());
        }
        assert_eq!(decoder.bits_accumulated(), HEADER_ENCODED_BITS - 1);
        decoder.push_bit(stream[stream.len() - 1]);
        assert_eq!(decoder.phase(), HeaderPhase::Searching);
        assert_eq!(decoder.bits_accumulated(), 0);
    }

    #[test]
    fn test_decode_air_bits_rejects_wrong_length() {
        let mut decoder = HeaderDecoder::new();
        assert!(decoder.decode_air_bits(&[false; 100]).is_err());
    }

    #[test]
    fn test_decoded_header_logged_at_debug() {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(log::LevelFilter::Debug);

        let header = DStarHeader::new("LOGCHK", "CQCQCQ", "", "");
        let decoded = HeaderDecoder::new().push_bits(&HeaderEncoder::new().encode(&header).unwrap());
        assert_eq!(decoded.len(), 1);

        let records = RECORDS.lock().unwrap();
        let ours: Vec<_> = records.iter().filter(|(_, msg)| msg.contains("LOGCHK")).collect();
        assert!(!ours.is_empty());
        assert!(ours.iter().all(|(level, _)| *level == log::Level::Debug));
    }
}
