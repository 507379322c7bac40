//! Frame synchronization on the demodulated bitstream
//!
//! The radio header is announced by 64 bits of `1,0` preamble followed by
//! the 15-bit frame sync word. Bits are shifted into a register one at a
//! time and compared against the whole pattern; only an exact match locks.

use crate::error::{DStarError, Result};
use crate::{FRAME_SYNC_BITS, PREAMBLE_BITS, SYNC_PATTERN_BITS};

/// Frame sync word sent after the preamble, in air order
const FRAME_SYNC: [bool; FRAME_SYNC_BITS] = [
    true, true, true, false, true, true, false, false, true, false, true, false, false, false,
    false,
];

/// Preamble followed by frame sync, in air order
pub fn sync_pattern() -> Vec<bool> {
    let mut pattern: Vec<bool> = (0..PREAMBLE_BITS).map(|i| i % 2 == 0).collect();
    pattern.extend_from_slice(&FRAME_SYNC);
    debug_assert_eq!(pattern.len(), SYNC_PATTERN_BITS);
    pattern
}

/// Sliding exact-match correlator for a bit pattern of up to 128 bits
#[derive(Debug, Clone)]
pub struct BitPatternMatcher {
    pattern: u128,
    mask: u128,
    length: usize,
    register: u128,
    seen: usize,
}

impl BitPatternMatcher {
    pub fn new(pattern: &[bool]) -> Result<Self> {
        if pattern.is_empty() || pattern.len() > 128 {
            return Err(DStarError::InvalidConfig(format!(
                "bit pattern must be 1..=128 bits, got {}",
                pattern.len()
            )));
        }

        let packed = pattern
            .iter()
            .fold(0u128, |acc, &bit| (acc << 1) | bit as u128);
        let mask = if pattern.len() == 128 {
            u128::MAX
        } else {
            (1u128 << pattern.len()) - 1
        };

        Ok(Self {
            pattern: packed,
            mask,
            length: pattern.len(),
            register: 0,
            seen: 0,
        })
    }

    /// Shift in one bit; true when the last `len` bits equal the pattern
    pub fn add_bit(&mut self, bit: bool) -> bool {
        self.register = ((self.register << 1) | bit as u128) & self.mask;
        if self.seen < self.length {
            self.seen += 1;
        }
        self.seen == self.length && self.register == self.pattern
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn reset(&mut self) {
        self.register = 0;
        self.seen = 0;
    }
}

/// Lock detector for the D-STAR header sync pattern
pub struct FrameSynchronizer {
    matcher: BitPatternMatcher,
    locked: bool,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        let matcher = match BitPatternMatcher::new(&sync_pattern()) {
            Ok(matcher) => matcher,
            Err(_) => unreachable!("sync pattern is 79 bits"),
        };
        Self {
            matcher,
            locked: false,
        }
    }

    /// Feed one demodulated bit. Returns true on the bit that completes the
    /// pattern; the matcher is cleared so the next lock needs a full pattern.
    pub fn feed(&mut self, bit: bool) -> bool {
        if self.matcher.add_bit(bit) {
            log::info!("frame sync acquired");
            self.locked = true;
            self.matcher.reset();
            return true;
        }
        false
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Drop lock after the header has been consumed
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn reset(&mut self) {
        self.matcher.reset();
        self.locked = false;
    }
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}
