//! Header scrambler: XOR with the x^7 + x^4 + 1 PN sequence
//!
//! The register is seeded with all ones at the start of every header, so the
//! same 660-bit sequence is applied each time and scrambling is its own
//! inverse.

use crate::HEADER_ENCODED_BITS;

const SCRAMBLER_SEED: u8 = 0x7F;

/// PN sequence of `len` bits from a freshly seeded register
pub fn pn_sequence(len: usize) -> Vec<bool> {
    let mut reg = SCRAMBLER_SEED;
    (0..len)
        .map(|_| {
            let bit = ((reg >> 3) ^ (reg >> 6)) & 1;
            reg = ((reg << 1) | bit) & 0x7F;
            bit == 1
        })
        .collect()
}

/// XOR `bits` in place with the PN sequence
pub fn scramble(bits: &mut [bool]) {
    let pn = pn_sequence(bits.len());
    for (bit, pn) in bits.iter_mut().zip(pn) {
        *bit ^= pn;
    }
}

/// Undo [`scramble`]; the operation is an involution
pub fn descramble(bits: &mut [bool]) {
    scramble(bits)
}

/// The sequence applied to one encoded radio header
pub fn header_sequence() -> Vec<bool> {
    pn_sequence(HEADER_ENCODED_BITS)
}
