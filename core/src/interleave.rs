//! 24-column block interleaver for the 660 encoded header bits
//!
//! Logical bits are written down the columns of a 24-column array, 12
//! columns of 28 rows then 12 of 27, and sent row by row. A burst error on
//! air is spread across the whole code word after deinterleaving.

use crate::error::{DStarError, Result};
use crate::HEADER_ENCODED_BITS;

const COLUMNS: usize = 24;
/// Bit positions covered by the 12 long (28-row) columns
const LONG_COLUMN_SPAN: usize = 12 * 28 * 2;

/// Air position of every logical bit
pub fn interleave_table() -> Vec<usize> {
    let mut table = Vec::with_capacity(HEADER_ENCODED_BITS);
    let mut k = 0;
    for _ in 0..HEADER_ENCODED_BITS {
        table.push(k);
        k += COLUMNS;
        if k >= LONG_COLUMN_SPAN {
            k -= LONG_COLUMN_SPAN - 1;
        } else if k >= HEADER_ENCODED_BITS {
            k -= HEADER_ENCODED_BITS - 13;
        }
    }
    table
}

fn check_len(bits: &[bool]) -> Result<()> {
    if bits.len() != HEADER_ENCODED_BITS {
        return Err(DStarError::FecError(format!(
            "interleaver works on {} bits, got {}",
            HEADER_ENCODED_BITS,
            bits.len()
        )));
    }
    Ok(())
}

/// Logical order to air order
pub fn interleave(bits: &[bool]) -> Result<Vec<bool>> {
    check_len(bits)?;
    let mut out = vec![false; HEADER_ENCODED_BITS];
    for (i, &pos) in interleave_table().iter().enumerate() {
        out[pos] = bits[i];
    }
    Ok(out)
}

/// Air order back to logical order
pub fn deinterleave(bits: &[bool]) -> Result<Vec<bool>> {
    check_len(bits)?;
    Ok(interleave_table().iter().map(|&pos| bits[pos]).collect())
}
