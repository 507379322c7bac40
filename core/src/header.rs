//! D-STAR radio header layout and checksum
//!
//! 41 bytes on air, each sent least significant bit first:
//!
//! ```text
//! [flag1][flag2][flag3][RPT2 x8][RPT1 x8][UR x8][MY x8][MY suffix x4][CRC lo][CRC hi]
//! ```
//!
//! Call fields are space-padded ASCII. The checksum is CRC-16/X.25 over the
//! first 39 bytes.

use crate::error::{DStarError, Result};
use crate::{HEADER_BYTES, HEADER_CALL_BYTES, HEADER_SUFFIX_BYTES};

const FLAG_BYTES: usize = 3;
const CHECKSUMMED_BYTES: usize = HEADER_BYTES - 2;

/// CRC-16/X.25 (reflected 0x1021, init and xorout 0xFFFF)
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Unpack bytes to bits, least significant bit of each byte first
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |i| (byte >> i) & 1 == 1))
        .collect()
}

/// Pack bits into bytes, least significant bit first. A trailing partial
/// byte is kept with its missing high bits zero.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << i))
        })
        .collect()
}

/// Space-separated hex rendering for trace logs
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn pad_field<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    for (slot, byte) in field.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    field
}

fn field_str(field: &[u8]) -> &str {
    let text = std::str::from_utf8(field).unwrap_or("");
    text.trim_end_matches([' ', '\0'])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DStarHeader {
    pub flags: [u8; FLAG_BYTES],
    /// RPT2
    pub destination_repeater: [u8; HEADER_CALL_BYTES],
    /// RPT1
    pub departure_repeater: [u8; HEADER_CALL_BYTES],
    /// UR
    pub companion_call: [u8; HEADER_CALL_BYTES],
    /// MY
    pub own_call: [u8; HEADER_CALL_BYTES],
    pub own_suffix: [u8; HEADER_SUFFIX_BYTES],
    /// Checksum as received, or as computed by [`to_bytes`](Self::to_bytes)
    pub checksum: u16,
}

impl DStarHeader {
    /// Header with zero flags and space-padded call fields. Text longer than
    /// a field is truncated.
    pub fn new(my: &str, your: &str, rpt1: &str, rpt2: &str) -> Self {
        let mut header = Self {
            flags: [0; FLAG_BYTES],
            destination_repeater: pad_field(rpt2),
            departure_repeater: pad_field(rpt1),
            companion_call: pad_field(your),
            own_call: pad_field(my),
            own_suffix: pad_field(""),
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.own_suffix = pad_field(suffix);
        self.checksum = self.compute_checksum();
        self
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(DStarError::InsufficientData);
        }

        let mut fields = bytes[FLAG_BYTES..].chunks_exact(HEADER_CALL_BYTES);
        let mut next_call = || -> [u8; HEADER_CALL_BYTES] {
            let mut call = [0u8; HEADER_CALL_BYTES];
            if let Some(chunk) = fields.next() {
                call.copy_from_slice(chunk);
            }
            call
        };
        let destination_repeater = next_call();
        let departure_repeater = next_call();
        let companion_call = next_call();
        let own_call = next_call();

        let suffix_at = FLAG_BYTES + 4 * HEADER_CALL_BYTES;
        let mut own_suffix = [0u8; HEADER_SUFFIX_BYTES];
        own_suffix.copy_from_slice(&bytes[suffix_at..suffix_at + HEADER_SUFFIX_BYTES]);

        Ok(Self {
            flags: [bytes[0], bytes[1], bytes[2]],
            destination_repeater,
            departure_repeater,
            companion_call,
            own_call,
            own_suffix,
            checksum: u16::from_le_bytes([bytes[CHECKSUMMED_BYTES], bytes[CHECKSUMMED_BYTES + 1]]),
        })
    }

    /// Serialize with a freshly computed checksum
    pub fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut bytes = self.body();
        let crc = crc16_x25(&bytes[..CHECKSUMMED_BYTES]);
        bytes[CHECKSUMMED_BYTES..].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    fn body(&self) -> [u8; HEADER_BYTES] {
        let mut bytes = [0u8; HEADER_BYTES];
        bytes[..FLAG_BYTES].copy_from_slice(&self.flags);
        let mut at = FLAG_BYTES;
        for call in [
            &self.destination_repeater,
            &self.departure_repeater,
            &self.companion_call,
            &self.own_call,
        ] {
            bytes[at..at + HEADER_CALL_BYTES].copy_from_slice(call);
            at += HEADER_CALL_BYTES;
        }
        bytes[at..at + HEADER_SUFFIX_BYTES].copy_from_slice(&self.own_suffix);
        bytes
    }

    pub fn compute_checksum(&self) -> u16 {
        crc16_x25(&self.body()[..CHECKSUMMED_BYTES])
    }

    /// Whether the stored checksum matches the header contents
    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    pub fn my_call(&self) -> &str {
        field_str(&self.own_call)
    }

    pub fn my_suffix(&self) -> &str {
        field_str(&self.own_suffix)
    }

    pub fn your_call(&self) -> &str {
        field_str(&self.companion_call)
    }

    pub fn rpt1(&self) -> &str {
        field_str(&self.departure_repeater)
    }

    pub fn rpt2(&self) -> &str {
        field_str(&self.destination_repeater)
    }
}

impl std::fmt::Display for DStarHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MY={}/{} UR={} RPT1={} RPT2={} flags={:02X}{:02X}{:02X}",
            self.my_call(),
            self.my_suffix(),
            self.your_call(),
            self.rpt1(),
            self.rpt2(),
            self.flags[0],
            self.flags[1],
            self.flags[2]
        )
    }
}
