//! Real-time D-STAR waveform pipeline
//!
//! Pulls fixed-size I/Q buffers from the radio, runs them through a
//! decimate / GMSK-demodulate / vocoder / interpolate chain per direction,
//! and decodes the D-STAR radio header (sync, descramble, deinterleave, FEC)
//! from the receive bitstream.

pub mod error;
pub mod circular;
pub mod descriptor;
pub mod queue;
pub mod resample;
pub mod gmsk;
pub mod sync;
pub mod scramble;
pub mod interleave;
pub mod trellis;
pub mod header;
pub mod decoder;
pub mod encoder;
pub mod vocoder;
pub mod pipeline;
pub mod scheduler;

pub use decoder::{DecodedHeader, HeaderDecoder};
pub use descriptor::{BufferDescriptor, ByteOrder, DescriptorPool, Direction};
pub use encoder::HeaderEncoder;
pub use error::{DStarError, Result};
pub use header::DStarHeader;
pub use pipeline::{BurstPhase, Emission, PipelineConfig, PipelineContext, PipelineStats};
pub use queue::WorkQueue;
pub use scheduler::{OutputSink, Scheduler, SchedulerConfig};
pub use vocoder::{NullVocoder, ThumbDv, VocoderLink};

// Radio interface rates
pub const RADIO_SAMPLE_RATE: usize = 24000;
pub const VOCODER_SAMPLE_RATE: usize = 8000;
pub const DECIMATION_FACTOR: usize = RADIO_SAMPLE_RATE / VOCODER_SAMPLE_RATE; // 3

// Buffer sizing
pub const PACKET_SAMPLES: usize = 128; // complex samples per radio descriptor
pub const DV_PACKET_SAMPLES: usize = 160; // 20 ms of vocoder audio at 8 kHz
pub const STARTUP_WATERMARK_FACTOR: usize = 3;
pub const STAGE_RING_ELEMENTS: usize = PACKET_SAMPLES * 6;
pub const OUTPUT_RING_ELEMENTS: usize = PACKET_SAMPLES * 12;

// Rate converter
pub const FILTER_TAPS: usize = 48;
pub const MEM_24: usize = FILTER_TAPS; // history kept in front of the 24 kHz block
pub const MEM_8: usize = FILTER_TAPS / DECIMATION_FACTOR; // history kept in front of the 8 kHz block

/// Float <-> 16-bit PCM scale used at the vocoder boundary
pub const SCALE_AMBE: f32 = 32767.0;

// GMSK physical layer
pub const GMSK_BIT_RATE: usize = 4800;
pub const GMSK_SAMPLES_PER_BIT: usize = RADIO_SAMPLE_RATE / GMSK_BIT_RATE; // 5
pub const GMSK_BT: f64 = 0.5;

// Radio header framing
pub const PREAMBLE_BITS: usize = 64;
pub const FRAME_SYNC_BITS: usize = 15;
pub const SYNC_PATTERN_BITS: usize = PREAMBLE_BITS + FRAME_SYNC_BITS; // 79
pub const HEADER_ENCODED_BITS: usize = 660;
pub const HEADER_DECODED_BITS: usize = HEADER_ENCODED_BITS / 2; // 330
pub const HEADER_BYTES: usize = 41;
pub const HEADER_CALL_BYTES: usize = 8;
pub const HEADER_SUFFIX_BYTES: usize = 4;
