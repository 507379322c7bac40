//! Per-direction processing chain run by the pipeline worker
//!
//! Each direction owns four rings bridged by three stages:
//!
//! ```text
//! input (24k f32) -> [decimate, scale] -> vocoder in (8k i16)
//!   -> [vocoder] -> vocoder out (8k i16) -> [unscale, interpolate] -> output (24k f32)
//! ```
//!
//! On receive, every 24 kHz sample entering stage 1 is also demodulated and
//! the bits are handed to the header decoder.

use crate::circular::CircularBuffer;
use crate::decoder::{DecodedHeader, HeaderDecoder};
use crate::descriptor::{BufferDescriptor, Direction};
use crate::error::{DStarError, Result};
use crate::gmsk::GmskDemodulator;
use crate::resample::{Decimator, Interpolator};
use crate::vocoder::{VocoderLink, MAX_SPEECH_SAMPLES};
use crate::{
    DECIMATION_FACTOR, DV_PACKET_SAMPLES, OUTPUT_RING_ELEMENTS, PACKET_SAMPLES, SCALE_AMBE,
    STAGE_RING_ELEMENTS, STARTUP_WATERMARK_FACTOR,
};
use num_complex::Complex32;

/// Pipeline sizing
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Complex samples per radio descriptor
    pub packet_samples: usize,
    /// Vocoder block at 8 kHz
    pub dv_packet_samples: usize,
    /// Output watermark multiplier while a burst is starting
    pub startup_watermark_factor: usize,
    pub stage_ring_elements: usize,
    pub output_ring_elements: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            packet_samples: PACKET_SAMPLES,
            dv_packet_samples: DV_PACKET_SAMPLES,
            startup_watermark_factor: STARTUP_WATERMARK_FACTOR,
            stage_ring_elements: STAGE_RING_ELEMENTS,
            output_ring_elements: OUTPUT_RING_ELEMENTS,
        }
    }
}

impl PipelineConfig {
    /// 24 kHz samples consumed by one run of stage 1
    pub fn radio_block(&self) -> usize {
        self.dv_packet_samples * DECIMATION_FACTOR
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_samples == 0 || self.dv_packet_samples == 0 {
            return Err(DStarError::InvalidConfig(
                "block sizes must be non-zero".to_string(),
            ));
        }
        if self.dv_packet_samples > MAX_SPEECH_SAMPLES {
            return Err(DStarError::InvalidConfig(format!(
                "vocoder block of {} samples exceeds {}",
                self.dv_packet_samples, MAX_SPEECH_SAMPLES
            )));
        }
        if self.startup_watermark_factor == 0 {
            return Err(DStarError::InvalidConfig(
                "startup watermark factor must be at least 1".to_string(),
            ));
        }
        if self.stage_ring_elements < self.radio_block() + self.packet_samples {
            return Err(DStarError::InvalidConfig(format!(
                "stage rings of {} samples cannot hold a {} sample block plus one packet",
                self.stage_ring_elements,
                self.radio_block()
            )));
        }
        let startup = self.packet_samples * self.startup_watermark_factor;
        if self.output_ring_elements < self.radio_block() + startup {
            return Err(DStarError::InvalidConfig(format!(
                "output ring of {} samples is below the {} needed at startup",
                self.output_ring_elements,
                self.radio_block() + startup
            )));
        }
        Ok(())
    }
}

/// Burst state of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstPhase {
    /// Output held back until the startup watermark is reached
    Starting,
    Steady,
}

/// What was written into a processed descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    Samples,
    Silence,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Descriptors emitted with audio
    pub emitted: u64,
    /// Descriptors emitted as silence (startup or underrun)
    pub silence: u64,
    /// Descriptors dropped as malformed
    pub dropped: u64,
    pub headers_decoded: u64,
    pub vocoder_errors: u64,
}

/// Rings, filters and burst state for one direction
pub struct DirectionChain {
    direction: Direction,
    input: CircularBuffer<f32>,
    vocoder_in: CircularBuffer<i16>,
    vocoder_out: CircularBuffer<i16>,
    output: CircularBuffer<f32>,
    decimator: Decimator,
    interpolator: Interpolator,
    phase: BurstPhase,
    flush_pending: bool,
    radio_block: Vec<f32>,
    voice_block: Vec<f32>,
    pcm_block: Vec<i16>,
}

impl DirectionChain {
    fn new(direction: Direction, config: &PipelineConfig) -> Self {
        Self {
            direction,
            input: CircularBuffer::new(config.stage_ring_elements),
            vocoder_in: CircularBuffer::new(config.stage_ring_elements),
            vocoder_out: CircularBuffer::new(config.stage_ring_elements),
            output: CircularBuffer::new(config.output_ring_elements),
            decimator: Decimator::new(),
            interpolator: Interpolator::new(),
            phase: BurstPhase::Starting,
            flush_pending: true,
            radio_block: vec![0.0; config.radio_block()],
            voice_block: vec![0.0; config.dv_packet_samples],
            pcm_block: vec![0; config.dv_packet_samples],
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn phase(&self) -> BurstPhase {
        self.phase
    }

    pub fn flush_pending(&self) -> bool {
        self.flush_pending
    }

    /// Samples waiting in the 24 kHz input ring
    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Samples waiting in the 24 kHz output ring
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Empty all four rings and zero filter memory
    fn flush(&mut self) {
        self.input.flush();
        self.vocoder_in.flush();
        self.vocoder_out.flush();
        self.output.flush();
        self.decimator.reset();
        self.interpolator.reset();
    }

    /// Arm a flush for the next buffer in this direction
    fn start_burst(&mut self) {
        self.phase = BurstPhase::Starting;
        self.flush_pending = true;
    }
}

/// Everything the worker needs to turn descriptors in into descriptors out
pub struct PipelineContext {
    config: PipelineConfig,
    rx: DirectionChain,
    tx: DirectionChain,
    demodulator: GmskDemodulator,
    header_decoder: HeaderDecoder,
    headers: Vec<DecodedHeader>,
    stats: PipelineStats,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rx: DirectionChain::new(Direction::Receive, &config),
            tx: DirectionChain::new(Direction::Transmit, &config),
            demodulator: GmskDemodulator::new(),
            header_decoder: HeaderDecoder::new(),
            headers: Vec::new(),
            stats: PipelineStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn chain(&self, direction: Direction) -> &DirectionChain {
        match direction {
            Direction::Receive => &self.rx,
            Direction::Transmit => &self.tx,
        }
    }

    pub fn header_decoder(&self) -> &HeaderDecoder {
        &self.header_decoder
    }

    /// Headers decoded since the last call
    pub fn take_headers(&mut self) -> Vec<DecodedHeader> {
        std::mem::take(&mut self.headers)
    }

    /// Run one descriptor through its direction's chain, overwriting its
    /// samples with the output (or silence).
    ///
    /// Malformed descriptors are counted as dropped and returned as errors;
    /// the caller must not emit them.
    pub fn process(
        &mut self,
        descriptor: &mut BufferDescriptor,
        vocoder: &mut dyn VocoderLink,
    ) -> Result<Emission> {
        if let Err(e) = self.check_descriptor(descriptor) {
            self.stats.dropped += 1;
            return Err(e);
        }

        let direction = descriptor.direction();
        let Self {
            config,
            rx,
            tx,
            demodulator,
            header_decoder,
            headers,
            stats,
        } = self;
        let (chain, other) = match direction {
            Direction::Receive => (rx, tx),
            Direction::Transmit => (tx, rx),
        };

        if chain.flush_pending {
            log::debug!("{:?} burst start, flushing rings", direction);
            chain.flush();
            chain.flush_pending = false;
        }
        if !other.flush_pending {
            log::trace!("{:?} marked for a new burst", other.direction);
        }
        other.start_burst();

        for sample in &descriptor.samples {
            chain.input.write(sample.re);
        }

        // Stage 1: demodulate (receive only), decimate, scale to PCM
        let radio_block = config.radio_block();
        while chain.input.len() >= radio_block {
            chain.input.read_slice(&mut chain.radio_block);

            if direction == Direction::Receive {
                for &sample in &chain.radio_block {
                    if let Some(bit) = demodulator.decode(sample).bit() {
                        if let Some(header) = header_decoder.push_bit(bit) {
                            stats.headers_decoded += 1;
                            headers.push(header);
                        }
                    }
                }
            }

            chain
                .decimator
                .process(&chain.radio_block, &mut chain.voice_block)?;
            for (pcm, &x) in chain.pcm_block.iter_mut().zip(&chain.voice_block) {
                *pcm = (x * SCALE_AMBE) as i16;
            }
            chain.vocoder_in.write_slice(&chain.pcm_block);
        }

        // Stage 2: vocoder, audio passed through unchanged
        while chain.vocoder_in.len() >= config.dv_packet_samples {
            chain.vocoder_in.read_slice(&mut chain.pcm_block);
            if direction == Direction::Transmit {
                if let Err(e) = vocoder.encode(direction, &chain.pcm_block) {
                    stats.vocoder_errors += 1;
                    log::warn!("vocoder encode failed: {}", e);
                }
            }
            chain.vocoder_out.write_slice(&chain.pcm_block);
        }

        // Stage 3: back to float, interpolate to the radio rate
        while chain.vocoder_out.len() >= config.dv_packet_samples {
            chain.vocoder_out.read_slice(&mut chain.pcm_block);
            for (x, &pcm) in chain.voice_block.iter_mut().zip(&chain.pcm_block) {
                *x = pcm as f32 / SCALE_AMBE;
            }
            chain
                .interpolator
                .process(&chain.voice_block, &mut chain.radio_block)?;
            chain.output.write_slice(&chain.radio_block);
        }

        let watermark = match chain.phase {
            BurstPhase::Starting => config.packet_samples * config.startup_watermark_factor,
            BurstPhase::Steady => config.packet_samples,
        };

        if chain.output.len() >= watermark {
            for slot in descriptor.samples.iter_mut() {
                let value = chain.output.read().unwrap_or(0.0);
                *slot = Complex32::new(value, value);
            }
            if chain.phase == BurstPhase::Starting {
                log::debug!("{:?} output reached watermark {}", direction, watermark);
            }
            chain.phase = BurstPhase::Steady;
            stats.emitted += 1;
            Ok(Emission::Samples)
        } else {
            descriptor.fill_silence();
            stats.silence += 1;
            Ok(Emission::Silence)
        }
    }

    fn check_descriptor(&self, descriptor: &mut BufferDescriptor) -> Result<()> {
        descriptor.normalize_byte_order()?;
        if descriptor.len() != self.config.packet_samples {
            return Err(DStarError::MalformedDescriptor(format!(
                "expected {} samples, got {}",
                self.config.packet_samples,
                descriptor.len()
            )));
        }
        Ok(())
    }

    /// Drop demodulator, matcher and ring state, as at startup
    pub fn reset(&mut self) {
        self.demodulator.reset();
        self.header_decoder.reset();
        self.headers.clear();
        self.rx.flush();
        self.tx.flush();
        self.rx.start_burst();
        self.tx.start_burst();
    }
}
