use clap::{Parser, Subcommand};
use dstarwave_core::resample::{downmix, resample_audio};
use dstarwave_core::vocoder::{open_serial, ListenerConfig, ResponseListener};
use dstarwave_core::{
    BufferDescriptor, DStarHeader, DecodedHeader, Emission, HeaderEncoder, NullVocoder,
    PipelineConfig, PipelineContext, ThumbDv, VocoderLink, PACKET_SAMPLES, RADIO_SAMPLE_RATE,
};
use hound::WavSpec;
use num_complex::Complex32;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Receive stream id used for offline decoding (even = receive)
const OFFLINE_RX_STREAM: u32 = 0x8400_0000;

/// Silence appended so the last header bits clear the pipeline stages
const FLUSH_SAMPLES: usize = 1200;

#[derive(Parser)]
#[command(name = "dstarwave")]
#[command(about = "D-STAR waveform pipeline: header decoding, synthesis and vocoder control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recording of FM discriminator audio through the receive pipeline
    Decode {
        /// Input WAV file (any rate; resampled to 24 kHz)
        #[arg(value_name = "IN.WAV")]
        input: PathBuf,

        /// Write the pipeline's 24 kHz output audio here
        #[arg(short, long, value_name = "OUT.WAV")]
        output: Option<PathBuf>,

        /// Print the decode report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Synthesize a GMSK radio header as 24 kHz audio
    Synth {
        /// Output WAV file
        #[arg(value_name = "OUT.WAV")]
        output: PathBuf,

        /// Own callsign
        #[arg(long)]
        my: String,

        /// Own callsign suffix
        #[arg(long, default_value = "")]
        suffix: String,

        /// Companion callsign
        #[arg(long, default_value = "CQCQCQ")]
        your: String,

        /// Departure repeater
        #[arg(long, default_value = "DIRECT")]
        rpt1: String,

        /// Destination repeater
        #[arg(long, default_value = "DIRECT")]
        rpt2: String,

        /// Peak amplitude of the written waveform (0.0 - 1.0)
        #[arg(short, long, default_value = "0.5")]
        amplitude: f32,
    },

    /// Reset a ThumbDV vocoder and print its responses
    VocoderReset {
        /// Serial device, e.g. /dev/ttyUSB0
        #[arg(value_name = "DEVICE")]
        device: String,

        /// How long to listen for responses
        #[arg(long, default_value = "500")]
        wait_ms: u64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("Unsupported WAV format: {0} bits per sample")]
    UnsupportedFormat(u16),

    #[error("Amplitude must be within (0.0, 1.0], got {0}")]
    InvalidAmplitude(f32),
}

#[derive(Serialize)]
struct HeaderReport {
    my: String,
    suffix: String,
    your: String,
    rpt1: String,
    rpt2: String,
    flags: [u8; 3],
    checksum_ok: bool,
    path_metric: u32,
}

impl From<&DecodedHeader> for HeaderReport {
    fn from(decoded: &DecodedHeader) -> Self {
        let header = &decoded.header;
        Self {
            my: header.my_call().to_string(),
            suffix: header.my_suffix().to_string(),
            your: header.your_call().to_string(),
            rpt1: header.rpt1().to_string(),
            rpt2: header.rpt2().to_string(),
            flags: header.flags,
            checksum_ok: decoded.checksum_ok,
            path_metric: decoded.path_metric,
        }
    }
}

#[derive(Serialize)]
struct DecodeReport {
    input: String,
    source_sample_rate: u32,
    buffers: usize,
    audio_buffers: u64,
    silent_buffers: u64,
    headers: Vec<HeaderReport>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { input, output, json } => {
            decode_command(&input, output.as_deref(), json)?
        }
        Commands::Synth {
            output,
            my,
            suffix,
            your,
            rpt1,
            rpt2,
            amplitude,
        } => {
            let header = DStarHeader::new(&my, &your, &rpt1, &rpt2).with_suffix(&suffix);
            synth_command(&output, &header, amplitude)?
        }
        Commands::VocoderReset { device, wait_ms } => {
            vocoder_reset_command(&device, Duration::from_millis(wait_ms))?
        }
    }

    Ok(())
}

/// Read a WAV file as mono f32, returning the samples and their rate
fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    tracing::info!(
        "read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (_, bits) => return Err(CliError::UnsupportedFormat(bits).into()),
    };

    Ok((downmix(&samples, spec.channels as usize), spec.sample_rate))
}

fn write_wav(path: &Path, samples: &[f32]) -> Result<(), Box<dyn std::error::Error>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: RADIO_SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let file = File::create(path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn decode_command(
    input_path: &Path,
    output_path: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (samples, source_rate) = read_wav(input_path)?;
    let mut samples = resample_audio(&samples, source_rate as usize, RADIO_SAMPLE_RATE);
    samples.extend(std::iter::repeat(0.0).take(FLUSH_SAMPLES));

    let mut context = PipelineContext::new(PipelineConfig::default())?;
    let mut vocoder = NullVocoder::default();
    let mut output = Vec::with_capacity(samples.len());
    let mut headers = Vec::new();
    let mut buffers = 0;

    for chunk in samples.chunks(PACKET_SAMPLES) {
        let mut iq: Vec<Complex32> = chunk.iter().map(|&s| Complex32::new(s, 0.0)).collect();
        iq.resize(PACKET_SAMPLES, Complex32::new(0.0, 0.0));
        let mut descriptor = BufferDescriptor::new(OFFLINE_RX_STREAM, iq);

        if context.process(&mut descriptor, &mut vocoder)? == Emission::Samples {
            tracing::trace!("buffer {} carried audio", buffers);
        }
        output.extend(descriptor.samples.iter().map(|s| s.re));
        headers.extend(context.take_headers());
        buffers += 1;
    }

    let stats = context.stats().clone();
    let report = DecodeReport {
        input: input_path.display().to_string(),
        source_sample_rate: source_rate,
        buffers,
        audio_buffers: stats.emitted,
        silent_buffers: stats.silence,
        headers: headers.iter().map(HeaderReport::from).collect(),
    };

    if let Some(path) = output_path {
        write_wav(path, &output)?;
        tracing::info!("wrote {} samples to {}", output.len(), path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Processed {} buffers ({} audio, {} silent)",
            report.buffers, report.audio_buffers, report.silent_buffers
        );
        if headers.is_empty() {
            println!("No radio header found");
        }
        for decoded in &headers {
            println!(
                "Header: {} [checksum {}, corrected {} bits]",
                decoded.header,
                if decoded.checksum_ok { "ok" } else { "BAD" },
                decoded.path_metric
            );
        }
    }

    Ok(())
}

fn synth_command(
    output_path: &Path,
    header: &DStarHeader,
    amplitude: f32,
) -> Result<(), Box<dyn std::error::Error>> {
    if !(amplitude > 0.0 && amplitude <= 1.0) {
        return Err(CliError::InvalidAmplitude(amplitude).into());
    }

    let lead = RADIO_SAMPLE_RATE / 10;
    let mut samples = vec![0.0f32; lead];
    samples.extend(
        HeaderEncoder::new()
            .encode_waveform(header)?
            .into_iter()
            .map(|s| s * amplitude),
    );
    samples.extend(vec![0.0f32; lead]);

    write_wav(output_path, &samples)?;
    println!(
        "Synthesized header {} ({} samples) to {}",
        header,
        samples.len(),
        output_path.display()
    );
    Ok(())
}

fn vocoder_reset_command(device: &str, wait: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let port = open_serial(device)?;
    let reader = port.try_clone()?;

    let abort = Arc::new(AtomicBool::new(false));
    let listener = ResponseListener::spawn(reader, abort.clone(), ListenerConfig::default())?;

    let mut vocoder = ThumbDv::new(port);
    vocoder.reset()?;

    std::thread::sleep(wait);
    abort.store(true, Ordering::Release);
    let responses = listener.join()?;

    println!("Vocoder on {} sent {} response(s)", device, responses);
    Ok(())
}
