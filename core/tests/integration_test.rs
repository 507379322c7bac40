// ============================================================================
// INTEGRATION TESTS
// ============================================================================
// Radio headers are encoded with HeaderEncoder, optionally GMSK-modulated, and
// pushed either straight into the HeaderDecoder as bits or through the full
// descriptor pipeline as 24 kHz samples.
//
// The sample-level tests demodulate several thousand samples per header; run
// in release mode for faster execution:
//   cargo test -p dstarwave-core --test integration_test --release
// ============================================================================

use dstarwave_core::sync::sync_pattern;
use dstarwave_core::{
    BufferDescriptor, DStarHeader, DecodedHeader, DescriptorPool, Direction, HeaderDecoder,
    HeaderEncoder, NullVocoder, OutputSink, PipelineConfig, PipelineContext, Scheduler,
    SchedulerConfig, HEADER_ENCODED_BITS, PACKET_SAMPLES,
};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Air bits (after FEC, interleaving and scrambling) of the header built by
/// `test_header()`, packed LSB first. The last byte carries 4 bits.
const TEST_HEADER_AIR: [u8; 83] = [
    0xC8, 0x4D, 0xD8, 0xD8, 0x6C, 0xFD, 0x09, 0x7A, 0xFE, 0x87, 0x56, 0x28,
    0xBF, 0xCF, 0x84, 0xDF, 0xAC, 0x00, 0x0D, 0x34, 0x40, 0x5A, 0x27, 0x4E,
    0xFD, 0x9F, 0x52, 0x62, 0xA3, 0x61, 0x12, 0xD6, 0xF8, 0x23, 0xC4, 0x36,
    0xED, 0x6D, 0xCE, 0x68, 0x5A, 0x62, 0x9B, 0x4E, 0x89, 0x3A, 0xC5, 0x92,
    0x42, 0x62, 0x72, 0x2C, 0x25, 0x27, 0x6D, 0xD0, 0x18, 0xB0, 0xA3, 0x8F,
    0x69, 0x6D, 0x82, 0x29, 0x2F, 0xD3, 0x45, 0x0A, 0xB4, 0xD1, 0x20, 0x14,
    0xF4, 0x08, 0x06, 0x71, 0x51, 0x1F, 0x2D, 0x3C, 0xEC, 0x88, 0x03,
];

/// CRC-16/X.25 of the first 39 bytes of `test_header()`
const TEST_HEADER_CRC: u16 = 0x8BE2;

const RX_STREAM: u32 = 0x8400_0000;
const TX_STREAM: u32 = 0x8400_0001;

fn test_header() -> DStarHeader {
    DStarHeader::new("N0CALL", "CQCQCQ", "W1AW  B", "W1AW  G").with_suffix("TEST")
}

/// Header waveform with leading silence and enough trailing silence for the
/// last stage-1 block to be consumed
fn header_samples(header: &DStarHeader) -> Vec<f32> {
    let mut samples = vec![0.0f32; 37];
    samples.extend(HeaderEncoder::new().encode_waveform(header).unwrap());
    samples.extend(vec![0.0f32; 1200]);
    samples
}

fn to_descriptors(stream_id: u32, samples: &[f32]) -> Vec<BufferDescriptor> {
    samples
        .chunks(PACKET_SAMPLES)
        .map(|chunk| {
            let mut iq: Vec<Complex32> = chunk.iter().map(|&s| Complex32::new(s, 0.0)).collect();
            iq.resize(PACKET_SAMPLES, Complex32::new(0.0, 0.0));
            BufferDescriptor::new(stream_id, iq)
        })
        .collect()
}

fn assert_is_test_header(decoded: &DecodedHeader) {
    assert!(decoded.checksum_ok, "checksum failed: {}", decoded.header);
    assert_eq!(decoded.header.my_call(), "N0CALL");
    assert_eq!(decoded.header.my_suffix(), "TEST");
    assert_eq!(decoded.header.your_call(), "CQCQCQ");
    assert_eq!(decoded.header.rpt1(), "W1AW  B");
    assert_eq!(decoded.header.rpt2(), "W1AW  G");
}

#[test]
fn test_bitstream_round_trip() {
    let header = test_header();
    let mut rng = StdRng::seed_from_u64(99);

    let mut stream: Vec<bool> = (0..150).map(|_| rng.gen()).collect();
    stream.extend(HeaderEncoder::new().encode(&header).unwrap());
    stream.extend((0..150).map(|_| rng.gen::<bool>()));

    let mut decoder = HeaderDecoder::new();
    let decoded = decoder.push_bits(&stream);

    assert_eq!(decoded.len(), 1);
    assert_is_test_header(&decoded[0]);
    assert_eq!(decoded[0].header, header);
}

fn fixture_air_bits() -> Vec<bool> {
    (0..HEADER_ENCODED_BITS)
        .map(|i| (TEST_HEADER_AIR[i / 8] >> (i % 8)) & 1 == 1)
        .collect()
}

#[test]
fn test_decodes_recorded_air_bits() {
    let mut stream = sync_pattern();
    stream.extend(fixture_air_bits());

    let decoded = HeaderDecoder::new().push_bits(&stream);
    assert_eq!(decoded.len(), 1);
    assert_is_test_header(&decoded[0]);
    assert_eq!(decoded[0].path_metric, 0);
    assert_eq!(decoded[0].header.flags, [0, 0, 0]);
    assert_eq!(decoded[0].header.checksum, TEST_HEADER_CRC);
}

#[test]
fn test_encoder_matches_recorded_air_bits() {
    let air = HeaderEncoder::new().encode_air_bits(&test_header()).unwrap();
    assert_eq!(air, fixture_air_bits());
    assert_eq!(test_header().compute_checksum(), TEST_HEADER_CRC);
}

#[test]
fn test_bitstream_with_channel_errors() {
    let header = test_header();
    let mut stream = HeaderEncoder::new().encode(&header).unwrap();

    // Scattered errors in the 660 air bits after the sync pattern
    let sync_len = sync_pattern().len();
    for offset in [3, 150, 333, 500, 640] {
        stream[sync_len + offset] = !stream[sync_len + offset];
    }

    let decoded = HeaderDecoder::new().push_bits(&stream);
    assert_eq!(decoded.len(), 1);
    assert_is_test_header(&decoded[0]);
    assert_eq!(decoded[0].path_metric, 5);
}

#[test]
fn test_two_headers_back_to_back() {
    let encoder = HeaderEncoder::new();
    let first = test_header();
    let second = DStarHeader::new("G4KLX", "CQCQCQ", "GB3IN  C", "GB3IN  G").with_suffix("ID51");

    let mut stream = encoder.encode(&first).unwrap();
    stream.extend([true, false].repeat(8));
    stream.extend(encoder.encode(&second).unwrap());

    let decoded = HeaderDecoder::new().push_bits(&stream);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].header, first);
    assert_eq!(decoded[1].header.my_call(), "G4KLX");
    assert_eq!(decoded[1].header.my_suffix(), "ID51");
}

#[test]
fn test_corrupted_sync_is_ignored() {
    let mut stream = HeaderEncoder::new().encode(&test_header()).unwrap();
    // Break the frame sync word
    stream[70] = !stream[70];
    assert!(HeaderDecoder::new().push_bits(&stream).is_empty());
}

#[test]
fn test_pipeline_decodes_gmsk_header() {
    let mut ctx = PipelineContext::new(PipelineConfig::default()).unwrap();
    let mut vocoder = NullVocoder::default();

    let mut headers = Vec::new();
    for mut descriptor in to_descriptors(RX_STREAM, &header_samples(&test_header())) {
        ctx.process(&mut descriptor, &mut vocoder).unwrap();
        headers.extend(ctx.take_headers());
    }

    assert_eq!(headers.len(), 1);
    assert_is_test_header(&headers[0]);
    assert_eq!(headers[0].path_metric, 0);
    assert_eq!(ctx.stats().headers_decoded, 1);
}

#[test]
fn test_pipeline_decodes_noisy_gmsk_header() {
    let mut rng = StdRng::seed_from_u64(2024);
    let noise = Normal::new(0.0f32, 0.1).unwrap();
    let samples: Vec<f32> = header_samples(&test_header())
        .into_iter()
        .map(|s| s + noise.sample(&mut rng))
        .collect();

    let mut ctx = PipelineContext::new(PipelineConfig::default()).unwrap();
    let mut vocoder = NullVocoder::default();
    for mut descriptor in to_descriptors(RX_STREAM, &samples) {
        ctx.process(&mut descriptor, &mut vocoder).unwrap();
    }

    let headers = ctx.take_headers();
    assert_eq!(headers.len(), 1);
    assert_is_test_header(&headers[0]);
}

#[test]
fn test_transmit_stream_is_not_demodulated() {
    let mut ctx = PipelineContext::new(PipelineConfig::default()).unwrap();
    let mut vocoder = NullVocoder::default();
    for mut descriptor in to_descriptors(TX_STREAM, &header_samples(&test_header())) {
        ctx.process(&mut descriptor, &mut vocoder).unwrap();
    }
    assert!(ctx.take_headers().is_empty());
    assert!(vocoder.encoded_blocks > 0);
}

#[test]
fn test_transmit_burst_interrupts_receive() {
    // A transmit buffer in the middle of a header flushes the receive rings,
    // so the header split across the two receive bursts cannot check out
    let descriptors = to_descriptors(RX_STREAM, &header_samples(&test_header()));
    let mut ctx = PipelineContext::new(PipelineConfig::default()).unwrap();
    let mut vocoder = NullVocoder::default();

    let split = descriptors.len() / 2;
    for (i, mut descriptor) in descriptors.into_iter().enumerate() {
        if i == split {
            let mut tx = BufferDescriptor::new(TX_STREAM, vec![Complex32::new(0.0, 0.0); PACKET_SAMPLES]);
            ctx.process(&mut tx, &mut vocoder).unwrap();
        }
        ctx.process(&mut descriptor, &mut vocoder).unwrap();
    }
    assert!(!ctx.take_headers().iter().any(|h| h.checksum_ok));
}

#[derive(Clone, Default)]
struct RecordingSink {
    emitted: Arc<Mutex<usize>>,
    headers: Arc<Mutex<Vec<DecodedHeader>>>,
}

impl OutputSink for RecordingSink {
    fn emit(&mut self, descriptor: &BufferDescriptor) {
        assert_eq!(descriptor.direction(), Direction::Receive);
        *self.emitted.lock().unwrap() += 1;
    }

    fn header_decoded(&mut self, header: &DecodedHeader) {
        self.headers.lock().unwrap().push(header.clone());
    }
}

#[test]
fn test_scheduler_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();

    let sink = RecordingSink::default();
    let pool = DescriptorPool::new(PACKET_SAMPLES, 16);
    let scheduler = Scheduler::start(
        SchedulerConfig {
            thread_name: "e2e-pipeline".to_string(),
            realtime_priority: None,
        },
        PipelineConfig::default(),
        Box::new(sink.clone()),
        Box::new(NullVocoder::default()),
        pool.clone(),
    )
    .unwrap();

    let samples = header_samples(&test_header());
    let mut sent = 0;
    for chunk in samples.chunks(PACKET_SAMPLES) {
        let mut descriptor = pool.acquire(RX_STREAM);
        for (slot, &s) in descriptor.samples.iter_mut().zip(chunk) {
            *slot = Complex32::new(s, 0.0);
        }
        scheduler.schedule(descriptor);
        sent += 1;
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while *sink.emitted.lock().unwrap() < sent && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let stats = scheduler.shutdown().unwrap();
    assert_eq!(stats.emitted + stats.silence, sent as u64);
    assert_eq!(stats.headers_decoded, 1);
    assert_eq!(pool.outstanding(), 0);

    let headers = sink.headers.lock().unwrap();
    assert_eq!(headers.len(), 1);
    assert_is_test_header(&headers[0]);
}

#[test]
fn test_encoded_header_length() {
    let bits = HeaderEncoder::new().encode(&test_header()).unwrap();
    assert_eq!(bits.len(), sync_pattern().len() + HEADER_ENCODED_BITS);
}
