//! Serial transport to an AMBE-3000 vocoder (ThumbDV)
//!
//! Packets on the wire:
//!
//! ```text
//! [0x61][LEN_HI][LEN_LO][TYPE][payload...]
//! ```
//!
//! LEN counts the payload bytes after TYPE. Speech is sent as a SPEECHD
//! field on channel 0 with big-endian 16-bit samples.

use crate::descriptor::Direction;
use crate::error::{DStarError, Result};
use crate::header::hex_dump;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const PACKET_START: u8 = 0x61;
/// Start byte plus the two length bytes plus TYPE
pub const PACKET_HEADER_LEN: usize = 4;

pub const TYPE_CONTROL: u8 = 0x00;
pub const TYPE_CHANNEL: u8 = 0x01;
pub const TYPE_SPEECH: u8 = 0x02;

const CONTROL_RESET: u8 = 0x33;
const CHANNEL_0: u8 = 0x40;
const SPEECHD_FIELD: u8 = 0x00;

/// Most samples one SPEECHD field can carry (count is a single byte)
pub const MAX_SPEECH_SAMPLES: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn reset() -> Self {
        Self {
            packet_type: TYPE_CONTROL,
            payload: vec![CONTROL_RESET],
        }
    }

    /// Channel-0 speech packet for up to 255 samples
    pub fn speech(pcm: &[i16]) -> Result<Self> {
        if pcm.len() > MAX_SPEECH_SAMPLES {
            return Err(DStarError::Transport(format!(
                "{} samples do not fit one SPEECHD field",
                pcm.len()
            )));
        }

        let mut payload = Vec::with_capacity(3 + pcm.len() * 2);
        payload.extend_from_slice(&[CHANNEL_0, SPEECHD_FIELD, pcm.len() as u8]);
        for sample in pcm {
            payload.extend_from_slice(&sample.to_be_bytes());
        }

        Ok(Self {
            packet_type: TYPE_SPEECH,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut bytes = Vec::with_capacity(PACKET_HEADER_LEN + self.payload.len());
        bytes.push(PACKET_START);
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.push(self.packet_type);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// Outbound side of a vocoder connection
pub trait VocoderLink: Send {
    /// Put the vocoder in a known state; issued once at startup
    fn reset(&mut self) -> Result<()>;

    /// Hand one block of 8 kHz PCM to the vocoder. Returns samples accepted.
    fn encode(&mut self, direction: Direction, pcm: &[i16]) -> Result<usize>;
}

/// ThumbDV speaking over any byte sink, normally the serial device
pub struct ThumbDv<W: Write + Send> {
    writer: W,
    packets_sent: u64,
}

impl<W: Write + Send> ThumbDv<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            packets_sent: 0,
        }
    }

    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes();
        log::trace!("vocoder tx: {}", hex_dump(&bytes));
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        self.packets_sent += 1;
        Ok(())
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> VocoderLink for ThumbDv<W> {
    fn reset(&mut self) -> Result<()> {
        log::info!("resetting vocoder");
        self.send(&Packet::reset())
    }

    fn encode(&mut self, direction: Direction, pcm: &[i16]) -> Result<usize> {
        log::debug!("vocoder encode {:?}: {} samples", direction, pcm.len());
        let packet = Packet::speech(pcm)?;
        self.send(&packet)?;
        Ok(pcm.len())
    }
}

/// Link that accepts everything and sends nothing, for offline runs
#[derive(Debug, Default)]
pub struct NullVocoder {
    pub encoded_blocks: u64,
}

impl VocoderLink for NullVocoder {
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn encode(&mut self, _direction: Direction, pcm: &[i16]) -> Result<usize> {
        self.encoded_blocks += 1;
        Ok(pcm.len())
    }
}

/// Settings for the response reader thread
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Sleep between polls when the device has nothing to say
    pub poll_interval: Duration,
    /// Consecutive empty reads tolerated in the middle of a packet
    pub max_stalls: usize,
    pub thread_name: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            max_stalls: 200,
            thread_name: "vocoder-rx".to_string(),
        }
    }
}

/// Reassembles packets from a byte stream that may deliver them in pieces
pub struct PacketReader<R: Read> {
    reader: R,
    max_stalls: usize,
    poll_interval: Duration,
    abort: Option<Arc<AtomicBool>>,
}

enum ReadOutcome {
    Data(usize),
    Idle,
}

impl<R: Read> PacketReader<R> {
    pub fn new(reader: R, config: &ListenerConfig) -> Self {
        Self {
            reader,
            max_stalls: config.max_stalls,
            poll_interval: config.poll_interval,
            abort: None,
        }
    }

    /// Give up on a partial packet as soon as `abort` is raised
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = Some(abort);
        self
    }

    fn aborted(&self) -> bool {
        self.abort
            .as_ref()
            .map_or(false, |abort| abort.load(Ordering::Acquire))
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            match self.reader.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Idle),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(ReadOutcome::Idle)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fill `buf` completely. Returns `false` if the abort flag cut the
    /// read short.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        let mut stalls = 0;
        while filled < buf.len() {
            match self.read_some(&mut buf[filled..])? {
                ReadOutcome::Data(n) => {
                    filled += n;
                    stalls = 0;
                }
                ReadOutcome::Idle => {
                    if self.aborted() {
                        log::debug!(
                            "abandoning partial packet after {} of {} bytes",
                            filled,
                            buf.len()
                        );
                        return Ok(false);
                    }
                    stalls += 1;
                    if stalls > self.max_stalls {
                        return Err(DStarError::Transport(format!(
                            "packet truncated after {} of {} bytes",
                            filled,
                            buf.len()
                        )));
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }
        Ok(true)
    }

    /// Next complete packet, or `None` if the device had nothing to send
    /// before the read timed out (or the abort flag ended a partial packet).
    /// Bytes that cannot start a packet are skipped with a warning.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut start = [0u8; 1];
        loop {
            match self.read_some(&mut start)? {
                ReadOutcome::Idle => return Ok(None),
                ReadOutcome::Data(_) if start[0] == PACKET_START => break,
                ReadOutcome::Data(_) => {
                    log::warn!("unknown byte from vocoder: 0x{:02X}", start[0]);
                }
            }
        }

        let mut header = [0u8; PACKET_HEADER_LEN - 1];
        if !self.read_full(&mut header)? {
            return Ok(None);
        }
        let len = u16::from_be_bytes([header[0], header[1]]) as usize;

        let mut payload = vec![0u8; len];
        if !self.read_full(&mut payload)? {
            return Ok(None);
        }

        Ok(Some(Packet {
            packet_type: header[2],
            payload,
        }))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Thread draining vocoder responses until the abort flag is raised
pub struct ResponseListener {
    handle: JoinHandle<u64>,
}

impl ResponseListener {
    pub fn spawn<R>(reader: R, abort: Arc<AtomicBool>, config: ListenerConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let poll_interval = config.poll_interval;
                let mut reader = PacketReader::new(reader, &config).with_abort(abort.clone());
                let mut received = 0u64;

                while !abort.load(Ordering::Acquire) {
                    match reader.read_packet() {
                        Ok(Some(packet)) => {
                            received += 1;
                            log::debug!(
                                "vocoder response type 0x{:02X}, {} bytes: {}",
                                packet.packet_type,
                                packet.payload.len(),
                                hex_dump(&packet.to_bytes())
                            );
                        }
                        Ok(None) => thread::sleep(poll_interval),
                        Err(e) => {
                            log::warn!("vocoder read failed: {}", e);
                            thread::sleep(poll_interval);
                        }
                    }
                }

                log::info!("vocoder listener exiting after {} responses", received);
                received
            })?;

        Ok(Self { handle })
    }

    /// Wait for the thread to exit; returns how many responses it read
    pub fn join(self) -> Result<u64> {
        self.handle
            .join()
            .map_err(|_| DStarError::Worker("vocoder listener panicked".to_string()))
    }
}

/// Open the vocoder's serial device: 230400 baud, 8N1, raw, with reads that
/// time out after half a second so listeners can notice an abort.
#[cfg(target_os = "linux")]
pub fn open_serial(path: &str) -> Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_SYNC)
        .open(path)?;
    let fd = file.as_raw_fd();

    // SAFETY: fd is a valid open descriptor owned by `file`, and `tty` is
    // fully initialized by tcgetattr before it is read.
    unsafe {
        let mut tty: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tty) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        libc::cfsetospeed(&mut tty, libc::B230400);
        libc::cfsetispeed(&mut tty, libc::B230400);

        tty.c_cflag = (tty.c_cflag & !libc::CSIZE) | libc::CS8;
        tty.c_cflag |= libc::CLOCAL | libc::CREAD;
        tty.c_cflag &= !(libc::PARENB | libc::PARODD | libc::CSTOPB | libc::CRTSCTS);
        tty.c_iflag &= !(libc::IGNBRK | libc::IXON | libc::IXOFF | libc::IXANY);
        tty.c_lflag = 0;
        tty.c_oflag = 0;
        tty.c_cc[libc::VMIN] = 0;
        tty.c_cc[libc::VTIME] = 5;

        if libc::tcsetattr(fd, libc::TCSANOW, &tty) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }

    log::info!("opened vocoder serial device {}", path);
    Ok(file)
}

/// Open the vocoder device without line configuration
#[cfg(not(target_os = "linux"))]
pub fn open_serial(path: &str) -> Result<std::fs::File> {
    let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    log::info!("opened vocoder device {}", path);
    Ok(file)
}
