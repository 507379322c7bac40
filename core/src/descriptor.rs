//! Sample buffer descriptors and the pool they are recycled through
//!
//! A descriptor is moved by value through its whole life:
//! pool -> queue -> worker -> pool. Whoever holds it owns it, so it can only
//! be released once.

use crate::error::{DStarError, Result};
use num_complex::Complex32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Bytes per complex sample: two 32-bit floats
pub const COMPLEX_F32_SAMPLE_SIZE: usize = 8;

/// Signal direction, carried in the low bit of the stream id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Receive,
    Transmit,
}

impl Direction {
    /// Even stream ids are receive streams, odd ones transmit
    pub fn from_stream_id(stream_id: u32) -> Self {
        if stream_id & 1 == 0 {
            Direction::Receive
        } else {
            Direction::Transmit
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Receive => Direction::Transmit,
            Direction::Transmit => Direction::Receive,
        }
    }
}

/// Byte order of the sample words held by a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Words are still laid out as they arrived off the wire (big-endian)
    Network,
    Native,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub stream_id: u32,
    /// Bytes per complex sample
    pub sample_size: usize,
    pub byte_order: ByteOrder,
    pub samples: Vec<Complex32>,
    /// Set while the descriptor is on loan from a [`DescriptorPool`]
    pooled: bool,
}

impl BufferDescriptor {
    /// Descriptor over samples that are already in host byte order
    pub fn new(stream_id: u32, samples: Vec<Complex32>) -> Self {
        Self {
            stream_id,
            sample_size: COMPLEX_F32_SAMPLE_SIZE,
            byte_order: ByteOrder::Native,
            samples,
            pooled: false,
        }
    }

    /// Wrap a raw network payload of interleaved big-endian I/Q floats.
    ///
    /// The words are stored untouched; call
    /// [`normalize_byte_order`](Self::normalize_byte_order) before reading them.
    pub fn from_network_bytes(stream_id: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() % COMPLEX_F32_SAMPLE_SIZE != 0 {
            return Err(DStarError::MalformedDescriptor(format!(
                "payload of {} bytes is not a whole number of complex samples",
                payload.len()
            )));
        }

        let samples = payload
            .chunks_exact(COMPLEX_F32_SAMPLE_SIZE)
            .map(|chunk| {
                let re = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let im = f32::from_ne_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                Complex32::new(re, im)
            })
            .collect();

        Ok(Self {
            stream_id,
            sample_size: COMPLEX_F32_SAMPLE_SIZE,
            byte_order: ByteOrder::Network,
            samples,
            pooled: false,
        })
    }

    pub fn direction(&self) -> Direction {
        Direction::from_stream_id(self.stream_id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert network-order sample words to host order in place
    pub fn normalize_byte_order(&mut self) -> Result<()> {
        if self.sample_size != COMPLEX_F32_SAMPLE_SIZE {
            return Err(DStarError::UnsupportedSampleSize(self.sample_size));
        }

        if self.byte_order == ByteOrder::Network {
            for sample in self.samples.iter_mut() {
                sample.re = f32::from_bits(u32::from_be(sample.re.to_bits()));
                sample.im = f32::from_bits(u32::from_be(sample.im.to_bits()));
            }
            self.byte_order = ByteOrder::Native;
        }

        Ok(())
    }

    /// Zero every sample
    pub fn fill_silence(&mut self) {
        self.samples.fill(Complex32::new(0.0, 0.0));
    }
}

struct PoolInner {
    free: Mutex<Vec<BufferDescriptor>>,
    samples_per_buffer: usize,
    max_free: usize,
    outstanding: AtomicUsize,
}

/// Allocator descriptors are acquired from and released back to.
///
/// Cloning the pool hands out another handle to the same free list.
#[derive(Clone)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

impl DescriptorPool {
    /// Pool of descriptors holding `samples_per_buffer` samples each, keeping
    /// at most `max_free` released descriptors around for reuse.
    pub fn new(samples_per_buffer: usize, max_free: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_free)),
                samples_per_buffer,
                max_free,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.inner.samples_per_buffer
    }

    /// Take a zeroed, native-order descriptor for `stream_id`
    pub fn acquire(&self, stream_id: u32) -> BufferDescriptor {
        let recycled = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let mut descriptor = match recycled {
            Some(mut descriptor) => {
                descriptor.stream_id = stream_id;
                descriptor.sample_size = COMPLEX_F32_SAMPLE_SIZE;
                descriptor.byte_order = ByteOrder::Native;
                descriptor.fill_silence();
                descriptor
            }
            None => BufferDescriptor::new(
                stream_id,
                vec![Complex32::new(0.0, 0.0); self.inner.samples_per_buffer],
            ),
        };

        descriptor.pooled = true;
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        descriptor
    }

    /// Hand a descriptor back. Consumes it, so a descriptor cannot be released twice.
    ///
    /// Descriptors that were not acquired from a pool are dropped without
    /// touching the outstanding count.
    pub fn release(&self, mut descriptor: BufferDescriptor) {
        if !descriptor.pooled {
            log::debug!(
                "dropping descriptor for stream 0x{:08X} not acquired from the pool",
                descriptor.stream_id
            );
            return;
        }
        descriptor.pooled = false;

        if self
            .inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            log::warn!("descriptor released with none outstanding");
        }

        if descriptor.samples.len() != self.inner.samples_per_buffer {
            return;
        }

        let mut free = self.inner.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.inner.max_free {
            free.push(descriptor);
        }
    }

    /// Descriptors acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Released descriptors waiting for reuse
    pub fn available(&self) -> usize {
        self.inner.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
