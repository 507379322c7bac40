//! Fixed-capacity circular sample buffer
//!
//! One of these sits at every stage boundary of the pipeline. Storage is one
//! slot larger than the usable element count so `start == end` always means
//! empty and a full ring never looks empty.
//!
//! Writing into a full ring overwrites the oldest sample. The stage
//! thresholds keep producers from ever getting that far ahead.

pub struct CircularBuffer<T> {
    elems: Box<[T]>,
    start: usize,
    end: usize,
}

impl<T: Copy + Default> CircularBuffer<T> {
    /// Create a ring able to hold `elements` samples
    pub fn new(elements: usize) -> Self {
        let size = elements + 1;
        Self {
            elems: vec![T::default(); size].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Number of samples the ring can hold before it starts overwriting
    pub fn capacity(&self) -> usize {
        self.elems.len() - 1
    }

    /// Number of samples currently stored
    pub fn len(&self) -> usize {
        let size = self.elems.len();
        (self.end + size - self.start) % size
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_full(&self) -> bool {
        (self.end + 1) % self.elems.len() == self.start
    }

    /// Append one sample, dropping the oldest if the ring is full
    pub fn write(&mut self, value: T) {
        let size = self.elems.len();
        self.elems[self.end] = value;
        self.end = (self.end + 1) % size;
        if self.end == self.start {
            log::trace!("circular buffer overrun, dropping oldest sample");
            self.start = (self.start + 1) % size;
        }
    }

    /// Remove and return the oldest sample
    pub fn read(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.elems[self.start];
        self.start = (self.start + 1) % self.elems.len();
        Some(value)
    }

    pub fn write_slice(&mut self, values: &[T]) {
        for &value in values {
            self.write(value);
        }
    }

    /// Fill `out` from the front of the ring; returns how many samples were read
    pub fn read_slice(&mut self, out: &mut [T]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            match self.read() {
                Some(value) => {
                    *slot = value;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Drop all stored samples
    pub fn flush(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ring_is_empty() {
        let ring: CircularBuffer<f32> = CircularBuffer::new(16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
    }

    #[test]
    fn test_float_round_trip_is_bit_exact() {
        let mut ring: CircularBuffer<f32> = CircularBuffer::new(4);
        for value in [0.1f32, -0.0, f32::MIN_POSITIVE, 1.0e-30, -12345.678] {
            ring.write(value);
            let out = ring.read().unwrap();
            assert_eq!(out.to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_short_round_trip() {
        let mut ring: CircularBuffer<i16> = CircularBuffer::new(4);
        for value in [i16::MIN, -1, 0, 1, i16::MAX] {
            ring.write(value);
            assert_eq!(ring.read(), Some(value));
        }
    }

    #[test]
    fn test_fifo_order_across_wrap() {
        let mut ring: CircularBuffer<i16> = CircularBuffer::new(5);
        let mut next_in = 0i16;
        let mut next_out = 0i16;
        for _ in 0..20 {
            for _ in 0..3 {
                ring.write(next_in);
                next_in += 1;
            }
            for _ in 0..3 {
                assert_eq!(ring.read(), Some(next_out));
                next_out += 1;
            }
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_occupancy_never_reaches_storage_size() {
        let mut ring: CircularBuffer<f32> = CircularBuffer::new(8);
        for i in 0..100 {
            ring.write(i as f32);
            assert!(ring.len() <= ring.capacity());
            assert!(ring.len() < ring.capacity() + 1);
        }
        assert!(ring.is_full());
    }

    #[test]
    fn test_overwrite_drops_oldest() {
        let mut ring: CircularBuffer<i16> = CircularBuffer::new(3);
        ring.write_slice(&[1, 2, 3, 4]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.read(), Some(2));
        assert_eq!(ring.read(), Some(3));
        assert_eq!(ring.read(), Some(4));
        assert_eq!(ring.read(), None);
    }

    #[test]
    fn test_read_slice_stops_when_empty() {
        let mut ring: CircularBuffer<i16> = CircularBuffer::new(8);
        ring.write_slice(&[7, 8]);
        let mut out = [0i16; 4];
        assert_eq!(ring.read_slice(&mut out), 2);
        assert_eq!(&out[..2], &[7, 8]);
    }

    #[test]
    fn test_flush() {
        let mut ring: CircularBuffer<f32> = CircularBuffer::new(8);
        ring.write_slice(&[1.0, 2.0, 3.0]);
        ring.flush();
        assert!(ring.is_empty());
        assert_eq!(ring.read(), None);
    }
}
