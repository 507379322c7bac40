//! Descriptor queue feeding the pipeline worker
//!
//! An owned FIFO behind a reader/writer lock, plus a counting wake signal.
//! The write lock is held only for the push or pop itself; the signal is
//! separate so producers can wake the worker without enqueueing anything
//! (shutdown uses this).

use crate::descriptor::BufferDescriptor;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;

pub struct WorkQueue {
    list: RwLock<VecDeque<BufferDescriptor>>,
    pending: Mutex<usize>,
    wake: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(VecDeque::new()),
            pending: Mutex::new(0),
            wake: Condvar::new(),
        }
    }

    /// Append at the tail and wake one waiter
    pub fn schedule(&self, descriptor: BufferDescriptor) {
        self.link_tail(descriptor);
        self.signal();
    }

    /// Post one wake-up without enqueueing
    pub fn signal(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending += 1;
        self.wake.notify_one();
    }

    /// Detach the head, or `None` when the queue is empty
    pub fn dequeue_head(&self) -> Option<BufferDescriptor> {
        let mut list = match self.list.write() {
            Ok(list) => list,
            Err(poisoned) => {
                log::warn!("work queue lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let head = list.pop_front();
        if head.is_none() {
            log::trace!("dequeue from empty work queue");
        }
        head
    }

    /// Block until a wake-up is pending, then consume it
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending == 0 {
            pending = self
                .wake
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *pending -= 1;
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns true if a wake-up was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut pending, _) = self
            .wake
            .wait_timeout_while(pending, timeout, |pending| *pending == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *pending == 0 {
            return false;
        }
        *pending -= 1;
        true
    }

    pub fn len(&self) -> usize {
        self.list.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn link_tail(&self, descriptor: BufferDescriptor) {
        let mut list = self.list.write().unwrap_or_else(PoisonError::into_inner);
        list.push_back(descriptor);
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;
    use std::sync::Arc;
    use std::thread;

    fn descriptor(stream_id: u32) -> BufferDescriptor {
        BufferDescriptor::new(stream_id, vec![Complex32::new(0.0, 0.0); 4])
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue = WorkQueue::new();
        assert!(queue.dequeue_head().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        for id in 0..10 {
            queue.schedule(descriptor(id));
        }
        assert_eq!(queue.len(), 10);

        for id in 0..10 {
            assert_eq!(queue.dequeue_head().unwrap().stream_id, id);
        }
        assert!(queue.dequeue_head().is_none());
    }

    #[test]
    fn test_signal_counts_wakeups() {
        let queue = WorkQueue::new();
        queue.signal();
        queue.signal();
        assert!(queue.wait_timeout(Duration::from_millis(10)));
        assert!(queue.wait_timeout(Duration::from_millis(10)));
        assert!(!queue.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_wakes_on_schedule_from_other_thread() {
        let queue = Arc::new(WorkQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.schedule(descriptor(42));
            })
        };

        queue.wait();
        assert_eq!(queue.dequeue_head().unwrap().stream_id, 42);
        producer.join().unwrap();
    }

    #[test]
    fn test_fifo_preserved_across_producer_thread() {
        let queue = Arc::new(WorkQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for id in 0..500 {
                    queue.schedule(descriptor(id));
                }
            })
        };

        let mut expected = 0;
        while expected < 500 {
            queue.wait();
            while let Some(d) = queue.dequeue_head() {
                assert_eq!(d.stream_id, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
