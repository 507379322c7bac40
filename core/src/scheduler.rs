//! Pipeline worker thread
//!
//! Producers hand descriptors to [`Scheduler::schedule`]. One worker thread
//! sleeps on the queue's wake signal, drains everything queued, runs each
//! descriptor through the [`PipelineContext`], emits it and returns it to
//! the pool.

use crate::decoder::DecodedHeader;
use crate::descriptor::{BufferDescriptor, DescriptorPool};
use crate::error::{DStarError, Result};
use crate::pipeline::{PipelineConfig, PipelineContext, PipelineStats};
use crate::queue::WorkQueue;
use crate::vocoder::VocoderLink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Receives every processed descriptor, in processing order
pub trait OutputSink: Send {
    fn emit(&mut self, descriptor: &BufferDescriptor);

    fn header_decoded(&mut self, header: &DecodedHeader) {
        log::info!(
            "decoded header {} (checksum {})",
            header.header,
            if header.checksum_ok { "ok" } else { "bad" }
        );
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub thread_name: String,
    /// SCHED_FIFO priority for the worker; `None` keeps the default policy.
    /// Failure to raise priority is logged and ignored.
    pub realtime_priority: Option<i32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "dstar-pipeline".to_string(),
            realtime_priority: Some(30),
        }
    }
}

pub struct Scheduler {
    queue: Arc<WorkQueue>,
    abort: Arc<AtomicBool>,
    pool: DescriptorPool,
    worker: Option<JoinHandle<PipelineStats>>,
}

impl Scheduler {
    /// Reset the vocoder and start the worker thread
    pub fn start(
        config: SchedulerConfig,
        pipeline: PipelineConfig,
        mut sink: Box<dyn OutputSink>,
        mut vocoder: Box<dyn VocoderLink>,
        pool: DescriptorPool,
    ) -> Result<Self> {
        let mut context = PipelineContext::new(pipeline)?;

        if let Err(e) = vocoder.reset() {
            log::warn!("vocoder reset failed: {}", e);
        }

        let queue = Arc::new(WorkQueue::new());
        let abort = Arc::new(AtomicBool::new(false));

        let worker = {
            let queue = queue.clone();
            let abort = abort.clone();
            let pool = pool.clone();
            let priority = config.realtime_priority;

            thread::Builder::new().name(config.thread_name).spawn(move || {
                if let Some(priority) = priority {
                    if let Err(e) = set_realtime_priority(priority) {
                        log::warn!("running without real-time priority: {}", e);
                    }
                }

                loop {
                    queue.wait();
                    if abort.load(Ordering::Acquire) {
                        break;
                    }

                    while let Some(mut descriptor) = queue.dequeue_head() {
                        match context.process(&mut descriptor, vocoder.as_mut()) {
                            Ok(_) => {
                                sink.emit(&descriptor);
                                for header in context.take_headers() {
                                    sink.header_decoded(&header);
                                }
                            }
                            Err(e) => log::warn!(
                                "dropping descriptor for stream 0x{:08X}: {}",
                                descriptor.stream_id,
                                e
                            ),
                        }
                        pool.release(descriptor);
                    }
                }

                let stats = context.stats().clone();
                context.reset();
                log::info!("pipeline worker exiting: {:?}", stats);
                stats
            })?
        };

        Ok(Self {
            queue,
            abort,
            pool,
            worker: Some(worker),
        })
    }

    /// Queue a descriptor for processing and wake the worker
    pub fn schedule(&self, descriptor: BufferDescriptor) {
        self.queue.schedule(descriptor);
    }

    /// Wake the worker without queueing anything
    pub fn signal(&self) {
        self.queue.signal();
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Descriptors waiting for the worker
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// Stop the worker and collect its final statistics. Descriptors still
    /// queued are discarded.
    pub fn shutdown(mut self) -> Result<PipelineStats> {
        self.stop()
    }

    fn stop(&mut self) -> Result<PipelineStats> {
        self.abort.store(true, Ordering::Release);
        self.queue.signal();

        let worker = self
            .worker
            .take()
            .ok_or_else(|| DStarError::Worker("worker already stopped".to_string()))?;
        let stats = worker
            .join()
            .map_err(|_| DStarError::Worker("pipeline worker panicked".to_string()))?;

        while let Some(descriptor) = self.queue.dequeue_head() {
            self.pool.release(descriptor);
        }
        Ok(stats)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                log::warn!("{}", e);
            }
        }
    }
}

/// Move the calling thread to SCHED_FIFO at `priority`
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    // SAFETY: sched_param is plain data; pthread_self is always valid for
    // the calling thread.
    let rc = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };
    if rc != 0 {
        return Err(DStarError::Worker(format!(
            "pthread_setschedparam(SCHED_FIFO, {}) failed: {}",
            priority,
            std::io::Error::from_raw_os_error(rc)
        )));
    }
    log::debug!("worker running SCHED_FIFO priority {}", priority);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    Err(DStarError::Worker(format!(
        "real-time priority {} not supported on this platform",
        priority
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Direction;
    use crate::vocoder::NullVocoder;
    use crate::PACKET_SAMPLES;
    use num_complex::Complex32;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct CollectingSink {
        emitted: Arc<Mutex<Vec<(u32, bool)>>>,
    }

    impl OutputSink for CollectingSink {
        fn emit(&mut self, descriptor: &BufferDescriptor) {
            let silent = descriptor.samples.iter().all(|s| s.re == 0.0 && s.im == 0.0);
            self.emitted.lock().unwrap().push((descriptor.stream_id, silent));
        }
    }

    impl CollectingSink {
        fn wait_for(&self, count: usize) -> Vec<(u32, bool)> {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let emitted = self.emitted.lock().unwrap().clone();
                if emitted.len() >= count || Instant::now() > deadline {
                    return emitted;
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            thread_name: "test-pipeline".to_string(),
            realtime_priority: None,
        }
    }

    fn start(sink: &CollectingSink, pool: &DescriptorPool) -> Scheduler {
        Scheduler::start(
            test_config(),
            PipelineConfig::default(),
            Box::new(sink.clone()),
            Box::new(NullVocoder::default()),
            pool.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_processes_in_order_and_recycles() {
        let sink = CollectingSink::default();
        let pool = DescriptorPool::new(PACKET_SAMPLES, 8);
        let scheduler = start(&sink, &pool);

        for i in 0..4u32 {
            let mut descriptor = scheduler.pool().acquire(i * 2);
            descriptor.samples.fill(Complex32::new(0.5, 0.0));
            scheduler.schedule(descriptor);
        }

        let emitted = sink.wait_for(4);
        assert_eq!(
            emitted,
            vec![(0, true), (2, true), (4, true), (6, false)]
        );

        let stats = scheduler.shutdown().unwrap();
        assert_eq!(stats.silence, 3);
        assert_eq!(stats.emitted, 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_malformed_descriptor_not_emitted() {
        let sink = CollectingSink::default();
        let pool = DescriptorPool::new(PACKET_SAMPLES, 8);
        let scheduler = start(&sink, &pool);

        scheduler.schedule(BufferDescriptor::new(0, vec![Complex32::new(0.0, 0.0); 17]));
        scheduler.schedule(pool.acquire(2));

        let emitted = sink.wait_for(1);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, 2);
        assert_eq!(Direction::from_stream_id(emitted[0].0), Direction::Receive);

        let stats = scheduler.shutdown().unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_shutdown_idle_worker() {
        let sink = CollectingSink::default();
        let pool = DescriptorPool::new(PACKET_SAMPLES, 2);
        let scheduler = start(&sink, &pool);
        scheduler.signal();

        let stats = scheduler.shutdown().unwrap();
        assert_eq!(stats, PipelineStats::default());
    }

    #[test]
    fn test_invalid_pipeline_config_fails_start() {
        let result = Scheduler::start(
            test_config(),
            PipelineConfig {
                packet_samples: 0,
                ..PipelineConfig::default()
            },
            Box::new(CollectingSink::default()),
            Box::new(NullVocoder::default()),
            DescriptorPool::new(PACKET_SAMPLES, 2),
        );
        assert!(matches!(result, Err(DStarError::InvalidConfig(_))));
    }
}
