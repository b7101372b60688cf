//! Caller-facing facade over the frame buffer and worker thread.

use crate::buffer::FrameBuffer;
use crate::config::WorkerConfig;
use crate::worker::{spawn_worker, SharedStats, Worker, WorkerHandle, WorkerStats};
use facewarp_core::{
    CompositeResult, Frame, FrameProcessor, ProcessorOptions, ReconstructionOracle,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller has not been started")]
    NotStarted,
    #[error("worker is already running")]
    AlreadyRunning,
    #[error("worker is not running")]
    NotRunning,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("frame processor was lost with a previous worker")]
    ProcessorLost,
}

/// Clone-safe producer/consumer access to a started pipeline.
///
/// Hand one to a capture thread for [`update`](Self::update) and another to a
/// display thread for [`read`](Self::read); neither blocks beyond a short lock.
#[derive(Clone)]
pub struct StreamHandle {
    buffer: Arc<FrameBuffer>,
}

impl StreamHandle {
    /// Replace the pending input frame. Returns its generation.
    pub fn update(&self, frame: Frame) -> u64 {
        self.buffer.write(frame)
    }

    /// The latest composited result, or `None` before the first cycle completes.
    pub fn read(&self) -> Option<Arc<CompositeResult>> {
        self.buffer.read_result()
    }

    pub fn published_count(&self) -> u64 {
        self.buffer.published_count()
    }
}

/// Starts, feeds, reads and stops the background face-swap worker.
pub struct Controller<O> {
    processor: Option<FrameProcessor<O>>,
    config: WorkerConfig,
    buffer: Option<Arc<FrameBuffer>>,
    stats: Arc<SharedStats>,
    worker: Option<WorkerHandle<O>>,
}

impl<O> Controller<O>
where
    O: ReconstructionOracle + Send + 'static,
{
    pub fn new(oracle: O, reference_face: Frame, options: ProcessorOptions, config: WorkerConfig) -> Self {
        Self::with_processor(FrameProcessor::new(oracle, reference_face, options), config)
    }

    pub fn with_processor(processor: FrameProcessor<O>, config: WorkerConfig) -> Self {
        Self {
            processor: Some(processor),
            config,
            buffer: None,
            stats: Arc::new(SharedStats::default()),
            worker: None,
        }
    }

    /// Seed the input slot with `initial` and launch the worker.
    ///
    /// A stopped controller can be started again; the last result stays
    /// readable until the new worker publishes.
    pub fn start(&mut self, initial: Frame) -> Result<StreamHandle, ControllerError> {
        if self.worker.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }
        let processor = self.processor.take().ok_or(ControllerError::ProcessorLost)?;

        let buffer = Arc::clone(self.buffer.get_or_insert_with(|| Arc::new(FrameBuffer::new())));
        let generation = buffer.write(initial);

        let worker = Worker::new(processor, Arc::clone(&buffer), Arc::clone(&self.stats), &self.config);
        self.worker = Some(spawn_worker(worker, &self.config)?);

        tracing::info!(
            thread = %self.config.thread_name,
            generation,
            idle_wait_ms = self.config.idle_wait.as_millis() as u64,
            "controller started"
        );
        Ok(StreamHandle { buffer })
    }

    /// Replace the pending input frame.
    pub fn update(&self, frame: Frame) -> Result<u64, ControllerError> {
        let buffer = self.buffer.as_ref().ok_or(ControllerError::NotStarted)?;
        if self.worker.is_none() {
            return Err(ControllerError::NotRunning);
        }
        Ok(buffer.write(frame))
    }

    /// The latest composited result; `Ok(None)` until the first cycle completes.
    pub fn read(&self) -> Result<Option<Arc<CompositeResult>>, ControllerError> {
        let buffer = self.buffer.as_ref().ok_or(ControllerError::NotStarted)?;
        Ok(buffer.read_result())
    }

    /// A shareable handle for producer and consumer threads.
    pub fn handle(&self) -> Result<StreamHandle, ControllerError> {
        let buffer = self.buffer.as_ref().ok_or(ControllerError::NotStarted)?;
        Ok(StreamHandle {
            buffer: Arc::clone(buffer),
        })
    }

    /// Signal the worker and wait for it to exit.
    ///
    /// No result is published after this returns.
    pub fn stop(&mut self) -> Result<(), ControllerError> {
        let Some(worker) = self.worker.take() else {
            return Err(if self.buffer.is_none() {
                ControllerError::NotStarted
            } else {
                ControllerError::NotRunning
            });
        };

        match worker.stop() {
            Some(processor) => {
                self.processor = Some(processor);
                tracing::info!(stats = ?self.stats.snapshot(), "controller stopped");
                Ok(())
            }
            None => {
                tracing::warn!("worker thread panicked; processor lost");
                Err(ControllerError::WorkerPanicked)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    /// Take back the processor (and its oracle) from a stopped controller.
    pub fn into_processor(mut self) -> Option<FrameProcessor<O>> {
        if self.worker.is_some() {
            let _ = self.stop();
        }
        self.processor.take()
    }
}

impl<O> Drop for Controller<O> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.stop().is_none() {
                tracing::warn!("worker thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{result_color, StubOracle};
    use rand::Rng;
    use std::time::{Duration, Instant};

    fn controller(oracle: StubOracle) -> Controller<StubOracle> {
        Controller::new(
            oracle,
            Frame::filled(16, 16, [0, 0, 0]),
            ProcessorOptions::default(),
            WorkerConfig {
                idle_wait: Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_misuse_before_start() {
        let mut c = controller(StubOracle::new());
        assert!(matches!(c.read(), Err(ControllerError::NotStarted)));
        assert!(matches!(
            c.update(Frame::filled(16, 16, [1, 1, 1])),
            Err(ControllerError::NotStarted)
        ));
        assert!(matches!(c.stop(), Err(ControllerError::NotStarted)));
        assert!(c.handle().is_err());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut c = controller(StubOracle::new());
        c.start(Frame::filled(16, 16, [1, 1, 1])).unwrap();
        assert!(matches!(
            c.start(Frame::filled(16, 16, [1, 1, 1])),
            Err(ControllerError::AlreadyRunning)
        ));
        c.stop().unwrap();
        assert!(matches!(c.stop(), Err(ControllerError::NotRunning)));
    }

    #[test]
    fn test_none_before_first_cycle() {
        let mut c = controller(StubOracle::new().with_delay(Duration::from_millis(200)));
        c.start(Frame::filled(16, 16, [5, 5, 5])).unwrap();
        assert!(c.read().unwrap().is_none());
        assert!(wait_for(|| c.read().unwrap().is_some()));
        c.stop().unwrap();
    }

    #[test]
    fn test_update_reflected_after_next_cycle() {
        let mut c = controller(StubOracle::new());
        c.start(Frame::filled(16, 16, [10, 10, 10])).unwrap();
        assert!(wait_for(|| c.read().unwrap().is_some()));

        let generation = c.update(Frame::filled(16, 16, [20, 30, 40])).unwrap();
        assert!(wait_for(|| c
            .read()
            .unwrap()
            .is_some_and(|r| r.input_generation == generation)));
        assert_eq!(result_color(&c.read().unwrap().unwrap()), [20, 30, 40]);
        c.stop().unwrap();
    }

    #[test]
    fn test_latest_write_wins_during_slow_cycle() {
        let mut c = controller(StubOracle::new().with_delay(Duration::from_millis(100)));
        let handle = c.start(Frame::filled(16, 16, [1, 1, 1])).unwrap();

        // Worker is busy with the seed frame; these pile up in the single slot.
        let mut last = 0;
        for v in 2..=9u8 {
            last = handle.update(Frame::filled(16, 16, [v, v, v]));
        }
        assert!(wait_for(|| handle.read().is_some_and(|r| r.input_generation == last)));

        let r = handle.read().unwrap();
        assert_eq!(result_color(&r), [9, 9, 9]);
        assert!(r.sequence <= 2, "intermediate frames must be skipped, got {}", r.sequence);
        c.stop().unwrap();
    }

    #[test]
    fn test_no_publish_after_stop() {
        let mut c = controller(StubOracle::new());
        let handle = c.start(Frame::filled(16, 16, [3, 3, 3])).unwrap();
        assert!(wait_for(|| handle.published_count() > 0));
        c.stop().unwrap();

        let frozen = handle.published_count();
        handle.update(Frame::filled(16, 16, [4, 4, 4]));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.published_count(), frozen);
        assert!(c.read().unwrap().is_some(), "last result stays readable");
        assert!(matches!(
            c.update(Frame::filled(16, 16, [4, 4, 4])),
            Err(ControllerError::NotRunning)
        ));
    }

    #[test]
    fn test_restart_after_stop() {
        let mut c = controller(StubOracle::new());
        c.start(Frame::filled(16, 16, [3, 3, 3])).unwrap();
        assert!(wait_for(|| c.read().unwrap().is_some()));
        c.stop().unwrap();
        let before = c.read().unwrap().unwrap().sequence;

        let handle = c.start(Frame::filled(16, 16, [8, 8, 8])).unwrap();
        assert!(wait_for(|| handle.read().is_some_and(|r| result_color(&r) == [8, 8, 8])));
        c.stop().unwrap();
        assert!(c.stats().completed >= 2);

        let after = handle.read().unwrap().sequence;
        assert!(after > before, "sequence must keep counting after restart ({before} -> {after})");
        assert_eq!(after, c.stats().completed);
    }

    #[test]
    fn test_skipped_detection_counted() {
        let mut c = controller(StubOracle::new().reject_color(66));
        c.start(Frame::filled(16, 16, [66, 0, 0])).unwrap();
        assert!(wait_for(|| c.stats().skipped == 1));
        assert!(c.read().unwrap().is_none());
        c.stop().unwrap();
    }

    #[test]
    fn test_concurrent_producer_stress() {
        let mut c = controller(StubOracle::new().with_delay(Duration::from_millis(2)));
        let handle = c.start(Frame::filled(16, 16, [0, 0, 0])).unwrap();

        let producer = {
            let handle = handle.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                // index 0 is the seed frame written by start()
                let mut written = vec![[0u8; 3]];
                for _ in 0..10_000 {
                    let color: [u8; 3] = rng.gen();
                    handle.update(Frame::filled(16, 16, color));
                    written.push(color);
                }
                written
            })
        };

        let mut reads = 0usize;
        while !producer.is_finished() {
            if handle.read().is_some() {
                reads += 1;
            }
            std::thread::yield_now();
        }
        let written = producer.join().unwrap();
        let total = written.len() as u64;
        assert!(wait_for(|| handle.read().is_some_and(|r| r.input_generation == total)));
        c.stop().unwrap();

        let r = handle.read().expect("non-empty after stress");
        let expected = written[(r.input_generation - 1) as usize];
        assert_eq!(result_color(&r), expected);
        assert!(reads > 0 || c.stats().completed > 0);
    }

    #[test]
    fn test_drop_joins_worker() {
        let mut c = controller(StubOracle::new());
        let handle = c.start(Frame::filled(16, 16, [3, 3, 3])).unwrap();
        drop(c);
        let frozen = handle.published_count();
        handle.update(Frame::filled(16, 16, [4, 4, 4]));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.published_count(), frozen);
    }
}
