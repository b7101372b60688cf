//! Background pipeline runner.
//!
//! The worker owns the [`FrameProcessor`] on a dedicated OS thread. Each
//! iteration it checks the stop flag, takes the newest input frame (if one
//! arrived since the last cycle), processes it without holding any lock and
//! publishes the result. Recoverable failures never leave the loop.

use crate::buffer::FrameBuffer;
use crate::config::WorkerConfig;
use facewarp_core::{CompositeResult, FrameProcessor, ReconstructionOracle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Snapshot of worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerStats {
    /// Cycles that published a result.
    pub completed: u64,
    /// Cycles abandoned because no face was found.
    pub skipped: u64,
    /// Cycles abandoned because the pipeline returned an error.
    pub failed: u64,
    /// Throughput over the last logging window, cycles per second.
    pub fps: f64,
}

/// Counters shared between the worker thread and its observers.
#[derive(Debug, Default)]
pub struct SharedStats {
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    fps_bits: AtomicU64,
}

impl SharedStats {
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }
}

/// What a single worker iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A result was published with this sequence number.
    Published(u64),
    /// No input newer than the last processed one.
    Idle,
    /// The oracle found no face; the previous result stands.
    NoDetection,
    /// The pipeline errored; the previous result stands.
    Failed,
}

/// Rolling cycles-per-second measurement.
struct Throughput {
    window_start: Instant,
    cycles: u64,
    interval: Duration,
}

impl Throughput {
    fn new(interval: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            cycles: 0,
            interval,
        }
    }

    /// Count a cycle; returns the window's rate once `interval` has elapsed.
    fn tick(&mut self) -> Option<f64> {
        self.cycles += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed < self.interval {
            return None;
        }
        let fps = self.cycles as f64 / elapsed.as_secs_f64();
        self.cycles = 0;
        self.window_start = Instant::now();
        Some(fps)
    }
}

pub struct Worker<O> {
    processor: FrameProcessor<O>,
    buffer: Arc<FrameBuffer>,
    stats: Arc<SharedStats>,
    seen_generation: u64,
    throughput: Throughput,
}

impl<O: ReconstructionOracle> Worker<O> {
    pub fn new(
        processor: FrameProcessor<O>,
        buffer: Arc<FrameBuffer>,
        stats: Arc<SharedStats>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            processor,
            buffer,
            stats,
            seen_generation: 0,
            throughput: Throughput::new(config.fps_log_interval),
        }
    }

    /// Process the newest input frame once, if there is one.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let Some((generation, frame)) = self.buffer.take_newer_input(self.seen_generation) else {
            return CycleOutcome::Idle;
        };
        self.seen_generation = generation;

        match self.processor.process(&frame) {
            Ok(Some(output)) => {
                // Stats outlive the worker, so numbering continues across restarts.
                let sequence = self.stats.completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.buffer.publish_result(CompositeResult {
                    image: output.image,
                    sequence,
                    input_generation: generation,
                    diagnostics: output.diagnostics,
                });

                if let Some(fps) = self.throughput.tick() {
                    self.stats.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
                    tracing::info!(fps = format!("{fps:.2}"), cycles = sequence, "worker throughput");
                }
                CycleOutcome::Published(sequence)
            }
            Ok(None) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(generation, "no face detected; keeping previous result");
                CycleOutcome::NoDetection
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(generation, error = %e, "frame processing failed; keeping previous result");
                CycleOutcome::Failed
            }
        }
    }

    /// Loop until `stop` is set, then hand the processor back.
    pub fn run(mut self, stop: &AtomicBool, idle_wait: Duration) -> FrameProcessor<O> {
        tracing::info!("worker thread started");
        while !stop.load(Ordering::Acquire) {
            if self.run_cycle() == CycleOutcome::Idle {
                std::thread::sleep(idle_wait);
            }
        }
        tracing::info!(cycles = self.stats.completed.load(Ordering::Relaxed), "worker thread exiting");
        self.processor
    }
}

/// A running worker thread.
pub struct WorkerHandle<O> {
    stop: Arc<AtomicBool>,
    join: JoinHandle<FrameProcessor<O>>,
}

impl<O> WorkerHandle<O> {
    /// Signal the worker and wait for it to exit.
    ///
    /// Blocks until the in-flight cycle (if any) finishes. Returns `None` if
    /// the worker thread panicked.
    pub fn stop(self) -> Option<FrameProcessor<O>> {
        self.stop.store(true, Ordering::Release);
        self.join.join().ok()
    }
}

/// Spawn `worker` on its own named OS thread.
pub fn spawn_worker<O>(worker: Worker<O>, config: &WorkerConfig) -> std::io::Result<WorkerHandle<O>>
where
    O: ReconstructionOracle + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let idle_wait = config.idle_wait;

    let join = std::thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || worker.run(&flag, idle_wait))?;

    Ok(WorkerHandle { stop, join })
}
