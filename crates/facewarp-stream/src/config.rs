use std::time::Duration;

/// Background worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when no new input frame has arrived.
    pub idle_wait: Duration,
    /// How often the worker logs its measured throughput.
    pub fps_log_interval: Duration,
    /// OS thread name for the worker.
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(2),
            fps_log_interval: Duration::from_secs(1),
            thread_name: "facewarp-worker".to_string(),
        }
    }
}
