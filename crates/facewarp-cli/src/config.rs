use facewarp_stream::WorkerConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the PRN model, manifest and UV data.
    pub model_dir: PathBuf,
    /// Worker sleep between polls when no new frame has arrived.
    pub idle_wait_ms: u64,
    /// Seconds between throughput log lines.
    pub fps_log_interval_secs: u64,
    /// How long `swap` waits for each frame's result.
    pub result_timeout_secs: u64,
    /// Whether to compute diagnostics on every cycle.
    pub diagnostics: bool,
}

impl Config {
    /// Load configuration from `FACEWARP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEWARP_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_model_dir());

        Self {
            model_dir,
            idle_wait_ms: env_u64("FACEWARP_IDLE_WAIT_MS", 2),
            fps_log_interval_secs: env_u64("FACEWARP_FPS_LOG_INTERVAL_SECS", 1),
            result_timeout_secs: env_u64("FACEWARP_RESULT_TIMEOUT_SECS", 10),
            diagnostics: env_bool("FACEWARP_DIAGNOSTICS", false),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            idle_wait: Duration::from_millis(self.idle_wait_ms),
            fps_log_interval: Duration::from_secs(self.fps_log_interval_secs),
            ..WorkerConfig::default()
        }
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }
}

/// `$XDG_DATA_HOME/facewarp/models`, falling back to `~/.local/share`.
fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewarp/models")
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}
