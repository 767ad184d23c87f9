use chrono::TimeDelta;
use lectern_core::EngineConfig;

/// Daemon configuration, loaded from environment variables. Service
/// endpoint and venue identity come from the CLI instead (see `main`).
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Seconds between recognition calls; 0 runs recognition every tick.
    pub recog_interval_secs: u64,
    /// Seconds a subject must stay unseen before a leave is finalized.
    pub absence_threshold_secs: u64,
    /// Liveness voting window size.
    pub liveness_history_len: usize,
    /// Maximum tolerated spoof ratio within a full window.
    pub spoof_threshold: f32,
    /// Minimum top-match similarity for a detection to count.
    pub similarity_threshold: f32,
    /// Milliseconds between engine ticks.
    pub tick_interval_ms: u64,
    /// Warmup frames discarded at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Timeout in seconds for a recognition call.
    pub recognition_timeout_secs: u64,
    /// Timeout in seconds for a liveness call.
    pub liveness_timeout_secs: u64,
    /// Attendance API endpoint.
    pub report_url: String,
    /// Optional bearer token for the attendance API.
    pub report_token: Option<String>,
    /// Liveness classifier endpoint.
    pub liveness_url: String,
}

impl Config {
    /// Load configuration from `LECTERN_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            camera_device: std::env::var("LECTERN_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            recog_interval_secs: env_u64("LECTERN_RECOG_INTERVAL_SECS", 0),
            absence_threshold_secs: env_u64("LECTERN_ABSENCE_THRESHOLD_SECS", 5),
            liveness_history_len: env_usize("LECTERN_LIVENESS_HISTORY_LEN", 5),
            spoof_threshold: env_f32("LECTERN_SPOOF_THRESHOLD", 0.2),
            similarity_threshold: env_f32("LECTERN_SIMILARITY_THRESHOLD", 0.8),
            tick_interval_ms: env_u64("LECTERN_TICK_INTERVAL_MS", 200),
            warmup_frames: env_usize("LECTERN_WARMUP_FRAMES", 4),
            recognition_timeout_secs: env_u64("LECTERN_RECOGNITION_TIMEOUT_SECS", 5),
            liveness_timeout_secs: env_u64("LECTERN_LIVENESS_TIMEOUT_SECS", 2),
            report_url: std::env::var("LECTERN_REPORT_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api/mark-attendance/".to_string()),
            report_token: std::env::var("LECTERN_REPORT_TOKEN").ok(),
            liveness_url: std::env::var("LECTERN_LIVENESS_URL")
                .unwrap_or_else(|_| "http://localhost:9000/api/v1/liveness".to_string()),
        }
    }

    /// Engine thresholds derived from this configuration. The voting
    /// window is clamped to at least one slot.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            absence_threshold: TimeDelta::seconds(self.absence_threshold_secs as i64),
            liveness_history_len: self.liveness_history_len.max(1),
            spoof_threshold: self.spoof_threshold,
            similarity_threshold: self.similarity_threshold,
        }
    }

    pub fn recog_interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.recog_interval_secs as i64)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
