use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{env, fs};

/// Engine-wide configuration, loaded once from the environment.
///
/// Every verification threshold lives here rather than at a call site so
/// deployments can tune them without a rebuild. Defaults are documented per
/// field and applied when the variable is unset.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub database_url: String,

    /// Base URL of the external face-matching oracle.
    pub face_api_base_url: String,
    /// Confidence cutoff for a face match to count as verified. Default 0.85.
    pub face_match_threshold: f64,
    /// Minutes past the scheduled start before an arrival is marked late.
    /// Default 10.
    pub late_grace_minutes: i64,

    /// Upper bound on location acquisition, in seconds. Default 10.
    pub location_timeout_seconds: u64,
    /// Upper bound on camera capture, in seconds. Default 10.
    pub capture_timeout_seconds: u64,
    /// Upper bound on a face-oracle round trip, in seconds. Default 10.
    pub face_api_timeout_seconds: u64,
    /// Backoff before the single retry of a transient failure. Default 250.
    pub retry_backoff_ms: u64,

    /// Sliding window for duplicate-location and multiple-faces grouping,
    /// in minutes. Default 5.
    pub anomaly_window_minutes: i64,
    /// Coordinate equality epsilon, in degrees. Default 0.0001 (~11 m).
    pub anomaly_epsilon_degrees: f64,
    /// Period of the background anomaly scan, in seconds. Default 60.
    pub anomaly_scan_interval_seconds: u64,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn init(env_path: &str) -> &'static Self {
        dotenvy::from_filename(env_path).ok();

        CONFIG.get_or_init(|| {
            let project_name =
                env::var("PROJECT_NAME").unwrap_or_else(|_| "attendance-engine".into());
            let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".into());
            let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "logs/engine.log".into());
            let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let face_api_base_url = env::var("FACE_API_BASE_URL").unwrap_or_default();

            if let Some(parent) = std::path::Path::new(&log_file).parent() {
                fs::create_dir_all(parent).expect("Failed to create log directory");
            }

            Config {
                project_name,
                log_level,
                log_file,
                database_url,
                face_api_base_url,
                face_match_threshold: var_or("FACE_MATCH_THRESHOLD", 0.85),
                late_grace_minutes: var_or("LATE_GRACE_MINUTES", 10),
                location_timeout_seconds: var_or("LOCATION_TIMEOUT_SECONDS", 10),
                capture_timeout_seconds: var_or("CAPTURE_TIMEOUT_SECONDS", 10),
                face_api_timeout_seconds: var_or("FACE_API_TIMEOUT_SECONDS", 10),
                retry_backoff_ms: var_or("RETRY_BACKOFF_MS", 250),
                anomaly_window_minutes: var_or("ANOMALY_WINDOW_MINUTES", 5),
                anomaly_epsilon_degrees: var_or("ANOMALY_EPSILON_DEGREES", 0.0001),
                anomaly_scan_interval_seconds: var_or("ANOMALY_SCAN_INTERVAL_SECONDS", 60),
            }
        })
    }

    pub fn get() -> &'static Self {
        CONFIG.get().expect("Config not initialized")
    }
}
