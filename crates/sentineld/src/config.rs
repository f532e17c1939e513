use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Camera index used when a start request does not name one.
    pub camera_index: u32,
    /// Index tried when the requested one fails to open (default: requested + 1).
    pub fallback_index: Option<u32>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite watchlist database.
    pub db_path: PathBuf,
    /// Minimum confidence (0–100, exclusive) for a face to count as a match.
    pub match_threshold: f32,
    /// Minimum time between two alerts for the same identity.
    pub alert_cooldown: Duration,
    /// Alert loop cadence.
    pub alert_interval: Duration,
    /// Pause after a failed read in the alert loop.
    pub alert_retry: Duration,
    /// Preview stream cadence.
    pub stream_interval: Duration,
    pub jpeg_quality: u8,
    /// Listen address of the preview/alert HTTP server.
    pub http_addr: SocketAddr,
    /// Mirror frames horizontally (selfie view).
    pub mirror: bool,
    /// Serve D-Bus on the session bus instead of the system bus.
    pub dbus_session: bool,
}

impl Config {
    /// Load configuration from `SENTINEL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("SENTINEL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| sentinel_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("sentinel");

        let db_path = std::env::var("SENTINEL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("watchlist.db"));

        let http_addr = std::env::var("SENTINEL_HTTP_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5000)));

        Self {
            camera_index: env_u32("SENTINEL_CAMERA_INDEX", 0),
            fallback_index: std::env::var("SENTINEL_FALLBACK_INDEX")
                .ok()
                .and_then(|v| v.parse().ok()),
            model_dir,
            db_path,
            match_threshold: env_f32("SENTINEL_MATCH_THRESHOLD", sentinel_core::DEFAULT_MATCH_THRESHOLD),
            alert_cooldown: Duration::from_secs(env_u64("SENTINEL_ALERT_COOLDOWN_SECS", 10)),
            alert_interval: Duration::from_millis(env_u64("SENTINEL_ALERT_INTERVAL_MS", 1000)),
            alert_retry: Duration::from_millis(env_u64("SENTINEL_ALERT_RETRY_MS", 500)),
            stream_interval: Duration::from_millis(env_u64("SENTINEL_STREAM_INTERVAL_MS", 33)),
            jpeg_quality: env_u64("SENTINEL_JPEG_QUALITY", 80).clamp(1, 100) as u8,
            http_addr,
            mirror: env_flag("SENTINEL_MIRROR", true),
            dbus_session: env_flag("SENTINEL_DBUS_SESSION", false),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
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

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
