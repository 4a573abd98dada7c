use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use doorward_core::controller::{DEFAULT_RELOCK_DELAY, DEFAULT_UNLOCK_DURATION};
use doorward_core::matcher::DEFAULT_TOLERANCE;
use doorward_core::processor::DEFAULT_DARK_THRESHOLD;
use doorward_core::AccessPolicy;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration: defaults, then an optional TOML file named by
/// `DOORWARD_CONFIG`, then `DOORWARD_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MQTT broker host (default: localhost).
    pub broker_host: String,
    /// MQTT broker port (default: 1883).
    pub broker_port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// MQTT keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Root of the `<name>/<images>` gallery layout.
    pub gallery_dir: PathBuf,
    /// RFID tags allowed to unlock the door.
    pub authorized_tags: Vec<String>,
    /// Face-path session length in milliseconds.
    pub unlock_duration_ms: u64,
    /// Delay before an RFID unlock relocks, in milliseconds.
    pub relock_delay_ms: u64,
    /// Period of the frame/cooldown loop in milliseconds.
    pub frame_interval_ms: u64,
    /// Euclidean tolerance for a face match.
    pub match_tolerance: f32,
    /// Base URL of the face analysis service. Without it the face path is off.
    pub analyzer_url: Option<String>,
    /// Per-request timeout for the face analysis service.
    pub analyzer_timeout_secs: u64,
    /// Directory the capture process drops frames into.
    pub spool_dir: PathBuf,
    /// Whether near-black frames are skipped before analysis.
    pub skip_dark_frames: bool,
    /// Fraction of near-black pixels that makes a frame dark.
    pub dark_threshold: f32,
    /// Optional plain-text log file, in addition to stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "doorwardd".to_string(),
            keep_alive_secs: 60,
            gallery_dir: PathBuf::from("./images"),
            authorized_tags: Vec::new(),
            unlock_duration_ms: DEFAULT_UNLOCK_DURATION.as_millis() as u64,
            relock_delay_ms: DEFAULT_RELOCK_DELAY.as_millis() as u64,
            frame_interval_ms: 100,
            match_tolerance: DEFAULT_TOLERANCE,
            analyzer_url: None,
            analyzer_timeout_secs: 5,
            spool_dir: PathBuf::from("./spool"),
            skip_dark_frames: true,
            dark_threshold: DEFAULT_DARK_THRESHOLD,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("DOORWARD_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Overlay `DOORWARD_*` variables read through `lookup`. Values that do
    /// not parse leave the current setting untouched.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("DOORWARD_BROKER_HOST") {
            self.broker_host = v;
        }
        self.broker_port = parse_or(&lookup, "DOORWARD_BROKER_PORT", self.broker_port);
        if let Some(v) = lookup("DOORWARD_CLIENT_ID") {
            self.client_id = v;
        }
        self.keep_alive_secs = parse_or(&lookup, "DOORWARD_KEEP_ALIVE_SECS", self.keep_alive_secs);
        if let Some(v) = lookup("DOORWARD_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOORWARD_AUTHORIZED_TAGS") {
            self.authorized_tags = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        self.unlock_duration_ms =
            parse_or(&lookup, "DOORWARD_UNLOCK_DURATION_MS", self.unlock_duration_ms);
        self.relock_delay_ms = parse_or(&lookup, "DOORWARD_RELOCK_DELAY_MS", self.relock_delay_ms);
        self.frame_interval_ms =
            parse_or(&lookup, "DOORWARD_FRAME_INTERVAL_MS", self.frame_interval_ms);
        self.match_tolerance = parse_or(&lookup, "DOORWARD_MATCH_TOLERANCE", self.match_tolerance);
        if let Some(v) = lookup("DOORWARD_ANALYZER_URL") {
            self.analyzer_url = Some(v).filter(|u| !u.is_empty());
        }
        self.analyzer_timeout_secs =
            parse_or(&lookup, "DOORWARD_ANALYZER_TIMEOUT_SECS", self.analyzer_timeout_secs);
        if let Some(v) = lookup("DOORWARD_SPOOL_DIR") {
            self.spool_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOORWARD_SKIP_DARK_FRAMES") {
            self.skip_dark_frames = v != "0";
        }
        self.dark_threshold = parse_or(&lookup, "DOORWARD_DARK_THRESHOLD", self.dark_threshold);
        if let Some(v) = lookup("DOORWARD_LOG_FILE") {
            self.log_file = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        self
    }

    pub fn unlock_duration(&self) -> Duration {
        Duration::from_millis(self.unlock_duration_ms)
    }

    pub fn relock_delay(&self) -> Duration {
        Duration::from_millis(self.relock_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }

    pub fn dark_threshold(&self) -> Option<f32> {
        self.skip_dark_frames.then_some(self.dark_threshold)
    }

    /// Authorization and timing policy for the door controller.
    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.authorized_tags.iter().cloned())
            .with_unlock_duration(self.unlock_duration())
            .with_relock_delay(self.relock_delay())
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
                current
            }
        },
        None => current,
    }
}
