use anyhow::{Context, Result};
use meshid_core::Thresholds;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// CLI configuration: `MESHID_*` environment variables layered over an
/// optional TOML file named by `MESHID_CONFIG`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the inference / identity backend.
    pub backend_url: String,
    pub request_timeout_secs: u64,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    pub jpeg_quality: u8,
    pub thresholds: Thresholds,
    /// Candidates kept after ranking; 0 keeps everything the backend returns.
    pub identify_limit: usize,
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    backend_url: Option<String>,
    request_timeout_secs: Option<u64>,
    camera_device: Option<String>,
    warmup_frames: Option<usize>,
    jpeg_quality: Option<u8>,
    match_threshold: Option<f64>,
    uncertain_threshold: Option<f64>,
    identify_limit: Option<usize>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let file = match std::env::var("MESHID_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                let file = parse_file(&text).with_context(|| format!("invalid config file {path}"))?;
                tracing::debug!(%path, "loaded config file");
                file
            }
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Thresholds::default();
        let match_threshold = env_or(
            &env,
            "MESHID_MATCH_THRESHOLD",
            file.match_threshold,
            defaults.match_threshold,
        );
        let uncertain_threshold = env_or(
            &env,
            "MESHID_UNCERTAIN_THRESHOLD",
            file.uncertain_threshold,
            defaults.uncertain_threshold,
        );
        let thresholds = Thresholds::new(match_threshold, uncertain_threshold)
            .context("invalid similarity thresholds")?;

        Ok(Self {
            backend_url: env("MESHID_BACKEND_URL")
                .or(file.backend_url)
                .unwrap_or_else(|| "http://127.0.0.1:8000".to_string()),
            request_timeout_secs: env_or(
                &env,
                "MESHID_REQUEST_TIMEOUT_SECS",
                file.request_timeout_secs,
                30,
            ),
            camera_device: env("MESHID_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            warmup_frames: env_or(&env, "MESHID_WARMUP_FRAMES", file.warmup_frames, 4),
            jpeg_quality: env_or(&env, "MESHID_JPEG_QUALITY", file.jpeg_quality, 90),
            thresholds,
            identify_limit: env_or(&env, "MESHID_IDENTIFY_LIMIT", file.identify_limit, 5),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_file(text: &str) -> Result<FileConfig> {
    Ok(toml::from_str(text)?)
}

/// Environment value if set and parseable, else the file value, else `default`.
fn env_or<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    file: Option<T>,
    default: T,
) -> T {
    if let Some(raw) = env(key) {
        match raw.parse() {
            Ok(value) => return value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment value"),
        }
    }
    file.unwrap_or(default)
}
