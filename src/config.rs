// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::model::Camera;
use crate::retry::RetryPolicy;

/// Top-level configuration, loaded from an optional TOML file and then
/// overridden by command-line flags.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Vendor API credentials and transport options.
    #[serde(default)]
    pub api: ApiConfig,
    /// Download and archive tuning.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Cameras known without asking the vendor API.
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

/// Vendor API connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// API key sent as `x-auth-apikey`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Client certificate (PEM). Requires `private_key`.
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// Private key (PEM) matching `cert`.
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    /// Download over the WAN media URIs instead of the camera's LAN ones.
    #[serde(default)]
    pub use_wan: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Lifetime requested for the federated media session token. The client
    /// renews it at 90% of this and again whenever a camera rejects it.
    #[serde(default = "default_session_duration")]
    pub session_duration_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            cert: None,
            private_key: None,
            use_wan: false,
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            session_duration_secs: default_session_duration(),
        }
    }
}

/// Pipeline parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Root directory; one sub-directory is created per camera.
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// Upper bound on simultaneous segment transfers.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Attempts per segment, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempts per camera listing, including the first.
    #[serde(default = "default_max_attempts")]
    pub catalog_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Holes up to this many seconds are treated as encoder jitter.
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance_secs: u64,
    /// How long in-flight transfers may run on after cancellation.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
    /// Capacity of the outcome channel between workers and the controller.
    #[serde(default = "default_outcome_buffer")]
    pub outcome_buffer: usize,
    /// Also write one playable file per camera (init header + segments).
    #[serde(default = "default_stitch")]
    pub stitch: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            catalog_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            gap_tolerance_secs: default_gap_tolerance(),
            cancel_grace_secs: default_cancel_grace(),
            outcome_buffer: default_outcome_buffer(),
            stitch: default_stitch(),
        }
    }
}

/// Per-camera entry of the static camera table.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl From<&CameraConfig> for Camera {
    fn from(c: &CameraConfig) -> Self {
        Camera { id: c.id.clone(), name: c.name.clone(), location_id: c.location.clone() }
    }
}

fn default_base_url() -> String { "https://api2.rhombussystems.com".into() }
fn default_request_timeout() -> u64 { 30 }
fn default_session_duration() -> u64 { 3600 }
fn default_destination() -> PathBuf { PathBuf::from("./") }
fn default_max_concurrency() -> usize { 8 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 500 }
fn default_backoff_max_ms() -> u64 { 10_000 }
fn default_gap_tolerance() -> u64 { 1 }
fn default_cancel_grace() -> u64 { 10 }
fn default_outcome_buffer() -> usize { 64 }
fn default_stitch() -> bool { true }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("Cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| VaultError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.archive;
        if a.max_concurrency == 0 {
            return Err(VaultError::Config("max_concurrency must be > 0".into()));
        }
        if a.max_attempts == 0 || a.catalog_attempts == 0 {
            return Err(VaultError::Config("attempt limits must be > 0".into()));
        }
        if a.outcome_buffer == 0 {
            return Err(VaultError::Config("outcome_buffer must be > 0".into()));
        }
        if a.backoff_base_ms > a.backoff_max_ms {
            return Err(VaultError::Config("backoff_base_ms must not exceed backoff_max_ms".into()));
        }
        if self.api.cert.is_some() != self.api.private_key.is_some() {
            return Err(VaultError::Config("cert and private_key must be given together".into()));
        }
        let mut seen = HashSet::new();
        for cam in &self.cameras {
            if !seen.insert(cam.id.as_str()) {
                return Err(VaultError::Config(format!("Camera '{}' listed twice", cam.id)));
            }
        }
        Ok(())
    }

    /// Retry policy for segment transfers.
    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.archive.max_attempts, self.backoff_base(), self.backoff_max())
    }

    /// Retry policy for per-camera listings.
    pub fn catalog_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.archive.catalog_attempts, self.backoff_base(), self.backoff_max())
    }

    pub fn static_cameras(&self) -> Vec<Camera> {
        self.cameras.iter().map(Camera::from).collect()
    }

    fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.archive.backoff_base_ms)
    }

    fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.archive.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.archive.max_concurrency, 8);
        assert_eq!(cfg.archive.max_attempts, 3);
        assert_eq!(cfg.archive.gap_tolerance_secs, 1);
        assert!(cfg.archive.stitch);
        assert_eq!(cfg.api.base_url, "https://api2.rhombussystems.com");
    }

    #[test]
    fn parses_sections_and_cameras() {
        let cfg = Config::from_toml(
            r#"
            [api]
            api_key = "k"
            use_wan = true

            [archive]
            destination = "/mnt/nas"
            max_concurrency = 2

            [[cameras]]
            id = "cam-a"
            name = "Lobby"
            location = "hq"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api.api_key.as_deref(), Some("k"));
        assert!(cfg.api.use_wan);
        assert_eq!(cfg.archive.destination, PathBuf::from("/mnt/nas"));
        let cams = cfg.static_cameras();
        assert_eq!(cams[0].name.as_deref(), Some("Lobby"));
        assert_eq!(cams[0].location_id.as_deref(), Some("hq"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_toml("[archive]\nmax_concurrency = 0").is_err());
        assert!(Config::from_toml("[api]\ncert = \"c.pem\"").is_err());
        assert!(Config::from_toml("[[cameras]]\nid = \"a\"\n[[cameras]]\nid = \"a\"").is_err());
    }

    #[test]
    fn policies_follow_config() {
        let mut cfg = Config::default();
        cfg.archive.max_attempts = 5;
        cfg.archive.catalog_attempts = 2;
        assert_eq!(cfg.fetch_policy().max_attempts, 5);
        assert_eq!(cfg.catalog_policy().max_attempts, 2);
        assert_eq!(cfg.fetch_policy().base_delay, Duration::from_millis(500));
    }
}
