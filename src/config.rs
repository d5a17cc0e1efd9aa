//! TOML configuration for the data-plane harness.
//!
//! Every section has compiled-in defaults; a file only needs the keys it
//! overrides. The file location can be pinned with `DUALTOR_IO_CONFIG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::io::TrafficDirection;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DUALTOR_IO_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/dualtor-io/config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub send_interval_ms: SendIntervals,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded harness configuration");
        Ok(config)
    }

    /// Try, in order: `$DUALTOR_IO_CONFIG`, the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback",
                        CONFIG_ENV
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// IO coordination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Pause after sender/sniffer are up before the fault action runs.
    pub settle_delay_ms: u64,
    /// Poll interval while waiting for an early stop.
    pub drain_poll_interval_ms: u64,
    /// How long the sender/sniffer may take to report ready.
    pub startup_timeout_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 15_000,
            drain_poll_interval_ms: 500,
            startup_timeout_ms: 60_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-direction send intervals
// ---------------------------------------------------------------------------

/// Default gap between two sent packets, per traffic direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendIntervals {
    pub t1_to_server: u64,
    pub server_to_t1: u64,
    pub soc_to_t1: u64,
    pub t1_to_soc: u64,
    pub server_to_server: u64,
}

impl Default for SendIntervals {
    fn default() -> Self {
        Self {
            t1_to_server: 100,
            server_to_t1: 10,
            soc_to_t1: 10,
            t1_to_soc: 10,
            server_to_server: 10,
        }
    }
}

impl SendIntervals {
    pub fn for_direction(&self, direction: TrafficDirection) -> Duration {
        let ms = match direction {
            TrafficDirection::T1ToServer => self.t1_to_server,
            TrafficDirection::ServerToT1 => self.server_to_t1,
            TrafficDirection::SocToT1 => self.soc_to_t1,
            TrafficDirection::T1ToSoc => self.t1_to_soc,
            TrafficDirection::ServerToServer => self.server_to_server,
        };
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Where the sniffer leaves its packet capture.
    pub capture_path: PathBuf,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            capture_path: PathBuf::from("/tmp/capture.pcap"),
        }
    }
}
