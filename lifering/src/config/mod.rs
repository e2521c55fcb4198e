//! Broker configuration loading.
//!
//! The expected YAML structure is (every key optional):
//! ```yaml
//! workers: ["127.0.0.1:8031", "127.0.0.1:8032"]
//! connect_timeout_ms: 5000
//! collect_timeout_ms: 30000
//! telemetry_depth: 1
//! telemetry_backpressure: true
//! max_message_bytes: 67108864
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_collect_timeout_ms() -> u64 {
    30_000
}

fn default_telemetry_depth() -> usize {
    1
}

fn default_telemetry_backpressure() -> bool {
    true
}

/// 64 MiB: large enough for a multi-megacell grid in one message.
fn default_max_message_bytes() -> usize {
    64 * 1024 * 1024
}

// ── BrokerConfig ──────────────────────────────────────────────────────────────

/// Runtime settings of the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Worker pool used when `CompleteTurn` names no workers.
    #[serde(default)]
    pub workers: Vec<String>,

    /// Upper bound on dialling one worker.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on every per-node artifact collection.
    #[serde(default = "default_collect_timeout_ms")]
    pub collect_timeout_ms: u64,

    /// Telemetry fan-in slots (1 = single-slot handoff).
    #[serde(default = "default_telemetry_depth")]
    pub telemetry_depth: usize,

    /// `true`: the generation loop waits for room in the fan-in.
    /// `false`: records the consumer has no room for are dropped.
    #[serde(default = "default_telemetry_backpressure")]
    pub telemetry_backpressure: bool,

    /// gRPC encode/decode limit on both the broker server and node links.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            collect_timeout_ms: default_collect_timeout_ms(),
            telemetry_depth: default_telemetry_depth(),
            telemetry_backpressure: default_telemetry_backpressure(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl BrokerConfig {
    /// Parses `path` into a [`BrokerConfig`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, if the YAML is
    /// structurally invalid, or if a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading broker configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        // An empty file is a valid "all defaults" configuration.
        let config: BrokerConfig = if content.trim().is_empty() {
            warn!("Configuration file is empty, using defaults");
            BrokerConfig::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        debug!(?config, "Broker configuration");
        info!(
            workers = config.workers.len(),
            collect_timeout_ms = config.collect_timeout_ms,
            telemetry_depth = config.telemetry_depth,
            "Broker configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.telemetry_depth >= 1, "telemetry_depth must be at least 1");
        ensure!(self.connect_timeout_ms > 0, "connect_timeout_ms must be positive");
        ensure!(self.collect_timeout_ms > 0, "collect_timeout_ms must be positive");
        ensure!(self.max_message_bytes > 0, "max_message_bytes must be positive");
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
