//! Engine configuration.
//!
//! Loaded in layers:
//! 1. Defaults in code
//! 2. Optional `config/flockledger.toml`
//! 3. Environment variables with the `FLOCKLEDGER` prefix and `__` separator
//!    (e.g. `FLOCKLEDGER__CACHE__ENABLED=true`)

use std::time::Duration;

use config::{ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub use flockledger_observability::{LogFormat, LogSettings};

/// Main engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Aggregator memoization.
    pub cache: CacheSettings,

    /// Per-batch lock waits.
    pub locking: LockSettings,

    /// Human-readable movement numbering.
    pub sequence: SequenceSettings,

    /// Ledger defaults.
    pub ledger: LedgerSettings,

    /// Tracing output.
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Memoize "now" balances between commits. Off by default: recomputation is
    /// the reference behaviour.
    pub enabled: bool,

    /// Upper bound on how long a memoized balance is served, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Maximum wait for the locks of the batches a write touches, in milliseconds.
    pub timeout_ms: u64,
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    pub bird_prefix: String,
    pub egg_prefix: String,
    /// Zero-padded width of the numeric part.
    pub width: usize,
}

impl SequenceSettings {
    /// Render a sequence number, e.g. `MA-000042`.
    pub fn format(&self, prefix: &str, n: u64) -> String {
        format!("{prefix}-{n:0width$}", width = self.width)
    }
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            bird_prefix: "MA".to_string(),
            egg_prefix: "MH".to_string(),
            width: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Default for `ProcessOptions::auto_create_destination_inventory`.
    pub auto_create_destination_inventory: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            auto_create_destination_inventory: true,
        }
    }
}

impl Settings {
    /// Load configuration from the optional file and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(File::with_name("config/flockledger").required(false))
            .add_source(
                Environment::with_prefix("FLOCKLEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse settings from TOML text (defaults fill the gaps).
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
