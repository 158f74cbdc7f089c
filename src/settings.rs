//! Node configuration, layered from an optional file and `EMBER_*`
//! environment variables on top of built-in defaults.

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use ember_core::params::ChainParams;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Consensus parameters; defaults describe the public chain.
    pub chain: ChainParams,
    /// Hex seeds of local forging keys. Empty disables forging.
    pub forging_key_seeds: Vec<String>,
    /// Generator poll interval. Block timestamps are second-granular, so
    /// anything below 1000 buys nothing.
    pub poll_interval_ms: u64,
    /// Generator back-off after a storage failure.
    pub error_backoff_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            chain: ChainParams::default(),
            forging_key_seeds: Vec::new(),
            poll_interval_ms: 1_000,
            error_backoff_secs: 5,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the config file (when given), then
    /// environment overrides like `EMBER__POLL_INTERVAL_MS`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("EMBER").separator("__"));
        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }
}
