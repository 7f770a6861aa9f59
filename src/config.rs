//! Server configuration.
//!
//! Configuration sources are merged in order (later sources override
//! earlier): built-in defaults, then an optional `snc-meister.toml` in the
//! working directory, then `SNCM_*` environment variables. The server takes
//! no command-line flags.

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::enforcer::DEFAULT_ENFORCER_PORT;
use crate::error::{MeisterError, Result};
use crate::snc::Algorithm;

/// Configuration for the admission server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeisterConfig {
    /// Address the RPC listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Latency-analysis algorithm.
    #[serde(default)]
    pub algorithm: Algorithm,

    /// TCP port enforcers listen on.
    #[serde(default = "default_enforcer_port")]
    pub enforcer_port: u16,

    /// Connect/write timeout for enforcer pushes, in milliseconds.
    #[serde(default = "default_enforcer_timeout_ms")]
    pub enforcer_timeout_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:4569".to_string()
}

fn default_enforcer_port() -> u16 {
    DEFAULT_ENFORCER_PORT
}

fn default_enforcer_timeout_ms() -> u64 {
    2000
}

impl Default for MeisterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            algorithm: Algorithm::default(),
            enforcer_port: default_enforcer_port(),
            enforcer_timeout_ms: default_enforcer_timeout_ms(),
        }
    }
}

impl MeisterConfig {
    /// Loads configuration from defaults, `snc-meister.toml`, and `SNCM_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file("snc-meister.toml"))
                .merge(Env::prefixed("SNCM_")),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|err| MeisterError::Config(Box::new(err)))
    }

    /// The enforcer push timeout as a [`Duration`].
    pub fn enforcer_timeout(&self) -> Duration {
        Duration::from_millis(self.enforcer_timeout_ms)
    }
}
