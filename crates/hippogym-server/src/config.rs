//! Server configuration, loaded from TOML.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//!
//! [recording]
//! dir = "trials"
//! per_episode = true
//!
//! [trial]
//! framerate = 30
//! max_episodes = 20
//!
//! [[trial.steps]]
//! name = "practice"
//! experiment = { id = "grid_walk", options = { size = 4 } }
//! max_episodes = 2
//! key_actions = { ArrowLeft = "left", ArrowRight = "right" }
//! ```
//!
//! `[[arms]]` tables (each a full trial with its own `steps`) select the
//! seeded resolver instead of `[trial]`.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use hippogym_core::HippoError;
use hippogym_core::experiment::{ExperimentFactory, ExperimentSpec};
use hippogym_core::trial_config::{TrialConfig, TrialSpec, TrialStepSpec};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::communicator::DEFAULT_MAX_CONNECTIONS;
use crate::experiments::GRID_WALK;
use crate::recorder::RecordingConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] HippoError),

    #[error("cannot resolve listen address {0}")]
    Address(String),
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    5000
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Browser origins allowed to open a socket. Empty allows all.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub trial: Option<TrialSpec>,
    #[serde(default)]
    pub arms: Option<Vec<TrialSpec>>,
}

impl ServerConfig {
    /// Load from `path`, or fall back to the built-in defaults when no path
    /// is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            tracing::debug!("no config file given, using defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Build the trial resolver. `[[arms]]` wins over `[trial]`; with neither
    /// the default grid-walk trial is used.
    pub fn trial_config(&self) -> Result<TrialConfig, ConfigError> {
        let config = match (&self.arms, &self.trial) {
            (Some(arms), trial) => {
                if trial.is_some() {
                    tracing::warn!("both [trial] and [[arms]] present, using [[arms]]");
                }
                TrialConfig::seeded(arms.clone())?
            }
            (None, Some(trial)) => TrialConfig::Deterministic(trial.clone()),
            (None, None) => TrialConfig::Deterministic(default_trial()),
        };
        Ok(config)
    }

    /// Parse and validate everything that can fail at startup.
    pub fn check(&self, factory: &dyn ExperimentFactory) -> Result<TrialConfig, ConfigError> {
        let trial_config = self.trial_config()?;
        trial_config.validate(factory)?;
        self.addr()?;
        Ok(trial_config)
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let host_port = format!("{}:{}", self.server.host, self.server.port);
        host_port
            .to_socket_addrs()
            .map_err(|_| ConfigError::Address(host_port.clone()))?
            .next()
            .ok_or(ConfigError::Address(host_port))
    }
}

/// Single grid-walk step driven by the arrow keys.
pub fn default_trial() -> TrialSpec {
    let step = TrialStepSpec::new("grid_walk", ExperimentSpec::new(GRID_WALK))
        .with_key_action("ArrowLeft", Value::from("left"))
        .with_key_action("ArrowRight", Value::from("right"))
        .with_key_action("ArrowUp", Value::from("up"))
        .with_key_action("ArrowDown", Value::from("down"));
    TrialSpec::new(vec![step])
}
