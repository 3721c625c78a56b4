//! Configuration Loader
//!
//! Layers listener configuration from built-in defaults, an optional config
//! file (format inferred from its extension), and prefixed environment
//! variables, in that order of precedence.

use super::ListenerConfig;
use crate::error::ListenerResult;
use config::{Config, Environment, File};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable prefix, e.g. `QUEUE_BREAKER_FAULT_THRESHOLD=3`
pub const DEFAULT_ENV_PREFIX: &str = "QUEUE_BREAKER";

/// Builds a [`ListenerConfig`] from file and environment sources
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from `path`; the file must exist
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load and validate the configuration
    pub fn load(&self) -> ListenerResult<ListenerConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!("Loading listener configuration from {}", path.display());
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(&self.env_prefix).try_parsing(true));

        let config: ListenerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %detect_environment(),
            queue_name = %config.queue_name,
            connection = %mask_secret(&config.connection),
            fault_window_ms = config.fault_window_ms,
            fault_threshold = config.fault_threshold,
            min_open_duration_ms = config.min_open_duration_ms,
            max_open_duration_ms = config.max_open_duration_ms,
            max_concurrent_calls = config.max_concurrent_calls,
            "🔧 Listener configuration loaded"
        );

        Ok(config)
    }
}

/// Current deployment environment
pub fn detect_environment() -> String {
    env::var("QUEUE_BREAKER_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Mask a secret for logging, keeping only the first and last two characters
pub(crate) fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => "[EMPTY]".to_string(),
        1..=4 => "[MASKED: ***]".to_string(),
        len => {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[len - 2..].iter().collect();
            format!("[MASKED: {head}***{tail}]")
        }
    }
}
