//! Configuration module for Bossfeed.
//!
//! Loads configuration from a TOML file with environment variable
//! substitution, then applies the `BPTIMER_*` style environment overrides.
//!
//! # Example
//!
//! ```toml
//! [publisher]
//! base_url = "https://api.bptimer.com"
//! api_key = "${BPTIMER_API_KEY}"
//! retry_max = 5
//! retry_backoff_seconds = 1.0
//!
//! [publisher.extra_headers]
//! X-Client = "bossfeed"
//!
//! [tracker]
//! boss_mapping = "data/boss_mapping.json"
//! tick_threshold = 0.5
//!
//! [runtime]
//! log_level = "info"
//! metrics_path = "metrics.json"
//! ```

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "BOSSFEED_CONFIG";

/// Config file used when [`CONFIG_PATH_VAR`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/bossfeed.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BossfeedConfig {
    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Ingestion API delivery settings
#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Retries after the first attempt
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,

    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: f64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sent on every request; non-string values are stringified
    #[serde(default)]
    pub extra_headers: BTreeMap<String, Value>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            retry_max: default_retry_max(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            batch_size: default_batch_size(),
            dry_run: false,
            timeout_ms: default_timeout_ms(),
            extra_headers: BTreeMap::new(),
        }
    }
}

impl PublisherConfig {
    /// Extra headers as `(name, value)` strings.
    pub fn header_strings(&self) -> Vec<(String, String)> {
        self.extra_headers
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

fn default_base_url() -> String {
    "https://api.bptimer.com".to_string()
}

fn default_retry_max() -> u32 {
    5
}

fn default_retry_backoff_seconds() -> f64 {
    1.0
}

fn default_batch_size() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    10000
}

/// Encounter tracker settings
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_boss_mapping")]
    pub boss_mapping: PathBuf,

    #[serde(default = "default_tick_threshold")]
    pub tick_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            boss_mapping: default_boss_mapping(),
            tick_threshold: default_tick_threshold(),
        }
    }
}

fn default_boss_mapping() -> PathBuf {
    PathBuf::from("data/boss_mapping.json")
}

fn default_tick_threshold() -> f64 {
    crate::tracker::DEFAULT_TICK_THRESHOLD
}

/// Process-level settings
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_path: default_metrics_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("metrics.json")
}

impl BossfeedConfig {
    /// Load configuration from the default path or `BOSSFEED_CONFIG`, then
    /// apply process environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path, then apply process
    /// environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;

        info!(
            base_url = %config.publisher.base_url,
            dry_run = config.publisher.dry_run,
            retry_max = config.publisher.retry_max,
            batch_size = config.publisher.batch_size,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse a config file without applying environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML content after `${VAR}` substitution.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let mut config: BossfeedConfig = toml::from_str(&content)?;

        if config
            .publisher
            .api_key
            .as_deref()
            .is_some_and(|key| key.contains("${"))
        {
            warn!("API key contains an unsubstituted environment variable, ignoring it");
            config.publisher.api_key = None;
        }

        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Values that fail to parse leave the current setting in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let publisher = &mut self.publisher;

        if let Some(url) = lookup("BPTIMER_BASE_URL") {
            publisher.base_url = url;
        }
        if let Some(key) = lookup("BPTIMER_API_KEY") {
            publisher.api_key = Some(key);
        }
        override_parsed(&lookup, "RETRY_MAX", &mut publisher.retry_max);
        override_parsed(&lookup, "RETRY_BACKOFF_SECONDS", &mut publisher.retry_backoff_seconds);
        override_parsed(&lookup, "BATCH_SIZE", &mut publisher.batch_size);
        if let Some(dry_run) = lookup("DRY_RUN").as_deref().and_then(parse_bool) {
            publisher.dry_run = dry_run;
        }
        if let Some(raw) = lookup("EXTRA_HEADERS") {
            match serde_json::from_str::<BTreeMap<String, Value>>(&raw) {
                Ok(headers) => publisher.extra_headers = headers,
                Err(e) => warn!(error = %e, "EXTRA_HEADERS is not a JSON object, ignoring"),
            }
        }

        if let Some(path) = lookup("METRICS_PATH").filter(|p| !p.is_empty()) {
            self.runtime.metrics_path = PathBuf::from(path);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.runtime.log_level = level;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let publisher = &self.publisher;

        if !publisher.base_url.starts_with("http://") && !publisher.base_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(format!(
                "base_url '{}' must start with http:// or https://",
                publisher.base_url
            )));
        }

        let backoff = publisher.retry_backoff_seconds;
        if !backoff.is_finite() || backoff <= 0.0 {
            return Err(ConfigError::ValidationError(
                "retry_backoff_seconds must be a finite number greater than 0".to_string(),
            ));
        }

        if publisher.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if !(self.tracker.tick_threshold > 0.0) {
            return Err(ConfigError::ValidationError(
                "tick_threshold must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(var = %key, value = %raw, "Ignoring unparsable override"),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}
