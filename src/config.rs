use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_EXPORT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TSDB_URL: &str = "https://tsdb.qiniu.com";
pub const DEFAULT_REGION: &str = "nb";

/// Configuration of the pipeline output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline API endpoint (`http` or `https`).
    pub url: String,
    /// TSDB API endpoint the exports route into.
    #[serde(default = "default_tsdb_url")]
    pub tsdb_url: String,
    /// Pipeline repo, and TSDB repo of the same name.
    pub repo: String,
    /// Region used when repos are created.
    #[serde(default = "default_region")]
    pub region: String,
    pub ak: String,
    pub sk: String,
    /// Create the repo and grow its schema from the observed points.
    #[serde(default)]
    pub auto_create_repo: bool,
    /// Per-request timeout. Zero disables the deadline entirely, which lets a
    /// stalled backend block the write path forever; not recommended.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Minimum time between export refresh sweeps after successful writes.
    /// Zero disables the sweep.
    #[serde(
        default = "default_export_refresh_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub export_refresh_interval: Duration,
}

impl PipelineConfig {
    /// # Errors
    ///
    /// Errors if the TOML does not describe a valid pipeline output.
    pub fn from_toml(table: toml::Table) -> Result<Self, ConfigError> {
        let config: Self = toml::Value::Table(table).try_into()?;
        config.validate()?;

        Ok(config)
    }

    /// # Errors
    ///
    /// Errors on the first missing or malformed option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_endpoint(&self.url)?;
        parse_endpoint(&self.tsdb_url)?;
        require("repo", &self.repo)?;
        require("region", &self.region)?;
        require("ak", &self.ak)?;
        require("sk", &self.sk)
    }
}

/// Configuration of the TSDB output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TsdbConfig {
    /// TSDB API endpoint (`http` or `https`).
    pub url: String,
    pub repo: String,
    pub ak: String,
    pub sk: String,
    /// Create missing series named by the batch.
    #[serde(default)]
    pub auto_create_series: bool,
    /// Retention of auto-created series, `1d` to `30d`. Empty or unset uses
    /// the backend default.
    #[serde(default)]
    pub retention_policy: Option<String>,
    /// Per-request timeout. Zero disables the deadline entirely, which lets a
    /// stalled backend block the write path forever; not recommended.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl TsdbConfig {
    /// # Errors
    ///
    /// Errors if the TOML does not describe a valid TSDB output.
    pub fn from_toml(table: toml::Table) -> Result<Self, ConfigError> {
        let config: Self = toml::Value::Table(table).try_into()?;
        config.validate()?;

        Ok(config)
    }

    /// # Errors
    ///
    /// Errors on the first missing or malformed option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_endpoint(&self.url)?;
        require("repo", &self.repo)?;
        require("ak", &self.ak)?;
        require("sk", &self.sk)?;
        if let Some(retention) = self.retention() {
            validate_retention(retention)?;
        }

        Ok(())
    }

    /// Configured retention, with an empty string meaning unset.
    #[must_use]
    pub fn retention(&self) -> Option<&str> {
        self.retention_policy.as_deref().filter(|r| !r.is_empty())
    }
}

/// Possible failure while loading or applying output configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse url; url={url}; err={source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Url scheme must be http(s); scheme={0}")]
    UnsupportedScheme(String),
    #[error("Missing required option; key={0}")]
    MissingField(&'static str),
    #[error("Retention policy must be 1d to 30d; retention={0}")]
    InvalidRetention(String),
    #[error("Parse toml; err={0}")]
    Toml(#[from] toml::de::Error),
    #[error("Unknown output; name={0}")]
    UnknownOutput(String),
}

/// Parses a backend endpoint, accepting only `http` and `https`.
///
/// # Errors
///
/// Errors if `url` does not parse or uses another scheme.
pub fn parse_endpoint(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url)
        .map_err(|source| ConfigError::InvalidUrl { url: url.to_string(), source })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::UnsupportedScheme(scheme.to_string())),
    }
}

/// Accepts `<n>d` with `n` in `1..=30` and no leading zero.
///
/// # Errors
///
/// Errors if `retention` is outside the supported range.
pub fn validate_retention(retention: &str) -> Result<(), ConfigError> {
    let valid = retention
        .strip_suffix('d')
        .filter(|days| !days.starts_with('0') && days.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|days| days.parse::<u8>().ok())
        .is_some_and(|days| (1..=30).contains(&days));

    match valid {
        true => Ok(()),
        false => Err(ConfigError::InvalidRetention(retention.to_string())),
    }
}

fn require(key: &'static str, value: &str) -> Result<(), ConfigError> {
    match value.trim().is_empty() {
        true => Err(ConfigError::MissingField(key)),
        false => Ok(()),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;

    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

const fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

const fn default_export_refresh_interval() -> Duration {
    DEFAULT_EXPORT_REFRESH_INTERVAL
}

fn default_tsdb_url() -> String {
    DEFAULT_TSDB_URL.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}
