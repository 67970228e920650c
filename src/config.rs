//! Configuration module for the cell uplink service.
//!
//! This module provides environment-based configuration: collector address,
//! sampling cadence, buffer capacity, retry budgets and network timeouts.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::DeliveryPolicy;

/// Default collector base URL
const DEFAULT_COLLECTOR_URL: &str = "http://localhost:8080";

/// Path of the ingest endpoint relative to the collector base URL
const INGEST_PATH: &str = "/api/cellinfo";

/// Path of the health endpoint relative to the collector base URL
const HEALTH_PATH: &str = "/api/health";

/// Default sampling period in milliseconds
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1_000;

/// Sampling period bounds in milliseconds
const MIN_SAMPLE_INTERVAL_MS: u64 = 50;
const MAX_SAMPLE_INTERVAL_MS: u64 = 60_000;

/// Default number of samples that trigger a delivery
const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Maximum allowed buffer capacity to keep batches small
const MAX_BUFFER_CAPACITY: usize = 10_000;

/// Default primary send attempts before health checking
const DEFAULT_SEND_ATTEMPTS: u32 = 5;

/// Default delay between primary send attempts in milliseconds
const DEFAULT_SEND_RETRY_DELAY_MS: u64 = 2_000;

/// Default number of health-check rounds before a batch is discarded
const DEFAULT_HEALTH_CHECK_ATTEMPTS: u32 = 12;

/// Default spacing of health-check rounds in milliseconds
const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;

/// Default connect and read timeouts in milliseconds
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;

/// Default well-known host for the external reachability probe
const DEFAULT_PROBE_HOST: &str = "8.8.8.8:53";

/// Default timeout of the external reachability probe in milliseconds
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Upper bound for any single timeout or delay setting in milliseconds
const MAX_DURATION_MS: u64 = 600_000;

/// Configuration for the cell uplink service.
///
/// All settings can be configured via environment variables prefixed with
/// `CELL_UPLINK_`; see [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Collector base URL without a trailing slash
    pub collector_url: String,

    /// Full URL of the ingest endpoint
    pub ingest_url: String,

    /// Full URL of the health endpoint
    pub health_url: String,

    /// Period of the sampling task
    pub sample_interval: Duration,

    /// Number of buffered samples that triggers a delivery
    pub buffer_capacity: usize,

    /// Primary send attempts per batch before health checking
    pub send_attempts: u32,

    /// Delay between primary send attempts
    pub send_retry_delay: Duration,

    /// Health-check rounds per batch before it is discarded
    pub health_check_attempts: u32,

    /// Delay between health-check rounds
    pub health_check_interval: Duration,

    /// TCP connect timeout for collector requests
    pub connect_timeout: Duration,

    /// Read timeout for collector requests
    pub read_timeout: Duration,

    /// `host:port` used by the external reachability probe
    pub probe_host: String,

    /// Timeout of the external reachability probe
    pub probe_timeout: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `CELL_UPLINK_COLLECTOR_URL`: collector base URL (default: http://localhost:8080)
    /// - `CELL_UPLINK_SAMPLE_INTERVAL_MS`: sampling period (default: 1000)
    /// - `CELL_UPLINK_BUFFER_CAPACITY`: samples per batch (default: 10)
    /// - `CELL_UPLINK_SEND_ATTEMPTS`: primary attempts (default: 5)
    /// - `CELL_UPLINK_SEND_RETRY_DELAY_MS`: delay between attempts (default: 2000)
    /// - `CELL_UPLINK_HEALTH_CHECK_ATTEMPTS`: health-check rounds (default: 12)
    /// - `CELL_UPLINK_HEALTH_CHECK_INTERVAL_MS`: health-check spacing (default: 5000)
    /// - `CELL_UPLINK_CONNECT_TIMEOUT_MS` / `CELL_UPLINK_READ_TIMEOUT_MS` (default: 5000)
    /// - `CELL_UPLINK_PROBE_HOST`: external probe target (default: 8.8.8.8:53)
    /// - `CELL_UPLINK_PROBE_TIMEOUT_MS`: external probe timeout (default: 3000)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed or out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cell_uplink::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Collector: {}", config.collector_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let collector_url = parse_collector_url(&lookup)?;

        let sample_interval_ms = parse_bounded(
            &lookup,
            "CELL_UPLINK_SAMPLE_INTERVAL_MS",
            DEFAULT_SAMPLE_INTERVAL_MS,
            MIN_SAMPLE_INTERVAL_MS,
            MAX_SAMPLE_INTERVAL_MS,
        )?;
        let buffer_capacity = parse_bounded(
            &lookup,
            "CELL_UPLINK_BUFFER_CAPACITY",
            DEFAULT_BUFFER_CAPACITY,
            1,
            MAX_BUFFER_CAPACITY,
        )?;
        let send_attempts = parse_bounded(
            &lookup,
            "CELL_UPLINK_SEND_ATTEMPTS",
            DEFAULT_SEND_ATTEMPTS,
            1,
            100,
        )?;
        let send_retry_delay_ms = parse_millis(
            &lookup,
            "CELL_UPLINK_SEND_RETRY_DELAY_MS",
            DEFAULT_SEND_RETRY_DELAY_MS,
        )?;
        let health_check_attempts = parse_bounded(
            &lookup,
            "CELL_UPLINK_HEALTH_CHECK_ATTEMPTS",
            DEFAULT_HEALTH_CHECK_ATTEMPTS,
            1,
            1_000,
        )?;
        let health_check_interval_ms = parse_millis(
            &lookup,
            "CELL_UPLINK_HEALTH_CHECK_INTERVAL_MS",
            DEFAULT_HEALTH_CHECK_INTERVAL_MS,
        )?;
        let connect_timeout_ms = parse_millis(
            &lookup,
            "CELL_UPLINK_CONNECT_TIMEOUT_MS",
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?;
        let read_timeout_ms =
            parse_millis(&lookup, "CELL_UPLINK_READ_TIMEOUT_MS", DEFAULT_READ_TIMEOUT_MS)?;
        let probe_timeout_ms = parse_millis(
            &lookup,
            "CELL_UPLINK_PROBE_TIMEOUT_MS",
            DEFAULT_PROBE_TIMEOUT_MS,
        )?;

        let probe_host = lookup("CELL_UPLINK_PROBE_HOST")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_PROBE_HOST.to_string());
        if !probe_host.contains(':') {
            return Err(ConfigError::for_var(
                "CELL_UPLINK_PROBE_HOST",
                format!("'{}' must be of the form host:port", probe_host),
            ));
        }

        Ok(Self {
            ingest_url: format!("{}{}", collector_url, INGEST_PATH),
            health_url: format!("{}{}", collector_url, HEALTH_PATH),
            collector_url,
            sample_interval: Duration::from_millis(sample_interval_ms),
            buffer_capacity,
            send_attempts,
            send_retry_delay: Duration::from_millis(send_retry_delay_ms),
            health_check_attempts,
            health_check_interval: Duration::from_millis(health_check_interval_ms),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            read_timeout: Duration::from_millis(read_timeout_ms),
            probe_host,
            probe_timeout: Duration::from_millis(probe_timeout_ms),
        })
    }

    /// Retry-related settings in the form the delivery engine consumes.
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            batch_size: self.buffer_capacity,
            send_attempts: self.send_attempts,
            send_retry_delay: self.send_retry_delay,
            health_check_attempts: self.health_check_attempts,
            health_check_interval: self.health_check_interval,
            probe_host: self.probe_host.clone(),
            health_url: self.health_url.clone(),
        }
    }
}

impl Default for Config {
    /// Create a default configuration without reading the environment.
    fn default() -> Self {
        Self {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            ingest_url: format!("{}{}", DEFAULT_COLLECTOR_URL, INGEST_PATH),
            health_url: format!("{}{}", DEFAULT_COLLECTOR_URL, HEALTH_PATH),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            send_retry_delay: Duration::from_millis(DEFAULT_SEND_RETRY_DELAY_MS),
            health_check_attempts: DEFAULT_HEALTH_CHECK_ATTEMPTS,
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            probe_host: DEFAULT_PROBE_HOST.to_string(),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

fn parse_collector_url<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_var = "CELL_UPLINK_COLLECTOR_URL";
    let raw = lookup(env_var).unwrap_or_else(|| DEFAULT_COLLECTOR_URL.to_string());
    let url = raw.trim().trim_end_matches('/').to_string();

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::for_var(
            env_var,
            format!("'{}' must start with http:// or https://", raw),
        ));
    }

    Ok(url)
}

/// Parse a numeric variable, falling back to `default` when unset.
fn parse_bounded<F, T>(lookup: &F, env_var: &str, default: T, min: T, max: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Display + Copy,
{
    let Some(value) = lookup(env_var) else {
        return Ok(default);
    };

    let parsed: T = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value)))?;

    if parsed < min {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} is below minimum ({})", parsed, min),
        ));
    }
    if parsed > max {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} exceeds maximum ({})", parsed, max),
        ));
    }

    Ok(parsed)
}

fn parse_millis<F>(lookup: &F, env_var: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_bounded(lookup, env_var, default, 0, MAX_DURATION_MS)
}
