//! Client Configuration Settings
//!
//! Configuration types for stream clients, loaded from environment
//! variables. Every value the binary reads goes through a lookup function so
//! tests can supply a map instead of mutating the process environment.

use std::time::Duration;

/// How the connection loop is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// A task on the caller's tokio runtime; events cross as native values.
    #[default]
    Task,
    /// A dedicated OS thread with its own runtime; events cross serialized.
    Isolated,
}

impl WorkerMode {
    /// Parse mode from string, falling back to `Task`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "isolated" | "thread" => Self::Isolated,
            _ => Self::Task,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Isolated => "isolated",
        }
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSettings {
    /// Delay growth factor per failed attempt (1.0 = fixed interval).
    pub multiplier: f64,
    /// Cap on a single reconnect delay.
    pub max_delay: Duration,
    /// Consecutive attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Random spread applied to each delay as a fraction (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 0, // Unlimited
            jitter_factor: 0.0,
        }
    }
}

/// Settings for one stream client. Immutable once the client is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Reconnect after the connection drops or an attempt fails.
    pub auto_reconnect: bool,
    /// Wait between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Maximum bytes returned by one socket read.
    pub buffer_size: usize,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Bound on a single read so commands and cancellation are seen promptly.
    pub read_poll_interval: Duration,
    /// Capacity of the inbound event channel.
    pub inbound_capacity: usize,
    /// Capacity of the command channel.
    pub command_capacity: usize,
    /// Bound on each join during shutdown.
    pub shutdown_timeout: Duration,
    /// Connection loop hosting strategy.
    pub worker_mode: WorkerMode,
    /// Reconnect backoff.
    pub backoff: BackoffSettings,
}

impl ClientConfig {
    /// Default reconnect interval.
    pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
    /// Default read size.
    pub const DEFAULT_BUFFER_SIZE: usize = 4096;
    /// Default connect timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default read poll interval.
    pub const DEFAULT_READ_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Default inbound channel capacity.
    pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;
    /// Default command channel capacity.
    pub const DEFAULT_COMMAND_CAPACITY: usize = 64;
    /// Default per-join shutdown bound.
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

    /// Create a configuration with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auto_reconnect: true,
            reconnect_interval: Self::DEFAULT_RECONNECT_INTERVAL,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            read_poll_interval: Self::DEFAULT_READ_POLL_INTERVAL,
            inbound_capacity: Self::DEFAULT_INBOUND_CAPACITY,
            command_capacity: Self::DEFAULT_COMMAND_CAPACITY,
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
            worker_mode: WorkerMode::default(),
            backoff: BackoffSettings::default(),
        }
    }

    /// Set whether the client reconnects.
    #[must_use]
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Set the reconnect interval.
    #[must_use]
    pub const fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the read size.
    #[must_use]
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the inbound channel capacity.
    #[must_use]
    pub const fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Set the worker mode.
    #[must_use]
    pub const fn with_worker_mode(mut self, mode: WorkerMode) -> Self {
        self.worker_mode = mode;
        self
    }

    /// Set the backoff settings.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = backoff;
        self
    }

    /// `host:port` as passed to the resolver.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the configuration before a client is built.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("host".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "0"));
        }
        for (key, value) in [
            ("buffer_size", self.buffer_size),
            ("inbound_capacity", self.inbound_capacity),
            ("command_capacity", self.command_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(key, "0"));
            }
        }
        for (key, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_poll_interval", self.read_poll_interval),
            ("shutdown_timeout", self.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "0ms"));
            }
        }
        let multiplier = self.backoff.multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(ConfigError::invalid(
                "backoff.multiplier",
                multiplier.to_string(),
            ));
        }
        let jitter = self.backoff.jitter_factor;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::invalid("backoff.jitter_factor", jitter.to_string()));
        }
        Ok(())
    }
}

/// Complete binary configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Registry name of the configured client.
    pub name: String,
    /// Client settings.
    pub client: ClientConfig,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl AppConfig {
    /// Default client name.
    pub const DEFAULT_NAME: &'static str = "default";
    /// Default health port.
    pub const DEFAULT_HEALTH_PORT: u16 = 8083;

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required values are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("STREAM_CLIENT_HOST")
            .ok_or_else(|| ConfigError::MissingEnvVar("STREAM_CLIENT_HOST".to_string()))?;
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_CLIENT_HOST".to_string()));
        }

        let port_raw = lookup("STREAM_CLIENT_PORT")
            .ok_or_else(|| ConfigError::MissingEnvVar("STREAM_CLIENT_PORT".to_string()))?;
        let port = match port_raw.trim().parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => return Err(ConfigError::invalid("STREAM_CLIENT_PORT", port_raw)),
        };

        let name = lookup("STREAM_CLIENT_NAME")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_NAME.to_string());

        let defaults = ClientConfig::new(host.trim(), port);
        let backoff = BackoffSettings {
            multiplier: parse_f64(
                &lookup,
                "STREAM_CLIENT_BACKOFF_MULTIPLIER",
                BackoffSettings::default().multiplier,
            ),
            max_delay: parse_duration_millis(
                &lookup,
                "STREAM_CLIENT_BACKOFF_MAX_MS",
                BackoffSettings::default().max_delay,
            ),
            max_attempts: parse_u32(
                &lookup,
                "STREAM_CLIENT_MAX_RECONNECT_ATTEMPTS",
                BackoffSettings::default().max_attempts,
            ),
            jitter_factor: parse_f64(
                &lookup,
                "STREAM_CLIENT_BACKOFF_JITTER",
                BackoffSettings::default().jitter_factor,
            ),
        };

        let client = ClientConfig {
            auto_reconnect: parse_bool(
                &lookup,
                "STREAM_CLIENT_AUTO_RECONNECT",
                defaults.auto_reconnect,
            ),
            reconnect_interval: parse_duration_millis(
                &lookup,
                "STREAM_CLIENT_RECONNECT_INTERVAL_MS",
                defaults.reconnect_interval,
            ),
            buffer_size: parse_usize(&lookup, "STREAM_CLIENT_BUFFER_SIZE", defaults.buffer_size),
            connect_timeout: parse_duration_millis(
                &lookup,
                "STREAM_CLIENT_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            ),
            worker_mode: lookup("STREAM_CLIENT_WORKER_MODE")
                .map(|s| WorkerMode::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            backoff,
            ..defaults
        };
        client.validate()?;

        Ok(Self {
            name,
            client,
            health_port: parse_u16(&lookup, "STREAM_CLIENT_HEALTH_PORT", Self::DEFAULT_HEALTH_PORT),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Value is empty.
    #[error("{0} cannot be empty")]
    EmptyValue(String),
    /// Value is present but unusable.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Offending value.
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

fn parse_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    })
}

fn parse_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_f64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
