//! Channel location and connection options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ChannelError;

/// Where a channel connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// `ws` or `wss`.
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    /// Query string including the leading `?`, or empty.
    pub query: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: "localhost".to_string(),
            port: None,
            path: "/ws".to_string(),
            query: String::new(),
        }
    }
}

impl Location {
    /// Parse a `ws://` or `wss://` URL.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or uses another scheme.
    pub fn parse(input: &str) -> Result<Self, ChannelError> {
        let url = Url::parse(input).map_err(|e| ChannelError::InvalidLocation(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidLocation(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ChannelError::InvalidLocation(format!("missing host: {input}")))?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port: url.port(),
            path: url.path().to_string(),
            query: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
        })
    }

    /// Connection URL; standard ports are left implicit.
    #[must_use]
    pub fn url(&self) -> String {
        match self.port {
            Some(port) if port != 80 && port != 443 => format!(
                "{}://{}:{}{}{}",
                self.scheme, self.host, port, self.path, self.query
            ),
            _ => format!("{}://{}{}{}", self.scheme, self.host, self.path, self.query),
        }
    }
}

/// Partial location used to override a stored one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationOverride {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<String>,
}

impl Location {
    /// Apply every field set in `overrides`.
    pub fn merge(&mut self, overrides: LocationOverride) {
        if let Some(scheme) = overrides.scheme {
            self.scheme = scheme;
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if overrides.port.is_some() {
            self.port = overrides.port;
        }
        if let Some(path) = overrides.path {
            self.path = path;
        }
        if let Some(query) = overrides.query {
            self.query = query;
        }
    }
}

/// Reconnection policy applied by the transport.
///
/// Durations are milliseconds so the policy reads naturally from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_reconnection_delay_ms: u64,
    pub min_reconnection_delay_ms: u64,
    /// Upper bound of the random extra added to the minimum delay.
    pub reconnection_jitter_ms: u64,
    pub reconnection_delay_grow_factor: f64,
    /// A connection that stayed up this long resets the retry count.
    pub min_uptime_ms: u64,
    pub connection_timeout_ms: u64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnection_delay_ms: 10_000,
            min_reconnection_delay_ms: 1_000,
            reconnection_jitter_ms: 4_000,
            reconnection_delay_grow_factor: 1.3,
            min_uptime_ms: 5_000,
            connection_timeout_ms: 4_000,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retry`; the first attempt is immediate.
    ///
    /// `jitter` is added to the minimum delay before growth is applied.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay(&self, retry: u32, jitter: Duration) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_reconnection_delay_ms;
        let min_ms = self.min_reconnection_delay_ms as f64 + jitter.as_millis() as f64;
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let grown = (min_ms * self.reconnection_delay_grow_factor.powi(exponent)).round();
        if !grown.is_finite() || grown >= max_ms as f64 {
            Duration::from_millis(max_ms)
        } else {
            Duration::from_millis(grown.max(0.0) as u64)
        }
    }

    /// Whether another attempt is allowed after `retries` failures.
    #[must_use]
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retries.is_none_or(|max| retries < max)
    }

    #[must_use]
    pub const fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub const fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.reconnection_jitter_ms)
    }
}

/// Channel options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    pub reconnect: ReconnectPolicy,
    /// Log every frame at debug level.
    pub debug: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            debug: true,
        }
    }
}

/// Static configuration of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub location: Location,
    pub options: ChannelOptions,
}
