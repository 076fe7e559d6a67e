//! Connection configuration.
//!
//! All defaults live here and are applied by [`ConnectionConfig::new`];
//! nothing is read from process-wide state except by the explicit
//! [`ConnectionConfig::from_env`] constructor.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppOpticsError, Result};
use crate::measurement::TagSet;
use crate::retry::BackoffPolicy;
use crate::sanitize::Sanitizer;

/// Default API host.
pub const DEFAULT_HOSTNAME: &str = "api.appoptics.com";

/// Default path prefix for every resource.
pub const DEFAULT_BASE_PATH: &str = "/v1/";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "APPOPTICS_TOKEN";

/// URL scheme used to reach the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain HTTP, mostly useful against local test servers.
    Http,
    /// HTTPS (default).
    #[default]
    Https,
}

impl Protocol {
    /// The scheme string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AppOpticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(AppOpticsError::invalid(format!(
                "unsupported protocol: {other}"
            ))),
        }
    }
}

/// Everything needed to build a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// API token. Sent as the Basic-Auth user with an empty password.
    pub api_key: String,
    /// API host name.
    pub hostname: String,
    /// Path prefix prepended to every resource path.
    pub base_path: String,
    /// URL scheme.
    pub protocol: Protocol,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Top-level tags applied to submissions that carry none of their own.
    pub tags: TagSet,
    /// Transformation applied to metric names before they hit the wire.
    pub sanitizer: Sanitizer,
    /// Overrides the computed `User-Agent` header.
    pub user_agent: Option<String>,
    /// Retry policy for 5xx responses.
    pub backoff: BackoffPolicy,
}

impl ConnectionConfig {
    /// Creates a config with the default host, path, protocol and timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            protocol: Protocol::default(),
            timeout: DEFAULT_TIMEOUT,
            tags: TagSet::new(),
            sanitizer: Sanitizer::default(),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Creates a config whose token comes from `APPOPTICS_TOKEN`.
    ///
    /// A missing variable yields an empty token; the API will answer 401.
    pub fn from_env() -> Self {
        Self::new(std::env::var(TOKEN_ENV).unwrap_or_default())
    }

    /// Sets the API host.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the resource path prefix.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Sets the URL scheme.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the top-level tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Adds one top-level tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets the metric name sanitizer.
    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Overrides the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Checks the config before any request is made.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the API key is not ASCII or the hostname
    /// is empty.
    pub fn validate(&self) -> Result<()> {
        if !self.api_key.is_ascii() {
            return Err(AppOpticsError::invalid(
                "AppOptics only supports ascii for the credentials",
            ));
        }
        if self.hostname.is_empty() {
            return Err(AppOpticsError::invalid("hostname must not be empty"));
        }
        Ok(())
    }
}
