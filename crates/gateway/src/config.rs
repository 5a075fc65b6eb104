// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration
//!
//! Hierarchical loading through the `config` crate, validated newtypes for
//! the port and the request deadline, and the cross-field checks that have to
//! pass before a server instance is created.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment as ConfigEnv, File};
use serde::{Deserialize, Deserializer, Serialize, de};
use url::Url;

use crate::{
    error::{ServerError, ServerResult},
    lifecycle::FatalErrorPolicy,
};

/// Session secret used when none is configured; refused in production
pub const DEVELOPMENT_SESSION_SECRET: &str = "bizcore-development-session-secret-change-me";

const MIN_PRODUCTION_SECRET_LENGTH: usize = 32;
const DEFAULT_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
const DEVELOPMENT_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Listening port, checked against the mode it is used in
///
/// Port 0 (OS-assigned) is only accepted in testing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPort {
    port: u16,
    environment: Environment,
}

impl ServerPort {
    /// Check `port` for `environment`
    ///
    /// # Errors
    ///
    /// Fails for port 0 outside testing mode.
    pub fn new(port: u16, environment: Environment) -> Result<Self> {
        if port == 0 && environment != Environment::Testing {
            return Err(anyhow!(
                "an OS-assigned port is only allowed in testing mode, got 0 in {environment}"
            ));
        }
        Ok(Self { port, environment })
    }

    /// Port 3000 in development mode
    pub const fn default_development() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
        }
    }

    /// OS-assigned port for tests
    pub const fn testing() -> Self {
        Self {
            port: 0,
            environment: Environment::Testing,
        }
    }

    /// Raw port number
    pub fn value(&self) -> u16 {
        self.port
    }
}

impl<'de> Deserialize<'de> for ServerPort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // The mode is only known after the whole document was read; `load`
        // checks the port again against it.
        u16::deserialize(deserializer).map(|port| Self {
            port,
            environment: Environment::Development,
        })
    }
}

/// A validated per-request deadline in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSeconds(Duration);

impl TimeoutSeconds {
    /// Deadline of `seconds`, between 1 and 300
    ///
    /// # Errors
    ///
    /// Fails outside that range.
    pub fn new(seconds: u64) -> Result<Self> {
        ensure!(
            (1..=MAX_TIMEOUT_SECONDS).contains(&seconds),
            "request deadline must be between 1 and {MAX_TIMEOUT_SECONDS} seconds, got {seconds}"
        );
        Ok(Self(Duration::from_secs(seconds)))
    }

    /// 30 seconds
    pub const fn default_value() -> Self {
        Self(Duration::from_secs(30))
    }

    /// 5 seconds, short enough for deadline tests
    pub const fn testing() -> Self {
        Self(Duration::from_secs(5))
    }

    /// Deadline as a duration
    pub fn value(&self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for TimeoutSeconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer)
            .and_then(|seconds| Self::new(seconds).map_err(de::Error::custom))
    }
}

impl Default for TimeoutSeconds {
    fn default() -> Self {
        Self::default_value()
    }
}

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Secure cookies, bundled client, strict origin list
    Production,
    /// Local work against the client dev server
    Development,
    /// Automated tests, allows OS-assigned ports
    Testing,
}

impl Environment {
    /// Whether this is the production-equivalent mode
    ///
    /// Drives the cookie `Secure` flag, static client serving and the
    /// cross-origin allow-list.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Testing => "testing",
        })
    }
}

/// Fixed-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Whether rate limiting is applied at all
    pub enabled: bool,
    /// Requests admitted per client and window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer address
    pub trust_proxy: bool,
}

impl RateLimitingConfig {
    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_seconds: 15 * 60,
            trust_proxy: false,
        }
    }
}

/// Cookie session configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Secret the session cookie signing key is derived from
    pub secret: String,
    /// Fixed session lifetime in hours, counted from creation
    pub lifetime_hours: u32,
    /// Session cookie name
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: DEVELOPMENT_SESSION_SECRET.to_string(),
            lifetime_hours: 24,
            cookie_name: "bizcore.sid".to_string(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"***")
            .field("lifetime_hours", &self.lifetime_hours)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

/// Everything a gateway instance is configured with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: IpAddr,
    /// Listening port
    pub port: ServerPort,
    /// Per-request deadline
    pub timeout_seconds: TimeoutSeconds,
    /// Deployment mode
    pub environment: Environment,
    /// Origins allowed to issue credentialed cross-origin requests
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Externally facing base URL of the deployment
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Session cookie settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Rate limiting settings
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Maximum accepted request body size in bytes
    pub body_limit_bytes: usize,
    /// Directory holding the pre-built client bundle (served in production)
    pub client_dist_dir: PathBuf,
    /// URL of the separately running client dev server
    pub client_dev_url: String,
    /// Severity mapping for failures outside any single request
    #[serde(default)]
    pub fatal_policy: FatalErrorPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::default_development(),
            timeout_seconds: TimeoutSeconds::default(),
            environment: Environment::Development,
            cors_origins: Vec::new(),
            base_url: None,
            session: SessionConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            client_dist_dir: PathBuf::from("client/dist"),
            client_dev_url: "http://localhost:5173".to_string(),
            fatal_policy: FatalErrorPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load and validate the configuration of this process
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` when a source cannot be read or a value
    /// is out of range.
    pub fn from_env() -> ServerResult<Self> {
        let config = Self::load().map_err(|e| ServerError::Config {
            message: format!("could not load configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge every configuration source, later ones winning:
    ///
    /// 1. built-in defaults
    /// 2. `config.json`, then `config.<mode>.json`, both optional
    /// 3. `SERVER_` variables, `__` between nested keys
    ///    (e.g. `SERVER_RATE_LIMITING__MAX_REQUESTS=500`)
    /// 4. `ENVIRONMENT` and `PORT`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unreadable sources or values of the wrong shape.
    pub fn load() -> Result<Self, ConfigError> {
        let mode = std::env::var("ENVIRONMENT")
            .ok()
            .map(|mode| mode.to_lowercase());
        let mode_file = format!(
            "config.{}.json",
            mode.as_deref().unwrap_or("development")
        );

        let mut builder = Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000)?
            .set_default("timeout_seconds", 30)?
            .set_default("environment", "development")?
            .set_default("body_limit_bytes", 10_485_760)?
            .set_default("client_dist_dir", "client/dist")?
            .set_default("client_dev_url", "http://localhost:5173")?
            .add_source(File::with_name("config.json").required(false))
            .add_source(File::with_name(&mode_file).required(false))
            .add_source(
                ConfigEnv::with_prefix("SERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors_origins")
                    .try_parsing(true),
            );

        if let Some(mode) = mode {
            builder = builder.set_override("environment", mode)?;
        }
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("port", port)?;
        }

        let mut loaded: Self = builder.build()?.try_deserialize()?;
        loaded.port = ServerPort::new(loaded.port.value(), loaded.environment)
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(loaded)
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` describing the first violated constraint.
    pub fn validate(&self) -> ServerResult<()> {
        let fail = |message: String| Err(ServerError::Config { message });

        if self.session.secret.is_empty() {
            return fail("session secret must not be empty".to_string());
        }
        if self.environment.is_production()
            && (self.session.secret == DEVELOPMENT_SESSION_SECRET
                || self.session.secret.len() < MIN_PRODUCTION_SECRET_LENGTH)
        {
            return fail(format!(
                "production requires a dedicated session secret of at least {MIN_PRODUCTION_SECRET_LENGTH} characters"
            ));
        }
        if self.session.lifetime_hours == 0 {
            return fail("session lifetime must be at least one hour".to_string());
        }
        if self.rate_limiting.enabled
            && (self.rate_limiting.max_requests == 0 || self.rate_limiting.window_seconds == 0)
        {
            return fail("rate limiting needs a non-zero request budget and window".to_string());
        }
        if self.body_limit_bytes == 0 {
            return fail("body limit must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Loopback, OS-assigned port, short deadline
    pub fn for_testing() -> Self {
        Self {
            port: ServerPort::testing(),
            timeout_seconds: TimeoutSeconds::testing(),
            environment: Environment::Testing,
            ..Self::default()
        }
    }

    /// Address the listener binds
    pub fn socket_addr(&self) -> SocketAddr {
        (self.host, self.port.value()).into()
    }

    /// Origins allowed to make credentialed cross-origin requests
    ///
    /// Production admits the configured origins plus the origin of
    /// `base_url`; other modes add the local client dev servers.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = self.cors_origins.clone();

        if self.environment.is_production() {
            if let Some(base_url) = &self.base_url {
                origins.push(base_url.origin().ascii_serialization());
            }
        } else {
            origins.extend(DEVELOPMENT_ORIGINS.iter().map(ToString::to_string));
        }

        origins.sort();
        origins.dedup();
        origins
    }
}
