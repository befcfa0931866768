//! Client Configuration Settings
//!
//! Configuration types for the Hiven client, loaded from environment
//! variables. Every value has a default; only the token is required by the
//! binary.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::infrastructure::gateway::DispatchMode;

/// Default REST API host.
pub const DEFAULT_HOST: &str = "api.hiven.io";
/// Default REST API version.
pub const DEFAULT_API_VERSION: &str = "v1";
/// Default swarm endpoint.
pub const DEFAULT_WS_ENDPOINT: &str = "wss://swarm.hiven.io/socket?encoding=json&compression=text_json";
/// Default accepted token length for user and bot accounts.
pub const DEFAULT_TOKEN_LEN: usize = 128;

/// REST API retry settings.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Maximum number of attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// REST API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// API host name.
    pub host: String,
    /// API version path segment.
    pub api_version: String,
    /// Base URL every endpoint is appended to.
    pub base_url: String,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Retry settings for retryable failures.
    pub retry: RetrySettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url: format!("https://{DEFAULT_HOST}/{DEFAULT_API_VERSION}"),
            user_agent: format!("hiven-client/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(15),
            retry: RetrySettings::default(),
        }
    }
}

/// Swarm connection settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// WebSocket endpoint URL.
    pub endpoint: String,
    /// Close timeout used until the server announces its own. Bounds the
    /// graceful drain of the dispatch queue.
    pub close_timeout: Duration,
    /// Bound for creating a session and receiving the handshake.
    pub setup_timeout: Duration,
    /// How inbound envelopes are handed to handlers.
    pub dispatch_mode: DispatchMode,
    /// Capacity of the inbound envelope buffer.
    pub dispatch_capacity: usize,
    /// Log every inbound and outbound frame at `trace` level.
    pub log_frames: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            close_timeout: Duration::from_secs(40),
            setup_timeout: Duration::from_secs(30),
            dispatch_mode: DispatchMode::Sequential,
            dispatch_capacity: 1_024,
            log_frames: false,
        }
    }
}

/// Session restart settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Delay before the first restart after a failed attempt.
    pub delay_initial: Duration,
    /// Upper bound for the restart delay.
    pub delay_max: Duration,
    /// Restart delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0, // Unlimited
        }
    }
}

/// Accepted token lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    /// Length of a user account token.
    pub user_token_len: usize,
    /// Length of a bot account token.
    pub bot_token_len: usize,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            user_token_len: DEFAULT_TOKEN_LEN,
            bot_token_len: DEFAULT_TOKEN_LEN,
        }
    }
}

impl TokenSettings {
    /// Distinct accepted lengths.
    #[must_use]
    pub fn accepted_lengths(&self) -> Vec<usize> {
        let mut lengths = vec![self.user_token_len, self.bot_token_len];
        lengths.dedup();
        lengths
    }
}

/// Complete client configuration.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// REST API settings.
    pub api: ApiSettings,
    /// Swarm connection settings.
    pub gateway: GatewaySettings,
    /// Session restart settings.
    pub reconnect: ReconnectSettings,
    /// Accepted token lengths.
    pub tokens: TokenSettings,
    /// Access token from `HIVEN_TOKEN`, if set.
    pub token: Option<String>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api", &self.api)
            .field("gateway", &self.gateway)
            .field("reconnect", &self.reconnect)
            .field("tokens", &self.tokens)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ClientConfig {
    /// Create configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint URL is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint URL is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let api_defaults = ApiSettings::default();
        let gateway_defaults = GatewaySettings::default();
        let reconnect_defaults = ReconnectSettings::default();
        let token_defaults = TokenSettings::default();

        let host = env.string("HIVEN_HOST").unwrap_or(api_defaults.host);
        let api_version = env
            .string("HIVEN_API_VERSION")
            .unwrap_or(api_defaults.api_version);
        let base_url = env
            .string("HIVEN_API_URL")
            .unwrap_or_else(|| format!("https://{host}/{api_version}"));
        validate_url("HIVEN_API_URL", &base_url, &["http", "https"])?;

        let api = ApiSettings {
            host,
            api_version,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: api_defaults.user_agent,
            request_timeout: env.duration_secs(
                "HIVEN_REQUEST_TIMEOUT_SECS",
                api_defaults.request_timeout,
            ),
            retry: api_defaults.retry,
        };

        let endpoint = env
            .string("WS_ENDPOINT")
            .unwrap_or(gateway_defaults.endpoint);
        validate_url("WS_ENDPOINT", &endpoint, &["ws", "wss"])?;

        let gateway = GatewaySettings {
            endpoint,
            close_timeout: env.duration_secs("WS_CLOSE_TIMEOUT", gateway_defaults.close_timeout),
            setup_timeout: env.duration_secs("WS_SETUP_TIMEOUT", gateway_defaults.setup_timeout),
            dispatch_mode: env
                .bool("HIVEN_QUEUE_EVENTS")
                .map_or(gateway_defaults.dispatch_mode, DispatchMode::from_queue_events),
            dispatch_capacity: env
                .parse("HIVEN_DISPATCH_CAPACITY", gateway_defaults.dispatch_capacity)
                .max(1),
            log_frames: env
                .bool("HIVEN_LOG_WEBSOCKET")
                .unwrap_or(gateway_defaults.log_frames),
        };

        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "HIVEN_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.delay_initial,
            ),
            delay_max: env.duration_secs(
                "HIVEN_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            ),
            delay_multiplier: env.parse(
                "HIVEN_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.delay_multiplier,
            ),
            max_attempts: env.parse(
                "HIVEN_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let tokens = TokenSettings {
            user_token_len: env.parse("USER_TOKEN_LEN", token_defaults.user_token_len),
            bot_token_len: env.parse("BOT_TOKEN_LEN", token_defaults.bot_token_len),
        };

        Ok(Self {
            api,
            gateway,
            reconnect,
            tokens,
            token: env.string("HIVEN_TOKEN"),
        })
    }

    /// The configured access token.
    ///
    /// # Errors
    ///
    /// Returns an error if `HIVEN_TOKEN` was not set or is blank.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        match self.token.as_deref() {
            None => Err(ConfigError::MissingEnvVar("HIVEN_TOKEN".to_string())),
            Some(token) if token.trim().is_empty() => {
                Err(ConfigError::EmptyValue("HIVEN_TOKEN".to_string()))
            }
            Some(token) => Ok(token),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a usable URL.
    #[error("environment variable {key} is not a valid {expected} URL: {value}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Accepted schemes.
        expected: String,
    },
}

fn validate_url(key: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let valid = Url::parse(value)
        .map(|url| schemes.contains(&url.scheme()))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            value: value.to_string(),
            expected: schemes.join("/"),
        })
    }
}

/// Typed access to an environment lookup. Unset, blank and unparsable
/// values fall back to the default.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.string(key)
            .and_then(|v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
