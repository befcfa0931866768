//! Configuration Module
//!
//! Configuration loading for the client.

mod settings;

pub use settings::{
    ApiSettings, ClientConfig, ConfigError, DEFAULT_API_VERSION, DEFAULT_HOST, DEFAULT_TOKEN_LEN,
    DEFAULT_WS_ENDPOINT, GatewaySettings, ReconnectSettings, RetrySettings, TokenSettings,
};
