#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Constant;

/// Sub-protocol presented during the WebSocket handshake.
pub const DEFAULT_PROTOCOL: &str = "stockings";

const DEFAULT_KEEPALIVE_TIMEOUT_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_TIMEOUT_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_RETRY_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 12;

/// Configuration for the connection manager and its protocol extensions.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Sub-protocol requested at handshake. `None` requests no sub-protocol.
    pub protocol: Option<String>,
    /// Silence on both channels for this long is treated as a dead connection
    pub keepalive_timeout: Duration,
    /// How long an open connection may go without receiving a `client-token`
    pub token_timeout: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Schedule for acknowledged control requests (`client-change`, `unsubscribe`)
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Some(DEFAULT_PROTOCOL.to_owned()),
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT_DURATION,
            token_timeout: DEFAULT_TOKEN_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
///
/// Reconnection uses a fixed delay, both after a socket closes and after a
/// socket could not be constructed at all.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before a reconnection attempt
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY_DURATION,
        }
    }
}

impl From<ReconnectConfig> for Constant {
    fn from(config: ReconnectConfig) -> Self {
        Constant::new(config.delay)
    }
}

/// Schedule for the confirmed-retry primitive.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Time between attempts; the first attempt is immediate
    pub interval: Duration,
    /// Attempts made before giving up
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL_DURATION,
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
        }
    }
}
