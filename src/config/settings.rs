//! Environment-driven runtime settings.
//!
//! One `from_env()` entry point, in the same shape as
//! `HttpConfig::from_env`/`Credentials::from_env` in the crate this was
//! grown from: read a variable, fall back to a documented default, parse,
//! fail loudly and early if something required is missing or malformed.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ORDERBOOK_SYMBOLS must be set to a comma-separated allow-list, e.g. BTCUSDT,ETHUSDT")]
    MissingSymbols,

    #[error("ORDERBOOK_SYMBOLS contained no usable symbols after parsing")]
    EmptySymbols,

    #[error("invalid value for {var}: {source}")]
    InvalidValue {
        var: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// All tunables the reconstructor needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Uppercase, deduplication-preserving allow-list fixed for the process lifetime.
    pub symbols: Vec<String>,
    /// Base URL for the snapshot REST endpoint (no trailing slash).
    pub rest_base_url: String,
    /// Base URL for the combined WebSocket depth stream.
    pub ws_base_url: String,
    /// Bind address for the Read API.
    pub http_addr: SocketAddr,
    /// Delay between staggered snapshot fetches at startup.
    pub stagger: Duration,
    /// Pre-roll wait after subscribing, before the first snapshot fetch.
    pub preroll: Duration,
    /// Timeout for a single snapshot HTTP request.
    pub snapshot_timeout: Duration,
    /// Backoff base delay for re-bootstrap attempts.
    pub retry_base: Duration,
    /// Backoff cap for re-bootstrap attempts.
    pub retry_max: Duration,
    /// Attempt count at which a critical-level log is emitted (retries continue past it).
    pub retry_critical_at: u32,
    /// Cadence of the periodic health summary.
    pub health_interval: Duration,
    /// Maximum number of symbols multiplexed onto one WebSocket connection.
    pub symbols_per_connection: usize,
}

fn env_or<T: std::str::FromStr>(
    var: &'static str,
    default: T,
) -> std::result::Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue { var, source: Box::new(e) }),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `ORDERBOOK_SYMBOLS` is the only required variable; everything else
    /// has a default matching the exchange's own conventions.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let symbols_raw = std::env::var("ORDERBOOK_SYMBOLS").map_err(|_| ConfigError::MissingSymbols)?;
        let symbols: Vec<String> = symbols_raw
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(ConfigError::EmptySymbols);
        }

        let rest_base_url = std::env::var("ORDERBOOK_REST_BASE_URL")
            .unwrap_or_else(|_| "https://fapi.binance.com".to_string());
        let ws_base_url = std::env::var("ORDERBOOK_WS_BASE_URL")
            .unwrap_or_else(|_| "wss://fstream.binance.com/stream".to_string());

        let http_addr_raw = std::env::var("ORDERBOOK_HTTP_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let http_addr: SocketAddr = http_addr_raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                var: "ORDERBOOK_HTTP_ADDR",
                source: Box::new(e),
            })?;

        let stagger_ms: u64 = env_or("ORDERBOOK_STAGGER_MS", 200)?;
        let preroll_ms: u64 = env_or("ORDERBOOK_PREROLL_MS", 3_000)?;
        let snapshot_timeout_ms: u64 = env_or("ORDERBOOK_SNAPSHOT_TIMEOUT_MS", 5_000)?;
        let retry_base_ms: u64 = env_or("ORDERBOOK_RETRY_BASE_MS", 1_000)?;
        let retry_max_ms: u64 = env_or("ORDERBOOK_RETRY_MAX_MS", 60_000)?;
        let retry_critical_at: u32 = env_or("ORDERBOOK_RETRY_CRITICAL_AT", 10)?;
        let health_interval_ms: u64 = env_or("ORDERBOOK_HEALTH_INTERVAL_MS", 60_000)?;
        let symbols_per_connection: usize = env_or("ORDERBOOK_SYMBOLS_PER_CONNECTION", 10)?;

        Ok(Self {
            symbols,
            rest_base_url,
            ws_base_url,
            http_addr,
            stagger: Duration::from_millis(stagger_ms),
            preroll: Duration::from_millis(preroll_ms),
            snapshot_timeout: Duration::from_millis(snapshot_timeout_ms),
            retry_base: Duration::from_millis(retry_base_ms),
            retry_max: Duration::from_millis(retry_max_ms),
            retry_critical_at,
            health_interval: Duration::from_millis(health_interval_ms),
            symbols_per_connection,
        })
    }
}
