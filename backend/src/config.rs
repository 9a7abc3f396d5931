use std::str::FromStr;

use anyhow::{Context, bail};

/// Which venue adapters to wire in.
#[derive(Clone, Debug, PartialEq)]
pub enum VenueImpl {
    /// In-process mock venues; no network.
    Mock,
    /// HTTP adapters against a real aggregator node.
    Real { rpc_url: String, signer_key: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    // =========================
    // Server
    // =========================
    pub host: String,
    pub port: u16,
    /// `production` switches logging to JSON.
    pub env: String,
    /// Fallback log filter when RUST_LOG is unset.
    pub log_level: String,

    /// Database connection string (sqlite or postgres).
    pub database_url: String,
    pub db_max_connections: u32,

    // =========================
    // Queue configuration
    // =========================
    /// Max orders in non-terminal processing simultaneously.
    pub concurrency: usize,

    /// Total attempts per retryable phase (and per queue delivery),
    /// including the first.
    pub max_retries: u32,

    /// Base backoff delay; doubles per attempt up to the cap.
    pub backoff_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,

    // =========================
    // Router configuration
    // =========================
    /// Per-venue quote call bound. A venue that misses it is dropped from
    /// the comparison.
    pub quote_timeout_ms: u64,

    // =========================
    // Executor configuration
    // =========================
    /// Applied when the submission carries no slippage.
    pub default_slippage: f64,
    /// Upper bound on caller-supplied slippage.
    pub max_slippage: f64,

    // =========================
    // Cache configuration
    // =========================
    pub cache_ttl_seconds: u64,

    pub venue_impl: VenueImpl,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let venue_impl = match env_or("VENUE_IMPLEMENTATION", "mock".to_string())?.as_str() {
            "mock" => VenueImpl::Mock,
            "real" => {
                // A real venue needs somewhere to send requests and a key to
                // sign them with; refuse to start half-configured.
                let rpc_url = std::env::var("VENUE_RPC_URL")
                    .context("VENUE_RPC_URL is required when VENUE_IMPLEMENTATION=real")?;
                let signer_key = std::env::var("VENUE_SIGNER_KEY")
                    .context("VENUE_SIGNER_KEY is required when VENUE_IMPLEMENTATION=real")?;
                VenueImpl::Real {
                    rpc_url,
                    signer_key,
                }
            }
            other => bail!("unknown VENUE_IMPLEMENTATION: {other}"),
        };

        let config = Self {
            host: env_or("HOST", "0.0.0.0".to_string())?,
            port: env_or("PORT", 3000)?,
            env: env_or("APP_ENV", "development".to_string())?,
            log_level: env_or("LOG_LEVEL", "info".to_string())?,

            database_url: env_or("DATABASE_URL", "sqlite://engine_dev.db".to_string())?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 16)?,

            concurrency: env_or("QUEUE_CONCURRENCY", 10)?,
            max_retries: env_or("MAX_RETRIES", 3)?,
            backoff_delay_ms: env_or("BACKOFF_DELAY_MS", 1_000)?,
            backoff_multiplier: env_or("BACKOFF_MULTIPLIER", 2.0)?,
            backoff_max_ms: env_or("BACKOFF_MAX_MS", 4_000)?,

            quote_timeout_ms: env_or("QUOTE_TIMEOUT_MS", 5_000)?,

            default_slippage: env_or("DEFAULT_SLIPPAGE", 0.01)?,
            max_slippage: env_or("MAX_SLIPPAGE", 0.5)?,

            cache_ttl_seconds: env_or("CACHE_TTL_SECONDS", 300)?,

            venue_impl,
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup sanity. A configuration whose slippage bounds are broken
    /// would let defaulted submissions violate the order invariants, so it
    /// refuses to boot instead.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.max_slippage.is_finite() || self.max_slippage < 0.0 {
            bail!(
                "MAX_SLIPPAGE must be a non-negative finite number, got {}",
                self.max_slippage
            );
        }
        if !self.default_slippage.is_finite()
            || self.default_slippage < 0.0
            || self.default_slippage > self.max_slippage
        {
            bail!(
                "DEFAULT_SLIPPAGE {} must lie within [0, MAX_SLIPPAGE = {}]",
                self.default_slippage,
                self.max_slippage
            );
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
