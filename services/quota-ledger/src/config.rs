use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::quota::{RetryPolicy, StrategyKind};

#[derive(Debug, Clone)]
pub struct QuotaServiceConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub strategy: StrategyKind,
    pub busy_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: f64,
    pub enable_reconciliation: bool,
    pub reconciliation_interval_secs: u64,
    pub log_level: String,
}

impl Default for QuotaServiceConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8184,
            data_dir: PathBuf::from("data/quota-ledger"),
            strategy: StrategyKind::Pessimistic,
            busy_timeout_ms: 5_000,
            retry_max_attempts: 5,
            retry_base_delay_ms: 50,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 2_000,
            retry_jitter: 0.5,
            enable_reconciliation: true,
            reconciliation_interval_secs: 24 * 60 * 60,
            log_level: "info".to_string(),
        }
    }
}

impl QuotaServiceConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("QUOTA_HOST") {
            cfg.server_host = host;
        }
        if let Ok(port) = env::var("QUOTA_PORT") {
            cfg.server_port = port.parse().context("QUOTA_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("QUOTA_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(strategy) = env::var("QUOTA_STRATEGY") {
            cfg.strategy = strategy
                .parse()
                .map_err(|err: String| anyhow::anyhow!(err))
                .context("QUOTA_STRATEGY must be 'pessimistic' or 'optimistic'")?;
        }
        if let Ok(timeout) = env::var("QUOTA_BUSY_TIMEOUT_MS") {
            cfg.busy_timeout_ms = timeout
                .parse()
                .context("QUOTA_BUSY_TIMEOUT_MS must be a positive integer")?;
        }
        if let Ok(attempts) = env::var("QUOTA_RETRY_MAX_ATTEMPTS") {
            cfg.retry_max_attempts = attempts
                .parse()
                .context("QUOTA_RETRY_MAX_ATTEMPTS must be a positive integer")?;
        }
        if let Ok(delay) = env::var("QUOTA_RETRY_BASE_DELAY_MS") {
            cfg.retry_base_delay_ms = delay
                .parse()
                .context("QUOTA_RETRY_BASE_DELAY_MS must be a positive integer")?;
        }
        if let Ok(multiplier) = env::var("QUOTA_RETRY_MULTIPLIER") {
            cfg.retry_multiplier = multiplier
                .parse()
                .context("QUOTA_RETRY_MULTIPLIER must be a floating point number")?;
        }
        if let Ok(delay) = env::var("QUOTA_RETRY_MAX_DELAY_MS") {
            cfg.retry_max_delay_ms = delay
                .parse()
                .context("QUOTA_RETRY_MAX_DELAY_MS must be a positive integer")?;
        }
        if let Ok(jitter) = env::var("QUOTA_RETRY_JITTER") {
            cfg.retry_jitter = jitter
                .parse()
                .context("QUOTA_RETRY_JITTER must be a floating point number")?;
        }
        if let Ok(flag) = env::var("ENABLE_RECONCILIATION") {
            cfg.enable_reconciliation = parse_bool(&flag)
                .with_context(|| format!("ENABLE_RECONCILIATION is invalid: {flag}"))?;
        }
        if let Ok(interval) = env::var("RECONCILIATION_INTERVAL_SECS") {
            cfg.reconciliation_interval_secs = interval
                .parse()
                .context("RECONCILIATION_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        ensure_directory(&cfg.data_dir)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.busy_timeout_ms == 0 {
            anyhow::bail!("QUOTA_BUSY_TIMEOUT_MS must be greater than zero");
        }
        if self.retry_max_attempts == 0 {
            anyhow::bail!("QUOTA_RETRY_MAX_ATTEMPTS must be greater than zero");
        }
        if self.retry_multiplier < 1.0 {
            anyhow::bail!("QUOTA_RETRY_MULTIPLIER must be at least 1.0");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            anyhow::bail!("QUOTA_RETRY_JITTER must be between 0.0 and 1.0");
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("QUOTA_RETRY_MAX_DELAY_MS must not be below QUOTA_RETRY_BASE_DELAY_MS");
        }
        if self.reconciliation_interval_secs == 0 {
            anyhow::bail!("RECONCILIATION_INTERVAL_SECS must be greater than zero");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            multiplier: self.retry_multiplier,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}
