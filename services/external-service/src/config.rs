use anyhow::Context;
use std::env;
use std::time::Duration;

/// Environment-variable-only configuration, mirroring the central service's
/// `Config::from_env` convention.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub broker_url: String,
    pub bind_addr: String,
    pub max_retries: u32,
    pub t_xmit: Duration,
    pub poll_period: Duration,
    pub poll_batch_size: i64,
    pub poll_concurrency: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            broker_url: env::var("BROKER_URL").context("BROKER_URL must be set")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_owned()),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            t_xmit: Duration::from_secs(10),
            poll_period: Duration::from_secs(5),
            poll_batch_size: 50,
            poll_concurrency: 5,
        })
    }
}
