use anyhow::Context;
use std::env;
use std::time::Duration;

/// Environment-variable-only configuration — there is no command-line surface.
/// Every required variable is read eagerly at startup; a missing one fails
/// `from_env` with context identifying the variable, never a lazily-discovered `None`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub broker_url: String,
    pub cas_host: String,
    pub cas_port: u16,
    pub cas_magic_number: u32,
    pub cas_dest_id: String,
    pub cas_password: String,
    pub central_system_id: String,
    pub max_retries: u32,
    pub t_resp: Duration,
    pub t_pong: Duration,
    pub t_sess: Duration,
    pub t_recon: Duration,
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
            cas_host: env::var("CAS_HOST").context("CAS_HOST must be set")?,
            cas_port: env::var("CAS_PORT")
                .context("CAS_PORT must be set")?
                .parse()
                .context("CAS_PORT must be a valid port number")?,
            cas_magic_number: env::var("CAS_MAGIC_NUMBER")
                .context("CAS_MAGIC_NUMBER must be set")?
                .parse()
                .context("CAS_MAGIC_NUMBER must be a u32")?,
            cas_dest_id: env::var("CAS_DEST_ID").context("CAS_DEST_ID must be set")?,
            cas_password: env::var("CAS_PASSWORD").context("CAS_PASSWORD must be set")?,
            central_system_id: env::var("CENTRAL_SYSTEM_ID").context("CENTRAL_SYSTEM_ID must be set")?,
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            t_resp: Duration::from_secs(10),
            t_pong: Duration::from_secs(10),
            t_sess: Duration::from_secs(30),
            t_recon: Duration::from_secs(60),
            t_xmit: Duration::from_secs(10),
            poll_period: Duration::from_secs(5),
            poll_batch_size: 50,
            poll_concurrency: 5,
        })
    }

    pub fn cas_addr(&self) -> String {
        format!("{}:{}", self.cas_host, self.cas_port)
    }
}
