use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use qvault_chat::ReconnectPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub reconnect: ReconnectPolicy,
    /// Queue depth per live subscription before a lagging one is dropped.
    pub subscriber_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(v) => v.trim().parse().with_context(|| format!("{} must be a number, got {:?}", key, v)),
                None => Ok(default),
            }
        };

        let defaults = ReconnectPolicy::default();
        Ok(Self {
            jwt_secret: var("QVAULT_JWT_SECRET", "dev-secret-change-me"),
            db_path: PathBuf::from(var("QVAULT_DB_PATH", "qvault.db")),
            host: var("QVAULT_HOST", "0.0.0.0"),
            port: var("QVAULT_PORT", "3000")
                .parse()
                .context("QVAULT_PORT must be a port number")?,
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(number(
                    "QVAULT_RECONNECT_INITIAL_MS",
                    defaults.initial_delay.as_millis() as u64,
                )?),
                max_delay: Duration::from_millis(number(
                    "QVAULT_RECONNECT_MAX_MS",
                    defaults.max_delay.as_millis() as u64,
                )?),
                max_attempts: u32::try_from(number(
                    "QVAULT_RECONNECT_ATTEMPTS",
                    u64::from(defaults.max_attempts),
                )?)
                .context("QVAULT_RECONNECT_ATTEMPTS is out of range")?,
            },
            subscriber_capacity: usize::try_from(number("QVAULT_SUBSCRIBER_CAPACITY", 256)?)
                .context("QVAULT_SUBSCRIBER_CAPACITY is out of range")?,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
