use serde::Deserialize;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_file_size: usize,
    pub session_idle_timeout: Duration,
    pub max_sessions: u64,
    pub analysis_cache_size: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_file_size: default_max_file_size(),
            session_idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 1000,
            analysis_cache_size: NonZeroUsize::new(8).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source, falling back to
    /// defaults for anything missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let idle_secs: u64 = parse_var(&lookup, "ANALYZER_SESSION_IDLE_SECS")?
            .unwrap_or(defaults.session_idle_timeout.as_secs());
        let cache_size: usize = parse_var(&lookup, "ANALYZER_ANALYSIS_CACHE")?
            .unwrap_or(defaults.analysis_cache_size.get());

        Ok(Config {
            bind_addr: parse_var(&lookup, "ANALYZER_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_file_size: parse_var(&lookup, "ANALYZER_MAX_FILE_SIZE")?
                .unwrap_or(defaults.max_file_size),
            session_idle_timeout: Duration::from_secs(idle_secs),
            max_sessions: parse_var(&lookup, "ANALYZER_MAX_SESSIONS")?
                .unwrap_or(defaults.max_sessions),
            analysis_cache_size: NonZeroUsize::new(cache_size)
                .ok_or_else(|| anyhow::anyhow!("ANALYZER_ANALYSIS_CACHE must be greater than zero"))?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Failed to parse {} from '{}'", key, raw)),
        None => Ok(None),
    }
}

pub fn load_config() -> Result<Config> {
    let config = Config::new()?;
    tracing::info!(
        "Configuration loaded: bind={}, max_file_size={}B, session_idle={:?}, max_sessions={}",
        config.bind_addr,
        config.max_file_size,
        config.session_idle_timeout,
        config.max_sessions
    );
    Ok(config)
}
