use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

pub const DATA_DIR_ENV: &str = "TOCSCAN_DATA_DIR";
pub const FETCH_TIMEOUT_ENV: &str = "TOCSCAN_FETCH_TIMEOUT_SECS";
pub const USER_AGENT_ENV: &str = "TOCSCAN_USER_AGENT";

const DEFAULT_DATA_DIR: &str = "tocscan-data";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = "tocscan/0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = env_non_empty(FETCH_TIMEOUT_ENV) {
            config.timeout = parse_timeout(&raw)
                .with_context(|| format!("invalid {FETCH_TIMEOUT_ENV}={raw:?}"))?;
        }
        if let Some(user_agent) = env_non_empty(USER_AGENT_ENV) {
            config.user_agent = user_agent;
        }
        Ok(config)
    }
}

pub fn parse_timeout(raw: &str) -> anyhow::Result<Duration> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .context("expected a whole number of seconds")?;
    if secs == 0 || secs > 600 {
        anyhow::bail!("timeout must be between 1 and 600 seconds, got {secs}");
    }
    Ok(Duration::from_secs(secs))
}

/// `--data-dir` wins, then `TOCSCAN_DATA_DIR`, then `./tocscan-data`.
pub fn resolve_data_dir(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| env_non_empty(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
