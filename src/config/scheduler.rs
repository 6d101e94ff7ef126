//! Scheduler configuration structures.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, PolicyKind, TieBreak};

/// Prefix for environment overrides read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "CAPSCHED_";

/// Schedule store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// In-memory store; nothing survives a restart.
    #[default]
    InMemory,
    /// JSON-lines store rooted at a directory.
    File {
        /// Store directory.
        path: PathBuf,
    },
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Units partitioned in every window.
    pub capacity_per_window: u64,
    /// Window length (tempo) in blocks.
    pub window_length: u64,
    /// Block height the first window is aligned to.
    pub window_origin: u64,
    /// Minimum units per eligible consumer when capacity allows.
    pub min_guarantee: u64,
    /// Allocation policy.
    pub policy: PolicyKind,
    /// Ordering for consumers with identical stake.
    pub tie_break: TieBreak,
    /// Expected seconds per block, used to size TTLs against windows.
    pub block_time_secs: u64,
    /// How often the block source is polled.
    pub block_poll_interval_ms: u64,
    /// How often the stake feed is pulled between window boundaries.
    pub refresh_interval_secs: u64,
    /// Bound on a single stake-feed pull.
    pub refresh_timeout_ms: u64,
    /// Bound on a single store call.
    pub store_timeout_ms: u64,
    /// Bound on a single block-source call.
    pub block_poll_timeout_ms: u64,
    /// Persist attempts per computed schedule before giving up.
    pub persist_max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub persist_backoff_ms: u64,
    /// Upper bound on the retry delay.
    pub persist_backoff_max_ms: u64,
    /// Expiry for schedules stored under their window key.
    pub schedule_ttl_secs: u64,
    /// Default expiry for pool info records.
    pub pool_info_ttl_secs: u64,
    /// Maximum number of windows retained in the store.
    pub max_history: usize,
    /// Store backend.
    pub store: StoreBackendConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity_per_window: 1_000,
            window_length: 360,
            window_origin: 0,
            min_guarantee: 40,
            policy: PolicyKind::default(),
            tie_break: TieBreak::default(),
            block_time_secs: 12,
            block_poll_interval_ms: 12_000,
            refresh_interval_secs: 600,
            refresh_timeout_ms: 30_000,
            store_timeout_ms: 5_000,
            block_poll_timeout_ms: 5_000,
            persist_max_attempts: 5,
            persist_backoff_ms: 500,
            persist_backoff_max_ms: 30_000,
            schedule_ttl_secs: 2 * 360 * 12,
            pool_info_ttl_secs: 3_600,
            max_history: 16,
            store: StoreBackendConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity_per_window == 0 {
            return Err("capacity_per_window must be greater than 0".into());
        }
        if self.window_length == 0 {
            return Err("window_length must be greater than 0".into());
        }
        if self.block_poll_interval_ms == 0 {
            return Err("block_poll_interval_ms must be greater than 0".into());
        }
        if self.refresh_interval_secs == 0 {
            return Err("refresh_interval_secs must be greater than 0".into());
        }
        if self.refresh_timeout_ms == 0
            || self.store_timeout_ms == 0
            || self.block_poll_timeout_ms == 0
        {
            return Err("timeouts must be greater than 0".into());
        }
        if self.persist_max_attempts == 0 {
            return Err("persist_max_attempts must be greater than 0".into());
        }
        if self.persist_backoff_max_ms < self.persist_backoff_ms {
            return Err("persist_backoff_max_ms must be at least persist_backoff_ms".into());
        }
        if self.max_history == 0 {
            return Err("max_history must be greater than 0".into());
        }
        let window_secs = self.window_duration().as_secs();
        if self.schedule_ttl_secs < window_secs {
            return Err(format!(
                "schedule_ttl_secs ({}) must cover one full window ({window_secs}s)",
                self.schedule_ttl_secs
            ));
        }
        if let StoreBackendConfig::File { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("file store path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a dotenv file (if present) and `CAPSCHED_*`
    /// environment variables layered over the defaults.
    pub fn from_env(dotenv_path: Option<&Path>) -> AppResult<Self> {
        match dotenv_path {
            Some(path) => {
                dotenvy::from_path(path)
                    .with_context(|| format!("loading env file {}", path.display()))?;
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }

        let mut cfg = Self::default();
        override_from_env(&mut cfg.capacity_per_window, "CAPACITY_PER_WINDOW")?;
        override_from_env(&mut cfg.window_length, "WINDOW_LENGTH")?;
        override_from_env(&mut cfg.window_origin, "WINDOW_ORIGIN")?;
        override_from_env(&mut cfg.min_guarantee, "MIN_GUARANTEE")?;
        override_from_env(&mut cfg.block_time_secs, "BLOCK_TIME_SECS")?;
        override_from_env(&mut cfg.block_poll_interval_ms, "BLOCK_POLL_INTERVAL_MS")?;
        override_from_env(&mut cfg.refresh_interval_secs, "REFRESH_INTERVAL_SECS")?;
        override_from_env(&mut cfg.refresh_timeout_ms, "REFRESH_TIMEOUT_MS")?;
        override_from_env(&mut cfg.store_timeout_ms, "STORE_TIMEOUT_MS")?;
        override_from_env(&mut cfg.block_poll_timeout_ms, "BLOCK_POLL_TIMEOUT_MS")?;
        override_from_env(&mut cfg.persist_max_attempts, "PERSIST_MAX_ATTEMPTS")?;
        override_from_env(&mut cfg.persist_backoff_ms, "PERSIST_BACKOFF_MS")?;
        override_from_env(&mut cfg.persist_backoff_max_ms, "PERSIST_BACKOFF_MAX_MS")?;
        override_from_env(&mut cfg.schedule_ttl_secs, "SCHEDULE_TTL_SECS")?;
        override_from_env(&mut cfg.pool_info_ttl_secs, "POOL_INFO_TTL_SECS")?;
        override_from_env(&mut cfg.max_history, "MAX_HISTORY")?;

        if let Some(policy) = env_var("POLICY") {
            cfg.policy = serde_json::from_value(serde_json::Value::String(policy.clone()))
                .map_err(|_| anyhow!("{ENV_PREFIX}POLICY: unknown policy `{policy}`"))?;
        }
        if let Some(tie_break) = env_var("TIE_BREAK") {
            cfg.tie_break = serde_json::from_value(serde_json::Value::String(tie_break.clone()))
                .map_err(|_| anyhow!("{ENV_PREFIX}TIE_BREAK: unknown ordering `{tie_break}`"))?;
        }
        if let Some(path) = env_var("STORE_PATH") {
            cfg.store = StoreBackendConfig::File { path: path.into() };
        }

        cfg.validate().map_err(|e| anyhow!("config invalid: {e}"))?;
        Ok(cfg)
    }

    /// Wall-clock length of one window.
    pub const fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_length.saturating_mul(self.block_time_secs))
    }

    /// Block polling cadence.
    pub const fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    /// Stake refresh cadence.
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Bound on a stake-feed pull.
    pub const fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Bound on a store call.
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Bound on a block-source call.
    pub const fn block_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.block_poll_timeout_ms)
    }

    /// Initial persist retry delay.
    pub const fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }

    /// Cap on the persist retry delay.
    pub const fn persist_backoff_max(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_max_ms)
    }

    /// Expiry for windowed schedule records.
    pub const fn schedule_ttl(&self) -> Duration {
        Duration::from_secs(self.schedule_ttl_secs)
    }

    /// Default pool info expiry.
    pub const fn pool_info_ttl(&self) -> Duration {
        Duration::from_secs(self.pool_info_ttl_secs)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn override_from_env<T>(slot: &mut T, suffix: &str) -> AppResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_var(suffix) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{ENV_PREFIX}{suffix}: cannot parse `{raw}`: {e}"))?;
    }
    Ok(())
}
