//! Engine configuration.

use super::{default_data_dir, Migrate};
use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Tunable policy constants.
///
/// Durations are stored as plain integers so the config file stays
/// hand-editable; accessor methods convert to `chrono::Duration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Trailing window for counting failed login attempts.
    pub rate_limit_window_minutes: i64,
    /// Failed attempts inside the window before lockout.
    pub rate_limit_max_attempts: usize,
    /// Failures before a human-verification challenge is signalled.
    pub rate_limit_challenge_threshold: usize,

    /// Idle timeout for non-remember-me sessions.
    pub session_idle_timeout_minutes: i64,
    /// Absolute session lifetime.
    pub session_absolute_hours: i64,
    /// Absolute lifetime for remember-me sessions.
    pub session_remember_me_days: i64,

    /// Pending changes expire this long after being proposed.
    pub pending_expiry_days: i64,
    /// Cooldown before the same requester may re-propose a rejected
    /// change for the same target field.
    pub rejection_cooldown_minutes: i64,

    /// Soft-deleted records stay recoverable for this long.
    pub retention_days: i64,

    /// Bounded retry policy for transient store failures.
    pub store_retry_attempts: u32,
    pub store_retry_backoff_ms: u64,

    /// How often the periodic expiry and purge sweepers run.
    pub sweep_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_minutes: 15,
            rate_limit_max_attempts: 5,
            rate_limit_challenge_threshold: 3,
            session_idle_timeout_minutes: 30,
            session_absolute_hours: 24,
            session_remember_me_days: 30,
            pending_expiry_days: 7,
            rejection_cooldown_minutes: 60,
            retention_days: 30,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 50,
            sweep_interval_secs: 60,
        }
    }
}

impl PolicyConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::minutes(self.rate_limit_window_minutes)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::minutes(self.session_idle_timeout_minutes)
    }

    pub fn session_absolute(&self) -> Duration {
        Duration::hours(self.session_absolute_hours)
    }

    pub fn session_remember_me(&self) -> Duration {
        Duration::days(self.session_remember_me_days)
    }

    pub fn pending_expiry(&self) -> Duration {
        Duration::days(self.pending_expiry_days)
    }

    pub fn rejection_cooldown(&self) -> Duration {
        Duration::minutes(self.rejection_cooldown_minutes)
    }

    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days)
    }
}

/// Main engine configuration, persisted as `ordergate.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Config schema version.
    pub version: u32,

    /// Data directory path.
    pub data_dir: PathBuf,

    /// Logging level.
    pub log_level: String,

    /// Policy constants.
    pub policy: PolicyConfig,
}

impl EngineConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        let data_dir = default_data_dir()?;
        Self::load_from(&data_dir)
    }

    /// Load configuration from a specific data directory.
    pub fn load_from(data_dir: &PathBuf) -> Result<Self> {
        let config_path = data_dir.join("ordergate.json");

        if config_path.exists() {
            info!("Loading config from {:?}", config_path);
            let json = fs::read_to_string(&config_path)?;
            let mut config: EngineConfig = serde_json::from_str(&json)?;

            // Apply migrations if needed
            if config.version < Self::target_version() {
                info!(
                    "Migrating config from v{} to v{}",
                    config.version,
                    Self::target_version()
                );
                config.migrate()?;
                config.save()?;
            }

            Ok(config)
        } else {
            warn!("No config found, creating default at {:?}", config_path);
            let config = Self::default_with_dir(data_dir.clone());
            config.save()?;
            Ok(config)
        }
    }

    /// Load or create configuration.
    pub fn load_or_create(data_dir: &PathBuf) -> Result<Self> {
        Self::load_from(data_dir).or_else(|_| {
            let config = Self::default_with_dir(data_dir.clone());
            config.save()?;
            Ok(config)
        })
    }

    /// Create default configuration with specific data directory.
    pub fn default_with_dir(data_dir: PathBuf) -> Self {
        Self {
            version: Self::target_version(),
            data_dir,
            log_level: "info".to_string(),
            policy: PolicyConfig::default(),
        }
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;

        let config_path = self.data_dir.join("ordergate.json");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, json)?;
        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path for the logs directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::default_with_dir(data_dir)
    }
}

impl Migrate for EngineConfig {
    fn current_version(&self) -> u32 {
        self.version
    }

    fn target_version() -> u32 {
        1 // Current schema version
    }

    fn migrate(&mut self) -> Result<()> {
        match self.version {
            0 => {
                // Future migration from v0 to v1 would go here
                self.version = 1;
                Ok(())
            }
            1 => Ok(()), // Already at target version
            v => Err(anyhow!("Unknown config version: {}", v)),
        }
    }
}
