//! Configuration management
//!
//! All settings come from `ANALYSIS_*` environment variables (a `.env` file
//! is honoured). The resulting [`Config`] is built once in `main` and passed
//! down explicitly.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::{PacingConfig, RunMode};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database port
pub const DEFAULT_DATABASE_PORT: u16 = 5432;

/// Default number of pooled connections. A worker is sequential, so two is plenty.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 2;

/// Default connection timeout in seconds
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default registry base URL
pub const DEFAULT_REGISTRY_URL: &str = "https://pypi.org";

/// Default registry request timeout in seconds
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 30;

/// Default lower bound of the pause between packages, in seconds
pub const DEFAULT_MIN_DELAY_SECS: u64 = 5;

/// Default upper bound of the pause between packages, in seconds
pub const DEFAULT_MAX_DELAY_SECS: u64 = 10;

/// Default idle poll interval in daemon mode, in seconds
pub const DEFAULT_IDLE_POLL_SECS: u64 = 60;

/// Full process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub scheduler: SchedulerConfig,
}

/// Connection parameters for the package store
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database_name", &self.database_name)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Registry client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Scheduler loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub mode: RunMode,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub idle_poll_secs: u64,
}

impl SchedulerConfig {
    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            min_delay: Duration::from_secs(self.min_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_DATABASE_PORT,
            username: String::new(),
            password: String::new(),
            database_name: String::new(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout_secs: DEFAULT_REGISTRY_TIMEOUT_SECS,
            user_agent: format!("pypi-analysis/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            min_delay_secs: DEFAULT_MIN_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            idle_poll_secs: DEFAULT_IDLE_POLL_SECS,
        }
    }
}

/// Read a variable, falling back when unset or unparsable
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load `.env` (if any) and then the environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build from the process environment only
    pub fn from_env() -> anyhow::Result<Self> {
        let mode = match std::env::var("ANALYSIS_RUN_MODE") {
            Ok(raw) => raw
                .parse()
                .map_err(|e: String| anyhow::anyhow!("ANALYSIS_RUN_MODE: {}", e))?,
            Err(_) => RunMode::default(),
        };

        let config = Config {
            database: DatabaseConfig {
                host: env_string("ANALYSIS_DATABASE_HOST", ""),
                port: env_or("ANALYSIS_DATABASE_PORT", DEFAULT_DATABASE_PORT),
                username: env_string("ANALYSIS_DATABASE_USERNAME", ""),
                password: env_string("ANALYSIS_DATABASE_PASSWORD", ""),
                database_name: env_string("ANALYSIS_DATABASE_NAME", ""),
                max_connections: env_or(
                    "ANALYSIS_DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "ANALYSIS_DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            registry: RegistryConfig {
                base_url: env_string("ANALYSIS_REGISTRY_URL", DEFAULT_REGISTRY_URL),
                timeout_secs: env_or("ANALYSIS_REGISTRY_TIMEOUT", DEFAULT_REGISTRY_TIMEOUT_SECS),
                ..RegistryConfig::default()
            },
            scheduler: SchedulerConfig {
                mode,
                min_delay_secs: env_or("ANALYSIS_MIN_DELAY_SECS", DEFAULT_MIN_DELAY_SECS),
                max_delay_secs: env_or("ANALYSIS_MAX_DELAY_SECS", DEFAULT_MAX_DELAY_SECS),
                idle_poll_secs: env_or("ANALYSIS_IDLE_POLL_SECS", DEFAULT_IDLE_POLL_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.registry.timeout_secs == 0 {
            anyhow::bail!("Registry timeout must be greater than 0");
        }

        if self.scheduler.min_delay_secs > self.scheduler.max_delay_secs {
            anyhow::bail!(
                "Minimum delay ({}s) cannot be greater than maximum delay ({}s)",
                self.scheduler.min_delay_secs,
                self.scheduler.max_delay_secs
            );
        }

        if self.database.host.is_empty() || self.database.database_name.is_empty() {
            tracing::warn!(
                "ANALYSIS_DATABASE_HOST or ANALYSIS_DATABASE_NAME is empty; connecting will likely fail"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ANALYSIS_DATABASE_HOST",
        "ANALYSIS_DATABASE_PORT",
        "ANALYSIS_DATABASE_USERNAME",
        "ANALYSIS_DATABASE_PASSWORD",
        "ANALYSIS_DATABASE_NAME",
        "ANALYSIS_DATABASE_MAX_CONNECTIONS",
        "ANALYSIS_DATABASE_CONNECT_TIMEOUT",
        "ANALYSIS_REGISTRY_URL",
        "ANALYSIS_REGISTRY_TIMEOUT",
        "ANALYSIS_MIN_DELAY_SECS",
        "ANALYSIS_MAX_DELAY_SECS",
        "ANALYSIS_IDLE_POLL_SECS",
        "ANALYSIS_RUN_MODE",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.host, "");
        assert_eq!(config.database.port, DEFAULT_DATABASE_PORT);
        assert_eq!(config.database.database_name, "");
        assert_eq!(config.registry.base_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.scheduler.mode, RunMode::Drain);
        assert_eq!(config.scheduler.min_delay_secs, 5);
        assert_eq!(config.scheduler.max_delay_secs, 10);
    }

    #[test]
    #[serial]
    fn test_values_from_env() {
        clear_env();
        std::env::set_var("ANALYSIS_DATABASE_HOST", "db.internal");
        std::env::set_var("ANALYSIS_DATABASE_PORT", "6543");
        std::env::set_var("ANALYSIS_DATABASE_USERNAME", "analysis");
        std::env::set_var("ANALYSIS_DATABASE_PASSWORD", "s3cret");
        std::env::set_var("ANALYSIS_DATABASE_NAME", "pypi");
        std::env::set_var("ANALYSIS_RUN_MODE", "daemon");
        std::env::set_var("ANALYSIS_MIN_DELAY_SECS", "1");
        std::env::set_var("ANALYSIS_MAX_DELAY_SECS", "2");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.username, "analysis");
        assert_eq!(config.database.password, "s3cret");
        assert_eq!(config.database.database_name, "pypi");
        assert_eq!(config.scheduler.mode, RunMode::Daemon);
        assert_eq!(config.scheduler.pacing().max_delay, Duration::from_secs(2));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparsable_port_falls_back() {
        clear_env();
        std::env::set_var("ANALYSIS_DATABASE_PORT", "not-a-port");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.port, DEFAULT_DATABASE_PORT);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_run_mode_is_rejected() {
        clear_env();
        std::env::set_var("ANALYSIS_RUN_MODE", "sometimes");

        assert!(Config::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_validate_rejects_inverted_delay() {
        let mut config = Config::default();
        config.scheduler.min_delay_secs = 10;
        config.scheduler.max_delay_secs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DatabaseConfig {
            password: "hunter2".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
