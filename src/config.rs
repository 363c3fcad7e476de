//! Process configuration
//!
//! Everything comes from environment variables (dotenv loaded first), with
//! parse-with-default semantics. Validation failures for mandatory
//! production settings are fatal at startup.

use std::env;
use std::path::PathBuf;

use crate::errors::ConfigurationError;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Per-source provider configuration as read from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub enabled: bool,
}

/// Ledger retention knobs for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub auto_seal_after_hours: i64,
    pub seal_grace_hours: i64,
    pub late_seal_after_days: i64,
    pub compress_after_days: i64,
    pub cold_retention_days: i64,
    pub delete_after_days: Option<i64>,
    pub hot_retention_days: i64,
    pub warm_retention_days: i64,
    pub compression_level: u32,
    /// "directory" or "tar.gz"
    pub archive_format: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            auto_seal_after_hours: 24,
            seal_grace_hours: 6,
            late_seal_after_days: 3,
            compress_after_days: 7,
            cold_retention_days: 30,
            delete_after_days: None,
            hot_retention_days: 7,
            warm_retention_days: 30,
            compression_level: 6,
            archive_format: "directory".to_string(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct OmenConfig {
    pub env: Environment,
    pub port: u16,
    pub ledger_base_path: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_retention_days: i64,
    pub database_path: String,
    pub redis_url: Option<String>,
    pub otlp_endpoint: Option<String>,

    // Hot path
    pub riskcast_url: String,
    pub riskcast_api_key: String,

    // API security
    pub api_key_pepper: Option<String>,
    pub api_keys: Vec<String>,
    pub rate_limit_rpm: u32,
    pub rate_limit_burst: u32,

    // Pipeline
    pub min_confidence_for_output: f64,
    pub min_liquidity_usd: f64,
    pub explanations_hot_path: bool,
    pub enable_correlation: bool,
    pub fetch_interval_secs: u64,
    pub fetch_timeout_secs: u64,

    // Sources
    pub polymarket: ProviderConfig,
    pub ais: ProviderConfig,
    pub weather: ProviderConfig,
    pub news: ProviderConfig,
    pub freight: ProviderConfig,
    pub stock: ProviderConfig,
    pub commodity: ProviderConfig,

    pub retention: RetentionConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn provider_config(provider_var: &str, default_provider: &str, key_vars: &[&str]) -> ProviderConfig {
    let provider = env_or(provider_var, default_provider).to_lowercase();
    let api_key = key_vars.iter().find_map(|k| env_opt(k));
    ProviderConfig {
        provider,
        api_key,
        enabled: true,
    }
}

impl OmenConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenv::dotenv().ok();

        let env_name = env_or("OMEN_ENV", "development").to_lowercase();
        let environment = match env_name.as_str() {
            "production" => Environment::Production,
            "development" => Environment::Development,
            other => {
                return Err(ConfigurationError(format!(
                    "OMEN_ENV must be 'development' or 'production', got '{}'",
                    other
                )))
            }
        };

        let api_key_pepper = env_opt("OMEN_API_KEY_PEPPER");
        if environment == Environment::Production && api_key_pepper.is_none() {
            return Err(ConfigurationError(
                "OMEN_API_KEY_PEPPER is mandatory in production".to_string(),
            ));
        }

        let api_keys = env_or("OMEN_API_KEYS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let retention = RetentionConfig {
            auto_seal_after_hours: env_parse("OMEN_AUTO_SEAL_AFTER_HOURS", 24),
            seal_grace_hours: env_parse("OMEN_SEAL_GRACE_HOURS", 6),
            late_seal_after_days: env_parse("OMEN_LATE_SEAL_AFTER_DAYS", 3),
            compress_after_days: env_parse("OMEN_COMPRESS_AFTER_DAYS", 7),
            cold_retention_days: env_parse("OMEN_COLD_RETENTION_DAYS", 30),
            delete_after_days: env_opt("OMEN_DELETE_AFTER_DAYS").and_then(|v| v.parse().ok()),
            hot_retention_days: env_parse("OMEN_HOT_RETENTION_DAYS", 7),
            warm_retention_days: env_parse("OMEN_WARM_RETENTION_DAYS", 30),
            compression_level: env_parse("OMEN_COMPRESSION_LEVEL", 6),
            archive_format: env_or("OMEN_ARCHIVE_FORMAT", "directory"),
        };

        Ok(Self {
            env: environment,
            port: env_parse("PORT", 8080),
            ledger_base_path: PathBuf::from(env_or("OMEN_LEDGER_BASE_PATH", "./ledger")),
            backup_dir: PathBuf::from(env_or("OMEN_BACKUP_DIR", "./backups")),
            backup_retention_days: env_parse("OMEN_BACKUP_RETENTION_DAYS", 14),
            database_path: env_or("DATABASE_URL", "./omen.db"),
            redis_url: env_opt("REDIS_URL"),
            otlp_endpoint: env_opt("OTLP_ENDPOINT"),

            riskcast_url: env_or("RISKCAST_URL", "http://localhost:9000"),
            riskcast_api_key: env_or("RISKCAST_API_KEY", ""),

            api_key_pepper,
            api_keys,
            rate_limit_rpm: env_parse("RATE_LIMIT_RPM", 120),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 20),

            min_confidence_for_output: env_parse("OMEN_MIN_CONFIDENCE", 0.3),
            min_liquidity_usd: env_parse("OMEN_MIN_LIQUIDITY_USD", 1000.0),
            explanations_hot_path: env_flag("EXPLANATIONS_HOT_PATH", false),
            enable_correlation: env_flag("OMEN_ENABLE_CORRELATION", true),
            fetch_interval_secs: env_parse("OMEN_FETCH_INTERVAL_SECS", 120),
            fetch_timeout_secs: env_parse("OMEN_FETCH_TIMEOUT_SECS", 30),

            polymarket: ProviderConfig {
                provider: "gamma_api".to_string(),
                api_key: env_opt("POLYMARKET_GAMMA_API_URL"),
                enabled: true,
            },
            ais: provider_config("OMEN_AIS_PROVIDER", "mock", &["AISSTREAM_API_KEY"]),
            weather: provider_config("OMEN_WEATHER_PROVIDER", "openmeteo", &[
                "OMEN_WEATHER_OPENWEATHER_API_KEY",
            ]),
            news: provider_config("NEWS_PROVIDER", "auto", &["NEWSDATA_API_KEY", "NEWS_API_KEY"]),
            freight: provider_config("OMEN_FREIGHT_PROVIDER", "fbx", &["OMEN_FREIGHT_API_KEY"]),
            stock: provider_config("STOCK_PROVIDER", "quote_api", &["STOCK_API_KEY"]),
            commodity: provider_config("COMMODITY_PROVIDER", "alphavantage", &[
                "ALPHAVANTAGE_API_KEY",
            ]),

            retention,
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == Environment::Production
    }

    /// Fixed development configuration that never touches the process
    /// environment. Unit tests use this to stay independent of env-var
    /// mutation elsewhere in the suite.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            env: Environment::Development,
            port: 8080,
            ledger_base_path: PathBuf::from("./ledger"),
            backup_dir: PathBuf::from("./backups"),
            backup_retention_days: 14,
            database_path: ":memory:".to_string(),
            redis_url: None,
            otlp_endpoint: None,
            riskcast_url: "http://localhost:9000".to_string(),
            riskcast_api_key: String::new(),
            api_key_pepper: None,
            api_keys: vec![],
            rate_limit_rpm: 120,
            rate_limit_burst: 20,
            min_confidence_for_output: 0.3,
            min_liquidity_usd: 1000.0,
            explanations_hot_path: false,
            enable_correlation: true,
            fetch_interval_secs: 120,
            fetch_timeout_secs: 30,
            polymarket: ProviderConfig {
                provider: "gamma_api".to_string(),
                api_key: None,
                enabled: true,
            },
            ais: ProviderConfig {
                provider: "mock".to_string(),
                api_key: None,
                enabled: true,
            },
            weather: ProviderConfig {
                provider: "openmeteo".to_string(),
                api_key: None,
                enabled: true,
            },
            news: ProviderConfig {
                provider: "auto".to_string(),
                api_key: None,
                enabled: true,
            },
            freight: ProviderConfig {
                provider: "fbx".to_string(),
                api_key: None,
                enabled: true,
            },
            stock: ProviderConfig {
                provider: "quote_api".to_string(),
                api_key: None,
                enabled: true,
            },
            commodity: ProviderConfig {
                provider: "alphavantage".to_string(),
                api_key: None,
                enabled: true,
            },
            retention: RetentionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development() {
        // Serialize env access: these tests mutate process-wide state.
        let _guard = ENV_LOCK.lock();
        env::remove_var("OMEN_ENV");
        env::remove_var("OMEN_API_KEY_PEPPER");
        let config = OmenConfig::from_env().unwrap();
        assert_eq!(config.env, Environment::Development);
        assert_eq!(config.rate_limit_rpm, 120);
        assert!(config.enable_correlation);
    }

    #[test]
    fn production_requires_pepper() {
        let _guard = ENV_LOCK.lock();
        env::set_var("OMEN_ENV", "production");
        env::remove_var("OMEN_API_KEY_PEPPER");
        let result = OmenConfig::from_env();
        assert!(result.is_err());

        env::set_var("OMEN_API_KEY_PEPPER", "pepper-123");
        let config = OmenConfig::from_env().unwrap();
        assert!(config.is_production());
        env::remove_var("OMEN_ENV");
        env::remove_var("OMEN_API_KEY_PEPPER");
    }

    #[test]
    fn rejects_unknown_environment() {
        let _guard = ENV_LOCK.lock();
        env::set_var("OMEN_ENV", "staging");
        assert!(OmenConfig::from_env().is_err());
        env::remove_var("OMEN_ENV");
    }

    lazy_static::lazy_static! {
        static ref ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
    }
}
