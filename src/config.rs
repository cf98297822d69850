use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
///
/// Besides the usual server/database knobs this carries the two domain
/// policy values that must be explicit rather than scattered literals: the
/// tenant tax rate used by every order-total recomputation path, and the
/// payment tolerance used by the reconciliation engine.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Tenant tax rate applied to purchase-order subtotals (fraction, not %)
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,

    /// Tolerance absorbed when capping payments against invoice balances
    #[serde(default = "default_payment_tolerance")]
    pub payment_tolerance: Decimal,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_tax_rate() -> Decimal {
    dec!(0.05)
}

fn default_payment_tolerance() -> Decimal {
    crate::money::PAYMENT_EPSILON
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            db_max_connections: 1,
            db_min_connections: 1,
            tax_rate: default_tax_rate(),
            payment_tolerance: default_payment_tolerance(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validates the domain policy values the config crate cannot express.
    pub fn validate_policies(&self) -> Result<(), ConfigError> {
        if self.tax_rate < Decimal::ZERO || self.tax_rate >= Decimal::ONE {
            return Err(ConfigError::Message(format!(
                "tax_rate must be in [0, 1), got {}",
                self.tax_rate
            )));
        }
        if self.payment_tolerance < Decimal::ZERO {
            return Err(ConfigError::Message(format!(
                "payment_tolerance must be non-negative, got {}",
                self.payment_tolerance
            )));
        }
        Ok(())
    }
}

/// Loads configuration from layered files plus an `APP_`-prefixed
/// environment overlay.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default");
    builder = builder.add_source(File::with_name(default_path.to_str().unwrap()).required(false));

    let env_path = Path::new(CONFIG_DIR).join(&environment);
    builder = builder.add_source(File::with_name(env_path.to_str().unwrap()).required(false));

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate_policies()?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initializes the tracing subscriber from the configured level.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_documented_policy_values() {
        let cfg = AppConfig::new("sqlite::memory:");
        assert_eq!(cfg.tax_rate, dec!(0.05));
        assert_eq!(cfg.payment_tolerance, dec!(0.001));
        assert!(cfg.validate_policies().is_ok());
    }

    #[test]
    fn out_of_range_tax_rate_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:");
        cfg.tax_rate = dec!(1.5);
        assert!(cfg.validate_policies().is_err());
    }
}
