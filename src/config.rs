use config::{Config, ConfigError, Environment, File};
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "BDT";
const DEFAULT_MAX_QUANTITY_PER_ITEM: u32 = 3;
const DEFAULT_COMMISSION_RATE: f64 = 0.08;
const DEFAULT_AFFILIATE_COOKIE: &str = "affiliate_code";

/// Hosted payment gateway settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Gateway API root, e.g. https://sandbox.gateway.example
    #[validate(url)]
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Merchant store identifier
    #[serde(default)]
    pub store_id: String,

    /// Merchant store password
    #[serde(default)]
    pub store_password: String,

    /// Session creation endpoint, relative to `base_url`
    #[serde(default = "default_session_path")]
    pub session_path: String,

    /// Transaction validation endpoint, relative to `base_url`
    #[serde(default = "default_validation_path")]
    pub validation_path: String,

    /// Confirm VALID notifications against the validation endpoint before marking paid
    #[serde(default)]
    pub verify_with_gateway: bool,

    /// Outbound request timeout
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Shared secret for the `x-signature` header on IPN requests
    #[serde(default)]
    pub ipn_secret: Option<String>,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            store_id: String::new(),
            store_password: String::new(),
            session_path: default_session_path(),
            validation_path: default_validation_path(),
            verify_with_gateway: false,
            timeout_secs: default_gateway_timeout_secs(),
            ipn_secret: None,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Currency prices are settled in; also sent to the payment gateway
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub settlement_currency: String,

    /// Upper bound on the quantity of one product in a single order
    #[serde(default = "default_max_quantity_per_item")]
    #[validate(range(min = 1, max = 1000))]
    pub max_quantity_per_item: u32,

    /// Fraction of the goods amount credited to the referring affiliate
    #[serde(default = "default_commission_rate")]
    #[validate(custom = "validate_commission_rate")]
    pub affiliate_commission_rate: f64,

    /// Cookie that carries the referring affiliate code
    #[serde(default = "default_affiliate_cookie_name")]
    pub affiliate_cookie_name: String,

    /// Storefront origin; browser payment redirects land here
    #[serde(default = "default_storefront_url")]
    #[validate(url)]
    pub storefront_url: String,

    /// Public origin of this API, used for gateway callback URLs
    #[serde(default = "default_public_base_url")]
    #[validate(url)]
    pub public_base_url: String,

    /// Key required on administrative routes
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub payment_gateway: PaymentGatewayConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything except the database and environment
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            request_timeout_secs: default_request_timeout_secs(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            settlement_currency: default_currency(),
            max_quantity_per_item: default_max_quantity_per_item(),
            affiliate_commission_rate: default_commission_rate(),
            affiliate_cookie_name: default_affiliate_cookie_name(),
            storefront_url: default_storefront_url(),
            public_base_url: default_public_base_url(),
            admin_api_key: None,
            event_channel_capacity: default_event_channel_capacity(),
            payment_gateway: PaymentGatewayConfig::default(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Commission rate as an exact decimal
    pub fn commission_rate(&self) -> Decimal {
        Decimal::from_f64(self.affiliate_commission_rate)
            .map(|rate| rate.round_dp(4))
            .unwrap_or_default()
    }

    /// Absolute URL for a route of this API
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Absolute URL on the storefront
    pub fn storefront_page(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.storefront_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.admin_api_key.as_deref().map_or(true, str::is_empty) {
            let mut err = ValidationError::new("admin_api_key_required");
            err.message = Some("Set APP__ADMIN_API_KEY outside development".into());
            errors.add("admin_api_key", err);
        }

        if self.is_production()
            && (self.payment_gateway.store_id.is_empty()
                || self.payment_gateway.store_password.is_empty())
        {
            let mut err = ValidationError::new("gateway_credentials_required");
            err.message = Some(
                "Set APP__PAYMENT_GATEWAY__STORE_ID and APP__PAYMENT_GATEWAY__STORE_PASSWORD"
                    .into(),
            );
            errors.add("payment_gateway", err);
        }

        if self.is_production()
            && !self.payment_gateway.verify_with_gateway
            && self.payment_gateway.ipn_secret.as_deref().map_or(true, str::is_empty)
        {
            let mut err = ValidationError::new("ipn_authentication_required");
            err.message = Some(
                "Set APP__PAYMENT_GATEWAY__IPN_SECRET or APP__PAYMENT_GATEWAY__VERIFY_WITH_GATEWAY=true"
                    .into(),
            );
            errors.add("payment_gateway", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_max_quantity_per_item() -> u32 {
    DEFAULT_MAX_QUANTITY_PER_ITEM
}

fn default_commission_rate() -> f64 {
    DEFAULT_COMMISSION_RATE
}

fn default_affiliate_cookie_name() -> String {
    DEFAULT_AFFILIATE_COOKIE.to_string()
}

fn default_storefront_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_base_url() -> String {
    format!("http://localhost:{}", DEFAULT_PORT)
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_gateway_base_url() -> String {
    "https://sandbox.sslcommerz.com".to_string()
}

fn default_session_path() -> String {
    "/gwprocess/v4/api.php".to_string()
}

fn default_validation_path() -> String {
    "/validator/api/validationserverAPI.php".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_commission_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("affiliate_commission_rate");
        err.message =
            Some("affiliate_commission_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> AppConfig {
        AppConfig::new("sqlite::memory:".into(), "production".into())
    }

    #[test]
    fn defaults_match_storefront_rules() {
        let cfg = AppConfig::new("sqlite::memory:".into(), "development".into());
        assert_eq!(cfg.settlement_currency, "BDT");
        assert_eq!(cfg.max_quantity_per_item, 3);
        assert_eq!(cfg.commission_rate(), dec!(0.08));
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_requires_admin_key_and_gateway_credentials() {
        let mut cfg = base_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("admin_api_key"));
        assert!(errors.errors().contains_key("payment_gateway"));

        cfg.admin_api_key = Some("k".repeat(32));
        cfg.payment_gateway.store_id = "store".into();
        cfg.payment_gateway.store_password = "secret".into();
        cfg.payment_gateway.ipn_secret = Some("ipn-secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_requires_an_authenticated_ipn() {
        let mut cfg = base_config();
        cfg.admin_api_key = Some("k".repeat(32));
        cfg.payment_gateway.store_id = "store".into();
        cfg.payment_gateway.store_password = "secret".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("payment_gateway"));

        cfg.payment_gateway.verify_with_gateway = true;
        assert!(cfg.validate_additional_constraints().is_ok());

        cfg.payment_gateway.verify_with_gateway = false;
        cfg.payment_gateway.ipn_secret = Some("ipn-secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn commission_rate_accepts_the_bounds() {
        let mut cfg = base_config();
        cfg.affiliate_commission_rate = 0.0;
        assert!(cfg.validate().is_ok());
        cfg.affiliate_commission_rate = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn commission_rate_must_be_a_fraction() {
        let mut cfg = base_config();
        cfg.affiliate_commission_rate = 1.5;
        let errors = cfg.validate().unwrap_err();
        assert!(errors
            .field_errors()
            .contains_key("affiliate_commission_rate"));

        cfg.affiliate_commission_rate = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let mut cfg = base_config();
        cfg.public_base_url = "https://api.shop.example/".into();
        cfg.storefront_url = "https://shop.example".into();
        assert_eq!(
            cfg.public_url("/api/v1/payment/ipn"),
            "https://api.shop.example/api/v1/payment/ipn"
        );
        assert_eq!(
            cfg.storefront_page("payment/success?orderId=ORD1"),
            "https://shop.example/payment/success?orderId=ORD1"
        );
    }
}
