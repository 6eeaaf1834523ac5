use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const SUPPORTED_PAYMENT_PROVIDERS: [&str; 1] = ["stripe"];

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment ("development", "staging", "production")
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

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
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// HS256 key for customer access tokens
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Storefront origin used for the payment page redirects
    #[serde(default = "default_website_url")]
    #[validate(url)]
    pub website_url: String,

    #[serde(default = "default_payment_provider")]
    #[validate(custom = "validate_payment_provider")]
    pub payment_provider: String,

    /// Stripe API secret key (sk_...)
    #[serde(default)]
    pub stripe_secret_key: String,

    #[serde(default = "default_stripe_api_base")]
    #[validate(url)]
    pub stripe_api_base: String,

    /// Webhook signing secret (whsec_...)
    #[serde(default)]
    pub payment_webhook_secret: String,

    /// Maximum accepted age of a webhook signature timestamp
    #[serde(default = "default_webhook_tolerance_secs")]
    #[validate(range(min = 1))]
    pub payment_webhook_tolerance_secs: u64,

    /// ISO currency used for checkout line items
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub payment_currency: String,

    /// Timeout for outbound payment provider calls
    #[serde(default = "default_payment_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub payment_request_timeout_secs: u64,

    /// Consecutive provider failures before the circuit breaker opens
    #[serde(default = "default_circuit_breaker_failures")]
    #[validate(range(min = 1))]
    pub circuit_breaker_failure_threshold: u32,

    /// Circuit breaker reset timeout in seconds
    #[serde(default = "default_circuit_breaker_timeout")]
    pub circuit_breaker_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// CORS: comma-separated list of allowed origins (required outside development)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            jwt_secret,
            auth_issuer: default_auth_issuer(),
            website_url: default_website_url(),
            payment_provider: default_payment_provider(),
            stripe_secret_key: String::new(),
            stripe_api_base: default_stripe_api_base(),
            payment_webhook_secret: String::new(),
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            payment_currency: default_currency(),
            payment_request_timeout_secs: default_payment_request_timeout_secs(),
            circuit_breaker_failure_threshold: default_circuit_breaker_failures(),
            circuit_breaker_timeout_secs: default_circuit_breaker_timeout(),
            max_body_size: default_max_body_size(),
            cors_allowed_origins: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Parsed, non-empty CORS origins
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.cors_origins().is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message =
                Some("Set APP__CORS_ALLOWED_ORIGINS for non-development environments".into());
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.payment_webhook_secret.trim().is_empty() {
            let mut err = ValidationError::new("payment_webhook_secret_required");
            err.message = Some(
                "Set APP__PAYMENT_WEBHOOK_SECRET; unsigned webhooks are never accepted".into(),
            );
            errors.add("payment_webhook_secret", err);
        }

        if !self.is_development() && self.stripe_secret_key.trim().is_empty() {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message = Some("Set APP__STRIPE_SECRET_KEY".into());
            errors.add("stripe_secret_key", err);
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
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_auth_issuer() -> String {
    "storefront-api".to_string()
}

fn default_website_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_payment_provider() -> String {
    "stripe".to_string()
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_payment_request_timeout_secs() -> u64 {
    10
}

fn default_circuit_breaker_failures() -> u32 {
    5
}

fn default_circuit_breaker_timeout() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1MB
}

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

fn validate_payment_provider(provider: &str) -> Result<(), ValidationError> {
    if SUPPORTED_PAYMENT_PROVIDERS.contains(&provider.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("payment_provider");
        err.message = Some("Must be one of: stripe".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "secret_key", "12345"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("storefront_api={},tower_http=debug,sqlx=warn", level));
    let filter = EnvFilter::new(directive);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration from `./config` and the environment.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `{config_dir}/default.*`
/// 3. `{config_dir}/{run_env}.*`
/// 4. Environment variables (`APP__*`)
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    let dir = config_dir.display();

    // jwt_secret has no default on purpose.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", dir, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a random string of at least 64 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

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
