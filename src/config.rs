// Gateway configuration
// Loaded once per process and handed to the gateway builder. Layered from an optional
// `config/gateway.*` file and GATEWAY_* environment variables.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, model::CabinClass};

// Wrapper for secrets so they never end up in Debug output or logs
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> Masked<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub primary_base_url: String,
    // Some suppliers serve booking endpoints from a separate host
    pub secondary_base_url: Option<String>,
    pub auth_url: String,
    pub client_id: String,
    pub username: String,
    pub password: Masked<String>,
    pub end_user_ip: String,
    pub credential_ttl_seconds: i64,
    pub safety_margin_seconds: i64,
    // Lifetime of a supplier search session, propagated as an expiry hint only
    pub trace_ttl_seconds: i64,
    pub max_passengers: u32,
    pub default_currency: String,
    pub default_cabin_class: CabinClass,
    pub audit_log_path: Option<PathBuf>,
    pub credential_cache_path: Option<PathBuf>,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primary_base_url: String::new(),
            secondary_base_url: None,
            auth_url: String::new(),
            client_id: String::new(),
            username: String::new(),
            password: Masked(String::new()),
            end_user_ip: "127.0.0.1".to_string(),
            credential_ttl_seconds: 3600,
            safety_margin_seconds: 60,
            trace_ttl_seconds: 900,
            max_passengers: 9,
            default_currency: "INR".to_string(),
            default_cabin_class: CabinClass::Economy,
            audit_log_path: None,
            credential_cache_path: None,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    // Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    // Fixed delay after an HTTP 429
    pub rate_limit_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            rate_limit_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_ms: u64,
    // Booking calls get longer because they are never retried once sent
    pub booking_ms: u64,
    pub auth_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_ms: 30_000,
            booking_ms: 45_000,
            auth_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: GatewayConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;

        let cfg: GatewayConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("primary_base_url is required".into()));
        }
        if self.auth_url.trim().is_empty() {
            return Err(ConfigError::Invalid("auth_url is required".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id is required".into()));
        }
        if self.username.is_empty() || self.password.expose().is_empty() {
            return Err(ConfigError::Invalid(
                "supplier username and password are required".into(),
            ));
        }
        if self.credential_ttl_seconds <= 0 {
            return Err(ConfigError::Invalid(
                "credential_ttl_seconds must be positive".into(),
            ));
        }
        if self.safety_margin_seconds < 0 || self.safety_margin_seconds >= self.credential_ttl_seconds
        {
            return Err(ConfigError::Invalid(format!(
                "safety_margin_seconds ({}) must be in [0, credential_ttl_seconds)",
                self.safety_margin_seconds
            )));
        }
        if self.max_passengers == 0 {
            return Err(ConfigError::Invalid("max_passengers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Invalid("jitter_factor must be within 0..=1".into()));
        }
        Ok(())
    }

    pub fn base_url(&self, use_secondary: bool) -> &str {
        match (&self.secondary_base_url, use_secondary) {
            (Some(url), true) => url,
            _ => &self.primary_base_url,
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.auth_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        primary_base_url = "https://api.supplier.test/air"
        secondary_base_url = "https://booking.supplier.test/air"
        auth_url = "https://auth.supplier.test/Authenticate"
        client_id = "ApiIntegration"
        username = "portfolio"
        password = "s3cret"
        credential_ttl_seconds = 7200

        [retry]
        max_retries = 5

        [timeouts]
        booking_ms = 60000
    "#;

    #[test]
    fn test_from_toml_applies_defaults() {
        let cfg = GatewayConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(cfg.credential_ttl_seconds, 7200);
        assert_eq!(cfg.safety_margin_seconds, 60);
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.rate_limit_delay_ms, 5000);
        assert_eq!(cfg.timeouts.booking_ms, 60000);
        assert_eq!(cfg.timeouts.search_ms, 30000);
        assert_eq!(cfg.default_currency, "INR");
        assert_eq!(cfg.max_passengers, 9);
        assert_eq!(cfg.base_url(true), "https://booking.supplier.test/air");
        assert_eq!(cfg.base_url(false), "https://api.supplier.test/air");
    }

    #[test]
    fn test_password_is_masked_in_debug() {
        let cfg = GatewayConfig::from_toml(SAMPLE).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("********"));
        assert_eq!(cfg.password.expose(), "s3cret");
    }

    #[test]
    fn test_validate_rejects_bad_margin() {
        let cfg = GatewayConfig {
            primary_base_url: "https://api".into(),
            auth_url: "https://auth".into(),
            username: "u".into(),
            password: Masked("p".into()),
            credential_ttl_seconds: 60,
            safety_margin_seconds: 60,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_requires_client_id() {
        let mut cfg = GatewayConfig::from_toml(SAMPLE).unwrap();
        cfg.client_id = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_validate_requires_urls() {
        let cfg = GatewayConfig::default();
        assert!(cfg.validate().is_err());
    }
}
