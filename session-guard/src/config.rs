use crate::errors::{GuardError, GuardResult};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
pub const KEY_INACTIVITY_TIMEOUT_MS: &str = "INACTIVITY_TIMEOUT_MS";
pub const KEY_FORCE_CLOSE_THRESHOLD_MS: &str = "FORCE_CLOSE_THRESHOLD_MS";
pub const KEY_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";
pub const KEY_BACKOFF_BASE_MS: &str = "BACKOFF_BASE_MS";
pub const KEY_BACKOFF_CAP_MS: &str = "BACKOFF_CAP_MS";
pub const KEY_FAIL_CLOSED: &str = "FAIL_CLOSED";
pub const KEY_PIN_KDF_MEMORY_KIB: &str = "PIN_KDF_MEMORY_KIB";
pub const KEY_PIN_KDF_ITERATIONS: &str = "PIN_KDF_ITERATIONS";

const ENVIRONMENT_VAR: &str = "BILLPAY_ENVIRONMENT";

/// Environment types for different lock configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

/// String-keyed guard configuration with environment defaults and env var overrides.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl GuardConfig {
    /// Create a configuration populated with the defaults for `environment`.
    pub fn new(environment: Environment) -> Self {
        let mut config = GuardConfig {
            environment,
            config_map: HashMap::new(),
        };
        config.load_defaults();
        config
    }

    /// Load configuration from environment variables
    pub fn from_env() -> GuardResult<Self> {
        let env_str =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        Self::from_environment(Environment::parse(&env_str))
    }

    /// Construct a configuration for the provided environment and apply overrides.
    pub fn from_environment(environment: Environment) -> GuardResult<Self> {
        let mut config = Self::new(environment);
        config.load_from_env_vars();
        config.validate_required_configs()?;
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    pub fn get_or_default(&self, key: &str, default: &str) -> String {
        self.config_map
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_required(&self, key: &str) -> GuardResult<&String> {
        self.config_map.get(key).ok_or_else(|| {
            GuardError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    /// Retrieve a boolean flag with a default fallback when the key is absent.
    pub fn get_bool_with_default(&self, key: &str, default: bool) -> GuardResult<bool> {
        debug_assert!(!key.is_empty(), "configuration key must not be empty");
        match self.config_map.get(key) {
            Some(value) => parse_bool_flag(value, key),
            None => Ok(default),
        }
    }

    /// Retrieve an unsigned 64-bit value with a default fallback.
    pub fn get_u64_with_default(&self, key: &str, default: u64) -> GuardResult<u64> {
        debug_assert!(!key.is_empty(), "configuration key must not be empty");
        match self.config_map.get(key) {
            Some(value) => parse_u64_value(value, key),
            None => Ok(default),
        }
    }

    /// Set a configuration value (tests and harness overrides)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config_map.insert(key.into(), value.into());
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Validate that every key the guard reads is present.
    pub fn validate_required_configs(&self) -> GuardResult<()> {
        let required_keys = [
            KEY_LOG_LEVEL,
            KEY_INACTIVITY_TIMEOUT_MS,
            KEY_FORCE_CLOSE_THRESHOLD_MS,
            KEY_MAX_FAILED_ATTEMPTS,
            KEY_BACKOFF_BASE_MS,
            KEY_BACKOFF_CAP_MS,
            KEY_FAIL_CLOSED,
            KEY_PIN_KDF_MEMORY_KIB,
            KEY_PIN_KDF_ITERATIONS,
        ];

        for key in required_keys {
            if !self.config_map.contains_key(key) {
                return Err(GuardError::ValidationError(format!(
                    "Required configuration key '{}' is missing for {} environment",
                    key,
                    format!("{:?}", self.environment).to_lowercase()
                )));
            }
        }

        Ok(())
    }

    /// Derive the typed settings consumed by the guard components.
    pub fn settings(&self) -> GuardResult<GuardSettings> {
        let inactivity_timeout_ms = self.get_u64_with_default(KEY_INACTIVITY_TIMEOUT_MS, 20_000)?;
        let force_close_threshold_ms =
            self.get_u64_with_default(KEY_FORCE_CLOSE_THRESHOLD_MS, 5_000)?;
        let max_failed_attempts = self
            .get_u64_with_default(KEY_MAX_FAILED_ATTEMPTS, 5)?
            .clamp(1, u32::MAX as u64) as u32;
        let backoff_base_ms = self.get_u64_with_default(KEY_BACKOFF_BASE_MS, 1_000)?;
        let backoff_cap_ms = self
            .get_u64_with_default(KEY_BACKOFF_CAP_MS, 32_000)?
            .max(backoff_base_ms);
        let fail_closed = self.get_bool_with_default(KEY_FAIL_CLOSED, false)?;
        let pin_kdf_memory_kib = self
            .get_u64_with_default(KEY_PIN_KDF_MEMORY_KIB, 19_456)?
            .clamp(8, u32::MAX as u64) as u32;
        let pin_kdf_iterations = self
            .get_u64_with_default(KEY_PIN_KDF_ITERATIONS, 2)?
            .clamp(1, u32::MAX as u64) as u32;

        Ok(GuardSettings {
            inactivity_timeout: Duration::from_millis(inactivity_timeout_ms),
            force_close_threshold: Duration::from_millis(force_close_threshold_ms),
            max_failed_attempts,
            backoff_base: Duration::from_millis(backoff_base_ms),
            backoff_cap: Duration::from_millis(backoff_cap_ms),
            fail_closed,
            pin_kdf_memory_kib,
            pin_kdf_iterations,
        })
    }

    fn load_defaults(&mut self) {
        // Defaults shared across environments
        self.insert_default(KEY_INACTIVITY_TIMEOUT_MS, "20000");
        self.insert_default(KEY_FORCE_CLOSE_THRESHOLD_MS, "5000");
        self.insert_default(KEY_FAIL_CLOSED, "false");

        match self.environment {
            Environment::Production => {
                self.insert_default(KEY_LOG_LEVEL, "INFO");
                self.insert_default(KEY_MAX_FAILED_ATTEMPTS, "5");
                self.insert_default(KEY_BACKOFF_BASE_MS, "1000");
                self.insert_default(KEY_BACKOFF_CAP_MS, "32000");
                self.insert_default(KEY_PIN_KDF_MEMORY_KIB, "19456");
                self.insert_default(KEY_PIN_KDF_ITERATIONS, "2");
            }
            Environment::Development => {
                self.insert_default(KEY_LOG_LEVEL, "DEBUG");
                self.insert_default(KEY_MAX_FAILED_ATTEMPTS, "10");
                self.insert_default(KEY_BACKOFF_BASE_MS, "1000");
                self.insert_default(KEY_BACKOFF_CAP_MS, "8000");
                self.insert_default(KEY_PIN_KDF_MEMORY_KIB, "19456");
                self.insert_default(KEY_PIN_KDF_ITERATIONS, "2");
            }
            Environment::Test => {
                self.insert_default(KEY_LOG_LEVEL, "WARN");
                self.insert_default(KEY_MAX_FAILED_ATTEMPTS, "3");
                self.insert_default(KEY_BACKOFF_BASE_MS, "10");
                self.insert_default(KEY_BACKOFF_CAP_MS, "80");
                // Keeps Argon2 cheap enough for test suites
                self.insert_default(KEY_PIN_KDF_MEMORY_KIB, "64");
                self.insert_default(KEY_PIN_KDF_ITERATIONS, "1");
            }
        }
    }

    fn insert_default(&mut self, key: &str, value: &str) {
        self.config_map.insert(key.to_string(), value.to_string());
    }

    fn load_from_env_vars(&mut self) {
        let env_mappings = [
            ("BILLPAY_LOG_LEVEL", KEY_LOG_LEVEL),
            ("BILLPAY_INACTIVITY_TIMEOUT_MS", KEY_INACTIVITY_TIMEOUT_MS),
            ("BILLPAY_FORCE_CLOSE_THRESHOLD_MS", KEY_FORCE_CLOSE_THRESHOLD_MS),
            ("BILLPAY_MAX_FAILED_ATTEMPTS", KEY_MAX_FAILED_ATTEMPTS),
            ("BILLPAY_BACKOFF_BASE_MS", KEY_BACKOFF_BASE_MS),
            ("BILLPAY_BACKOFF_CAP_MS", KEY_BACKOFF_CAP_MS),
            ("BILLPAY_FAIL_CLOSED", KEY_FAIL_CLOSED),
            ("BILLPAY_PIN_KDF_MEMORY_KIB", KEY_PIN_KDF_MEMORY_KIB),
            ("BILLPAY_PIN_KDF_ITERATIONS", KEY_PIN_KDF_ITERATIONS),
        ];

        for (env_var, config_key) in &env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                if value.trim().is_empty() {
                    log::warn!("Environment variable {} is empty", env_var);
                    continue;
                }

                if value.chars().any(|c| c.is_control()) {
                    log::warn!(
                        "Environment variable {} contains control characters, ignoring",
                        env_var
                    );
                    continue;
                }

                self.config_map.insert(config_key.to_string(), value);
                log::debug!(
                    "Loaded configuration {} from environment variable {}",
                    config_key,
                    env_var
                );
            }
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

/// Typed view of [`GuardConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSettings {
    /// Background duration after which returning to the app requires unlock.
    pub inactivity_timeout: Duration,
    /// Heartbeat age above which a cold start counts as a force-close.
    pub force_close_threshold: Duration,
    /// Wrong credentials tolerated before cooldowns start.
    pub max_failed_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Treat unreadable lock/auth state as locked/authenticated.
    pub fail_closed: bool,
    pub pin_kdf_memory_kib: u32,
    pub pin_kdf_iterations: u32,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_millis(20_000),
            force_close_threshold: Duration::from_millis(5_000),
            max_failed_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(32),
            fail_closed: false,
            pin_kdf_memory_kib: 19_456,
            pin_kdf_iterations: 2,
        }
    }
}

fn parse_bool_flag(value: &str, key: &str) -> GuardResult<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(GuardError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    match normalized.as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(GuardError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}

fn parse_u64_value(value: &str, key: &str) -> GuardResult<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GuardError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    trimmed.parse::<u64>().map_err(|_| {
        GuardError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}

/// Global guard configuration instance
static GUARD_CONFIG: OnceCell<GuardConfig> = OnceCell::new();

/// Initialize the global configuration from `BILLPAY_ENVIRONMENT` and overrides.
pub fn init_guard_config_from_env() -> GuardResult<&'static GuardConfig> {
    GUARD_CONFIG.get_or_try_init(|| {
        let config = GuardConfig::from_env()?;
        log::info!(
            "Guard configuration initialized for {:?} environment",
            config.environment
        );
        Ok(config)
    })
}

/// Get global guard configuration
pub fn get_guard_config() -> GuardResult<&'static GuardConfig> {
    GUARD_CONFIG.get().ok_or(GuardError::NotInitialized)
}
