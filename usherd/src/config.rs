//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use std::env;
use std::time::Duration;
use usher_engine::{EngineConfig, DEFAULT_REAPER_INTERVAL_SECS};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Reservation engine timing configuration
    pub engine: EngineConfig,

    /// Payment gateway credentials
    pub gateway: GatewayConfig,

    /// Time between reaper sweeps
    pub reaper_interval: Duration,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Payment gateway credentials.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Secret API key for the gateway REST client
    pub secret_key: String,
    /// Shared secret for webhook signature verification
    pub webhook_secret: String,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let engine = Self::load_engine_config()?;
        let gateway = Self::load_gateway_config(environment)?;
        let reaper_interval = Duration::from_secs(Self::load_u64_env(
            "USHER_REAPER_INTERVAL_SECS",
            DEFAULT_REAPER_INTERVAL_SECS,
        )?);

        Ok(Self {
            api,
            engine,
            gateway,
            reaper_interval,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            engine: EngineConfig::default(),
            gateway: GatewayConfig {
                secret_key: "sk_test_stub".to_string(),
                webhook_secret: "whsec_test".to_string(),
            },
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("USHER_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid USHER_ENVIRONMENT: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("USHER_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port_str = env::var("USHER_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid USHER_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_engine_config() -> DaemonResult<EngineConfig> {
        let defaults = EngineConfig::default();

        let lock_ttl = Duration::from_millis(Self::load_u64_env(
            "USHER_LOCK_TTL_MS",
            defaults.lock_ttl.as_millis() as u64,
        )?);
        let snapshot_ttl = Duration::from_secs(Self::load_u64_env(
            "USHER_SNAPSHOT_TTL_SECS",
            defaults.snapshot_ttl.as_secs(),
        )?);
        let hold_window = Duration::from_secs(Self::load_u64_env(
            "USHER_HOLD_WINDOW_SECS",
            defaults.hold_window.as_secs(),
        )?);
        let session_expiry = Duration::from_secs(Self::load_u64_env(
            "USHER_SESSION_EXPIRY_SECS",
            defaults.session_expiry.as_secs(),
        )?);
        let client_url =
            env::var("USHER_CLIENT_URL").unwrap_or_else(|_| defaults.client_url.clone());

        Ok(EngineConfig {
            lock_ttl,
            snapshot_ttl,
            hold_window,
            session_expiry,
            client_url,
        })
    }

    fn load_gateway_config(environment: Environment) -> DaemonResult<GatewayConfig> {
        // Stub credentials are acceptable everywhere except production
        let secret_key = match env::var("USHER_GATEWAY_SECRET") {
            Ok(key) => key,
            Err(_) if environment == Environment::Production => {
                return Err(DaemonError::Config(
                    "USHER_GATEWAY_SECRET is required in production".to_string(),
                ));
            }
            Err(_) => "sk_test_stub".to_string(),
        };

        let webhook_secret = match env::var("USHER_WEBHOOK_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment == Environment::Production => {
                return Err(DaemonError::Config(
                    "USHER_WEBHOOK_SECRET is required in production".to_string(),
                ));
            }
            Err(_) => "whsec_stub".to_string(),
        };

        Ok(GatewayConfig {
            secret_key,
            webhook_secret,
        })
    }

    fn load_u64_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            engine: EngineConfig::default(),
            gateway: GatewayConfig {
                secret_key: "sk_test_stub".to_string(),
                webhook_secret: "whsec_stub".to_string(),
            },
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
