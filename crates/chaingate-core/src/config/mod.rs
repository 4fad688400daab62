//! Process configuration with layered loading.
//!
//! Loaded in this order (later overrides earlier): compiled defaults, the TOML
//! file named by `CHAINGATE_CONFIG` (default `config/config.toml`), then
//! `CHAINGATE__`-prefixed environment variables with `__` as the nesting
//! separator (e.g. `CHAINGATE__SERVER__BIND_PORT=8080`).
//!
//! Tenant records, routing rules and check rules are *not* configured here;
//! they live in the record store. This file only covers process-level knobs.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// HTTP data-plane server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the JSON-RPC server to. Defaults to `0.0.0.0`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Defaults to `8090`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum concurrent in-flight RPC requests. Defaults to `1000`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8090
}

fn default_max_concurrent_requests() -> usize {
    1000
}

/// gRPC proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// Bind address for the transparent gRPC proxy. Defaults to `0.0.0.0`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Defaults to `50051`.
    #[serde(default = "default_grpc_port")]
    pub bind_port: u16,

    /// Interval between upstream pool refreshes in seconds. Defaults to `300`.
    #[serde(default = "default_grpc_refresh_seconds")]
    pub refresh_interval_seconds: u64,
}

fn default_grpc_port() -> u16 {
    50051
}

fn default_grpc_refresh_seconds() -> u64 {
    300
}

/// Control-plane health check scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Interval between check ticks in seconds. Defaults to `60`.
    #[serde(default = "default_check_interval_seconds")]
    pub interval_seconds: u64,

    /// Probe response cache TTL in seconds. Defaults to `60`.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_check_interval_seconds() -> u64 {
    60
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

/// Logging output configuration. Trace records always go to stdout; this
/// controls the diagnostic log stream on stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level when `RUST_LOG` is unset. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Bootstrap credentials for the admin surface.
///
/// When present, the server seeds the store's (`admin`, `basic_auth`) config
/// entry at startup; after that the store record is authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub grpc: GrpcConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_grpc_port(),
            refresh_interval_seconds: default_grpc_refresh_seconds(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_check_interval_seconds(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            grpc: GrpcConfig::default(),
            health_check: HealthCheckConfig::default(),
            logging: LoggingConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("server.bind_address", "0.0.0.0")?
            .set_default("server.bind_port", 8090)?
            .set_default("server.max_concurrent_requests", 1000)?
            .set_default("grpc.bind_address", "0.0.0.0")?
            .set_default("grpc.bind_port", 50051)?
            .set_default("grpc.refresh_interval_seconds", 300)?
            .set_default("health_check.interval_seconds", 60)?
            .set_default("health_check.cache_ttl_seconds", 60)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("CHAINGATE").separator("__"))
            .build()?;

        builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml` (overridable via
    /// `CHAINGATE_CONFIG`) with fallback to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("CHAINGATE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&path)
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check.interval_seconds)
    }

    #[must_use]
    pub fn check_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.health_check.cache_ttl_seconds)
    }

    #[must_use]
    pub fn grpc_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.grpc.refresh_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_port, 8090);
        assert_eq!(config.grpc.bind_port, 50051);
        assert_eq!(config.health_check.interval_seconds, 60);
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.grpc_refresh_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::from_file("/definitely/not/a/config.toml")
            .expect("missing file should not be an error");
        assert_eq!(config.server.max_concurrent_requests, 1000);
        assert_eq!(config.logging.format, "pretty");
    }
}
