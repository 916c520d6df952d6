//! Ambient process configuration: deployment-wide knobs read once at
//! startup. A `TestPlan` is supplied by a caller through `Service`, not
//! sourced from the environment — this is the operational surface only:
//! logging, transport defaults, and scheduling limits.

use std::env;

use thiserror::Error;

use crate::client::ClientConfig;
use crate::connection_pool::PoolConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("mTLS configuration incomplete: both CLIENT_CERT_PATH and CLIENT_KEY_PATH must be set together, or neither")]
    IncompleteMtls,
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Deployment-wide configuration, independent of any one test plan.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_format: LogFormat,
    pub log_level: String,
    pub max_workers: usize,
    pub default_timeout_ms: u64,
    pub supervisor_poll_interval_ms: u64,
    pub reporter_interval_secs: u64,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
    pub pool_config: PoolConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let max_workers: usize = env_parse_or("MAX_WORKERS", crate::plan::MAX_USERS)?;
        let default_timeout_ms: u64 = env_parse_or("DEFAULT_TIMEOUT_MS", 30_000)?;
        let supervisor_poll_interval_ms: u64 = env_parse_or("SUPERVISOR_POLL_INTERVAL_MS", 2_000)?;
        let reporter_interval_secs: u64 = env_parse_or("REPORTER_INTERVAL_SECS", 5)?;

        let resolve_target_addr = env::var("RESOLVE_TARGET_ADDR").ok();
        let client_cert_path = env::var("CLIENT_CERT_PATH").ok();
        let client_key_path = env::var("CLIENT_KEY_PATH").ok();
        let custom_headers = env::var("CUSTOM_HEADERS").ok();

        let config = Config {
            log_format,
            log_level,
            max_workers,
            default_timeout_ms,
            supervisor_poll_interval_ms,
            reporter_interval_secs,
            resolve_target_addr,
            client_cert_path,
            client_key_path,
            custom_headers,
            pool_config: PoolConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MAX_WORKERS".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::IncompleteMtls);
        }
        Ok(())
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            resolve_target_addr: self.resolve_target_addr.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            custom_headers: self.custom_headers.clone(),
            pool_config: Some(self.pool_config.clone()),
        }
    }

    #[cfg(test)]
    pub fn for_testing() -> Self {
        Config {
            log_format: LogFormat::Pretty,
            log_level: "info".into(),
            max_workers: crate::plan::MAX_USERS,
            default_timeout_ms: 30_000,
            supervisor_poll_interval_ms: 2_000,
            reporter_interval_secs: 5,
            resolve_target_addr: None,
            client_cert_path: None,
            client_key_path: None,
            custom_headers: None,
            pool_config: PoolConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        let vars = [
            "LOG_FORMAT",
            "LOG_LEVEL",
            "MAX_WORKERS",
            "DEFAULT_TIMEOUT_MS",
            "SUPERVISOR_POLL_INTERVAL_MS",
            "REPORTER_INTERVAL_SECS",
            "RESOLVE_TARGET_ADDR",
            "CLIENT_CERT_PATH",
            "CLIENT_KEY_PATH",
            "CUSTOM_HEADERS",
        ];
        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_with_no_env_vars_set() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.reporter_interval_secs, 5);
        assert_eq!(config.supervisor_poll_interval_ms, 2_000);

        clear_env_vars();
    }

    #[test]
    fn log_format_json_is_recognized() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("LOG_FORMAT", "json");

        let config = Config::from_env().unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        clear_env_vars();
    }

    #[test]
    fn zero_max_workers_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("MAX_WORKERS", "0");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        clear_env_vars();
    }

    #[test]
    fn incomplete_mtls_cert_only_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("CLIENT_CERT_PATH", "/path/to/cert.pem");

        assert!(matches!(Config::from_env(), Err(ConfigError::IncompleteMtls)));

        clear_env_vars();
    }

    #[test]
    fn to_client_config_maps_transport_fields() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        env::set_var("RESOLVE_TARGET_ADDR", "example.com:127.0.0.1:8443");

        let config = Config::from_env().unwrap();
        let client_config = config.to_client_config();
        assert_eq!(
            client_config.resolve_target_addr.as_deref(),
            Some("example.com:127.0.0.1:8443")
        );

        clear_env_vars();
    }
}
