use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use crate::gateway::webhook::DEFAULT_TOLERANCE_SECS;
use crate::gateway::GatewayConfig;
use crate::state::WebhookSettings;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/boxoffice";
const DEFAULT_GATEWAY_URL: &str = "https://api.payments.example.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Live,
    Mock,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub gateway_mode: GatewayMode,
    pub gateway_url: String,
    pub gateway_secret_key: Option<String>,
    pub gateway_timeout: Duration,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gateway_secret_key = non_empty("PAYMENT_GATEWAY_SECRET_KEY");
        let gateway_mode = match non_empty("PAYMENT_GATEWAY_MODE").as_deref() {
            Some("live") => GatewayMode::Live,
            Some("mock") => GatewayMode::Mock,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "PAYMENT_GATEWAY_MODE",
                    value: other.to_string(),
                })
            }
            None if gateway_secret_key.is_some() => GatewayMode::Live,
            None => GatewayMode::Mock,
        };
        if gateway_mode == GatewayMode::Live && gateway_secret_key.is_none() {
            return Err(ConfigError::Missing("PAYMENT_GATEWAY_SECRET_KEY"));
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", non_empty("DB_MAX_CONNECTIONS"), 5)?,
            host: non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("PORT", non_empty("PORT"), 3001)?,
            gateway_mode,
            gateway_url: non_empty("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            gateway_secret_key,
            gateway_timeout: Duration::from_secs(parse_or(
                "PAYMENT_GATEWAY_TIMEOUT_SECS",
                non_empty("PAYMENT_GATEWAY_TIMEOUT_SECS"),
                30,
            )?),
            webhook_secret: non_empty("PAYMENT_WEBHOOK_SECRET"),
            webhook_tolerance_secs: parse_or(
                "WEBHOOK_TOLERANCE_SECS",
                non_empty("WEBHOOK_TOLERANCE_SECS"),
                DEFAULT_TOLERANCE_SECS,
            )?,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| ConfigError::Invalid {
            name: "HOST",
            value: self.host.clone(),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let secret_key = self
            .gateway_secret_key
            .clone()
            .ok_or(ConfigError::Missing("PAYMENT_GATEWAY_SECRET_KEY"))?;

        Ok(GatewayConfig {
            base_url: self.gateway_url.clone(),
            secret_key,
            timeout: self.gateway_timeout,
        })
    }

    pub fn webhook_settings(&self) -> WebhookSettings {
        WebhookSettings {
            secret: self.webhook_secret.clone(),
            tolerance_secs: self.webhook_tolerance_secs,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_use_mock_gateway() {
        let config = config(&[]).unwrap();
        assert_eq!(config.gateway_mode, GatewayMode::Mock);
        assert_eq!(config.port, 3001);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.webhook_tolerance_secs, DEFAULT_TOLERANCE_SECS);
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:3001");
    }

    #[test]
    fn test_secret_key_selects_live_gateway() {
        let config = config(&[("PAYMENT_GATEWAY_SECRET_KEY", "sk_live_x")]).unwrap();
        assert_eq!(config.gateway_mode, GatewayMode::Live);
        assert_eq!(config.gateway_config().unwrap().secret_key, "sk_live_x");
    }

    #[test]
    fn test_live_mode_requires_secret() {
        assert_eq!(
            config(&[("PAYMENT_GATEWAY_MODE", "live")]).unwrap_err(),
            ConfigError::Missing("PAYMENT_GATEWAY_SECRET_KEY")
        );
    }

    #[test]
    fn test_invalid_values_are_reported() {
        assert!(matches!(
            config(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            config(&[("PAYMENT_GATEWAY_MODE", "sandbox")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
