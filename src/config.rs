//! Configuration file support for prepgate.
//!
//! Loads optional TOML config from `~/.config/prepgate/config.toml`.
//! CLI flags override file values; both fall back to built-in defaults.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::mpesa::MpesaSettings;

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// SQLite database URL (e.g., "sqlite://prepgate.db")
    pub database_url: Option<String>,
    /// Server bind address (e.g., "127.0.0.1:8080")
    pub bind: Option<String>,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: Option<u32>,
    /// Allowed CORS origins (None/empty = allow any)
    pub allowed_origins: Option<Vec<String>>,
    /// API keys for authentication (None/empty = no auth)
    pub api_keys: Option<Vec<String>>,
    /// Feedback cache TTL in seconds (default: 7 days)
    pub cache_ttl_seconds: Option<i64>,
    /// Price of one interview in shillings (default: 3)
    pub interview_cost: Option<i64>,
    /// Estimated cost of one AI generation, used for the savings figure on
    /// the stats endpoint (default: 0.02)
    pub generation_cost_usd: Option<f64>,
    /// AI feedback generator endpoint
    pub ai_endpoint: Option<String>,
    /// M-Pesa Daraja gateway settings; payment routes are disabled without them
    pub mpesa: Option<MpesaSettings>,
}

impl Config {
    /// Load config from the default path. A missing file means defaults; a
    /// file that exists but cannot be read or parsed is an error rather than
    /// a silent fallback.
    pub fn load() -> Result<Self> {
        let path = dirs::config_dir()
            .unwrap_or_default()
            .join("prepgate")
            .join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let config = Self::parse(&content).map_err(|e| match e {
                    Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
                    other => other,
                })?;
                tracing::info!(path = %path.display(), "loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Parse a TOML config document.
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            database_url = "sqlite://test.db"
            bind = "0.0.0.0:9000"
            rate_limit_rpm = 120
            interview_cost = 5
            api_keys = ["k1", "k2"]

            [mpesa]
            base_url = "https://sandbox.safaricom.co.ke"
            consumer_key = "ck"
            consumer_secret = "cs"
            short_code = "174379"
            passkey = "pk"
            callback_url = "https://example.com/api/payments/callback"
        "#;
        let config = Config::parse(raw).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite://test.db"));
        assert_eq!(config.rate_limit_rpm, Some(120));
        assert_eq!(config.interview_cost, Some(5));
        assert_eq!(config.api_keys.as_ref().unwrap().len(), 2);
        assert_eq!(config.mpesa.as_ref().unwrap().short_code, "174379");
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.database_url.is_none());
        assert!(config.mpesa.is_none());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let err = Config::parse("rate_limit_rpm = \"not a number\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
