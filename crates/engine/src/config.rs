//! Engine configuration.
//!
//! Defaults cover every field; `STOCKFLOW_*` environment variables override them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    NotPositive { key: &'static str, value: String },

    #[error("{key} is not a usable document prefix: {value:?}")]
    InvalidPrefix { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Days between invoice issue and due date.
    pub payment_term_days: u32,
    pub order_prefix: String,
    pub shipment_prefix: String,
    pub receipt_prefix: String,
    pub invoice_prefix: String,
    /// Postgres connection string; `None` keeps everything in memory.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payment_term_days: 30,
            order_prefix: "STO".to_string(),
            shipment_prefix: "SHP".to_string(),
            receipt_prefix: "RCV".to_string(),
            invoice_prefix: "INV".to_string(),
            database_url: None,
            database_max_connections: 10,
        }
    }
}

const PAYMENT_TERM_DAYS: &str = "STOCKFLOW_PAYMENT_TERM_DAYS";
const ORDER_PREFIX: &str = "STOCKFLOW_ORDER_PREFIX";
const SHIPMENT_PREFIX: &str = "STOCKFLOW_SHIPMENT_PREFIX";
const RECEIPT_PREFIX: &str = "STOCKFLOW_RECEIPT_PREFIX";
const INVOICE_PREFIX: &str = "STOCKFLOW_INVOICE_PREFIX";
const DATABASE_URL: &str = "DATABASE_URL";
const DATABASE_MAX_CONNECTIONS: &str = "STOCKFLOW_DATABASE_MAX_CONNECTIONS";

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (unset keys keep their default).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(PAYMENT_TERM_DAYS) {
            config.payment_term_days = parse_positive(PAYMENT_TERM_DAYS, raw)?;
        }
        if let Some(raw) = lookup(DATABASE_MAX_CONNECTIONS) {
            config.database_max_connections = parse_positive(DATABASE_MAX_CONNECTIONS, raw)?;
        }
        config.database_url = lookup(DATABASE_URL).filter(|url| !url.trim().is_empty());

        for (key, slot) in [
            (ORDER_PREFIX, &mut config.order_prefix),
            (SHIPMENT_PREFIX, &mut config.shipment_prefix),
            (RECEIPT_PREFIX, &mut config.receipt_prefix),
            (INVOICE_PREFIX, &mut config.invoice_prefix),
        ] {
            if let Some(raw) = lookup(key) {
                *slot = parse_prefix(key, raw)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_term_days == 0 {
            return Err(ConfigError::NotPositive {
                key: PAYMENT_TERM_DAYS,
                value: "0".to_string(),
            });
        }
        if self.database_max_connections == 0 {
            return Err(ConfigError::NotPositive {
                key: DATABASE_MAX_CONNECTIONS,
                value: "0".to_string(),
            });
        }
        for (key, prefix) in [
            (ORDER_PREFIX, &self.order_prefix),
            (SHIPMENT_PREFIX, &self.shipment_prefix),
            (RECEIPT_PREFIX, &self.receipt_prefix),
            (INVOICE_PREFIX, &self.invoice_prefix),
        ] {
            if parse_prefix(key, prefix.clone())? != *prefix {
                return Err(ConfigError::InvalidPrefix {
                    key,
                    value: prefix.clone(),
                });
            }
        }
        Ok(())
    }
}

fn parse_positive(key: &'static str, raw: String) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::NotPositive { key, value: raw }),
    }
}

// Prefixes end up inside `{PREFIX}/{YYYYMMDD}/{SEQ}`.
fn parse_prefix(key: &'static str, raw: String) -> Result<String, ConfigError> {
    let prefix = raw.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::InvalidPrefix { key, value: raw });
    }
    Ok(prefix.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.payment_term_days, 30);
        assert_eq!(config.invoice_prefix, "INV");
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("STOCKFLOW_PAYMENT_TERM_DAYS", "45"),
            ("STOCKFLOW_ORDER_PREFIX", " tro "),
        ]))
        .unwrap();
        assert_eq!(config.payment_term_days, 45);
        assert_eq!(config.order_prefix, "TRO");
        assert_eq!(config.shipment_prefix, "SHP");
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn database_settings_come_from_the_environment() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://stockflow@localhost/stockflow"),
            ("STOCKFLOW_DATABASE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://stockflow@localhost/stockflow")
        );
        assert_eq!(config.database_max_connections, 4);

        let blank = EngineConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert_eq!(blank.database_url, None);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("STOCKFLOW_PAYMENT_TERM_DAYS", "0")])),
            Err(ConfigError::NotPositive { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("STOCKFLOW_PAYMENT_TERM_DAYS", "soon")])),
            Err(ConfigError::NotPositive { .. })
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("STOCKFLOW_RECEIPT_PREFIX", "R/C")])),
            Err(ConfigError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"payment_term_days": 14}"#).unwrap();
        assert_eq!(config.payment_term_days, 14);
        assert_eq!(config.order_prefix, "STO");
    }
}
