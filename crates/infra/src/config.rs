//! Clinic configuration loading and representation.
//!
//! Amounts are in the smallest currency unit (cents for `USD`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REGISTRATION_FEE_VAR: &str = "CLINICFLOW_REGISTRATION_FEE";
pub const CURRENCY_VAR: &str = "CLINICFLOW_CURRENCY";
pub const REORDER_LEVEL_VAR: &str = "CLINICFLOW_REORDER_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicConfig {
    /// Fee collected at the front desk when a patient is registered.
    pub registration_fee: u64,
    /// ISO 4217 code, display only.
    pub currency: String,
    /// Reorder level given to medicines registered without one.
    pub default_reorder_level: i64,
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            registration_fee: 5_000,
            currency: "USD".to_string(),
            default_reorder_level: 10,
        }
    }
}

impl ClinicConfig {
    /// Read overrides from the process environment; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClinicConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(REGISTRATION_FEE_VAR) {
            config.registration_fee = match raw.trim().parse::<u64>() {
                Ok(fee) if fee > 0 => fee,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: REGISTRATION_FEE_VAR,
                        value: raw,
                        expected: "a positive integer amount",
                    });
                }
            };
        }

        if let Some(raw) = lookup(CURRENCY_VAR) {
            let code = raw.trim().to_ascii_uppercase();
            if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(ConfigError::Invalid {
                    var: CURRENCY_VAR,
                    value: raw,
                    expected: "a three-letter currency code",
                });
            }
            config.currency = code;
        }

        if let Some(raw) = lookup(REORDER_LEVEL_VAR) {
            config.default_reorder_level = match raw.trim().parse::<i64>() {
                Ok(level) if level >= 0 => level,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: REORDER_LEVEL_VAR,
                        value: raw,
                        expected: "a non-negative integer",
                    });
                }
            };
        }

        Ok(config)
    }

    /// Render an amount for humans, e.g. `5000` → `"50.00 USD"`.
    pub fn format_amount(&self, amount: u64) -> String {
        format!("{}.{:02} {}", amount / 100, amount % 100, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = ClinicConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClinicConfig::default());
        assert_eq!(config.registration_fee, 5_000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ClinicConfig::from_lookup(lookup(&[
            (REGISTRATION_FEE_VAR, "7500"),
            (CURRENCY_VAR, "kes"),
            (REORDER_LEVEL_VAR, "25"),
        ]))
        .unwrap();
        assert_eq!(config.registration_fee, 7_500);
        assert_eq!(config.currency, "KES");
        assert_eq!(config.default_reorder_level, 25);
    }

    #[test]
    fn zero_fee_is_rejected() {
        let err = ClinicConfig::from_lookup(lookup(&[(REGISTRATION_FEE_VAR, "0")])).unwrap_err();
        match err {
            ConfigError::Invalid { var, .. } => assert_eq!(var, REGISTRATION_FEE_VAR),
        }
    }

    #[test]
    fn malformed_currency_is_rejected() {
        assert!(ClinicConfig::from_lookup(lookup(&[(CURRENCY_VAR, "dollars")])).is_err());
    }

    #[test]
    fn amounts_render_with_two_decimals() {
        let config = ClinicConfig::default();
        assert_eq!(config.format_amount(5_000), "50.00 USD");
        assert_eq!(config.format_amount(9_005), "90.05 USD");
    }
}
