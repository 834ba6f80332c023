use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ledger::Amount;

/// 0.0001 of the native unit.
pub const FLOOR_PRICE: Amount = 100_000_000_000_000;
pub const FEE_DIVISOR: Amount = 100;
pub const ESCALATION_NUMERATOR: Amount = 150;
pub const ESCALATION_DENOMINATOR: Amount = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("escalation {numerator}/{denominator} would lower the claim price")]
    Deflationary {
        numerator: Amount,
        denominator: Amount,
    },
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonarchyConfig {
    pub floor_price: Amount,
    pub fee_divisor: Amount,
    pub escalation_numerator: Amount,
    pub escalation_denominator: Amount,
}

impl Default for MonarchyConfig {
    fn default() -> Self {
        Self {
            floor_price: FLOOR_PRICE,
            fee_divisor: FEE_DIVISOR,
            escalation_numerator: ESCALATION_NUMERATOR,
            escalation_denominator: ESCALATION_DENOMINATOR,
        }
    }
}

impl MonarchyConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.floor_price == 0 {
            return Err(ConfigError::Zero("floor_price"));
        }
        if self.fee_divisor == 0 {
            return Err(ConfigError::Zero("fee_divisor"));
        }
        if self.escalation_denominator == 0 {
            return Err(ConfigError::Zero("escalation_denominator"));
        }
        if self.escalation_numerator < self.escalation_denominator {
            return Err(ConfigError::Deflationary {
                numerator: self.escalation_numerator,
                denominator: self.escalation_denominator,
            });
        }
        Ok(())
    }

    pub fn fee_for(&self, payment: Amount) -> Amount {
        payment / self.fee_divisor
    }

    /// Next claim price, truncated toward zero. `None` on overflow.
    pub fn escalate(&self, price: Amount) -> Option<Amount> {
        price
            .checked_mul(self.escalation_numerator)
            .map(|p| p / self.escalation_denominator)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_escalate_by_one_and_a_half() {
        let config = MonarchyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.escalate(FLOOR_PRICE), Some(150_000_000_000_000));
        assert_eq!(config.escalate(150_000_000_000_000), Some(225_000_000_000_000));
        assert_eq!(config.escalate(3), Some(4));
        assert_eq!(config.escalate(Amount::MAX), None);
        assert_eq!(config.fee_for(FLOOR_PRICE), 1_000_000_000_000);
        assert_eq!(config.fee_for(99), 0);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "floor_price": 42 }"#).unwrap();
        let config = MonarchyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.floor_price, 42);
        assert_eq!(config.fee_divisor, FEE_DIVISOR);
        assert_eq!(config.escalation_numerator, ESCALATION_NUMERATOR);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero_fee = MonarchyConfig {
            fee_divisor: 0,
            ..MonarchyConfig::default()
        };
        assert!(matches!(zero_fee.validate(), Err(ConfigError::Zero("fee_divisor"))));

        let shrinking = MonarchyConfig {
            escalation_numerator: 90,
            ..MonarchyConfig::default()
        };
        match shrinking.validate().unwrap_err() {
            ConfigError::Deflationary {
                numerator,
                denominator,
            } => {
                assert_eq!(numerator, 90);
                assert_eq!(denominator, 100);
            }
            _ => panic!("unexpected error"),
        }
    }
}
