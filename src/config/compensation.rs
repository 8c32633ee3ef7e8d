//! Compensation plan settings.
//!
//! The administrator edits these; the engines only read them. A value is
//! fetched once per handled event and passed down explicitly.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};

use super::ConfigError;

/// Sparse level → percent table for unilevel commissions.
///
/// Levels without an entry pay 0%.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UnilevelPercents(BTreeMap<u32, Decimal>);

impl UnilevelPercents {
    pub fn get(&self, level: u32) -> Decimal {
        self.0.get(&level).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Decimal)> + '_ {
        self.0.iter().map(|(level, percent)| (*level, *percent))
    }
}

impl FromIterator<(u32, Decimal)> for UnilevelPercents {
    fn from_iter<T: IntoIterator<Item = (u32, Decimal)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// Map keys arrive as strings from both YAML (via the config crate) and JSON.
impl<'de> Deserialize<'de> for UnilevelPercents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, Decimal>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(level, percent)| {
                level
                    .trim()
                    .parse::<u32>()
                    .map(|level| (level, percent))
                    .map_err(|_| serde::de::Error::custom(format!("invalid level key: {level}")))
            })
            .collect()
    }
}

/// Tunable constants of the compensation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationConfig {
    /// Carried for the administrator record; no engine pays it.
    pub referral_bonus: Decimal,
    /// Monthly spend at which an account becomes active.
    pub maintenance_minimum: Decimal,
    /// Deepest sponsor level that earns unilevel commission.
    pub unilevel_max_level: u32,
    pub unilevel_percents: UnilevelPercents,
    /// Pairing bonus paid at level 1.
    pub pairing_base: Decimal,
    /// Amount the pairing bonus drops per level.
    pub pairing_decrement: Decimal,
    /// Deepest placement level evaluated for pairing.
    pub pairing_max_level: u32,
    /// Decimal places of the ledger's minor currency unit.
    pub currency_scale: u32,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            referral_bonus: Decimal::ZERO,
            maintenance_minimum: Decimal::from(320),
            unilevel_max_level: 15,
            unilevel_percents: UnilevelPercents::default(),
            pairing_base: Decimal::from(300),
            pairing_decrement: Decimal::from(30),
            pairing_max_level: 10,
            currency_scale: 2,
        }
    }
}

impl CompensationConfig {
    /// Pairing bonus for a 1-based level: `max(0, base - decrement * (level - 1))`.
    pub fn pairing_amount(&self, level: u32) -> Decimal {
        if level == 0 {
            return Decimal::ZERO;
        }
        let drop = self.pairing_decrement * Decimal::from(level - 1);
        self.round_money((self.pairing_base - drop).max(Decimal::ZERO))
    }

    /// Configured percent for a level; 0 when unset or beyond the max level.
    pub fn unilevel_percent(&self, level: u32) -> Decimal {
        if level == 0 || level > self.unilevel_max_level {
            return Decimal::ZERO;
        }
        self.unilevel_percents.get(level)
    }

    /// Sum of the percents that can actually pay out.
    pub fn unilevel_share(&self) -> Decimal {
        self.unilevel_percents
            .iter()
            .filter(|(level, _)| *level >= 1 && *level <= self.unilevel_max_level)
            .map(|(_, percent)| percent)
            .sum()
    }

    /// Round half-up to the minor currency unit.
    pub fn round_money(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.currency_scale, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Truncate toward zero at the minor currency unit.
    pub fn floor_money(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.currency_scale, RoundingStrategy::ToZero)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.pairing_base.is_sign_negative() || self.pairing_decrement.is_sign_negative() {
            return invalid("pairing base and decrement must be non-negative".to_string());
        }
        if self.maintenance_minimum.is_sign_negative() {
            return invalid("maintenance_minimum must be non-negative".to_string());
        }
        if self.referral_bonus.is_sign_negative() {
            return invalid("referral_bonus must be non-negative".to_string());
        }
        if self.pairing_max_level == 0 || self.unilevel_max_level == 0 {
            return invalid("max levels must be at least 1".to_string());
        }
        if let Some((level, percent)) = self
            .unilevel_percents
            .iter()
            .find(|(level, percent)| *level == 0 || percent.is_sign_negative())
        {
            return invalid(format!("bad unilevel entry {level} => {percent}"));
        }
        let share = self.unilevel_share();
        if share > Decimal::ONE_HUNDRED {
            return invalid(format!("unilevel percents sum to {share}, above 100"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_pairing_amount_decays_to_zero() {
        let config = CompensationConfig::default();
        assert_eq!(config.pairing_amount(1), dec!(300));
        assert_eq!(config.pairing_amount(2), dec!(270));
        assert_eq!(config.pairing_amount(10), dec!(30));
        assert_eq!(config.pairing_amount(11), dec!(0));
        assert_eq!(config.pairing_amount(25), dec!(0));
        assert_eq!(config.pairing_amount(0), dec!(0));
    }

    #[test]
    fn test_unilevel_percent_defaults_to_zero() {
        let config = CompensationConfig {
            unilevel_max_level: 2,
            unilevel_percents: [(1, dec!(10)), (2, dec!(5)), (3, dec!(1))].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(config.unilevel_percent(1), dec!(10));
        assert_eq!(config.unilevel_percent(2), dec!(5));
        // configured but past the max level
        assert_eq!(config.unilevel_percent(3), dec!(0));
        assert_eq!(config.unilevel_percent(9), dec!(0));
        assert_eq!(config.unilevel_share(), dec!(15));
    }

    #[test]
    fn test_round_money_half_up() {
        let config = CompensationConfig::default();
        assert_eq!(config.round_money(dec!(0.505)), dec!(0.51));
        assert_eq!(config.round_money(dec!(0.504)), dec!(0.50));
        assert_eq!(config.floor_money(dec!(0.509)), dec!(0.50));
    }

    #[test]
    fn test_validate() {
        assert!(CompensationConfig::default().validate().is_ok());

        let negative = CompensationConfig {
            pairing_decrement: dec!(-1),
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let zero_level = CompensationConfig {
            unilevel_percents: [(0, dec!(1))].into_iter().collect(),
            ..Default::default()
        };
        assert!(zero_level.validate().is_err());

        let no_depth = CompensationConfig {
            pairing_max_level: 0,
            ..Default::default()
        };
        assert!(no_depth.validate().is_err());
    }

    #[test]
    fn test_percents_round_trip_through_json() {
        let percents: UnilevelPercents = [(1, dec!(10)), (2, dec!(2.5))].into_iter().collect();
        let json = serde_json::to_string(&percents).unwrap();
        let back: UnilevelPercents = serde_json::from_str(&json).unwrap();
        assert_eq!(back, percents);
    }
}
