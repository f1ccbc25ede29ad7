//! Exchange fee schedule: trailing-volume tiers with referral and staking
//! discounts.
//!
//! The tier selects the base maker/taker rates; the referral and staking
//! discounts then apply multiplicatively, in that order. Rates are
//! fractions (0.00035 = 3.5 bps).

use serde::{Deserialize, Serialize};

/// Staking tier granting a fee discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingTier {
    Wood,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl StakingTier {
    pub fn discount(self) -> f64 {
        match self {
            StakingTier::Wood => 0.05,
            StakingTier::Bronze => 0.10,
            StakingTier::Silver => 0.15,
            StakingTier::Gold => 0.20,
            StakingTier::Platinum => 0.30,
            StakingTier::Diamond => 0.40,
        }
    }
}

/// One volume tier: the rates that apply up to `max_volume` (14-day
/// trailing, USD).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeTier {
    pub max_volume: f64,
    pub taker: f64,
    pub maker: f64,
}

/// Account-side inputs that determine the effective fee rates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeeInputs {
    /// 14-day trailing traded volume in USD.
    pub trailing_volume: f64,
    pub use_referral: bool,
    pub staking_tier: Option<StakingTier>,
}

/// Effective rates after tier selection and discounts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeRates {
    pub maker: f64,
    pub taker: f64,
    pub base_maker: f64,
    pub base_taker: f64,
    /// Combined discount actually applied, as a fraction of the base rate.
    pub discount: f64,
}

/// Referral discount fraction.
const REFERRAL_DISCOUNT: f64 = 0.04;

/// Default volume tiers (14-day trailing volume, USD).
fn volume_tiers() -> [VolumeTier; 6] {
    [
        VolumeTier { max_volume: 5e6, taker: 0.00035, maker: 0.0001 },
        VolumeTier { max_volume: 25e6, taker: 0.00030, maker: 0.00005 },
        VolumeTier { max_volume: 100e6, taker: 0.00025, maker: 0.0 },
        VolumeTier { max_volume: 500e6, taker: 0.00023, maker: 0.0 },
        VolumeTier { max_volume: 2e9, taker: 0.00021, maker: 0.0 },
        VolumeTier { max_volume: f64::INFINITY, taker: 0.00019, maker: 0.0 },
    ]
}

/// Resolve effective maker/taker rates for the given account inputs.
pub fn effective_rates(inputs: &FeeInputs) -> FeeRates {
    let tiers = volume_tiers();
    let tier = tiers
        .iter()
        .find(|t| inputs.trailing_volume <= t.max_volume)
        .unwrap_or(&tiers[tiers.len() - 1]);

    let mut multiplier = 1.0;
    if inputs.use_referral {
        multiplier *= 1.0 - REFERRAL_DISCOUNT;
    }
    if let Some(staking) = inputs.staking_tier {
        multiplier *= 1.0 - staking.discount();
    }

    FeeRates {
        maker: tier.maker * multiplier,
        taker: tier.taker * multiplier,
        base_maker: tier.maker,
        base_taker: tier.taker,
        discount: 1.0 - multiplier,
    }
}

/// Round-trip fee breakdown attached to a risk calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub entry_rate: f64,
    pub exit_rate: f64,
    /// Entry + exit, as a percent of position size.
    pub total_percent: f64,
}

/// Round-trip cost assuming taker entry and exit.
pub fn round_trip(inputs: &FeeInputs) -> FeeBreakdown {
    let rates = effective_rates(inputs);
    FeeBreakdown {
        entry_rate: rates.taker,
        exit_rate: rates.taker,
        total_percent: (rates.taker + rates.taker) * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_tier_rates_without_discounts() {
        let rates = effective_rates(&FeeInputs::default());
        assert_eq!(rates.taker, 0.00035);
        assert_eq!(rates.maker, 0.0001);
        assert_eq!(rates.discount, 0.0);
    }

    #[test]
    fn higher_volume_selects_cheaper_tier() {
        let rates = effective_rates(&FeeInputs {
            trailing_volume: 30e6,
            ..Default::default()
        });
        assert_eq!(rates.taker, 0.00025);
        assert_eq!(rates.maker, 0.0);
    }

    #[test]
    fn discounts_apply_multiplicatively_in_order() {
        let inputs = FeeInputs {
            trailing_volume: 0.0,
            use_referral: true,
            staking_tier: Some(StakingTier::Gold),
        };
        let rates = effective_rates(&inputs);
        let expected = 0.00035 * (1.0 - 0.04) * (1.0 - 0.20);
        assert!((rates.taker - expected).abs() < 1e-12);
    }

    #[test]
    fn round_trip_doubles_the_taker_rate() {
        let fees = round_trip(&FeeInputs::default());
        assert!((fees.total_percent - 0.07).abs() < 1e-9);
    }
}
