//! Fee-aware stop-loss / take-profit placement.
//!
//! The stop hugs the nearest structural level on the adverse side of entry
//! (opposing Bollinger band, value-area bound, EMA50), bounded to the
//! configured percent range. The target is the furthest favorable
//! structure, floored so the trade still clears the minimum risk/reward
//! after round-trip fees.

use serde::{Deserialize, Serialize};

use crate::config::RiskBounds;
use crate::error::SignalError;
use crate::fees::{round_trip, FeeBreakdown, FeeInputs};
use crate::indicators::IndicatorSet;
use crate::levels::VolumeProfile;
use crate::scorer::Direction;

/// Bounded risk parameters for an accepted signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlTp {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    /// Stop distance, percent of entry.
    pub stop_loss_percent: f64,
    /// Target distance, percent of entry.
    pub take_profit_percent: f64,
    pub risk_reward: f64,
    pub fees: FeeBreakdown,
    /// Target percent net of round-trip fees.
    pub net_gain_percent: f64,
    /// Entry adjusted adversely by total fees.
    pub break_even: f64,
}

/// Compute SL/TP for a directional signal at `price`.
///
/// Fails with `InvalidRiskParameters` when the stop geometry degenerates or
/// no target clears the minimum risk/reward after fees; callers treat that
/// as NEUTRAL.
pub fn calculate(
    direction: Direction,
    price: f64,
    indicators: &IndicatorSet,
    volume_profile: Option<&VolumeProfile>,
    bounds: &RiskBounds,
    fee_inputs: &FeeInputs,
) -> Result<SlTp, SignalError> {
    if direction == Direction::Neutral {
        return Err(SignalError::InvalidRiskParameters(
            "no direction to place risk for".to_string(),
        ));
    }
    if price <= 0.0 {
        return Err(SignalError::InvalidRiskParameters(format!(
            "non-positive entry price {price}"
        )));
    }

    let fees = round_trip(fee_inputs);

    let sl_percent = stop_distance_percent(direction, price, indicators, volume_profile, bounds)?;

    // Favorable structural targets.
    let mut target_percent: Option<f64> = None;
    let mut consider = |level: f64| {
        let distance = match direction {
            Direction::Buy => (level - price) / price * 100.0,
            Direction::Sell => (price - level) / price * 100.0,
            Direction::Neutral => return,
        };
        if distance > 0.0 {
            target_percent = Some(target_percent.map_or(distance, |t: f64| t.max(distance)));
        }
    };
    if let Some(bands) = indicators.bollinger {
        consider(bands.middle);
        match direction {
            Direction::Buy => consider(bands.upper),
            Direction::Sell => consider(bands.lower),
            Direction::Neutral => {}
        }
    }
    if let Some(vp) = volume_profile {
        match direction {
            Direction::Buy => consider(vp.vah),
            Direction::Sell => consider(vp.val),
            Direction::Neutral => {}
        }
    }

    // Floor: the target must clear MIN_RR on top of round-trip fees.
    let floor = bounds.min_risk_reward_ratio * sl_percent + fees.total_percent;
    let tp_percent = target_percent
        .unwrap_or(floor)
        .max(floor)
        .min(bounds.max_take_profit_percent);

    if tp_percent + 1e-9 < floor {
        return Err(SignalError::InvalidRiskParameters(format!(
            "no target clears {:.2}x risk/reward after fees (needs {floor:.2}%, cap {:.2}%)",
            bounds.min_risk_reward_ratio, bounds.max_take_profit_percent
        )));
    }

    let (stop_loss, take_profit, tps) = match direction {
        Direction::Buy => (
            price * (1.0 - sl_percent / 100.0),
            price * (1.0 + tp_percent / 100.0),
            [
                price * (1.0 + bounds.tp1_percent / 100.0),
                price * (1.0 + bounds.tp2_percent / 100.0),
                price * (1.0 + bounds.tp3_percent / 100.0),
            ],
        ),
        Direction::Sell => (
            price * (1.0 + sl_percent / 100.0),
            price * (1.0 - tp_percent / 100.0),
            [
                price * (1.0 - bounds.tp1_percent / 100.0),
                price * (1.0 - bounds.tp2_percent / 100.0),
                price * (1.0 - bounds.tp3_percent / 100.0),
            ],
        ),
        Direction::Neutral => unreachable!(),
    };

    let break_even = match direction {
        Direction::Buy => price * (1.0 + fees.total_percent / 100.0),
        Direction::Sell => price * (1.0 - fees.total_percent / 100.0),
        Direction::Neutral => unreachable!(),
    };

    Ok(SlTp {
        stop_loss,
        take_profit,
        take_profit_1: tps[0],
        take_profit_2: tps[1],
        take_profit_3: tps[2],
        stop_loss_percent: sl_percent,
        take_profit_percent: tp_percent,
        risk_reward: tp_percent / sl_percent,
        fees,
        net_gain_percent: tp_percent - fees.total_percent,
        break_even,
    })
}

/// Nearest adverse-side structure, expressed as a percent of entry and
/// clamped to the configured stop bounds. Falls back to an ATR-scaled
/// distance when no structure sits on the adverse side.
fn stop_distance_percent(
    direction: Direction,
    price: f64,
    indicators: &IndicatorSet,
    volume_profile: Option<&VolumeProfile>,
    bounds: &RiskBounds,
) -> Result<f64, SignalError> {
    let mut nearest: Option<f64> = None;
    let mut consider = |level: f64| {
        let distance = match direction {
            Direction::Buy => (price - level) / price * 100.0,
            Direction::Sell => (level - price) / price * 100.0,
            Direction::Neutral => return,
        };
        if distance > 0.0 {
            nearest = Some(nearest.map_or(distance, |n: f64| n.min(distance)));
        }
    };

    if let Some(bands) = indicators.bollinger {
        match direction {
            Direction::Buy => consider(bands.lower),
            Direction::Sell => consider(bands.upper),
            Direction::Neutral => {}
        }
    }
    if let Some(vp) = volume_profile {
        match direction {
            Direction::Buy => consider(vp.val),
            Direction::Sell => consider(vp.vah),
            Direction::Neutral => {}
        }
    }
    if let Some(ema) = indicators.ema_long {
        consider(ema);
    }

    let raw = match nearest {
        Some(distance) => distance,
        None => match indicators.atr {
            Some(atr) if atr > 0.0 => atr / price * 100.0 * 1.2,
            _ => (bounds.min_stop_loss_percent + bounds.max_stop_loss_percent) / 2.0,
        },
    };

    if raw <= 0.0 || !raw.is_finite() {
        return Err(SignalError::InvalidRiskParameters(format!(
            "degenerate stop distance {raw}"
        )));
    }

    Ok(raw.clamp(bounds.min_stop_loss_percent, bounds.max_stop_loss_percent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::BollingerBands;

    fn bounds() -> RiskBounds {
        RiskBounds::default()
    }

    fn indicators_with_bands() -> IndicatorSet {
        IndicatorSet {
            bollinger: Some(BollingerBands { upper: 101.5, middle: 100.2, lower: 99.3 }),
            ema_long: Some(99.5),
            atr: Some(0.8),
            ..Default::default()
        }
    }

    #[test]
    fn buy_stop_sits_below_entry_within_bounds() {
        let sl_tp = calculate(
            Direction::Buy,
            100.0,
            &indicators_with_bands(),
            None,
            &bounds(),
            &FeeInputs::default(),
        )
        .unwrap();

        assert!(sl_tp.stop_loss < 100.0);
        assert!(sl_tp.take_profit > 100.0);
        assert!(sl_tp.stop_loss_percent >= bounds().min_stop_loss_percent);
        assert!(sl_tp.stop_loss_percent <= bounds().max_stop_loss_percent);
        assert!(sl_tp.risk_reward >= bounds().min_risk_reward_ratio);
    }

    #[test]
    fn sell_mirrors_the_geometry() {
        let sl_tp = calculate(
            Direction::Sell,
            100.0,
            &indicators_with_bands(),
            None,
            &bounds(),
            &FeeInputs::default(),
        )
        .unwrap();

        assert!(sl_tp.stop_loss > 100.0);
        assert!(sl_tp.take_profit < 100.0);
        assert!(sl_tp.take_profit_1 > sl_tp.take_profit_2);
        assert!(sl_tp.take_profit_2 > sl_tp.take_profit_3);
        assert!(sl_tp.break_even < 100.0);
    }

    #[test]
    fn neutral_direction_is_rejected() {
        let result = calculate(
            Direction::Neutral,
            100.0,
            &IndicatorSet::default(),
            None,
            &bounds(),
            &FeeInputs::default(),
        );
        assert!(matches!(result, Err(SignalError::InvalidRiskParameters(_))));
    }

    #[test]
    fn missing_structure_falls_back_to_atr_stop() {
        let indicators = IndicatorSet {
            atr: Some(0.7),
            ..Default::default()
        };
        let sl_tp = calculate(
            Direction::Buy,
            100.0,
            &indicators,
            None,
            &bounds(),
            &FeeInputs::default(),
        )
        .unwrap();
        // 0.7% ATR * 1.2 = 0.84%, inside [0.6, 1.0].
        assert!((sl_tp.stop_loss_percent - 0.84).abs() < 1e-9);
    }

    #[test]
    fn infeasible_floor_fails_with_invalid_risk() {
        let tight = RiskBounds {
            min_stop_loss_percent: 2.0,
            max_stop_loss_percent: 2.0,
            max_take_profit_percent: 2.5,
            min_risk_reward_ratio: 1.5,
            ..RiskBounds::default()
        };
        // Floor = 1.5 * 2.0 + fees > 2.5 cap.
        let result = calculate(
            Direction::Buy,
            100.0,
            &indicators_with_bands(),
            None,
            &tight,
            &FeeInputs::default(),
        );
        assert!(matches!(result, Err(SignalError::InvalidRiskParameters(_))));
    }

    #[test]
    fn net_gain_subtracts_round_trip_fees() {
        let sl_tp = calculate(
            Direction::Buy,
            100.0,
            &indicators_with_bands(),
            None,
            &bounds(),
            &FeeInputs::default(),
        )
        .unwrap();
        let expected = sl_tp.take_profit_percent - sl_tp.fees.total_percent;
        assert!((sl_tp.net_gain_percent - expected).abs() < 1e-12);
        assert!(sl_tp.break_even > 100.0);
    }
}
