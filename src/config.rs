//! Immutable configuration for the signal pipeline.
//!
//! Every threshold the pipeline consults lives here and is passed
//! explicitly into `analyze`/`backtest` calls; there is no global mutable
//! state. Per-symbol overrides are resolved once per call and merged over
//! the global defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::candles::DEFAULT_WINDOW_CAPACITY;
use crate::fees::FeeInputs;

/// Indicator lookback periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorPeriods {
    pub rsi: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub ema_short: usize,
    pub ema_long: usize,
    pub bollinger: usize,
    pub bollinger_std_dev: f64,
    pub atr: usize,
    pub stochastic: usize,
    pub williams_r: usize,
    pub cci: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            rsi: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            ema_short: 20,
            ema_long: 50,
            bollinger: 20,
            bollinger_std_dev: 2.0,
            atr: 14,
            stochastic: 7,
            williams_r: 7,
            cci: 10,
        }
    }
}

/// Entry thresholds that may be overridden per symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntryThresholds {
    /// Minimum signal quality score (0-100) to accept a signal.
    pub quality_threshold: f64,
    /// Minimum margin of the winning score over the losing score.
    pub signal_dominance: u32,
    /// Minimum buy-side score for a BUY.
    pub min_buy_signals: u32,
    /// Minimum sell-side score for a SELL.
    pub min_sell_signals: u32,
}

impl Default for EntryThresholds {
    fn default() -> Self {
        Self {
            quality_threshold: 70.0,
            signal_dominance: 1,
            min_buy_signals: 3,
            min_sell_signals: 3,
        }
    }
}

/// Per-symbol override of the entry thresholds. `None` fields fall back to
/// the global value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SymbolOverrides {
    pub quality_threshold: Option<f64>,
    pub signal_dominance: Option<u32>,
    pub min_buy_signals: Option<u32>,
    pub min_sell_signals: Option<u32>,
}

/// What to do when an opposite-direction signal fires while a position is
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReversalPolicy {
    /// Opposite signals are ignored until the position closes.
    #[default]
    Ignore,
    /// Close the open position and immediately re-enter the other way.
    CloseAndReverse,
}

/// Stop-loss / take-profit bounds, percent of entry price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskBounds {
    pub min_stop_loss_percent: f64,
    pub max_stop_loss_percent: f64,
    pub max_take_profit_percent: f64,
    pub min_risk_reward_ratio: f64,
    /// Fixed multi-target take-profit percentages.
    pub tp1_percent: f64,
    pub tp2_percent: f64,
    pub tp3_percent: f64,
}

impl Default for RiskBounds {
    fn default() -> Self {
        Self {
            min_stop_loss_percent: 0.6,
            max_stop_loss_percent: 1.0,
            max_take_profit_percent: 2.5,
            min_risk_reward_ratio: 1.5,
            tp1_percent: 1.5,
            tp2_percent: 2.0,
            tp3_percent: 2.5,
        }
    }
}

/// Adaptive sampling thresholds for long backtest sequences: above
/// `stride2_above` candles evaluate every 2nd retained step, above
/// `stride3_above` every 3rd.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingThresholds {
    pub stride2_above: usize,
    pub stride3_above: usize,
}

impl Default for SamplingThresholds {
    fn default() -> Self {
        Self {
            stride2_above: 5_000,
            stride3_above: 10_000,
        }
    }
}

impl SamplingThresholds {
    /// Evaluation stride for a retained sequence of `len` candles.
    pub fn stride_for(&self, len: usize) -> usize {
        if len > self.stride3_above {
            3
        } else if len > self.stride2_above {
            2
        } else {
            1
        }
    }
}

/// Complete pipeline configuration. Construct once, pass by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub window_capacity: usize,
    pub periods: IndicatorPeriods,
    pub thresholds: EntryThresholds,
    pub symbol_overrides: BTreeMap<String, SymbolOverrides>,
    pub risk: RiskBounds,
    pub sampling: SamplingThresholds,
    pub reversal_policy: ReversalPolicy,
    /// Minutes an open position may run without hitting TP or SL before a
    /// forced time-stop close.
    pub time_stop_minutes: i64,
    /// Minimum candles before an analysis is attempted at all.
    pub min_candles: usize,
    /// Minimum volume ratio (recent vs rolling average) for buy-side entry.
    pub min_volume_ratio_buy: f64,
    /// Sell-side volume confirmation, deliberately stricter.
    pub min_volume_ratio_sell: f64,
    /// Acceptable ATR band (percent of price) for entry quality.
    pub atr_min_percent: f64,
    pub atr_max_percent: f64,
    /// Spread above this percent disqualifies entry quality points.
    pub max_spread_percent: f64,
    /// Order-flow imbalance (percent) considered significant by scoring.
    pub order_flow_threshold: f64,
    pub fees: FeeInputs,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            periods: IndicatorPeriods::default(),
            thresholds: EntryThresholds::default(),
            symbol_overrides: BTreeMap::new(),
            risk: RiskBounds::default(),
            sampling: SamplingThresholds::default(),
            reversal_policy: ReversalPolicy::default(),
            time_stop_minutes: 10,
            min_candles: 50,
            min_volume_ratio_buy: 2.0,
            min_volume_ratio_sell: 2.2,
            atr_min_percent: 0.5,
            atr_max_percent: 1.2,
            max_spread_percent: 0.03,
            order_flow_threshold: 10.0,
            fees: FeeInputs::default(),
        }
    }
}

impl SignalConfig {
    /// Resolve the entry thresholds for a symbol: the per-symbol override is
    /// authoritative where present, global defaults otherwise.
    pub fn thresholds_for(&self, symbol: &str) -> EntryThresholds {
        let global = self.thresholds;
        match self.symbol_overrides.get(symbol) {
            None => global,
            Some(o) => EntryThresholds {
                quality_threshold: o.quality_threshold.unwrap_or(global.quality_threshold),
                signal_dominance: o.signal_dominance.unwrap_or(global.signal_dominance),
                min_buy_signals: o.min_buy_signals.unwrap_or(global.min_buy_signals),
                min_sell_signals: o.min_sell_signals.unwrap_or(global.min_sell_signals),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_override_merges_over_global() {
        let mut config = SignalConfig::default();
        config.symbol_overrides.insert(
            "ETH".to_string(),
            SymbolOverrides {
                quality_threshold: Some(82.0),
                ..Default::default()
            },
        );

        let eth = config.thresholds_for("ETH");
        assert_eq!(eth.quality_threshold, 82.0);
        assert_eq!(eth.min_buy_signals, 3);

        let btc = config.thresholds_for("BTC");
        assert_eq!(btc.quality_threshold, 70.0);
    }

    #[test]
    fn sampling_stride_matches_sequence_length() {
        let sampling = SamplingThresholds::default();
        assert_eq!(sampling.stride_for(5_000), 1);
        assert_eq!(sampling.stride_for(5_001), 2);
        assert_eq!(sampling.stride_for(10_000), 2);
        assert_eq!(sampling.stride_for(12_000), 3);
    }
}
