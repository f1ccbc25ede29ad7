//! Candlestick pattern detection and price/RSI divergence.

use serde::{Deserialize, Serialize};

use crate::candles::Candle;
use crate::indicators::rsi_series;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    Doji,
    Hammer,
    HangingMan,
    BullishEngulfing,
    BearishEngulfing,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Doji => write!(f, "Doji"),
            PatternKind::Hammer => write!(f, "Hammer"),
            PatternKind::HangingMan => write!(f, "Hanging Man"),
            PatternKind::BullishEngulfing => write!(f, "Bullish Engulfing"),
            PatternKind::BearishEngulfing => write!(f, "Bearish Engulfing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternBias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternStrength {
    Strong,
    Medium,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatternHit {
    pub kind: PatternKind,
    pub bias: PatternBias,
    pub strength: PatternStrength,
}

/// Detect patterns on the most recent candles.
pub fn detect_patterns(candles: &[Candle]) -> Vec<PatternHit> {
    if candles.len() < 3 {
        return Vec::new();
    }

    let mut hits = Vec::new();
    let current = &candles[candles.len() - 1];
    let previous = &candles[candles.len() - 2];

    let body = (current.close - current.open).abs();
    let range = current.high - current.low;

    // Doji: negligible body relative to range.
    if range > 0.0 && body / range < 0.1 {
        hits.push(PatternHit {
            kind: PatternKind::Doji,
            bias: PatternBias::Neutral,
            strength: PatternStrength::Medium,
        });
    }

    // Hammer / hanging man: long lower shadow, small upper shadow.
    let lower_shadow = current.open.min(current.close) - current.low;
    let upper_shadow = current.high - current.open.max(current.close);
    if body > 0.0 && lower_shadow > body * 2.0 && upper_shadow < body * 0.5 {
        if current.close > current.open {
            hits.push(PatternHit {
                kind: PatternKind::Hammer,
                bias: PatternBias::Bullish,
                strength: PatternStrength::Strong,
            });
        } else {
            hits.push(PatternHit {
                kind: PatternKind::HangingMan,
                bias: PatternBias::Bearish,
                strength: PatternStrength::Medium,
            });
        }
    }

    // Engulfing: current body swallows the prior opposite-color body and is
    // at least 10% larger.
    let prev_body = (previous.close - previous.open).abs();
    let prev_bearish = previous.close < previous.open;
    let prev_bullish = previous.close > previous.open;
    let curr_bullish = current.close > current.open;
    let curr_bearish = current.close < current.open;

    if prev_bearish
        && curr_bullish
        && current.open < previous.close
        && current.close > previous.open
        && body > prev_body * 1.1
    {
        hits.push(PatternHit {
            kind: PatternKind::BullishEngulfing,
            bias: PatternBias::Bullish,
            strength: PatternStrength::Strong,
        });
    }

    if prev_bullish
        && curr_bearish
        && current.open > previous.close
        && current.close < previous.open
        && body > prev_body * 1.1
    {
        hits.push(PatternHit {
            kind: PatternKind::BearishEngulfing,
            bias: PatternBias::Bearish,
            strength: PatternStrength::Strong,
        });
    }

    hits
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceKind {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Divergence {
    pub kind: DivergenceKind,
}

/// Compare the direction of recent price extrema against RSI extrema over
/// the same span. A lower price low with a higher RSI low is bullish
/// divergence; a higher price high with a lower RSI high is bearish.
pub fn detect_divergence(closes: &[f64], rsi_period: usize) -> Option<Divergence> {
    let rsi = rsi_series(closes, rsi_period);
    if rsi.len() < 10 {
        return None;
    }

    // Align prices to the RSI series tail.
    let prices = &closes[closes.len() - rsi.len()..];
    let n = rsi.len();

    let recent_prices = &prices[n - 5..];
    let prev_prices = &prices[n - 10..n - 5];
    let recent_rsi = &rsi[n - 5..];
    let prev_rsi = &rsi[n - 10..n - 5];

    let min = |xs: &[f64]| xs.iter().fold(f64::MAX, |a, &b| a.min(b));
    let max = |xs: &[f64]| xs.iter().fold(f64::MIN, |a, &b| a.max(b));

    let price_rising = recent_prices[recent_prices.len() - 1] > recent_prices[0];
    let rsi_rising = recent_rsi[recent_rsi.len() - 1] > recent_rsi[0];

    if !price_rising
        && rsi_rising
        && min(recent_prices) < min(prev_prices)
        && min(recent_rsi) > min(prev_rsi)
    {
        return Some(Divergence { kind: DivergenceKind::Bullish });
    }

    if price_rising
        && !rsi_rising
        && max(recent_prices) > max(prev_prices)
        && max(recent_rsi) < max(prev_rsi)
    {
        return Some(Divergence { kind: DivergenceKind::Bearish });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(i as i64 * 60, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn doji_on_negligible_body() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 101.0, 99.5, 100.0),
            candle(2, 100.0, 102.0, 98.0, 100.05),
        ];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.kind == PatternKind::Doji));
    }

    #[test]
    fn hammer_needs_long_lower_shadow() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.0),
            candle(1, 100.0, 101.0, 99.0, 100.0),
            // Opens 100, dives to 96, closes 100.5: long lower wick.
            candle(2, 100.0, 100.6, 96.0, 100.5),
        ];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.kind == PatternKind::Hammer
            && h.bias == PatternBias::Bullish));
    }

    #[test]
    fn bullish_engulfing_swallows_prior_body() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.0),
            // Red candle 101 -> 100.
            candle(1, 101.0, 101.5, 99.5, 100.0),
            // Green candle opens below prior close, closes above prior open.
            candle(2, 99.8, 102.5, 99.5, 102.0),
        ];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.kind == PatternKind::BullishEngulfing));
    }

    #[test]
    fn no_patterns_on_short_input() {
        let candles = vec![candle(0, 100.0, 101.0, 99.0, 100.0)];
        assert!(detect_patterns(&candles).is_empty());
    }

    #[test]
    fn rising_price_path_never_flags_bullish_divergence() {
        // Price makes a higher high into the tail; a bullish flag (which
        // requires a lower low) would be a contradiction.
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        closes.extend([
            138.0, 136.0, 135.0, 134.5, 134.0,
            134.2, 134.5, 139.0, 139.6, 140.0,
        ]);
        let result = detect_divergence(&closes, 14);
        assert!(!matches!(result, Some(Divergence { kind: DivergenceKind::Bullish })));
    }

    #[test]
    fn no_divergence_on_flat_series() {
        let closes = vec![100.0; 60];
        assert!(detect_divergence(&closes, 14).is_none());
    }
}
