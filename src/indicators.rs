//! Indicator engine: turns the current window into an `IndicatorSet`.
//!
//! Every value is recomputed fresh from the window contents at each
//! evaluation. An indicator whose lookback exceeds the window length comes
//! back as `None` in the set; a zero-range window yields the indicator's
//! defined neutral value, never NaN.

use serde::{Deserialize, Serialize};

use crate::candles::{Candle, CandleWindow};
use crate::config::IndicatorPeriods;
use crate::error::SignalError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Macd {
    pub value: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Momentum {
    pub change: f64,
    pub change_percent: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

/// Volatility classification from ATR relative to price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilityRegime {
    pub level: VolatilityLevel,
    pub atr_percent: f64,
    /// Close range compressed well below ATR, often preceding a breakout.
    pub squeeze: bool,
}

/// Per-evaluation bundle of indicator values. `None` marks an indicator
/// whose required lookback exceeded the window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: Option<f64>,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub macd: Option<Macd>,
    pub bollinger: Option<BollingerBands>,
    pub atr: Option<f64>,
    pub stochastic: Option<Stochastic>,
    pub williams_r: Option<f64>,
    pub cci: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub momentum: Option<Momentum>,
    pub vwap: Option<f64>,
    pub volatility: Option<VolatilityRegime>,
}

/// Compute the full indicator set for the window. Individual lookback
/// failures degrade that field to `None` rather than aborting.
pub fn compute(window: &CandleWindow, periods: &IndicatorPeriods) -> IndicatorSet {
    let candles = window.to_vec();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let price = window.current_price();

    let atr = atr(&candles, periods.atr).ok();

    IndicatorSet {
        rsi: rsi(&closes, periods.rsi).ok(),
        ema_short: ema(&closes, periods.ema_short).ok(),
        ema_long: ema(&closes, periods.ema_long).ok(),
        macd: macd(&closes, periods.macd_fast, periods.macd_slow, periods.macd_signal).ok(),
        bollinger: bollinger(&closes, periods.bollinger, periods.bollinger_std_dev).ok(),
        atr,
        stochastic: stochastic(&candles, periods.stochastic).ok(),
        williams_r: williams_r(&candles, periods.williams_r).ok(),
        cci: cci(&candles, periods.cci).ok(),
        volume_ratio: volume_ratio(&candles).ok(),
        momentum: momentum(&closes, 10).ok(),
        vwap: vwap(&candles),
        volatility: atr.map(|a| volatility_regime(a, price, &closes)),
    }
}

fn require(len: usize, required: usize) -> Result<(), SignalError> {
    if len < required {
        Err(SignalError::DataInsufficiency {
            required,
            available: len,
        })
    } else {
        Ok(())
    }
}

/// RSI with Wilder smoothing: seed average gain/loss from the first
/// `period` deltas, then exponential 1/period updates. A flat series is
/// neutral (50); gains with zero losses saturate at 100.
pub fn rsi(closes: &[f64], period: usize) -> Result<f64, SignalError> {
    require(closes.len(), period + 1)?;

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return Ok(50.0);
        }
        return Ok(100.0);
    }

    let rs = avg_gain / avg_loss;
    Ok((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}

/// Rolling RSI series: element `i` is the RSI over `closes[..=period+i]`.
/// Used for divergence detection; O(n) via the same Wilder recursion.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if closes.len() < period + 1 {
        return Vec::new();
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let value_of = |gain: f64, loss: f64| -> f64 {
        if loss == 0.0 {
            if gain == 0.0 {
                return 50.0;
            }
            return 100.0;
        }
        (100.0 - 100.0 / (1.0 + gain / loss)).clamp(0.0, 100.0)
    };

    let mut series = Vec::with_capacity(closes.len() - period);
    series.push(value_of(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        avg_gain = (avg_gain * (period - 1) as f64 + change.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + (-change).max(0.0)) / period as f64;
        series.push(value_of(avg_gain, avg_loss));
    }

    series
}

/// EMA seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Result<f64, SignalError> {
    require(values.len(), period.max(1))?;

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    for value in &values[period..] {
        ema = value * k + ema * (1.0 - k);
    }
    Ok(ema)
}

/// Full EMA series aligned to the input: element `i` is the EMA over
/// `values[..=period-1+i]`.
fn ema_full_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(ema);
    for value in &values[period..] {
        ema = value * k + ema * (1.0 - k);
        series.push(ema);
    }
    series
}

/// MACD line, signal line, histogram. The signal line is an EMA of the
/// full MACD series, so the lookback is `slow + signal - 1`.
pub fn macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<Macd, SignalError> {
    require(closes.len(), slow + signal - 1)?;

    let fast_series = ema_full_series(closes, fast);
    let slow_series = ema_full_series(closes, slow);

    // Both series end at the last close; align their tails.
    let len = slow_series.len();
    let offset = fast_series.len() - len;
    let macd_series: Vec<f64> = (0..len)
        .map(|i| fast_series[offset + i] - slow_series[i])
        .collect();

    let signal_line = ema(&macd_series, signal)?;
    let value = *macd_series.last().expect("non-empty by lookback check");

    Ok(Macd {
        value,
        signal: signal_line,
        histogram: value - signal_line,
    })
}

/// Bollinger bands: SMA middle, sample standard deviation width
/// (Bessel-corrected), lower band floored at zero.
pub fn bollinger(closes: &[f64], period: usize, std_dev: f64) -> Result<BollingerBands, SignalError> {
    require(closes.len(), period.max(2))?;

    let recent = &closes[closes.len() - period..];
    let middle = recent.iter().sum::<f64>() / period as f64;
    let variance =
        recent.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / (period - 1) as f64;
    let std = variance.sqrt();

    Ok(BollingerBands {
        upper: middle + std_dev * std,
        middle,
        lower: (middle - std_dev * std).max(0.0),
    })
}

/// ATR with Wilder smoothing over true ranges.
pub fn atr(candles: &[Candle], period: usize) -> Result<f64, SignalError> {
    require(candles.len(), period + 1)?;

    let true_range = |candle: &Candle, prev_close: f64| -> f64 {
        (candle.high - candle.low)
            .max((candle.high - prev_close).abs())
            .max((candle.low - prev_close).abs())
    };

    let mut atr = 0.0;
    for i in 1..=period {
        atr += true_range(&candles[i], candles[i - 1].close);
    }
    atr /= period as f64;

    for i in (period + 1)..candles.len() {
        let tr = true_range(&candles[i], candles[i - 1].close);
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
    }

    Ok(atr)
}

fn raw_k(candles: &[Candle]) -> f64 {
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let close = candles.last().expect("non-empty slice").close;
    if high == low {
        // Zero-range window: neutral, never NaN.
        return 50.0;
    }
    (close - low) / (high - low) * 100.0
}

/// Stochastic oscillator: %K over `period`, %D = SMA(%K, 3).
pub fn stochastic(candles: &[Candle], period: usize) -> Result<Stochastic, SignalError> {
    require(candles.len(), period)?;

    let k = raw_k(&candles[candles.len() - period..]);

    // %D over the last up-to-3 %K values of the rolling series.
    let mut k_values = Vec::new();
    for end in period..=candles.len() {
        if end + 3 <= candles.len() {
            continue;
        }
        k_values.push(raw_k(&candles[end - period..end]));
    }
    let d = k_values.iter().sum::<f64>() / k_values.len() as f64;

    Ok(Stochastic { k, d })
}

/// Williams %R in [-100, 0]; zero-range windows are neutral (-50).
pub fn williams_r(candles: &[Candle], period: usize) -> Result<f64, SignalError> {
    require(candles.len(), period)?;

    let recent = &candles[candles.len() - period..];
    let high = recent.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = recent.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let close = recent.last().expect("non-empty by lookback check").close;

    if high == low {
        return Ok(-50.0);
    }
    Ok(((high - close) / (high - low)) * -100.0)
}

/// Commodity Channel Index; zero mean absolute deviation maps to 0.
pub fn cci(candles: &[Candle], period: usize) -> Result<f64, SignalError> {
    require(candles.len(), period)?;

    let recent = &candles[candles.len() - period..];
    let typical: Vec<f64> = recent.iter().map(|c| c.typical_price()).collect();
    let sma = typical.iter().sum::<f64>() / period as f64;
    let mad = typical.iter().map(|tp| (tp - sma).abs()).sum::<f64>() / period as f64;

    if mad == 0.0 {
        return Ok(0.0);
    }
    Ok((typical[typical.len() - 1] - sma) / (0.015 * mad))
}

/// Recent-volume confirmation: sum of the last 5 volumes relative to 5x the
/// 20-period average.
pub fn volume_ratio(candles: &[Candle]) -> Result<f64, SignalError> {
    require(candles.len(), 20)?;

    let recent: f64 = candles[candles.len() - 5..].iter().map(|c| c.volume).sum();
    let avg: f64 =
        candles[candles.len() - 20..].iter().map(|c| c.volume).sum::<f64>() / 20.0;
    if avg == 0.0 {
        return Ok(0.0);
    }
    Ok(recent / (avg * 5.0))
}

/// Price momentum over `period` candles plus step velocity/acceleration.
pub fn momentum(closes: &[f64], period: usize) -> Result<Momentum, SignalError> {
    require(closes.len(), period.max(3))?;

    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - period];
    let change = last - base;
    let change_percent = if base > 0.0 { change / base * 100.0 } else { 0.0 };

    let prev = closes[closes.len() - 2];
    let prev2 = closes[closes.len() - 3];
    let velocity = if prev > 0.0 { (last - prev) / prev * 100.0 } else { 0.0 };
    let prev_velocity = if prev2 > 0.0 { (prev - prev2) / prev2 * 100.0 } else { 0.0 };

    Ok(Momentum {
        change,
        change_percent,
        velocity,
        acceleration: velocity - prev_velocity,
    })
}

/// Volume-weighted average price over the window.
pub fn vwap(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for candle in candles {
        sum_pv += candle.typical_price() * candle.volume;
        sum_v += candle.volume;
    }
    if sum_v == 0.0 {
        return Some(candles.last()?.close);
    }
    Some(sum_pv / sum_v)
}

/// Classify volatility from ATR and flag a Bollinger squeeze (close range
/// compressed below half the ATR percent).
pub fn volatility_regime(atr: f64, price: f64, closes: &[f64]) -> VolatilityRegime {
    let atr_percent = if price > 0.0 { atr / price * 100.0 } else { 0.0 };

    let squeeze = if closes.len() >= 20 && price > 0.0 {
        let recent = &closes[closes.len() - 20..];
        let high = recent.iter().fold(f64::MIN, |a, &b| a.max(b));
        let low = recent.iter().fold(f64::MAX, |a, &b| a.min(b));
        (high - low) / price * 100.0 < atr_percent * 0.5
    } else {
        false
    };

    let level = if atr_percent < 0.3 {
        VolatilityLevel::Low
    } else if atr_percent < 0.8 {
        VolatilityLevel::Normal
    } else {
        VolatilityLevel::High
    };

    VolatilityRegime {
        level,
        atr_percent,
        squeeze,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: Utc.timestamp_opt(i as i64 * 60, 0).unwrap(),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 100.0,
            })
            .collect()
    }

    fn rising_candles(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                Candle {
                    timestamp: Utc.timestamp_opt(i as i64 * 60, 0).unwrap(),
                    open: close - step,
                    high: close + step / 2.0,
                    low: close - step,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    #[test]
    fn rsi_is_neutral_on_constant_prices() {
        let closes = vec![100.0; 200];
        assert_eq!(rsi(&closes, 14).unwrap(), 50.0);
    }

    #[test]
    fn rsi_saturates_on_monotonic_rise() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let value = rsi(&closes, 14).unwrap();
        assert!(value > 99.0);
        assert!(value <= 100.0);
    }

    #[test]
    fn rsi_stays_in_bounds_on_noisy_series() {
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + ((i * 7919) % 13) as f64 - 6.0)
            .collect();
        let value = rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn rsi_requires_period_plus_one() {
        let closes = vec![100.0; 14];
        assert!(matches!(
            rsi(&closes, 14),
            Err(SignalError::DataInsufficiency { required: 15, .. })
        ));
    }

    #[test]
    fn ema_of_constant_series_is_the_constant() {
        let closes = vec![42.0; 60];
        assert!((ema(&closes, 20).unwrap() - 42.0).abs() < 1e-12);
    }

    #[test]
    fn ema_fails_below_period() {
        assert!(ema(&[1.0, 2.0], 20).is_err());
    }

    #[test]
    fn macd_sign_follows_trend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 0.5).collect();
        let m = macd(&closes, 12, 26, 9).unwrap();
        assert!(m.value > 0.0, "rising series should have positive MACD");
        let closes: Vec<f64> = (0..80).map(|i| 180.0 - i as f64 * 0.5).collect();
        let m = macd(&closes, 12, 26, 9).unwrap();
        assert!(m.value < 0.0);
    }

    #[test]
    fn bollinger_collapses_on_constant_prices() {
        let closes = vec![100.0; 50];
        let bands = bollinger(&closes, 20, 2.0).unwrap();
        assert_eq!(bands.upper, 100.0);
        assert_eq!(bands.middle, 100.0);
        assert_eq!(bands.lower, 100.0);
    }

    #[test]
    fn bollinger_lower_band_floors_at_zero() {
        // Tiny prices with huge dispersion would push the lower band negative.
        let mut closes = vec![1.0; 19];
        closes.push(30.0);
        let bands = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bands.lower >= 0.0);
    }

    #[test]
    fn atr_matches_constant_range() {
        // Every candle spans exactly 2.0 with no gaps.
        let candles = flat_candles(40, 100.0)
            .into_iter()
            .map(|mut c| {
                c.high = 101.0;
                c.low = 99.0;
                c
            })
            .collect::<Vec<_>>();
        let value = atr(&candles, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn stochastic_neutral_on_zero_range() {
        let candles = flat_candles(30, 100.0);
        let stoch = stochastic(&candles, 7).unwrap();
        assert_eq!(stoch.k, 50.0);
        assert_eq!(stoch.d, 50.0);
    }

    #[test]
    fn stochastic_k_bounds() {
        let candles = rising_candles(30, 100.0, 1.0);
        let stoch = stochastic(&candles, 7).unwrap();
        assert!((0.0..=100.0).contains(&stoch.k));
        assert!((0.0..=100.0).contains(&stoch.d));
        // Close near the top of the range.
        assert!(stoch.k > 50.0);
    }

    #[test]
    fn williams_r_neutral_on_zero_range_and_bounded() {
        let flat = flat_candles(30, 100.0);
        assert_eq!(williams_r(&flat, 7).unwrap(), -50.0);

        let rising = rising_candles(30, 100.0, 1.0);
        let value = williams_r(&rising, 7).unwrap();
        assert!((-100.0..=0.0).contains(&value));
    }

    #[test]
    fn cci_zero_on_zero_deviation() {
        let candles = flat_candles(30, 100.0);
        assert_eq!(cci(&candles, 10).unwrap(), 0.0);
    }

    #[test]
    fn volume_ratio_is_one_for_constant_volume() {
        let candles = flat_candles(30, 100.0);
        assert!((volume_ratio(&candles).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn volume_spike_raises_ratio() {
        let mut candles = flat_candles(60, 100.0);
        let n = candles.len();
        for candle in candles[n - 3..].iter_mut() {
            candle.volume = 300.0;
        }
        let ratio = volume_ratio(&candles).unwrap();
        assert!(ratio > 1.0, "ratio {ratio} should exceed 1.0");
    }

    #[test]
    fn rsi_series_matches_point_computation() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        let series = rsi_series(&closes, 14);
        assert_eq!(series.len(), closes.len() - 14);
        let last = rsi(&closes, 14).unwrap();
        assert!((series.last().unwrap() - last).abs() < 1e-9);
    }
}
