//! Backtest simulator: replays a historical candle sequence through the
//! analysis pipeline and tracks the position lifecycle.
//!
//! Position state machine per symbol:
//! `FLAT -> ENTERED -> {CLOSED_TP, CLOSED_SL, CLOSED_TIME, CLOSED_REVERSAL} -> FLAT`.
//!
//! Long sequences trade precision for throughput with a fixed sampling
//! stride; sampled-out candles still pass through the window (indicator
//! continuity) but never trigger a signal or a trade transition.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candles::{sanitize_sequence, Candle, CandleWindow};
use crate::config::{ReversalPolicy, SignalConfig};
use crate::engine;
use crate::fees::round_trip;
use crate::scorer::Direction;

/// Why a position left the ENTERED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeStop,
    Reversal,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TakeProfit => write!(f, "CLOSED_TP"),
            CloseReason::StopLoss => write!(f, "CLOSED_SL"),
            CloseReason::TimeStop => write!(f, "CLOSED_TIME"),
            CloseReason::Reversal => write!(f, "CLOSED_REVERSAL"),
        }
    }
}

/// An open position (the ENTERED state).
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// A closed, archived trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Sequential index within the run; keeps replays byte-identical.
    pub id: u32,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub reason: CloseReason,
    /// Percent return net of round-trip fees.
    pub pnl_percent: f64,
}

/// Aggregated replay outcome. Immutable once the replay completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub trade_count: u32,
    pub wins: u32,
    pub losses: u32,
    /// wins / trade_count, in [0, 1].
    pub winrate: f64,
    /// Gross profit over gross loss.
    pub profit_factor: f64,
    /// Largest peak-to-trough decline of cumulative PnL, percentage points.
    pub max_drawdown: f64,
    pub avg_win_percent: f64,
    pub avg_loss_percent: f64,
    pub total_pnl_percent: f64,
    pub exit_counts: BTreeMap<String, u32>,
    /// Malformed candles dropped before the replay.
    pub dropped_candles: u32,
    /// Steps that ran a signal evaluation (after sampling).
    pub evaluated_steps: u32,
    pub trades: Vec<TradeRecord>,
}

/// Check SL/TP/time exits against one candle. Stop-loss is checked first:
/// on a candle that crosses both levels the conservative fill wins.
pub(crate) fn evaluate_exit(
    position: &OpenPosition,
    candle: &Candle,
    time_stop: Duration,
) -> Option<(CloseReason, f64)> {
    match position.direction {
        Direction::Buy => {
            if candle.low <= position.stop_loss {
                return Some((CloseReason::StopLoss, position.stop_loss));
            }
            if candle.high >= position.take_profit {
                return Some((CloseReason::TakeProfit, position.take_profit));
            }
        }
        Direction::Sell => {
            if candle.high >= position.stop_loss {
                return Some((CloseReason::StopLoss, position.stop_loss));
            }
            if candle.low <= position.take_profit {
                return Some((CloseReason::TakeProfit, position.take_profit));
            }
        }
        Direction::Neutral => return None,
    }

    if candle.timestamp - position.entry_time >= time_stop {
        return Some((CloseReason::TimeStop, candle.close));
    }

    None
}

/// Percent return for a closed trade, net of round-trip fees.
fn net_pnl_percent(position: &OpenPosition, exit_price: f64, fee_total_percent: f64) -> f64 {
    let gross = match position.direction {
        Direction::Buy => (exit_price - position.entry_price) / position.entry_price * 100.0,
        Direction::Sell => (position.entry_price - exit_price) / position.entry_price * 100.0,
        Direction::Neutral => 0.0,
    };
    gross - fee_total_percent
}

/// Replay one symbol's candle sequence. Deterministic: no wall-clock reads,
/// no randomness.
pub fn run(symbol: &str, candles: &[Candle], config: &SignalConfig) -> BacktestResult {
    let (retained, dropped) = sanitize_sequence(candles);
    let stride = config.sampling.stride_for(retained.len());
    let time_stop = Duration::minutes(config.time_stop_minutes);
    let fee_total = round_trip(&config.fees).total_percent;

    info!(
        symbol,
        candles = retained.len(),
        dropped,
        stride,
        "starting backtest replay"
    );

    let mut window = CandleWindow::new(config.window_capacity);
    let mut position: Option<OpenPosition> = None;
    let mut trades: Vec<TradeRecord> = Vec::new();
    let mut evaluated_steps = 0u32;

    let close = |position: &OpenPosition,
                     trades: &mut Vec<TradeRecord>,
                     reason: CloseReason,
                     exit_price: f64,
                     exit_time: DateTime<Utc>| {
        let record = TradeRecord {
            id: trades.len() as u32 + 1,
            direction: position.direction,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            exit_price,
            exit_time,
            reason,
            pnl_percent: net_pnl_percent(position, exit_price, fee_total),
        };
        debug!(
            "{} trade #{} {} at {:.2} ({:+.2}%)",
            reason, record.id, record.direction, exit_price, record.pnl_percent
        );
        trades.push(record);
    };

    for (i, candle) in retained.iter().enumerate() {
        window.push(*candle);

        // Sampled-out steps keep indicator continuity but change no state.
        if i % stride != 0 {
            continue;
        }
        evaluated_steps += 1;

        if let Some(open) = position.take() {
            if let Some((reason, exit_price)) = evaluate_exit(&open, candle, time_stop) {
                close(&open, &mut trades, reason, exit_price, candle.timestamp);
                continue;
            }
            position = Some(open);
        }

        let analysis = match engine::analyze(&window, None, config, symbol) {
            Ok(analysis) => analysis,
            // Warm-up: not enough candles yet for a signal.
            Err(_) => continue,
        };

        let direction = analysis.signal.direction;
        let enter = |direction: Direction| {
            analysis.sl_tp.as_ref().map(|sl_tp| OpenPosition {
                direction,
                entry_price: candle.close,
                entry_time: candle.timestamp,
                stop_loss: sl_tp.stop_loss,
                take_profit: sl_tp.take_profit,
            })
        };

        match position.take() {
            Some(open) => {
                // Opposite-direction signal while ENTERED: honor the
                // configured reversal policy.
                if direction != Direction::Neutral
                    && direction != open.direction
                    && config.reversal_policy == ReversalPolicy::CloseAndReverse
                    && analysis.should_enter
                {
                    close(&open, &mut trades, CloseReason::Reversal, candle.close, candle.timestamp);
                    position = enter(direction);
                } else {
                    position = Some(open);
                }
            }
            None => {
                if direction != Direction::Neutral && analysis.should_enter {
                    position = enter(direction);
                    if let Some(open) = &position {
                        debug!(
                            "ENTERED {} at {:.2} (sl {:.2}, tp {:.2})",
                            open.direction, open.entry_price, open.stop_loss, open.take_profit
                        );
                    }
                }
            }
        }
    }

    // A position still open at the end of data never completed its
    // lifecycle; it is not archived into the aggregates.
    if let Some(open) = &position {
        debug!("discarding unfinished {} position at end of data", open.direction);
    }

    aggregate(symbol, trades, dropped as u32, evaluated_steps)
}

/// Build the final result from the archived trades.
fn aggregate(
    symbol: &str,
    trades: Vec<TradeRecord>,
    dropped_candles: u32,
    evaluated_steps: u32,
) -> BacktestResult {
    let trade_count = trades.len() as u32;
    let wins = trades.iter().filter(|t| t.pnl_percent > 0.0).count() as u32;
    let losses = trade_count - wins;

    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.pnl_percent > 0.0)
        .map(|t| t.pnl_percent)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl_percent <= 0.0)
        .map(|t| t.pnl_percent.abs())
        .sum();

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    // Max drawdown over the cumulative-PnL equity curve.
    let mut equity = 0.0f64;
    let mut peak = 0.0f64;
    let mut max_drawdown = 0.0f64;
    for trade in &trades {
        equity += trade.pnl_percent;
        peak = peak.max(equity);
        max_drawdown = max_drawdown.max(peak - equity);
    }

    let mut exit_counts = BTreeMap::new();
    for trade in &trades {
        *exit_counts.entry(trade.reason.to_string()).or_insert(0u32) += 1;
    }

    BacktestResult {
        symbol: symbol.to_string(),
        trade_count,
        wins,
        losses,
        winrate: if trade_count > 0 {
            wins as f64 / trade_count as f64
        } else {
            0.0
        },
        profit_factor,
        max_drawdown,
        avg_win_percent: if wins > 0 {
            gross_profit / wins as f64
        } else {
            0.0
        },
        avg_loss_percent: if losses > 0 {
            -(gross_loss / losses as f64)
        } else {
            0.0
        },
        total_pnl_percent: trades.iter().map(|t| t.pnl_percent).sum(),
        exit_counts,
        dropped_candles,
        evaluated_steps,
        trades,
    }
}

/// Backtest several symbols in parallel. Windows are per-symbol; only the
/// final results are collected.
pub fn run_many(inputs: &[(String, Vec<Candle>)], config: &SignalConfig) -> Vec<BacktestResult> {
    inputs
        .par_iter()
        .map(|(symbol, candles)| run(symbol, candles, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(i: usize, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(i as i64 * 300, 0).unwrap(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 100.0,
        }
    }

    fn flat_sequence(n: usize) -> Vec<Candle> {
        (0..n).map(|i| candle(i, 100.0)).collect()
    }

    fn buy_position(entry_secs: i64) -> OpenPosition {
        OpenPosition {
            direction: Direction::Buy,
            entry_price: 100.0,
            entry_time: Utc.timestamp_opt(entry_secs, 0).unwrap(),
            stop_loss: 99.0,
            take_profit: 102.0,
        }
    }

    #[test]
    fn take_profit_exit_when_high_crosses_target_first() {
        let position = buy_position(0);
        let mut bar = candle(1, 101.0);
        bar.high = 102.5;
        bar.low = 99.5; // above the stop

        let exit = evaluate_exit(&position, &bar, Duration::minutes(10)).unwrap();
        assert_eq!(exit.0, CloseReason::TakeProfit);
        assert_eq!(exit.1, 102.0);

        // Realized PnL = (tp - entry)/entry - fees.
        let fee_total = round_trip(&crate::fees::FeeInputs::default()).total_percent;
        let pnl = net_pnl_percent(&position, exit.1, fee_total);
        assert!((pnl - (2.0 - fee_total)).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_wins_when_both_levels_crossed() {
        let position = buy_position(0);
        let mut bar = candle(1, 100.0);
        bar.high = 103.0;
        bar.low = 98.5;

        let exit = evaluate_exit(&position, &bar, Duration::minutes(10)).unwrap();
        assert_eq!(exit.0, CloseReason::StopLoss);
        assert_eq!(exit.1, 99.0);
    }

    #[test]
    fn time_stop_fires_after_configured_minutes() {
        let position = buy_position(0);
        // 11 minutes later, price never reached either level.
        let mut bar = candle(0, 100.2);
        bar.timestamp = Utc.timestamp_opt(11 * 60, 0).unwrap();
        bar.high = 100.6;
        bar.low = 99.8;

        let exit = evaluate_exit(&position, &bar, Duration::minutes(10)).unwrap();
        assert_eq!(exit.0, CloseReason::TimeStop);
        assert_eq!(exit.1, 100.2);
    }

    #[test]
    fn sell_exits_mirror_buy_exits() {
        let position = OpenPosition {
            direction: Direction::Sell,
            entry_price: 100.0,
            entry_time: Utc.timestamp_opt(0, 0).unwrap(),
            stop_loss: 101.0,
            take_profit: 98.0,
        };
        let mut bar = candle(1, 99.0);
        bar.high = 100.5;
        bar.low = 97.5;
        let exit = evaluate_exit(&position, &bar, Duration::minutes(10)).unwrap();
        assert_eq!(exit.0, CloseReason::TakeProfit);
        assert_eq!(exit.1, 98.0);
    }

    #[test]
    fn sampling_evaluates_every_third_step_on_long_sequences() {
        // 12,000 candles: stride 3, so exactly ceil(12000/3) evaluations.
        let sequence = flat_sequence(12_000);
        let result = run("BTC", &sequence, &SignalConfig::default());
        assert_eq!(result.evaluated_steps, 4_000);
        assert_eq!(result.dropped_candles, 0);
    }

    #[test]
    fn window_reflects_full_sequence_despite_sampling() {
        // The window must see every candle even when evaluation is sampled.
        let sequence = flat_sequence(12_000);
        let config = SignalConfig::default();
        let mut window = CandleWindow::new(config.window_capacity);
        for candle in &sequence {
            window.push(*candle);
        }
        assert_eq!(window.len(), 200);
        // Oldest retained candle is index 11,800 of the original sequence.
        assert_eq!(
            window.get(0).unwrap().timestamp,
            sequence[11_800].timestamp
        );
        assert_eq!(
            window.last().unwrap().timestamp,
            sequence[11_999].timestamp
        );
    }

    #[test]
    fn replay_is_deterministic() {
        let sequence: Vec<Candle> = (0..600)
            .map(|i| {
                let close = 100.0 + ((i as f64) * 0.21).sin() * 3.0;
                let mut c = candle(i, close);
                c.volume = 100.0 + ((i * 37) % 50) as f64;
                c
            })
            .collect();
        let config = SignalConfig::default();
        let a = run("BTC", &sequence, &config);
        let b = run("BTC", &sequence, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_candles_are_dropped_and_counted() {
        let mut sequence = flat_sequence(100);
        sequence[40].close = f64::NAN;
        sequence[41].volume = -1.0;
        let result = run("BTC", &sequence, &SignalConfig::default());
        assert_eq!(result.dropped_candles, 2);
    }

    #[test]
    fn flat_market_produces_no_trades() {
        let result = run("BTC", &flat_sequence(400), &SignalConfig::default());
        assert_eq!(result.trade_count, 0);
        assert_eq!(result.winrate, 0.0);
        assert_eq!(result.profit_factor, 0.0);
        assert!(result.trades.is_empty());
    }

    #[test]
    fn run_many_keeps_per_symbol_results_separate() {
        let inputs = vec![
            ("BTC".to_string(), flat_sequence(300)),
            ("ETH".to_string(), flat_sequence(500)),
        ];
        let results = run_many(&inputs, &SignalConfig::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].symbol, "BTC");
        assert_eq!(results[1].symbol, "ETH");
        assert_eq!(results[0].evaluated_steps, 300);
        assert_eq!(results[1].evaluated_steps, 500);
    }

    #[test]
    fn aggregate_statistics_from_known_trades() {
        let t = |id: u32, pnl: f64| TradeRecord {
            id,
            direction: Direction::Buy,
            entry_price: 100.0,
            entry_time: Utc.timestamp_opt(0, 0).unwrap(),
            exit_price: 100.0 + pnl,
            exit_time: Utc.timestamp_opt(600, 0).unwrap(),
            reason: if pnl > 0.0 { CloseReason::TakeProfit } else { CloseReason::StopLoss },
            pnl_percent: pnl,
        };
        let trades = vec![t(1, 2.0), t(2, -1.0), t(3, 1.0), t(4, -0.5)];
        let result = aggregate("BTC", trades, 0, 100);

        assert_eq!(result.trade_count, 4);
        assert_eq!(result.wins, 2);
        assert_eq!(result.losses, 2);
        assert!((result.winrate - 0.5).abs() < 1e-12);
        assert!((result.profit_factor - 2.0).abs() < 1e-12);
        assert!((result.avg_win_percent - 1.5).abs() < 1e-12);
        assert!((result.avg_loss_percent + 0.75).abs() < 1e-12);
        // Equity path: 2.0, 1.0, 2.0, 1.5 -> worst decline is 1.0.
        assert!((result.max_drawdown - 1.0).abs() < 1e-12);
        assert_eq!(result.exit_counts["CLOSED_TP"], 2);
        assert_eq!(result.exit_counts["CLOSED_SL"], 2);
    }
}
