//! The per-step analysis pipeline: window -> indicators -> levels ->
//! scoring -> risk placement.
//!
//! `analyze` is a pure function of (window, order book, config, symbol):
//! identical inputs produce identical output, which keeps backtests
//! reproducible.

use serde::{Deserialize, Serialize};

use crate::candles::CandleWindow;
use crate::config::SignalConfig;
use crate::error::SignalError;
use crate::indicators::{self, IndicatorSet};
use crate::levels::{self, LevelSet};
use crate::orderbook::{BookAnalysis, OrderBookSnapshot};
use crate::patterns::{self, Divergence, PatternHit};
use crate::risk::{self, SlTp};
use crate::scorer::{self, ContextValidation, Direction, Signal};

/// Full output of one evaluation: the signal, risk placement, and the
/// diagnostics that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub symbol: String,
    pub price: f64,
    pub signal: Signal,
    /// Present only for a non-NEUTRAL signal with feasible risk geometry.
    pub sl_tp: Option<SlTp>,
    pub indicators: IndicatorSet,
    pub levels: LevelSet,
    pub patterns: Vec<PatternHit>,
    pub divergence: Option<Divergence>,
    pub book: Option<BookAnalysis>,
    pub context: Option<ContextValidation>,
    /// Whether a calling layer should act on the signal.
    pub should_enter: bool,
    /// First filter that rejected the entry, when `should_enter` is false.
    pub reject_reason: Option<String>,
}

/// Run the full pipeline over the window.
///
/// Errors only when the window is below the configured absolute minimum;
/// every other degradation (missing indicator, empty level set, infeasible
/// risk) is absorbed into the result.
pub fn analyze(
    window: &CandleWindow,
    order_book: Option<&OrderBookSnapshot>,
    config: &SignalConfig,
    symbol: &str,
) -> Result<Analysis, SignalError> {
    if window.len() < config.min_candles {
        return Err(SignalError::DataInsufficiency {
            required: config.min_candles,
            available: window.len(),
        });
    }

    let price = window.current_price();
    let candles = window.to_vec();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let indicator_set = indicators::compute(window, &config.periods);
    let level_set = levels::detect(window, indicator_set.atr);
    let pattern_hits = patterns::detect_patterns(&candles);
    let divergence = patterns::detect_divergence(&closes, config.periods.rsi);
    let book = order_book.and_then(|b| b.analyze(price));

    let thresholds = config.thresholds_for(symbol);
    let input = scorer::ScorerInput {
        price,
        indicators: &indicator_set,
        levels: &level_set,
        patterns: &pattern_hits,
        divergence,
        book: book.as_ref(),
        order_flow_threshold: config.order_flow_threshold,
    };
    let mut signal = scorer::build_signal(&input, &thresholds);

    // Risk placement; an infeasible geometry downgrades the signal instead
    // of propagating.
    let mut reject_reason: Option<String> = None;
    let sl_tp = if signal.direction != Direction::Neutral {
        match risk::calculate(
            signal.direction,
            price,
            &indicator_set,
            level_set.volume_profile.as_ref(),
            &config.risk,
            &config.fees,
        ) {
            Ok(sl_tp) => Some(sl_tp),
            Err(e) => {
                tracing::debug!("downgrading {} signal: {e}", signal.direction);
                reject_reason = Some(e.to_string());
                signal.direction = Direction::Neutral;
                signal.strength = 0.5;
                None
            }
        }
    } else {
        None
    };

    let context = scorer::validate_context(
        signal.direction,
        &indicator_set,
        price,
        config.min_volume_ratio_buy,
        config.min_volume_ratio_sell,
    );

    let should_enter = entry_filters(
        &signal,
        sl_tp.as_ref(),
        context.as_ref(),
        &indicator_set,
        book.as_ref(),
        price,
        config,
        &mut reject_reason,
    );

    Ok(Analysis {
        symbol: symbol.to_string(),
        price,
        signal,
        sl_tp,
        indicators: indicator_set,
        levels: level_set,
        patterns: pattern_hits,
        divergence,
        book,
        context,
        should_enter,
        reject_reason,
    })
}

/// Entry filters on top of the raw signal: context validation, ATR band,
/// and spread. Records the first failing filter.
#[allow(clippy::too_many_arguments)]
fn entry_filters(
    signal: &Signal,
    sl_tp: Option<&SlTp>,
    context: Option<&ContextValidation>,
    indicators: &IndicatorSet,
    book: Option<&BookAnalysis>,
    price: f64,
    config: &SignalConfig,
    reject_reason: &mut Option<String>,
) -> bool {
    let mut reject = |reason: String| {
        if reject_reason.is_none() {
            *reject_reason = Some(reason);
        }
        false
    };

    if signal.direction == Direction::Neutral {
        return reject("neutral signal".to_string());
    }
    if sl_tp.is_none() {
        return reject("no feasible risk placement".to_string());
    }
    match context {
        Some(ctx) if ctx.ok => {}
        Some(ctx) => {
            return reject(format!(
                "context validation {}/{} (failed: {})",
                ctx.passed,
                ctx.total,
                ctx.failed_checks.join(", ")
            ))
        }
        None => return reject("no context validation".to_string()),
    }
    if let (Some(atr), true) = (indicators.atr, price > 0.0) {
        let atr_percent = atr / price * 100.0;
        if atr_percent < config.atr_min_percent {
            return reject(format!("ATR {atr_percent:.2}% below tradable band"));
        }
        if atr_percent > config.atr_max_percent {
            return reject(format!("ATR {atr_percent:.2}% above tradable band"));
        }
    }
    if let Some(book) = book {
        if book.spread_percent > config.max_spread_percent {
            return reject(format!("spread {:.3}% too wide", book.spread_percent));
        }
    }

    true
}
