//! Rule-based confluence scoring.
//!
//! Scoring is an ordered collection of independent pure rules. Each rule
//! reads the indicator/level inputs and contributes a signed weight to the
//! buy or sell score together with a human-readable reason; a rule whose
//! required input is unavailable is skipped. The scorer only sums
//! contributions and applies the direction/threshold policy.

use serde::{Deserialize, Serialize};

use crate::config::EntryThresholds;
use crate::indicators::IndicatorSet;
use crate::levels::LevelSet;
use crate::orderbook::BookAnalysis;
use crate::patterns::{Divergence, DivergenceKind, PatternBias, PatternHit, PatternStrength};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Neutral,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// One rule contribution.
#[derive(Debug, Clone)]
pub struct RuleHit {
    pub side: Side,
    pub weight: u32,
    pub reason: String,
}

/// Everything a rule may read. All optional inputs stay optional here so
/// each rule can decide to skip itself.
pub struct ScorerInput<'a> {
    pub price: f64,
    pub indicators: &'a IndicatorSet,
    pub levels: &'a LevelSet,
    pub patterns: &'a [PatternHit],
    pub divergence: Option<Divergence>,
    pub book: Option<&'a BookAnalysis>,
    /// Order-flow imbalance percent considered significant.
    pub order_flow_threshold: f64,
}

/// The directional signal produced per evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    /// 0.0-1.0, winning score normalized.
    pub strength: f64,
    pub confidence: Confidence,
    pub buy_score: u32,
    pub sell_score: u32,
    /// 0-100 composite quality.
    pub signal_quality: f64,
    pub reasons: Vec<String>,
}

type Rule = fn(&ScorerInput<'_>, &mut Vec<RuleHit>);

/// Ordered rule table. Adding a rule means adding a function here; the
/// scorer itself never changes.
const RULES: &[Rule] = &[
    rsi_rule,
    macd_rule,
    ema_cross_rule,
    price_vs_ema_rule,
    bollinger_rule,
    order_flow_rule,
    level_proximity_rule,
    pattern_rule,
    divergence_rule,
    stochastic_rule,
    williams_rule,
    cci_rule,
];

fn rsi_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(rsi) = input.indicators.rsi else { return };
    if rsi < 30.0 {
        hits.push(RuleHit { side: Side::Buy, weight: 2, reason: format!("RSI {rsi:.1} oversold") });
    } else if rsi < 40.0 {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: format!("RSI {rsi:.1} mildly oversold") });
    } else if rsi > 70.0 {
        hits.push(RuleHit { side: Side::Sell, weight: 2, reason: format!("RSI {rsi:.1} overbought") });
    } else if rsi > 60.0 {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: format!("RSI {rsi:.1} mildly overbought") });
    }
}

fn macd_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(macd) = input.indicators.macd else { return };
    if macd.histogram > 0.0 && macd.value > macd.signal {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: "MACD above signal line".to_string() });
    } else if macd.histogram < 0.0 && macd.value < macd.signal {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: "MACD below signal line".to_string() });
    }
}

fn ema_cross_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let (Some(short), Some(long)) = (input.indicators.ema_short, input.indicators.ema_long) else {
        return;
    };
    if short > long {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: "EMA20 above EMA50".to_string() });
    } else if short < long {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: "EMA20 below EMA50".to_string() });
    }
}

fn price_vs_ema_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let (Some(short), Some(long)) = (input.indicators.ema_short, input.indicators.ema_long) else {
        return;
    };
    if input.price > short && input.price > long {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: "price above both EMAs".to_string() });
    } else if input.price < short && input.price < long {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: "price below both EMAs".to_string() });
    }
}

fn bollinger_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(bands) = input.indicators.bollinger else { return };
    if input.price < bands.lower {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: "price below lower Bollinger band".to_string() });
    } else if input.price > bands.upper {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: "price above upper Bollinger band".to_string() });
    }
}

fn order_flow_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(book) = input.book else { return };
    let imbalance = book.imbalance_percent;
    if imbalance > input.order_flow_threshold {
        hits.push(RuleHit {
            side: Side::Buy,
            weight: 1,
            reason: format!("order flow {imbalance:.1}% bid-heavy"),
        });
    } else if imbalance < -input.order_flow_threshold {
        hits.push(RuleHit {
            side: Side::Sell,
            weight: 1,
            reason: format!("order flow {:.1}% ask-heavy", imbalance.abs()),
        });
    }
}

/// Price within 0.2% of a strong clustered level: support favors buys,
/// resistance favors sells. Top two levels each side.
fn level_proximity_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    const PROXIMITY: f64 = 0.002;
    const MIN_STRENGTH: f64 = 0.3;

    for level in input.levels.supports.iter().take(2) {
        if level.strength >= MIN_STRENGTH
            && (input.price - level.price).abs() <= input.price * PROXIMITY
        {
            hits.push(RuleHit {
                side: Side::Buy,
                weight: 1,
                reason: format!("price at support {:.2}", level.price),
            });
        }
    }
    for level in input.levels.resistances.iter().take(2) {
        if level.strength >= MIN_STRENGTH
            && (input.price - level.price).abs() <= input.price * PROXIMITY
        {
            hits.push(RuleHit {
                side: Side::Sell,
                weight: 1,
                reason: format!("price at resistance {:.2}", level.price),
            });
        }
    }
}

fn pattern_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    for pattern in input.patterns {
        let weight = match pattern.strength {
            PatternStrength::Strong => 2,
            PatternStrength::Medium => 1,
        };
        match pattern.bias {
            PatternBias::Bullish => hits.push(RuleHit {
                side: Side::Buy,
                weight,
                reason: format!("{} pattern", pattern.kind),
            }),
            PatternBias::Bearish => hits.push(RuleHit {
                side: Side::Sell,
                weight,
                reason: format!("{} pattern", pattern.kind),
            }),
            PatternBias::Neutral => {}
        }
    }
}

fn divergence_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(divergence) = input.divergence else { return };
    match divergence.kind {
        DivergenceKind::Bullish => hits.push(RuleHit {
            side: Side::Buy,
            weight: 3,
            reason: "bullish price/RSI divergence".to_string(),
        }),
        DivergenceKind::Bearish => hits.push(RuleHit {
            side: Side::Sell,
            weight: 3,
            reason: "bearish price/RSI divergence".to_string(),
        }),
    }
}

fn stochastic_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(stoch) = input.indicators.stochastic else { return };
    if stoch.k < 20.0 && stoch.d < 20.0 {
        hits.push(RuleHit {
            side: Side::Buy,
            weight: 2,
            reason: format!("stochastic oversold (K {:.1}, D {:.1})", stoch.k, stoch.d),
        });
    } else if stoch.k > 80.0 && stoch.d > 80.0 {
        hits.push(RuleHit {
            side: Side::Sell,
            weight: 2,
            reason: format!("stochastic overbought (K {:.1}, D {:.1})", stoch.k, stoch.d),
        });
    } else if stoch.k > stoch.d && stoch.k < 50.0 {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: "stochastic bullish cross".to_string() });
    } else if stoch.k < stoch.d && stoch.k > 50.0 {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: "stochastic bearish cross".to_string() });
    }
}

fn williams_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(wr) = input.indicators.williams_r else { return };
    if wr < -80.0 {
        hits.push(RuleHit { side: Side::Buy, weight: 2, reason: format!("Williams %R {wr:.1} oversold") });
    } else if wr > -20.0 {
        hits.push(RuleHit { side: Side::Sell, weight: 2, reason: format!("Williams %R {wr:.1} overbought") });
    }
}

fn cci_rule(input: &ScorerInput<'_>, hits: &mut Vec<RuleHit>) {
    let Some(cci) = input.indicators.cci else { return };
    if cci < -100.0 {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: format!("CCI {cci:.0} oversold") });
    } else if cci > 100.0 {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: format!("CCI {cci:.0} overbought") });
    } else if cci > 0.0 && cci < 50.0 {
        hits.push(RuleHit { side: Side::Buy, weight: 1, reason: format!("CCI {cci:.0} turning up") });
    } else if cci < 0.0 && cci > -50.0 {
        hits.push(RuleHit { side: Side::Sell, weight: 1, reason: format!("CCI {cci:.0} turning down") });
    }
}

/// Run the rule table and build the signal under the given thresholds.
pub fn build_signal(input: &ScorerInput, thresholds: &EntryThresholds) -> Signal {
    let mut hits = Vec::new();
    for rule in RULES {
        rule(input, &mut hits);
    }

    let mut buy_score = 0u32;
    let mut sell_score = 0u32;
    let mut reasons = Vec::with_capacity(hits.len());
    for hit in hits {
        match hit.side {
            Side::Buy => buy_score += hit.weight,
            Side::Sell => sell_score += hit.weight,
        }
        reasons.push(hit.reason);
    }

    let quality = signal_quality(buy_score, sell_score, input);

    let dominance = thresholds.signal_dominance;
    let direction = if buy_score > sell_score
        && buy_score - sell_score >= dominance
        && buy_score >= thresholds.min_buy_signals
        && quality >= thresholds.quality_threshold
    {
        Direction::Buy
    } else if sell_score > buy_score
        && sell_score - buy_score >= dominance
        && sell_score >= thresholds.min_sell_signals
        && quality >= thresholds.quality_threshold
    {
        Direction::Sell
    } else {
        Direction::Neutral
    };

    let strength = match direction {
        Direction::Buy => (buy_score as f64 / 12.0).min(1.0),
        Direction::Sell => (sell_score as f64 / 12.0).min(1.0),
        Direction::Neutral => 0.5,
    };

    let diff = buy_score.abs_diff(sell_score);
    let confidence = if diff >= 3 {
        Confidence::High
    } else if diff >= 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Signal {
        direction,
        strength,
        confidence,
        buy_score,
        sell_score,
        signal_quality: quality,
        reasons,
    }
}

/// Composite 0-100 quality score: confluence margin, trend alignment,
/// volume, spread, volatility fitness, order-book alignment, and S/R
/// proximity. Missing inputs simply contribute nothing.
pub fn signal_quality(buy_score: u32, sell_score: u32, input: &ScorerInput) -> f64 {
    let mut score = 0.0;
    let ind = input.indicators;
    let buy_leads = buy_score > sell_score;

    // Confluence margin (20).
    score += match buy_score.abs_diff(sell_score) {
        d if d >= 5 => 20.0,
        4 => 15.0,
        3 => 10.0,
        2 => 5.0,
        _ => 0.0,
    };

    // Trend alignment (20).
    if let (Some(short), Some(long)) = (ind.ema_short, ind.ema_long) {
        let histogram = ind.macd.map(|m| m.histogram).unwrap_or(0.0);
        if buy_leads {
            if input.price > short && short > long && histogram > 0.0 {
                score += 20.0;
            } else if input.price > short {
                score += 10.0;
            }
        } else if sell_score > buy_score {
            if input.price < short && short < long && histogram < 0.0 {
                score += 20.0;
            } else if input.price < short {
                score += 10.0;
            }
        }
    }

    // Volume confirmation (15).
    if let Some(ratio) = ind.volume_ratio {
        score += if ratio >= 3.0 {
            15.0
        } else if ratio >= 2.5 {
            10.0
        } else if ratio >= 2.0 {
            5.0
        } else {
            0.0
        };
    }

    // Spread fitness (10): a wide spread eats scalping edges.
    let spread = input.book.map(|b| b.spread_percent).unwrap_or(0.1);
    score += if spread <= 0.02 {
        10.0
    } else if spread <= 0.03 {
        5.0
    } else {
        0.0
    };

    // Volatility fitness (10): ATR band where targets are reachable but
    // stops survivable.
    if let Some(vol) = ind.volatility {
        let atr_percent = vol.atr_percent;
        score += if (0.5..=1.0).contains(&atr_percent) {
            10.0
        } else if (0.4..=1.2).contains(&atr_percent) {
            5.0
        } else {
            0.0
        };
    }

    // Order-book alignment (10).
    if let Some(book) = input.book {
        let imbalance = book.imbalance_percent;
        if imbalance.abs() >= 20.0 {
            let aligned = (imbalance > 0.0 && buy_leads) || (imbalance < 0.0 && sell_score > buy_score);
            if aligned {
                score += 10.0;
            }
        } else if imbalance.abs() >= 15.0 {
            score += 5.0;
        }
    }

    // S/R proximity (15): entries near structure.
    let proximity_points = |levels: &[crate::levels::Level]| -> f64 {
        for level in levels.iter().take(2) {
            if level.price > 0.0 {
                let distance = (input.price - level.price).abs() / input.price;
                if distance <= 0.003 {
                    return 15.0;
                } else if distance <= 0.005 {
                    return 10.0;
                }
            }
        }
        0.0
    };
    if buy_leads {
        score += proximity_points(&input.levels.supports);
    } else if sell_score > buy_score {
        score += proximity_points(&input.levels.resistances);
    }

    score.min(100.0)
}

/// Cross-check layer: six boolean checks per side, at least five must pass
/// before a calling layer accepts the signal. Sell thresholds are
/// deliberately stricter than the buy mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextValidation {
    pub passed: u32,
    pub total: u32,
    pub ok: bool,
    pub failed_checks: Vec<String>,
}

pub fn validate_context(
    direction: Direction,
    indicators: &IndicatorSet,
    price: f64,
    min_volume_ratio_buy: f64,
    min_volume_ratio_sell: f64,
) -> Option<ContextValidation> {
    if direction == Direction::Neutral {
        return None;
    }

    let rsi = indicators.rsi.unwrap_or(50.0);
    let histogram = indicators.macd.map(|m| m.histogram).unwrap_or(0.0);
    let macd_value = indicators.macd.map(|m| m.value).unwrap_or(0.0);
    let ema_short = indicators.ema_short.unwrap_or(0.0);
    let ema_long = indicators.ema_long.unwrap_or(0.0);
    let k = indicators.stochastic.map(|s| s.k).unwrap_or(50.0);
    let wr = indicators.williams_r.unwrap_or(-50.0);
    let volume_ratio = indicators.volume_ratio.unwrap_or(0.0);

    let checks: [(&str, bool); 6] = match direction {
        Direction::Buy => [
            ("rsi", rsi < 55.0),
            ("trend", price > ema_long || ema_short > ema_long),
            ("macd", histogram > -0.5),
            ("stochastic", k < 75.0),
            ("williams", wr > -30.0),
            ("volume", volume_ratio >= min_volume_ratio_buy),
        ],
        Direction::Sell => [
            ("rsi", rsi > 50.0),
            ("trend", price < ema_long && ema_short < ema_long),
            ("macd", macd_value < 0.0),
            ("stochastic", k > 30.0),
            ("williams", wr < -75.0),
            ("volume", volume_ratio >= min_volume_ratio_sell),
        ],
        Direction::Neutral => unreachable!(),
    };

    let passed = checks.iter().filter(|(_, ok)| *ok).count() as u32;
    let failed_checks = checks
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(name, _)| name.to_string())
        .collect();

    Some(ContextValidation {
        passed,
        total: checks.len() as u32,
        ok: passed >= 5,
        failed_checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{BollingerBands, Macd, Stochastic};
    use crate::levels::LevelSet;

    fn empty_levels() -> LevelSet {
        LevelSet::default()
    }

    fn input_with<'a>(indicators: &'a IndicatorSet, levels: &'a LevelSet) -> ScorerInput<'a> {
        ScorerInput {
            price: 100.0,
            indicators,
            levels,
            patterns: &[],
            divergence: None,
            book: None,
            order_flow_threshold: 10.0,
        }
    }

    #[test]
    fn empty_indicator_set_scores_nothing() {
        let indicators = IndicatorSet::default();
        let levels = empty_levels();
        let signal = build_signal(&input_with(&indicators, &levels), &EntryThresholds::default());
        assert_eq!(signal.buy_score, 0);
        assert_eq!(signal.sell_score, 0);
        assert_eq!(signal.direction, Direction::Neutral);
        assert!(signal.reasons.is_empty());
    }

    #[test]
    fn oversold_cluster_drives_buy_score() {
        let indicators = IndicatorSet {
            rsi: Some(25.0),
            stochastic: Some(Stochastic { k: 15.0, d: 12.0 }),
            williams_r: Some(-85.0),
            cci: Some(-120.0),
            ..Default::default()
        };
        let levels = empty_levels();
        let signal = build_signal(&input_with(&indicators, &levels), &EntryThresholds::default());
        // RSI +2, stochastic +2, williams +2, cci +1.
        assert_eq!(signal.buy_score, 7);
        assert_eq!(signal.sell_score, 0);
        assert_eq!(signal.confidence, Confidence::High);
    }

    #[test]
    fn direction_requires_dominance_min_signals_and_quality() {
        let indicators = IndicatorSet {
            rsi: Some(35.0), // +1 buy only
            ..Default::default()
        };
        let levels = empty_levels();
        let thresholds = EntryThresholds {
            quality_threshold: 0.0,
            ..Default::default()
        };
        let signal = build_signal(&input_with(&indicators, &levels), &thresholds);
        assert_eq!(signal.buy_score, 1);
        // Below min_buy_signals=3 even with quality floor removed.
        assert_eq!(signal.direction, Direction::Neutral);
    }

    #[test]
    fn quality_gate_blocks_an_otherwise_valid_buy() {
        let indicators = IndicatorSet {
            rsi: Some(25.0),
            stochastic: Some(Stochastic { k: 15.0, d: 12.0 }),
            williams_r: Some(-85.0),
            ..Default::default()
        };
        let levels = empty_levels();

        let open = EntryThresholds { quality_threshold: 0.0, ..Default::default() };
        let strict = EntryThresholds { quality_threshold: 99.0, ..Default::default() };

        let input = input_with(&indicators, &levels);
        assert_eq!(build_signal(&input, &open).direction, Direction::Buy);
        assert_eq!(build_signal(&input, &strict).direction, Direction::Neutral);
    }

    #[test]
    fn overbought_cluster_drives_sell() {
        let indicators = IndicatorSet {
            rsi: Some(75.0),
            stochastic: Some(Stochastic { k: 88.0, d: 85.0 }),
            williams_r: Some(-10.0),
            macd: Some(Macd { value: -1.0, signal: -0.5, histogram: -0.5 }),
            ..Default::default()
        };
        let levels = empty_levels();
        let thresholds = EntryThresholds { quality_threshold: 0.0, ..Default::default() };
        let signal = build_signal(&input_with(&indicators, &levels), &thresholds);
        assert_eq!(signal.direction, Direction::Sell);
        assert!(signal.sell_score >= 3);
        assert!(signal.strength > 0.0);
    }

    #[test]
    fn bollinger_touch_contributes_one_point_each_way() {
        let levels = empty_levels();
        let indicators = IndicatorSet {
            bollinger: Some(BollingerBands { upper: 99.0, middle: 95.0, lower: 90.0 }),
            ..Default::default()
        };
        let input = input_with(&indicators, &levels);
        let signal = build_signal(&input, &EntryThresholds::default());
        assert_eq!(signal.sell_score, 1); // price 100 above upper band 99
        assert_eq!(signal.buy_score, 0);
    }

    #[test]
    fn sell_context_is_stricter_than_buy() {
        // Same mildly-bearish backdrop fails the sell context but a
        // mirrored bullish one passes the buy context.
        let bearish = IndicatorSet {
            rsi: Some(48.0), // fails sell rsi > 50
            macd: Some(Macd { value: -0.2, signal: 0.0, histogram: -0.2 }),
            ema_short: Some(101.0), // fails ema20 < ema50
            ema_long: Some(100.5),
            stochastic: Some(Stochastic { k: 40.0, d: 45.0 }),
            williams_r: Some(-60.0), // fails < -75
            volume_ratio: Some(2.1), // fails >= 2.2
            ..Default::default()
        };
        let sell = validate_context(Direction::Sell, &bearish, 100.0, 2.0, 2.2).unwrap();
        assert!(!sell.ok);

        let bullish = IndicatorSet {
            rsi: Some(48.0),
            macd: Some(Macd { value: 0.2, signal: 0.0, histogram: 0.2 }),
            ema_short: Some(101.0),
            ema_long: Some(100.5),
            stochastic: Some(Stochastic { k: 40.0, d: 45.0 }),
            williams_r: Some(-20.0),
            volume_ratio: Some(2.1),
            ..Default::default()
        };
        let buy = validate_context(Direction::Buy, &bullish, 102.0, 2.0, 2.2).unwrap();
        assert!(buy.ok, "failed checks: {:?}", buy.failed_checks);
    }

    #[test]
    fn neutral_direction_has_no_context() {
        let indicators = IndicatorSet::default();
        assert!(validate_context(Direction::Neutral, &indicators, 100.0, 2.0, 2.2).is_none());
    }
}
