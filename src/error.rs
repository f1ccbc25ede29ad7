//! Error taxonomy for the signal pipeline.
//!
//! Indicator- and level-local failures degrade to partial results and never
//! abort an analysis; only a window below the absolute minimum length
//! surfaces as an error, which callers report as a no-signal outcome.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    /// Window shorter than a computation's required lookback.
    #[error("insufficient data: {required} candles required, {available} available")]
    DataInsufficiency { required: usize, available: usize },

    /// Zero-variance or zero-range window where a ratio is undefined.
    /// Indicators map this to their defined neutral value instead of
    /// returning NaN; the variant exists for callers that need to know.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// SL/TP geometry infeasible under the configured bounds and fees.
    #[error("invalid risk parameters: {0}")]
    InvalidRiskParameters(String),

    /// External fetch failed after bounded retries.
    #[error("transient source failure after {attempts} attempts: {message}")]
    TransientSourceFailure { attempts: u32, message: String },

    /// A candle in a sequence failed validation. Sequences drop and count
    /// these; the variant carries the index for diagnostics.
    #[error("malformed candle at index {index}: {reason}")]
    MalformedRecord { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, SignalError>;
