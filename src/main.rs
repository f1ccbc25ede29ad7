use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use scalp_signals::backtest;
use scalp_signals::candles::{Candle, CandleWindow};
use scalp_signals::config::{ReversalPolicy, SignalConfig};
use scalp_signals::engine;

#[derive(Parser, Debug)]
#[command(name = "scalp-signals")]
#[command(about = "Candle-driven scalping signal engine & backtester")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze the most recent window of a candle CSV and print the signal
    Analyze {
        /// Path to candle CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        csv: PathBuf,

        /// Symbol the candles belong to (used for per-symbol thresholds)
        #[arg(short, long, default_value = "BTC")]
        symbol: String,

        /// Minimum signal quality (0-100)
        #[arg(long)]
        quality_threshold: Option<f64>,
    },

    /// Replay a candle CSV through the backtest simulator
    Backtest {
        /// Path to candle CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        csv: PathBuf,

        /// Symbol the candles belong to
        #[arg(short, long, default_value = "BTC")]
        symbol: String,

        /// Minimum signal quality (0-100)
        #[arg(long)]
        quality_threshold: Option<f64>,

        /// Close-and-reverse on opposite signals instead of ignoring them
        #[arg(long)]
        reverse_on_signal: bool,

        /// Time-stop in minutes
        #[arg(long, default_value = "10")]
        time_stop: i64,

        /// Include individual trades in the output
        #[arg(long)]
        with_trades: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Analyze {
            csv,
            symbol,
            quality_threshold,
        } => {
            let mut config = SignalConfig::default();
            if let Some(quality) = quality_threshold {
                config.thresholds.quality_threshold = quality;
            }

            let candles = load_candles(&csv)?;
            info!("loaded {} candles from {}", candles.len(), csv.display());

            let window = CandleWindow::from_candles(config.window_capacity, &candles);
            let analysis = engine::analyze(&window, None, &config, &symbol)
                .context("window too short for analysis")?;

            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }

        Commands::Backtest {
            csv,
            symbol,
            quality_threshold,
            reverse_on_signal,
            time_stop,
            with_trades,
        } => {
            let mut config = SignalConfig::default();
            if let Some(quality) = quality_threshold {
                config.thresholds.quality_threshold = quality;
            }
            if reverse_on_signal {
                config.reversal_policy = ReversalPolicy::CloseAndReverse;
            }
            config.time_stop_minutes = time_stop;

            let candles = load_candles(&csv)?;
            info!("loaded {} candles from {}", candles.len(), csv.display());

            let mut result = backtest::run(&symbol, &candles, &config);
            if !with_trades {
                result.trades.clear();
            }

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// Load candles from a CSV with columns
/// `timestamp,open,high,low,close,volume` (unix seconds).
fn load_candles(path: &PathBuf) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut candles = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {i}"))?;
        let field = |idx: usize| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("row {i}: missing column {idx}"))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("row {i}: bad number in column {idx}"))
        };

        let ts_secs = field(0)? as i64;
        let timestamp = Utc
            .timestamp_opt(ts_secs, 0)
            .single()
            .with_context(|| format!("row {i}: bad timestamp {ts_secs}"))?;

        candles.push(Candle {
            timestamp,
            open: field(1)?,
            high: field(2)?,
            low: field(3)?,
            close: field(4)?,
            volume: field(5)?,
        });
    }

    Ok(candles)
}
