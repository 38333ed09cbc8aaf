use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use tradeloop::drivers::FixedFrame;
use tradeloop::exchange::{CandleFeed, Exchange};
use tradeloop::strategies::Strategy;
use tradeloop::types::{Candle, Interval, Position, SignalProposal, TickContext};
use tradeloop::{Runtime, Settings, TickResult};

#[derive(Parser)]
#[command(name = "tradeloop")]
#[command(version = "0.1.0")]
#[command(about = "Trading-strategy execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest the demo strategy over a candle file
    Backtest {
        /// Trading symbol, e.g. BTCUSDT
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,
        /// JSON file with 1-minute candles
        #[arg(short, long)]
        candles: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: String,
    },
    /// Run the live driver (requires an exchange adapter)
    Live,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Backtest {
            symbol,
            candles,
            start,
            end,
        } => run_backtest(&symbol, &candles, &start, &end).await?,
        Commands::Live => {
            error!("live mode needs a real exchange adapter; embed the library and register one");
        }
    }

    Ok(())
}

async fn run_backtest(symbol: &str, candle_file: &str, start: &str, end: &str) -> Result<()> {
    let start = parse_day(start)?;
    let end = parse_day(end)?;

    let settings = Settings::from_env().context("loading engine settings")?;
    let mut runtime = Runtime::new(settings)?;

    let exchange: Arc<dyn Exchange> = Arc::new(FileExchange::load(candle_file)?);
    runtime.register_exchange("file", Arc::clone(&exchange));
    runtime.register_frame(Arc::new(FixedFrame::new("cli", start, end, Interval::M5)));

    let feed = CandleFeed::live(exchange, runtime.settings());
    runtime.register_strategy(Arc::new(SmaCrossStrategy::new(feed)))?;

    let mut driver = runtime
        .backtest_driver(symbol, "sma-cross", "file", "cli")
        .await?;

    let mut closed = 0usize;
    let mut cancelled = 0usize;
    let mut total_pnl = Decimal::ZERO;

    while let Some(outcome) = driver.next_outcome().await {
        match outcome? {
            TickResult::Closed(signal) => {
                closed += 1;
                total_pnl += signal.pnl_pct;
                info!(
                    reason = %signal.close_reason,
                    close = %signal.price_close,
                    pnl = %signal.pnl_pct.round_dp(4),
                    "trade closed"
                );
            }
            TickResult::Cancelled(signal) => {
                cancelled += 1;
                info!(reason = %signal.cancel_reason, "schedule cancelled");
            }
            _ => {}
        }
    }

    info!(
        closed,
        cancelled,
        total_pnl = %total_pnl.round_dp(4),
        "backtest summary"
    );
    Ok(())
}

fn parse_day(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| anyhow!("invalid date '{}', expected YYYY-MM-DD", s))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc())
}

/// Offline exchange adapter over a JSON file of 1-minute candles.
struct FileExchange {
    candles: Vec<Candle>,
}

impl FileExchange {
    fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading candle file {}", path))?;
        let mut candles: Vec<Candle> =
            serde_json::from_str(&raw).context("parsing candle file")?;
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        info!(count = candles.len(), "loaded candle file");
        Ok(Self { candles })
    }
}

#[async_trait]
impl Exchange for FileExchange {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        if interval != Interval::M1 {
            anyhow::bail!("file exchange only serves 1m candles, got {}", interval);
        }
        let start = self
            .candles
            .partition_point(|c| c.open_time < since);
        let slice = self
            .candles
            .get(start..start + limit)
            .ok_or_else(|| anyhow!("not enough candles for {} from {}", symbol, since))?;
        Ok(slice.to_vec())
    }

    fn format_price(&self, _symbol: &str, price: Decimal) -> String {
        price.round_dp(2).to_string()
    }

    fn format_quantity(&self, _symbol: &str, quantity: Decimal) -> String {
        quantity.round_dp(5).to_string()
    }
}

/// Demo strategy: SMA crossover over recent 1-minute closes.
struct SmaCrossStrategy {
    feed: CandleFeed,
    fast: usize,
    slow: usize,
}

impl SmaCrossStrategy {
    fn new(feed: CandleFeed) -> Self {
        Self {
            feed,
            fast: 9,
            slow: 21,
        }
    }
}

#[async_trait]
impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma-cross"
    }

    fn interval(&self) -> Interval {
        Interval::M5
    }

    fn risk_list(&self) -> Vec<String> {
        vec!["single-position-per-symbol".to_string()]
    }

    async fn get_signal(&self, ctx: &TickContext) -> Result<Option<SignalProposal>> {
        let since = Interval::M1.align(ctx.when) - chrono::Duration::minutes(self.slow as i64);
        let candles = self
            .feed
            .fetch(&ctx.symbol, Interval::M1, since, self.slow)
            .await
            .map_err(|err| anyhow!("{}", err))?;

        let sma = |n: usize| -> Decimal {
            let closes: Vec<Decimal> = candles.iter().rev().take(n).map(|c| c.close).collect();
            closes.iter().copied().sum::<Decimal>() / Decimal::from(closes.len() as u64)
        };
        let fast = sma(self.fast);
        let slow = sma(self.slow);
        let last = candles.last().expect("window not empty").close;

        // Long bias only: fast SMA pulling clearly above the slow one
        if fast <= slow * dec!(1.001) {
            return Ok(None);
        }

        Ok(Some(SignalProposal::immediate(
            Position::Long,
            last * dec!(1.02),
            last * dec!(0.98),
            120,
        )))
    }
}
