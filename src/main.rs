use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use perpcore::application::backtest::{BacktestEngine, BacktestRequest};
use perpcore::application::daemon::Daemon;
use perpcore::application::data_service::DataService;
use perpcore::application::ingest::{IngestConfig, IngestWorker};
use perpcore::application::risk_gate::RiskLimits;
use perpcore::application::scheduler::SchedulerConfig;
use perpcore::application::strategies::StrategyRegistry;
use perpcore::config::{Config, DecisionMode, ExecutorKind};
use perpcore::domain::timeframe::Timeframe;
use perpcore::infrastructure::okx::{OkxClient, OkxCredentials};
use perpcore::infrastructure::persistence::database::Database;
use perpcore::infrastructure::persistence::repositories::{
    SqliteBacktestRepository, SqliteCandleRepository, SqliteMarketRepository,
    SqliteRiskEventRepository,
};
use rust_decimal::Decimal;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: u8 = 1;
const EXIT_MIGRATION: u8 = 2;
const EXIT_VENUE: u8 = 3;
const EXIT_KILL_SWITCH: u8 = 4;

#[derive(Parser)]
#[command(name = "perpcore", about = "Single-symbol perpetual futures trading core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations.
    Migrate,
    /// One-shot historical backfill of candles and derivatives.
    Ingest {
        #[arg(long)]
        symbol: Option<String>,
        /// Comma-separated list, e.g. 15m,1h,4h
        #[arg(long, value_delimiter = ',')]
        timeframes: Vec<String>,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
    /// Start the trading loops.
    Daemon {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long, default_value = "simulated")]
        executor: String,
        #[arg(long, default_value = "portfolio")]
        decision_mode: String,
    },
    /// Run a historical backtest and persist the result.
    Backtest {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long)]
        strategy: String,
        /// Inclusive start, YYYY-MM-DD or RFC3339.
        #[arg(long)]
        start: String,
        /// Exclusive end, YYYY-MM-DD or RFC3339.
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "10000")]
        capital: String,
        #[arg(long, default_value = "0.0005")]
        fee: String,
        #[arg(long, default_value_t = 0.0)]
        slippage_bps: f64,
        #[arg(long, default_value_t = false)]
        funding: bool,
    },
}

fn parse_ts(raw: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}", raw))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .context("Invalid midnight timestamp")?
        .and_utc()
        .timestamp_millis())
}

fn venue_from_config(config: &Config) -> Arc<OkxClient> {
    let credentials = (!config.okx_api_key.is_empty()).then(|| OkxCredentials {
        api_key: config.okx_api_key.clone(),
        api_secret: config.okx_api_secret.clone(),
        passphrase: config.okx_passphrase.clone(),
    });
    Arc::new(OkxClient::new(
        credentials,
        config.okx_is_demo,
        config.okx_td_mode.clone(),
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<ExitCode> {
    match cli.command {
        Commands::Migrate => {
            let db = match Database::connect(&config.database_url).await {
                Ok(db) => db,
                Err(e) => {
                    error!("Migration failed: {:#}", e);
                    return Ok(ExitCode::from(EXIT_MIGRATION));
                }
            };
            if let Err(e) = db.migrate().await {
                error!("Migration failed: {:#}", e);
                return Ok(ExitCode::from(EXIT_MIGRATION));
            }
            info!(
                "Schema at version {:?}",
                db.schema_version().await.unwrap_or(None)
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Ingest {
            symbol,
            timeframes,
            since_days,
        } => {
            let symbol = symbol.unwrap_or_else(|| config.symbol.clone());
            let timeframes = if timeframes.is_empty() {
                vec![config.timeframe]
            } else {
                timeframes
                    .iter()
                    .map(|raw| Timeframe::from_str(raw))
                    .collect::<Result<Vec<_>>>()?
            };

            let db = Database::connect(&config.database_url).await?;
            db.migrate().await?;
            let worker = IngestWorker::new(
                venue_from_config(&config),
                Arc::new(SqliteCandleRepository::new(db.pool.clone())),
                Arc::new(SqliteMarketRepository::new(db.pool.clone())),
                Arc::new(SqliteRiskEventRepository::new(db.pool.clone())),
                IngestConfig {
                    symbol: symbol.clone(),
                    timeframes: timeframes.clone(),
                    initial_backfill_days: since_days,
                    batch_size: config.ingest_batch_size,
                    interval_secs: config.ingest_interval_secs,
                    max_retries: 5,
                },
            );

            let mut total = 0u64;
            for timeframe in timeframes {
                match worker.ingest_timeframe(timeframe).await {
                    Ok(inserted) => {
                        info!("{} {}: {} bars", symbol, timeframe, inserted);
                        total += inserted;
                    }
                    Err(e) => {
                        error!("Backfill failed for {} {}: {:#}", symbol, timeframe, e);
                        return Ok(ExitCode::from(EXIT_VENUE));
                    }
                }
            }
            if let Err(e) = worker.ingest_derivatives().await {
                error!("Derivative backfill failed: {:#}", e);
            }
            info!("Backfill complete: {} bars inserted", total);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Daemon {
            symbol,
            timeframe,
            executor,
            decision_mode,
        } => {
            if let Some(symbol) = symbol {
                config.symbol = symbol;
            }
            if let Some(timeframe) = timeframe {
                config.timeframe = Timeframe::from_str(&timeframe)?;
            }
            let executor_kind = ExecutorKind::from_str(&executor)?;
            let decision_mode = DecisionMode::from_str(&decision_mode)?;

            if executor_kind == ExecutorKind::Live && !config.trading_enabled {
                error!("TRADING_ENABLED is false; refusing to start a live daemon");
                return Ok(ExitCode::from(EXIT_KILL_SWITCH));
            }

            Daemon::new(config, executor_kind, decision_mode).run().await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Backtest {
            symbol,
            timeframe,
            strategy,
            start,
            end,
            capital,
            fee,
            slippage_bps,
            funding,
        } => {
            let symbol = symbol.unwrap_or_else(|| config.symbol.clone());
            let timeframe = match timeframe {
                Some(raw) => Timeframe::from_str(&raw)?,
                None => config.timeframe,
            };

            let db = Database::connect(&config.database_url).await?;
            db.migrate().await?;
            let data = Arc::new(DataService::new(
                Arc::new(SqliteCandleRepository::new(db.pool.clone())),
                Arc::new(SqliteMarketRepository::new(db.pool.clone())),
            ));
            let engine = BacktestEngine::new(
                data,
                Arc::new(SqliteBacktestRepository::new(db.pool.clone())),
                Arc::new(StrategyRegistry::with_defaults()),
            );

            let request = BacktestRequest {
                symbol,
                timeframe,
                start_ts: parse_ts(&start)?,
                end_ts: parse_ts(&end)?,
                initial_capital: Decimal::from_str(&capital)
                    .with_context(|| format!("Invalid capital: {}", capital))?,
                strategy_id: strategy,
                fee_rate: Decimal::from_str(&fee)
                    .with_context(|| format!("Invalid fee: {}", fee))?,
                slippage_bps,
                funding_enabled: funding,
                time_stop_bars: 48,
                seed: config.sim_seed,
                scheduler: SchedulerConfig {
                    top_k: config.portfolio_top_k,
                    regime_weight: config.portfolio_regime_weight,
                    global_leverage: config.portfolio_global_leverage,
                    min_notional: config.portfolio_min_notional,
                    diff_threshold_bps: config.portfolio_diff_threshold_bps,
                    perf_lookback: config.portfolio_perf_lookback,
                },
                risk: RiskLimits {
                    trading_enabled: true,
                    min_confidence: config.risk_min_confidence,
                    max_notional: config.risk_max_notional,
                    max_leverage: config.risk_max_leverage,
                    max_daily_loss_pct: config.risk_max_daily_loss_pct,
                    cooldown_losses: config.risk_cooldown_losses,
                    cooldown_bars: config.risk_cooldown_bars,
                },
            };

            let outcome = engine.run(&request).await?;
            println!("run_id: {}", outcome.run_id);
            println!("{}", serde_json::to_string_pretty(&outcome.metrics)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
