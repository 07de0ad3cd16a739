use crate::domain::timeframe::Timeframe;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Which executor routes orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Simulated,
    Live,
}

impl FromStr for ExecutorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(ExecutorKind::Simulated),
            "live" => Ok(ExecutorKind::Live),
            _ => anyhow::bail!("Invalid executor: {}. Must be 'simulated' or 'live'", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    Portfolio,
    Llm,
}

impl FromStr for DecisionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "portfolio" => Ok(DecisionMode::Portfolio),
            "llm" => Ok(DecisionMode::Llm),
            _ => anyhow::bail!("Invalid decision mode: {}. Must be 'portfolio' or 'llm'", s),
        }
    }
}

/// Immutable after startup; reloading requires restart. The kill switch
/// (`trading_enabled`) is the only flag read on every decision cycle, and it
/// is copied into an atomic by the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub symbol: String,
    pub timeframe: Timeframe,

    // Venue
    pub okx_api_key: String,
    pub okx_api_secret: String,
    pub okx_passphrase: String,
    pub okx_is_demo: bool,
    pub okx_td_mode: String,
    pub okx_pos_mode: String,
    pub okx_account_id: String,

    // Kill switches
    pub trading_enabled: bool,
    pub api_write_enabled: bool,

    // Risk gate
    pub risk_max_notional: Decimal,
    pub risk_max_leverage: Decimal,
    pub risk_min_confidence: f64,
    pub risk_max_daily_loss_pct: f64,
    pub risk_cooldown_losses: usize,
    pub risk_cooldown_bars: usize,

    // Regime classifier
    pub regime_adx_threshold: f64,
    pub regime_bb_width_threshold: f64,
    pub regime_vol_kill_threshold: f64,

    // Portfolio scheduler
    pub portfolio_global_leverage: f64,
    pub portfolio_diff_threshold_bps: f64,
    pub portfolio_min_notional: Decimal,
    pub portfolio_top_k: usize,
    pub portfolio_regime_weight: f64,
    pub portfolio_perf_lookback: usize,

    // LLM decision engine
    pub llm_provider: Option<String>,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_timeout_secs: u64,

    // Loop cadences (seconds)
    pub ingest_interval_secs: u64,
    pub account_interval_secs: u64,
    pub order_interval_secs: u64,

    // Ingest & data service
    pub initial_backfill_days: i64,
    pub ingest_batch_size: usize,
    pub data_stale_max_bars: i64,
    pub snapshot_bars: usize,

    // Executor & reconciliation
    pub order_poll_timeout_secs: u64,
    pub submit_max_attempts: usize,
    pub reconcile_grace_secs: u64,
    pub position_drift_tolerance: Decimal,

    // Simulated execution
    pub sim_slippage_bps: f64,
    pub sim_fee_rate: Decimal,
    pub sim_seed: u64,
    pub sim_initial_equity: Decimal,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse {}={}: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("Failed to parse {}={}", key, raw))
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://perpcore.db".to_string());

        let symbol = env::var("SYMBOL").unwrap_or_else(|_| "BTC-USDT-SWAP".to_string());
        let timeframe = Timeframe::from_str(
            &env::var("TIMEFRAME").unwrap_or_else(|_| "1h".to_string()),
        )?;

        Ok(Self {
            database_url,
            symbol,
            timeframe,

            okx_api_key: env::var("OKX_API_KEY").unwrap_or_default(),
            okx_api_secret: env::var("OKX_API_SECRET").unwrap_or_default(),
            okx_passphrase: env::var("OKX_PASSPHRASE").unwrap_or_default(),
            okx_is_demo: env_bool("OKX_IS_DEMO", true),
            okx_td_mode: env::var("OKX_TD_MODE").unwrap_or_else(|_| "cross".to_string()),
            okx_pos_mode: env::var("OKX_POS_MODE").unwrap_or_else(|_| "net".to_string()),
            okx_account_id: env::var("OKX_ACCOUNT_ID").unwrap_or_else(|_| "default".to_string()),

            trading_enabled: env_bool("TRADING_ENABLED", false),
            api_write_enabled: env_bool("API_WRITE_ENABLED", false),

            risk_max_notional: env_decimal("RISK_MAX_NOTIONAL", "100000")?,
            risk_max_leverage: env_decimal("RISK_MAX_LEVERAGE", "3")?,
            risk_min_confidence: env_or("RISK_MIN_CONFIDENCE", 0.55)?,
            risk_max_daily_loss_pct: env_or("MAX_DAILY_LOSS_PCT", 3.0)?,
            risk_cooldown_losses: env_or("RISK_COOLDOWN_LOSSES", 3)?,
            risk_cooldown_bars: env_or("RISK_COOLDOWN_BARS", 12)?,

            regime_adx_threshold: env_or("REGIME_ADX_THRESHOLD", 20.0)?,
            regime_bb_width_threshold: env_or("REGIME_BB_WIDTH_THRESHOLD", 0.04)?,
            regime_vol_kill_threshold: env_or("REGIME_VOL_KILL_THRESHOLD", 0.05)?,

            portfolio_global_leverage: env_or("PORTFOLIO_GLOBAL_LEVERAGE", 1.0)?,
            portfolio_diff_threshold_bps: env_or("PORTFOLIO_DIFF_THRESHOLD", 100.0)?,
            portfolio_min_notional: env_decimal("PORTFOLIO_MIN_NOTIONAL", "100")?,
            portfolio_top_k: env_or("PORTFOLIO_TOP_K", 3)?,
            portfolio_regime_weight: env_or("PORTFOLIO_REGIME_WEIGHT", 0.6)?,
            portfolio_perf_lookback: env_or("PORTFOLIO_PERF_LOOKBACK", 30)?,

            llm_provider: env::var("LLM_PROVIDER").ok().filter(|v| !v.is_empty()),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", 20)?,

            ingest_interval_secs: env_or("INGEST_INTERVAL", 60)?,
            account_interval_secs: env_or("ACCOUNT_INTERVAL", 30)?,
            order_interval_secs: env_or("ORDER_INTERVAL", 15)?,

            initial_backfill_days: env_or("INITIAL_BACKFILL_DAYS", 30)?,
            ingest_batch_size: env_or("INGEST_BATCH_SIZE", 300)?,
            data_stale_max_bars: env_or("DATA_STALE_MAX_BARS", 2)?,
            snapshot_bars: env_or("SNAPSHOT_BARS", 200)?,

            order_poll_timeout_secs: env_or("ORDER_POLL_TIMEOUT_SECS", 30)?,
            submit_max_attempts: env_or("SUBMIT_MAX_ATTEMPTS", 4)?,
            reconcile_grace_secs: env_or("RECONCILE_GRACE_SECS", 60)?,
            position_drift_tolerance: env_decimal("POSITION_DRIFT_TOLERANCE", "0.0001")?,

            sim_slippage_bps: env_or("SIM_SLIPPAGE_BPS", 2.0)?,
            sim_fee_rate: env_decimal("SIM_FEE_RATE", "0.0005")?,
            sim_seed: env_or("SIM_SEED", 42)?,
            sim_initial_equity: env_decimal("SIM_INITIAL_EQUITY", "10000")?,
        })
    }

    pub fn has_llm(&self) -> bool {
        self.llm_provider.is_some() && !self.llm_api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_kind_parsing() {
        assert_eq!(
            ExecutorKind::from_str("simulated").unwrap(),
            ExecutorKind::Simulated
        );
        assert_eq!(ExecutorKind::from_str("LIVE").unwrap(), ExecutorKind::Live);
        assert!(ExecutorKind::from_str("paper").is_err());
    }

    #[test]
    fn test_decision_mode_parsing() {
        assert_eq!(
            DecisionMode::from_str("portfolio").unwrap(),
            DecisionMode::Portfolio
        );
        assert_eq!(DecisionMode::from_str("llm").unwrap(), DecisionMode::Llm);
        assert!(DecisionMode::from_str("rl").is_err());
    }
}
