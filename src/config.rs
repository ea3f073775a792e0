//! Engine configuration.
//!
//! Values come from command-line flags with environment fallbacks (a `.env`
//! file is loaded first in `main`). Percentages are entered as percents and
//! stored as fractions.

use std::time::Duration;

use clap::{ArgAction, Args};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::warn;

use crate::exchange::{split_symbol, Venue};
use crate::indicators::IndicatorSettings;
use crate::trading::{RiskConfig, SignalConfig};

/// Configuration problems that refuse start-up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Effective engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub symbol: String,
    pub timeframe: String,

    /// Candles requested per tick
    pub candle_limit: usize,

    pub loop_interval: Duration,

    /// Sleep after a failed tick
    pub error_backoff: Duration,

    pub trading_enabled: bool,
    pub notifications_enabled: bool,

    pub exchange_mode: Venue,

    /// Switch to the synthetic venue on live connectivity loss
    pub synthetic_fallback: bool,
    pub synthetic_seed: u64,

    /// Accepted for compatibility, only one position is ever held
    pub max_open_positions: u32,

    /// Bounded wait for tasks on stop
    pub shutdown_timeout: Duration,

    pub indicators: IndicatorSettings,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/USDT".to_string(),
            timeframe: "5m".to_string(),
            candle_limit: 100,
            loop_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(30),
            trading_enabled: true,
            notifications_enabled: true,
            exchange_mode: Venue::Live,
            synthetic_fallback: true,
            synthetic_seed: 42,
            max_open_positions: 1,
            shutdown_timeout: Duration::from_secs(15),
            indicators: IndicatorSettings::default(),
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if split_symbol(&self.symbol).is_none() {
            return invalid(format!("symbol '{}' must look like BASE/QUOTE", self.symbol));
        }
        if crate::models::parse_timeframe(&self.timeframe).is_none() {
            return invalid(format!("unsupported timeframe '{}'", self.timeframe));
        }
        if self.candle_limit == 0 {
            return invalid("candle limit must be positive".into());
        }
        if self.loop_interval.is_zero() {
            return invalid("loop interval must be positive".into());
        }

        let risk = &self.risk;
        if risk.min_leverage == 0 || risk.min_leverage > risk.max_leverage {
            return invalid(format!(
                "leverage bounds {}..{} are inconsistent",
                risk.min_leverage, risk.max_leverage
            ));
        }
        if risk.min_take_profit_pct > risk.max_take_profit_pct {
            return invalid(format!(
                "take-profit bounds {}..{} are inconsistent",
                risk.min_take_profit_pct, risk.max_take_profit_pct
            ));
        }
        for (name, value) in [
            ("position size", risk.position_size_pct),
            ("stop loss", risk.stop_loss_pct),
            ("min take profit", risk.min_take_profit_pct),
            ("max take profit", risk.max_take_profit_pct),
            ("max drawdown", risk.max_drawdown_pct),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return invalid(format!("{name} fraction {value} is outside (0, 1]"));
            }
        }
        if risk.max_daily_trades == 0 {
            return invalid("max daily trades must be positive".into());
        }
        if risk.max_position_age_hours <= 0 {
            return invalid("max position age must be positive".into());
        }

        let signal = &self.signal;
        if signal.rsi_oversold >= signal.rsi_overbought {
            return invalid(format!(
                "RSI oversold {} must be below overbought {}",
                signal.rsi_oversold, signal.rsi_overbought
            ));
        }

        let ind = &self.indicators;
        if ind.rsi_period == 0 || ind.ema_short == 0 || ind.ema_medium == 0 || ind.ema_long == 0 {
            return invalid("indicator periods must be positive".into());
        }
        if ind.window < 2 {
            return invalid("rolling window needs at least two bars".into());
        }

        if self.max_open_positions != 1 {
            warn!(
                max_open_positions = self.max_open_positions,
                "Only one position is held at a time, setting ignored"
            );
        }
        Ok(())
    }

    pub fn base_currency(&self) -> &str {
        split_symbol(&self.symbol).map(|(base, _)| base).unwrap_or("BTC")
    }

    pub fn quote_currency(&self) -> &str {
        split_symbol(&self.symbol).map(|(_, quote)| quote).unwrap_or("USDT")
    }
}

impl std::fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = |d: Decimal| (d * dec!(100)).normalize();
        let risk = &self.risk;
        let signal = &self.signal;
        let ind = &self.indicators;

        writeln!(f, "=== Engine Configuration ===\n")?;
        writeln!(f, "Market:")?;
        writeln!(f, "  Symbol:               {}", self.symbol)?;
        writeln!(f, "  Timeframe:            {}", self.timeframe)?;
        writeln!(f, "  Candles per tick:     {}", self.candle_limit)?;
        writeln!(f, "  Exchange mode:        {}", self.exchange_mode)?;
        writeln!(f, "  Synthetic fallback:   {}", self.synthetic_fallback)?;
        writeln!(f, "  Synthetic seed:       {}", self.synthetic_seed)?;

        writeln!(f, "\nLoop:")?;
        writeln!(f, "  Interval:             {}s", self.loop_interval.as_secs())?;
        writeln!(f, "  Error back-off:       {}s", self.error_backoff.as_secs())?;
        writeln!(f, "  Trading active:       {}", self.trading_enabled)?;
        writeln!(f, "  Notifications:        {}", self.notifications_enabled)?;

        writeln!(f, "\nRisk:")?;
        writeln!(f, "  Position size:        {}%", pct(risk.position_size_pct))?;
        writeln!(f, "  Leverage:             {}x - {}x", risk.min_leverage, risk.max_leverage)?;
        writeln!(f, "  Stop loss:            {}%", pct(risk.stop_loss_pct))?;
        writeln!(
            f,
            "  Take profit:          {}% - {}%",
            pct(risk.min_take_profit_pct),
            pct(risk.max_take_profit_pct)
        )?;
        writeln!(f, "  Max drawdown:         {}%", pct(risk.max_drawdown_pct))?;
        writeln!(f, "  Max daily trades:     {}", risk.max_daily_trades)?;
        writeln!(f, "  Max position age:     {}h", risk.max_position_age_hours)?;

        writeln!(f, "\nSignals:")?;
        writeln!(f, "  RSI period:           {}", ind.rsi_period)?;
        writeln!(f, "  RSI overbought:       {}", signal.rsi_overbought)?;
        writeln!(f, "  RSI oversold:         {}", signal.rsi_oversold)?;
        writeln!(f, "  EMA periods:          {}/{}/{}", ind.ema_short, ind.ema_medium, ind.ema_long)?;
        write!(f, "  Volume threshold:     {}x", signal.volume_threshold)
    }
}

/// Command-line and environment surface for [`EngineConfig`].
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Trading pair, BASE/QUOTE
    #[arg(long, env = "TRADING_SYMBOL", default_value = "BTC/USDT")]
    pub symbol: String,

    /// Candle timeframe (1m, 5m, 1h, ...)
    #[arg(long, env = "TIMEFRAME", default_value = "5m")]
    pub timeframe: String,

    /// Share of the free balance committed per trade, in percent
    #[arg(long, env = "POSITION_SIZE_PERCENTAGE", default_value = "25")]
    pub position_size_percentage: Decimal,

    #[arg(long, env = "MAX_LEVERAGE", default_value_t = 20)]
    pub max_leverage: u32,

    #[arg(long, env = "MIN_LEVERAGE", default_value_t = 5)]
    pub min_leverage: u32,

    /// Stop-loss distance in percent
    #[arg(long, env = "STOP_LOSS_PERCENTAGE", default_value = "3")]
    pub stop_loss_percentage: Decimal,

    #[arg(long, env = "MIN_TAKE_PROFIT_PERCENTAGE", default_value = "6")]
    pub min_take_profit_percentage: Decimal,

    #[arg(long, env = "MAX_TAKE_PROFIT_PERCENTAGE", default_value = "8")]
    pub max_take_profit_percentage: Decimal,

    #[arg(long, env = "RSI_PERIOD", default_value_t = 14)]
    pub rsi_period: usize,

    #[arg(long, env = "RSI_OVERBOUGHT", default_value_t = 70.0)]
    pub rsi_overbought: f64,

    #[arg(long, env = "RSI_OVERSOLD", default_value_t = 30.0)]
    pub rsi_oversold: f64,

    #[arg(long, env = "EMA_SHORT", default_value_t = 9)]
    pub ema_short: usize,

    #[arg(long, env = "EMA_MEDIUM", default_value_t = 21)]
    pub ema_medium: usize,

    #[arg(long, env = "EMA_LONG", default_value_t = 50)]
    pub ema_long: usize,

    /// Volume-to-average ratio required for an entry
    #[arg(long, env = "VOLUME_THRESHOLD", default_value_t = 1.5)]
    pub volume_threshold: f64,

    #[arg(long, env = "MAX_DRAWDOWN_PERCENTAGE", default_value = "15")]
    pub max_drawdown_percentage: Decimal,

    #[arg(long, env = "MAX_DAILY_TRADES", default_value_t = 5)]
    pub max_daily_trades: u32,

    #[arg(long, env = "MAX_OPEN_POSITIONS", default_value_t = 1)]
    pub max_open_positions: u32,

    /// Hours before a position is force-closed
    #[arg(long, env = "MAX_POSITION_AGE_HOURS", default_value_t = 24)]
    pub max_position_age_hours: i64,

    /// Seconds between ticks
    #[arg(long, env = "LOOP_INTERVAL", default_value_t = 30)]
    pub loop_interval: u64,

    /// Seconds to wait after a failed tick
    #[arg(long, env = "ERROR_BACKOFF", default_value_t = 30)]
    pub error_backoff: u64,

    #[arg(long, env = "TRADING_ACTIVE", default_value_t = true, action = ArgAction::Set)]
    pub trading_active: bool,

    #[arg(long, env = "NOTIFICATION_ACTIVE", default_value_t = true, action = ArgAction::Set)]
    pub notification_active: bool,

    /// live or synthetic
    #[arg(long, env = "EXCHANGE_MODE", default_value = "live")]
    pub exchange_mode: Venue,

    #[arg(long, env = "SYNTHETIC_FALLBACK", default_value_t = true, action = ArgAction::Set)]
    pub synthetic_fallback: bool,

    #[arg(long, env = "SYNTHETIC_SEED", default_value_t = 42)]
    pub synthetic_seed: u64,
}

impl ConfigArgs {
    /// Convert to a validated [`EngineConfig`].
    pub fn into_config(self) -> Result<EngineConfig, ConfigError> {
        let fraction = |pct: Decimal| pct / dec!(100);
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            symbol: self.symbol.trim().to_uppercase(),
            timeframe: self.timeframe,
            loop_interval: Duration::from_secs(self.loop_interval),
            error_backoff: Duration::from_secs(self.error_backoff),
            trading_enabled: self.trading_active,
            notifications_enabled: self.notification_active,
            exchange_mode: self.exchange_mode,
            synthetic_fallback: self.synthetic_fallback,
            synthetic_seed: self.synthetic_seed,
            max_open_positions: self.max_open_positions,
            indicators: IndicatorSettings {
                rsi_period: self.rsi_period,
                ema_short: self.ema_short,
                ema_medium: self.ema_medium,
                ema_long: self.ema_long,
                ..defaults.indicators
            },
            signal: SignalConfig {
                rsi_overbought: self.rsi_overbought,
                rsi_oversold: self.rsi_oversold,
                volume_threshold: self.volume_threshold,
                ..defaults.signal
            },
            risk: RiskConfig {
                position_size_pct: fraction(self.position_size_percentage),
                min_leverage: self.min_leverage,
                max_leverage: self.max_leverage,
                stop_loss_pct: fraction(self.stop_loss_percentage),
                min_take_profit_pct: fraction(self.min_take_profit_percentage),
                max_take_profit_pct: fraction(self.max_take_profit_percentage),
                max_drawdown_pct: fraction(self.max_drawdown_percentage),
                max_daily_trades: self.max_daily_trades,
                max_position_age_hours: self.max_position_age_hours,
            },
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }
}

/// Secrets read from the environment. Never printed.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &mask(&self.api_secret))
            .field("telegram_token", &mask(&self.telegram_token))
            .field("telegram_chat_id", &mask(&self.telegram_chat_id))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            api_key: var("API_KEY"),
            api_secret: var("API_SECRET"),
            telegram_token: var("TELEGRAM_TOKEN"),
            telegram_chat_id: var("TELEGRAM_CHAT_ID"),
        }
    }

    /// Names of the credentials `config` requires but which are unset.
    pub fn missing(&self, config: &EngineConfig) -> Vec<String> {
        let mut missing = Vec::new();
        if config.exchange_mode == Venue::Live {
            if self.api_key.is_none() {
                missing.push("API_KEY".to_string());
            }
            if self.api_secret.is_none() {
                missing.push("API_SECRET".to_string());
            }
        }
        if config.notifications_enabled {
            if self.telegram_token.is_none() {
                missing.push("TELEGRAM_TOKEN".to_string());
            }
            if self.telegram_chat_id.is_none() {
                missing.push("TELEGRAM_CHAT_ID".to_string());
            }
        }
        missing
    }

    pub fn require(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        let missing = self.missing(config);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingCredentials(missing))
        }
    }
}
