//! Chat commands answered from a state snapshot.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::telegram::{TelegramClient, Update};
use crate::config::EngineConfig;
use crate::state::{SharedState, TradingState};

/// Pause after a failed poll before trying again.
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Trades listed by `/trades`.
const RECENT_TRADES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Status,
    Pnl,
    Balance,
    Trades,
    Stop,
    Help,
    Unknown(String),
    /// Plain text that is not a command
    Text,
}

impl Command {
    /// Parse a message. `/cmd@botname args` is accepted.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Command::Text;
        };
        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();

        match name.as_str() {
            "start" => Command::Start,
            "status" => Command::Status,
            "pnl" => Command::Pnl,
            "balance" => Command::Balance,
            "trades" => Command::Trades,
            "stop" => Command::Stop,
            "help" => Command::Help,
            _ => Command::Unknown(name),
        }
    }
}

const HELP: &str = "📚 <b>Available Commands</b>\n\n\
    /status - Current bot status\n\
    /pnl - Profit and loss\n\
    /balance - Account balance\n\
    /trades - Recent trades\n\
    /stop - How to stop the bot\n\
    /help - This message";

/// Reply text for `command`, rendered from `state` only.
pub fn render_reply(command: &Command, state: &TradingState, config: &EngineConfig) -> String {
    let quote = config.quote_currency();
    match command {
        Command::Start => format!(
            "👋 Welcome to the trading bot for {}.\n\nUse /help to see available commands.",
            config.symbol
        ),
        Command::Help => HELP.to_string(),
        Command::Stop => "⛔ The bot can only be stopped from the host it runs on. \
             Stop the process there to shut it down safely."
            .to_string(),
        Command::Unknown(_) => {
            "I don't understand that command. Use /help to see available commands.".to_string()
        }
        Command::Text => {
            "I only respond to commands. Use /help to see available commands.".to_string()
        }
        Command::Balance => format!(
            "💰 <b>Balance</b>\n\n{:.2} {quote}",
            state.current_balance
        ),
        Command::Status => status_reply(state, config),
        Command::Pnl => pnl_reply(state, quote),
        Command::Trades => trades_reply(state),
    }
}

fn status_reply(state: &TradingState, config: &EngineConfig) -> String {
    let quote = config.quote_currency();
    let mut out = String::from("📊 <b>Bot Status</b>\n\n");

    let _ = writeln!(out, "Symbol: {}", config.symbol);
    let _ = writeln!(out, "Exchange: {}", state.venue);
    let _ = writeln!(out, "Balance: {:.2} {quote}", state.current_balance);
    let _ = writeln!(out, "Total PnL: {:.4} {quote}", state.total_pnl);
    let _ = writeln!(
        out,
        "Daily trades: {}/{}",
        state.daily_trades, config.risk.max_daily_trades
    );
    match state.last_confidence {
        Some(c) => {
            let _ = writeln!(out, "Confidence: {c:.2}");
        }
        None => out.push_str("Confidence: n/a\n"),
    }
    match state.last_volatility {
        Some(v) => {
            let _ = writeln!(out, "Volatility: {v:.2}%");
        }
        None => out.push_str("Volatility: n/a\n"),
    }
    if state.reduce_risk_advised {
        out.push_str("⚠️ Risk reduction advised\n");
    }

    out.push('\n');
    match &state.position {
        Some(p) => {
            let _ = writeln!(out, "<b>Active Position</b>");
            let _ = writeln!(out, "Side: {}", p.side.position_label());
            let _ = writeln!(out, "Size: {:.2} {quote}", p.size);
            let _ = writeln!(out, "Entry: {:.2}", p.entry_price);
            let _ = writeln!(out, "Leverage: {}x", p.leverage);
            let _ = writeln!(out, "Take profit: {:.2}", p.take_profit_price);
            let _ = write!(out, "Stop loss: {:.2}", p.stop_loss_price);
        }
        None => out.push_str("No active position"),
    }
    out
}

fn pnl_reply(state: &TradingState, quote: &str) -> String {
    let Some(initial) = state.initial_balance else {
        return "PnL data not available yet. Waiting for initial balance.".to_string();
    };
    let pct = if initial.is_zero() {
        Decimal::ZERO
    } else {
        state.total_pnl / initial * Decimal::ONE_HUNDRED
    };
    format!(
        "💹 <b>Profit &amp; Loss</b>\n\n\
         Initial balance: {initial:.2} {quote}\n\
         Current balance: {current:.2} {quote}\n\
         Total PnL: {pnl:.4} {quote} ({pct:.2}%)\n\
         Trades: {trades} ({wins} winning)",
        current = state.current_balance,
        pnl = state.total_pnl,
        trades = state.trades.len(),
        wins = state.winning_trades(),
    )
}

fn trades_reply(state: &TradingState) -> String {
    if state.trades.is_empty() {
        return "No trades executed yet.".to_string();
    }
    let mut out = String::from("📜 <b>Recent Trades</b>\n\n");
    for t in state.recent_trades(RECENT_TRADES) {
        let icon = if t.is_loss() { "🔴" } else { "🟢" };
        let _ = writeln!(
            out,
            "{icon} {} {} @ {:.2} → {:.2} ({}x) PnL: {:.4}",
            t.time.format("%m-%d %H:%M"),
            t.side,
            t.entry_price,
            t.exit_price,
            t.leverage,
            t.pnl
        );
    }
    let _ = write!(out, "\nTotal PnL: {:.4}", state.total_pnl);
    out
}

/// Long-polls for chat commands and answers them.
pub struct CommandPoller {
    client: Arc<TelegramClient>,
    state: SharedState,
    config: Arc<EngineConfig>,
    offset: Option<i64>,
}

impl CommandPoller {
    pub fn new(client: Arc<TelegramClient>, state: SharedState, config: Arc<EngineConfig>) -> Self {
        Self {
            client,
            state,
            config,
            offset: None,
        }
    }

    /// Poll until `cancel` fires. Poll errors are logged and retried.
    ///
    /// Cancellation can drop the pending `getUpdates` long poll, never a
    /// batch being answered. A dropped poll acknowledged nothing, so its
    /// updates are redelivered on the next start.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Command poller started");
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.client.get_updates(self.offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        if let Some((chat_id, reply)) = self.reply_to(&update).await {
                            if let Err(e) = self.client.send_message(&chat_id, &reply).await {
                                warn!(error = %e, "Failed to answer command");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Command poll failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_DELAY) => {}
                    }
                }
            }
        }
        info!("Command poller stopped");
    }

    /// Reply for one update, `None` when it carries no text or comes from a
    /// foreign chat.
    async fn reply_to(&self, update: &Update) -> Option<(String, String)> {
        let message = update.message.as_ref()?;
        let text = message.text.as_deref()?;
        let chat_id = message.chat.id.to_string();

        if chat_id != self.client.chat_id() {
            warn!(chat_id = %chat_id, "Ignoring message from unknown chat");
            return None;
        }

        let command = Command::parse(text);
        debug!(?command, "Command received");
        let snapshot = self.state.snapshot().await;
        Some((chat_id, render_reply(&command, &snapshot, &self.config)))
    }
}
