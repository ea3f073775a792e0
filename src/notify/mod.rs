//! Outbound notifications and inbound chat commands.

mod commands;
mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::exchange::Venue;
use crate::models::{Position, TradeRecord};

pub use commands::{render_reply, Command, CommandPoller};
pub use telegram::TelegramClient;

/// Best-effort message sink. Failures are logged by the implementation and
/// reported through the return value, never raised.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> bool;

    /// Whether messages leave the process at all.
    fn is_enabled(&self) -> bool;
}

/// Used when notifications are turned off: messages go to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> bool {
        info!(message = %text, "Notification (not delivered)");
        true
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn started_message() -> String {
    "🤖 <b>Trading Bot Started</b>\n\nUse /help to see available commands".to_string()
}

pub fn stopped_message() -> String {
    "🛑 <b>Trading Bot Stopped</b>".to_string()
}

pub fn trade_opened_message(symbol: &str, position: &Position) -> String {
    format!(
        "🟢 <b>Trade Opened</b>\n\n\
         Symbol: {symbol}\n\
         Side: {side}\n\
         Size: {size:.4}\n\
         Price: {price:.2}\n\
         Leverage: {leverage}x\n\
         Time: {time}",
        side = position.side,
        size = position.quantity(),
        price = position.entry_price,
        leverage = position.leverage,
        time = timestamp(position.entry_time),
    )
}

pub fn trade_closed_message(symbol: &str, record: &TradeRecord) -> String {
    let icon = if record.is_loss() { "🔴" } else { "🟢" };
    format!(
        "{icon} <b>Trade Closed</b>\n\n\
         Symbol: {symbol}\n\
         Side: {side}\n\
         Entry: {entry:.2}\n\
         Exit: {exit:.2}\n\
         PnL: {pnl:.4}\n\
         ROI: {roi:.2}%\n\
         Reason: {reason}\n\
         Time: {time}",
        side = record.side,
        entry = record.entry_price,
        exit = record.exit_price,
        pnl = record.pnl,
        roi = record.roi_pct(),
        reason = record.exit_reason,
        time = timestamp(record.time),
    )
}

pub fn error_message(error: &str, at: DateTime<Utc>) -> String {
    format!(
        "⚠️ <b>Error</b>\n\n{}\n\nTime: {}",
        escape_html(error),
        timestamp(at)
    )
}

pub fn venue_switched_message(from: Venue, to: Venue, reason: &str, at: DateTime<Utc>) -> String {
    format!(
        "🔁 <b>Exchange Switched</b>\n\n{from} → {to}\nReason: {}\n\nTime: {}",
        escape_html(reason),
        timestamp(at)
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures every message for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> bool {
            self.messages.lock().unwrap().push(text.to_string());
            true
        }

        fn is_enabled(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_trade_opened_reports_base_quantity() {
        let position = Position {
            side: Side::Buy,
            entry_price: dec!(50000),
            entry_time: at(),
            size: dec!(2500),
            leverage: 12,
            stop_loss_price: dec!(48500),
            take_profit_price: dec!(53500),
        };
        let text = trade_opened_message("BTC/USDT", &position);
        assert!(text.contains("Side: BUY"));
        assert!(text.contains("Size: 0.0500"));
        assert!(text.contains("Price: 50000.00"));
        assert!(text.contains("Leverage: 12x"));
        assert!(text.contains("2024-05-10 12:30:00 UTC"));
    }

    #[test]
    fn test_trade_closed_icon_follows_pnl() {
        let mut record = TradeRecord {
            time: at(),
            side: Side::Sell,
            entry_price: dec!(100),
            exit_price: dec!(103),
            size: dec!(1000),
            leverage: 10,
            pnl: dec!(-300),
            exit_reason: ExitReason::StopLoss,
        };
        let text = trade_closed_message("BTC/USDT", &record);
        assert!(text.starts_with("🔴"));
        assert!(text.contains("PnL: -300.0000"));
        assert!(text.contains("ROI: -30.00%"));
        assert!(text.contains("Reason: stop loss"));

        record.pnl = dec!(300);
        assert!(trade_closed_message("BTC/USDT", &record).starts_with("🟢"));
    }

    #[test]
    fn test_error_message_is_escaped() {
        let text = error_message("balance < 0 & falling", at());
        assert!(text.contains("balance &lt; 0 &amp; falling"));
    }

    #[tokio::test]
    async fn test_log_notifier_is_disabled() {
        let notifier = LogNotifier;
        assert!(notifier.send("hello").await);
        assert!(!notifier.is_enabled());
    }
}
