//! Tracing layer that mirrors log events into a Telegram chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 50;
const MAX_LOG_CHARS: usize = 4000;

/// Targets whose events are never forwarded: sending a log would log again.
const SILENT_TARGETS: &[&str] = &["teloxide", "reqwest", "hyper", "h2", "rustls"];

enum LogMessage {
    /// WARN/ERROR, sent immediately.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_logs(bot, chat_id, rx));
        Self { tx }
    }
}

async fn forward_logs(bot: Bot, chat_id: ChatId, mut rx: mpsc::UnboundedReceiver<LogMessage>) {
    let mut buffer: Vec<String> = Vec::new();
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(LogMessage::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                Some(LogMessage::Info(text)) => {
                    buffer.push(text);
                    if buffer.len() >= MAX_BUFFERED {
                        flush(&bot, chat_id, &mut buffer).await;
                    }
                }
                None => {
                    flush(&bot, chat_id, &mut buffer).await;
                    break;
                }
            },
            _ = interval.tick() => flush(&bot, chat_id, &mut buffer).await,
        }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = bot.send_message(chat_id, truncate_log(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(bot, chat_id, &combined).await;
}

fn truncate_log(text: &str) -> String {
    if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

fn is_silent(target: &str) -> bool {
    SILENT_TARGETS
        .iter()
        .any(|t| target == *t || target.starts_with(&format!("{t}::")))
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let rendered = format!("{:?}", value);
            if self.message.is_empty() {
                self.message = rendered;
            } else {
                self.message = format!("{rendered} ({})", self.message);
            }
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO || is_silent(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_targets() {
        assert!(is_silent("teloxide"));
        assert!(is_silent("reqwest::connect"));
        assert!(!is_silent("promptbot::assistant"));
        assert!(!is_silent("hyperion"));
    }

    #[test]
    fn test_truncate_long_log() {
        let text = "é".repeat(MAX_LOG_CHARS + 10);
        let truncated = truncate_log(&text);
        assert_eq!(truncated.chars().count(), MAX_LOG_CHARS + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_short_log_untouched() {
        assert_eq!(truncate_log("hello"), "hello");
    }
}
