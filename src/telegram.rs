//! Telegram transport using teloxide.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, ReplyParameters};
use tracing::{info, warn};

use crate::assistant::{Assistant, Command, Sender};
use crate::openai::OpenAiClient;

/// Telegram rejects messages over 4096 characters.
const MAX_MESSAGE_LENGTH: usize = 4000;

pub type BotAssistant = Assistant<OpenAiClient>;

/// Run the dispatcher until Ctrl-C.
pub async fn run(bot: Bot, assistant: Arc<BotAssistant>) {
    let handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(|t| t.starts_with('/')))
                .endpoint(handle_unknown_command),
        )
        .branch(dptree::endpoint(handle_text));

    info!("🤖 Bot is running");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![assistant])
        .default_handler(|upd| async move {
            info!("Unhandled update: {:?}", upd.kind);
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn sender_of(msg: &Message) -> Option<Sender> {
    let user = msg.from.as_ref()?;
    Some(Sender {
        id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    })
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    assistant: Arc<BotAssistant>,
) -> ResponseResult<()> {
    let Some(sender) = sender_of(&msg) else {
        return Ok(());
    };
    info!("📨 {:?} from {} ({:?})", cmd, sender.id, sender.username);

    if matches!(cmd, Command::Fix(_)) {
        typing(&bot, &msg).await;
    }
    let reply = assistant.handle_command(&sender, cmd).await;
    send_reply(&bot, &msg, &reply).await;
    Ok(())
}

async fn handle_unknown_command(bot: Bot, msg: Message, assistant: Arc<BotAssistant>) -> ResponseResult<()> {
    let Some(sender) = sender_of(&msg) else {
        return Ok(());
    };
    info!("Unknown command from {}: {:?}", sender.id, msg.text());

    let reply = assistant.handle_unknown(&sender);
    send_reply(&bot, &msg, &reply).await;
    Ok(())
}

async fn handle_text(bot: Bot, msg: Message, assistant: Arc<BotAssistant>) -> ResponseResult<()> {
    let (Some(sender), Some(text)) = (sender_of(&msg), msg.text()) else {
        return Ok(());
    };
    let preview: String = text.chars().take(50).collect();
    info!("📨 {} ({:?}): \"{preview}\"", sender.id, sender.username);

    typing(&bot, &msg).await;
    let reply = assistant.handle_text(&sender, text).await;
    send_reply(&bot, &msg, &reply).await;
    Ok(())
}

async fn typing(bot: &Bot, msg: &Message) {
    if let Err(e) = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await {
        warn!("Failed to send typing action: {e}");
    }
}

/// Send `text` as plain text, split to fit Telegram's limit.
/// The first chunk replies to the incoming message.
async fn send_reply(bot: &Bot, msg: &Message, text: &str) {
    for (i, chunk) in split_message(text, MAX_MESSAGE_LENGTH).into_iter().enumerate() {
        let mut request = bot.send_message(msg.chat.id, chunk);
        if i == 0 {
            request = request.reply_parameters(ReplyParameters::new(msg.id));
        }
        if let Err(e) = request.await {
            warn!("Failed to send reply to {}: {e}", msg.chat.id);
            return;
        }
    }
}

/// Split into chunks of at most `max` chars, preferring line breaks.
fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.is_empty() {
        return vec!["(empty response)".to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.chars().count() <= max {
            chunks.push(rest.to_string());
            break;
        }

        // Byte offset just past the first `max` chars.
        let limit = rest.char_indices().nth(max).map_or(rest.len(), |(i, _)| i);
        let cut = match rest[..limit].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => limit,
        };
        chunks.push(rest[..cut].trim_end_matches('\n').to_string());
        rest = &rest[cut..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_single_chunk() {
        assert_eq!(split_message("hello", 10), ["hello"]);
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(split_message("", 10), ["(empty response)"]);
    }

    #[test]
    fn test_split_prefers_newlines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, ["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_split_long_line() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), "x".repeat(25));
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "é".repeat(15);
        let chunks = split_message(&text, 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks.concat(), text);
    }
}
