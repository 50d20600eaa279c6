//! Telegram bot that relays conversations to a chat-completion model, with
//! selectable role prompts and a username allow-list.

pub mod access;
pub mod assistant;
pub mod config;
pub mod openai;
pub mod prompts;
pub mod session;
pub mod telegram;
pub mod telegram_log;
