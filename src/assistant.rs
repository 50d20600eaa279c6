//! Command and text handling, independent of the Telegram transport.
//!
//! Every entry point checks the allow-list first. Replies are plain text; the
//! transport decides how to deliver them.

use teloxide::utils::command::BotCommands;
use tracing::{error, info};

use crate::access::AllowList;
use crate::openai::CompletionClient;
use crate::prompts::{PromptLibrary, TONE_EDITOR, TONE_EDITOR_PROMPT};
use crate::session::{Session, SessionStore};

pub const UNAUTHORIZED: &str = "Sorry, you are not allowed to use this bot.";
pub const SET_ROLE_FIRST: &str =
    "Please set your role first with /role <name> or /no_role. Use /list to see available roles.";
pub const ROLE_NOT_FOUND: &str = "Role not found";
pub const ROLE_USAGE: &str = "Usage: /role <name>. Use /list to see available roles.";
pub const FIX_USAGE: &str = "Usage: /fix <message to rewrite>";
pub const UNKNOWN_COMMAND: &str = "Sorry, I did not understand that command.";
pub const UNAVAILABLE: &str = "The assistant is temporarily unavailable, please try again later.";
pub const CLEARED: &str = "Conversation cleared. Set a role with /role <name> or /no_role.";

/// Role name and prompt installed by `/no_role`.
pub const GENERIC_ROLE: &str = "Assistant";
pub const GENERIC_PROMPT: &str = "You are a helpful assistant.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "list available roles")]
    List,
    #[command(description = "switch to a role: /role <name>")]
    Role(String),
    #[command(description = "talk to a plain assistant")]
    NoRole,
    #[command(description = "forget the conversation and the role")]
    Clear,
    #[command(description = "rewrite a message in three tones: /fix <text>")]
    Fix(String),
}

/// Who sent a request.
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

pub struct Assistant<C> {
    library: PromptLibrary,
    allow_list: AllowList,
    sessions: SessionStore,
    client: C,
}

impl<C: CompletionClient> Assistant<C> {
    pub fn new(library: PromptLibrary, allow_list: AllowList, sessions: SessionStore, client: C) -> Self {
        Self {
            library,
            allow_list,
            sessions,
            client,
        }
    }

    pub fn library(&self) -> &PromptLibrary {
        &self.library
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn is_allowed(&self, sender: &Sender) -> bool {
        let allowed = self.allow_list.is_allowed(sender.username.as_deref());
        if !allowed {
            info!("⛔ Rejected {} ({:?})", sender.id, sender.username);
        }
        allowed
    }

    pub async fn handle_command(&self, sender: &Sender, command: Command) -> String {
        if !self.is_allowed(sender) {
            return UNAUTHORIZED.to_string();
        }

        match command {
            Command::Start => format!(
                "Hello, {}!\nThis is a bot to help you with your conversation skills. Use /help to see what I can do.",
                sender.first_name
            ),
            Command::Help => Command::descriptions().to_string(),
            Command::List => self.list_roles(),
            Command::Role(name) => self.select_role(sender, name.trim()).await,
            Command::NoRole => {
                let session = self.sessions.get(sender.id).await;
                session.lock().await.set_role(GENERIC_ROLE, GENERIC_PROMPT);
                info!("🎭 {} switched to the generic assistant", sender.id);
                format!("Role set to {GENERIC_ROLE}. Send me a message.")
            }
            Command::Clear => {
                let session = self.sessions.get(sender.id).await;
                session.lock().await.reset();
                info!("🧹 {} cleared the conversation", sender.id);
                CLEARED.to_string()
            }
            Command::Fix(text) => self.fix_tone(sender, text.trim()).await,
        }
    }

    /// Free text goes to the user's session, once a role is set.
    pub async fn handle_text(&self, sender: &Sender, text: &str) -> String {
        if !self.is_allowed(sender) {
            return UNAUTHORIZED.to_string();
        }

        let session = self.sessions.get(sender.id).await;
        let mut session = session.lock().await;
        if !session.has_content() {
            return SET_ROLE_FIRST.to_string();
        }

        session.append_user(text);
        self.complete(sender, &mut session).await
    }

    /// Reply for a slash command that did not parse.
    pub fn handle_unknown(&self, sender: &Sender) -> String {
        if !self.is_allowed(sender) {
            return UNAUTHORIZED.to_string();
        }
        UNKNOWN_COMMAND.to_string()
    }

    fn list_roles(&self) -> String {
        let mut reply = String::from("Available roles:");
        for role in self.library.roles() {
            reply.push('\n');
            reply.push_str(role);
        }
        reply
    }

    async fn select_role(&self, sender: &Sender, name: &str) -> String {
        if name.is_empty() {
            return ROLE_USAGE.to_string();
        }

        let prompt = match self.library.prompt(name) {
            Ok(prompt) => prompt,
            Err(e) => {
                info!("{} asked for {e}", sender.id);
                return ROLE_NOT_FOUND.to_string();
            }
        };

        let session = self.sessions.get(sender.id).await;
        session.lock().await.set_role(name, prompt);
        info!("🎭 {} switched to role {name:?}", sender.id);
        format!("Role set to {name}. Send me a message.")
    }

    /// One-shot rewrite in a throwaway session.
    async fn fix_tone(&self, sender: &Sender, text: &str) -> String {
        if text.is_empty() {
            return FIX_USAGE.to_string();
        }

        let prompt = self.library.prompt(TONE_EDITOR).unwrap_or(TONE_EDITOR_PROMPT);
        let mut session = self.sessions.detached();
        session.set_role(TONE_EDITOR, prompt);
        session.append_user(text);
        self.complete(sender, &mut session).await
    }

    async fn complete(&self, sender: &Sender, session: &mut Session) -> String {
        match session.request_completion(&self.client).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Completion for {} failed: {e}", sender.id);
                UNAVAILABLE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Command> {
        Command::parse(text, "promptbot").ok()
    }

    #[test]
    fn test_parse_role_with_spaces() {
        assert_eq!(parse("/role Linux Terminal"), Some(Command::Role("Linux Terminal".into())));
    }

    #[test]
    fn test_parse_snake_case_command() {
        assert_eq!(parse("/no_role"), Some(Command::NoRole));
        assert_eq!(parse("/clear"), Some(Command::Clear));
    }

    #[test]
    fn test_parse_addressed_command() {
        assert_eq!(parse("/fix@promptbot you are wrong"), Some(Command::Fix("you are wrong".into())));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(parse("/frobnicate"), None);
    }

    #[test]
    fn test_help_lists_commands() {
        let help = Command::descriptions().to_string();
        for cmd in ["/start", "/help", "/list", "/role", "/no_role", "/clear", "/fix"] {
            assert!(help.contains(cmd), "help is missing {cmd}: {help}");
        }
    }
}
