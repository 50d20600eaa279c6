//! Per-user conversation state.
//!
//! A session is the ordered message history replayed to the model on every
//! turn. The system message, if any, is always first and only
//! [`Session::set_system_prompt`] can install it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::openai::{self, CompletionClient, Engine};

/// Role name recorded when a system prompt is installed without a library role.
pub const CUSTOM_ROLE: &str = "Custom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Where a session is in the role-selection flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    /// No system prompt installed.
    Unset,
    /// A system prompt is installed under this role name.
    Active(String),
}

#[derive(Debug)]
pub enum SessionError {
    CompletionFailed(openai::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompletionFailed(e) => write!(f, "completion failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CompletionFailed(e) => Some(e),
        }
    }
}

pub struct Session {
    messages: Vec<Message>,
    engine: Engine,
    state: RoleState,
    /// Max user/assistant messages kept; `None` keeps everything.
    max_history: Option<usize>,
}

impl Session {
    pub fn new(engine: Engine) -> Self {
        Self {
            messages: Vec::new(),
            engine,
            state: RoleState::Unset,
            max_history: None,
        }
    }

    pub fn with_history_cap(mut self, max_history: Option<usize>) -> Self {
        self.max_history = max_history.map(|n| n.max(1));
        self
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.state = RoleState::Unset;
    }

    /// Replace the whole conversation with a single system message.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.set_role(CUSTOM_ROLE, text);
    }

    /// Like [`Session::set_system_prompt`], recording which role was chosen.
    pub fn set_role(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.reset();
        self.messages.push(Message::new(Role::System, text));
        self.state = RoleState::Active(name.into());
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::new(Role::User, text));
        self.enforce_history_cap();
    }

    pub fn has_content(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn role_state(&self) -> &RoleState {
        &self.state
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Send the full history to `client` and append its reply.
    ///
    /// On failure the history is left as it was before the call.
    pub async fn request_completion<C: CompletionClient>(
        &mut self,
        client: &C,
    ) -> Result<String, SessionError> {
        debug!(messages = self.messages.len(), "Sending session history");

        let reply = client
            .complete(&self.engine, &self.messages)
            .await
            .map_err(SessionError::CompletionFailed)?;

        self.messages.push(Message::new(Role::Assistant, reply.clone()));
        self.enforce_history_cap();
        Ok(reply)
    }

    fn has_system_message(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == Role::System)
    }

    /// Drop the oldest turns past the cap. The system message always stays.
    fn enforce_history_cap(&mut self) {
        let Some(max) = self.max_history else {
            return;
        };
        let start = usize::from(self.has_system_message());
        let turns = self.messages.len() - start;
        if turns > max {
            let excess = turns - max;
            self.messages.drain(start..start + excess);
            debug!(dropped = excess, "Trimmed session history");
        }
    }
}

/// Sessions keyed by user id.
///
/// The map lock is only held to look up or create an entry. Each session has
/// its own lock, held by callers for a whole turn, so one user's turns run
/// one at a time while different users run concurrently.
pub struct SessionStore {
    engine: Engine,
    max_history: Option<usize>,
    sessions: Mutex<HashMap<i64, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new(engine: Engine, max_history: Option<usize>) -> Self {
        Self {
            engine,
            max_history,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get the session for `user_id`, creating an empty one if needed.
    pub async fn get(&self, user_id: i64) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| {
                debug!(user_id, "Creating session");
                Arc::new(Mutex::new(self.new_session()))
            })
            .clone()
    }

    /// A fresh session that is not stored anywhere.
    pub fn detached(&self) -> Session {
        Session::new(self.engine.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn new_session(&self) -> Session {
        Session::new(self.engine.clone()).with_history_cap(self.max_history)
    }
}
