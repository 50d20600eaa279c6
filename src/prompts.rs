//! Role prompt library.
//!
//! Prompts come from a local CSV file with `act` and `prompt` columns (the
//! awesome-chatgpt-prompts layout) plus the built-in tone editor. The file is
//! only downloaded by [`fetch_remote`]; loading never touches the network.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_PROMPTS_URL: &str =
    "https://raw.githubusercontent.com/f/awesome-chatgpt-prompts/main/prompts.csv";

pub const TONE_EDITOR: &str = "Tone editor";

pub const TONE_EDITOR_PROMPT: &str = "\
You are a Conversation Improvement robot. Your main goal is to support the truth seeking conversation style.

You should take the user message and rewrite it a few times according to these rules:
- Rewritten message must not move topic away from the main topic.
- Rewritten message terms can be replaced with more precise ones if necessary.
- Your answer should be in the user's language.

Take the user message and create 3 different versions of this message.

Your output format should be:
Restate version: <restate, localized version of the message>

Polite version: <polite, localized version of the message>

Validate version: <validate, localized version of the message>";

#[derive(Debug)]
pub enum PromptError {
    /// The prompt file is missing, unreadable or could not be downloaded.
    ResourceUnavailable { resource: String, reason: String },
    RoleNotFound(String),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceUnavailable { resource, reason } => {
                write!(f, "prompt resource '{resource}' unavailable: {reason}")
            }
            Self::RoleNotFound(role) => write!(f, "role not found: {role}"),
        }
    }
}

impl std::error::Error for PromptError {}

#[derive(Deserialize)]
struct PromptRow {
    act: String,
    prompt: String,
}

/// Named system prompts in insertion order.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl PromptLibrary {
    /// Library holding only the built-in prompts.
    pub fn builtin() -> Self {
        let mut library = Self::default();
        library.insert_builtins();
        library
    }

    /// Load prompts from a CSV file, then append the built-ins.
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let unavailable = |reason: String| PromptError::ResourceUnavailable {
            resource: path.display().to_string(),
            reason,
        };

        if !path.exists() {
            return Err(unavailable("file does not exist".into()));
        }

        let mut reader = csv::Reader::from_path(path).map_err(|e| unavailable(e.to_string()))?;
        let mut library = Self::default();
        for row in reader.deserialize::<PromptRow>() {
            let row = row.map_err(|e| unavailable(e.to_string()))?;
            library.insert(row.act, row.prompt);
        }
        library.insert_builtins();

        info!("Loaded {} prompts from {}", library.len(), path.display());
        Ok(library)
    }

    pub fn roles(&self) -> Vec<&str> {
        self.entries.iter().map(|(role, _)| role.as_str()).collect()
    }

    pub fn prompt(&self, role: &str) -> Result<&str, PromptError> {
        self.index
            .get(role)
            .map(|&idx| self.entries[idx].1.as_str())
            .ok_or_else(|| PromptError::RoleNotFound(role.to_string()))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.index.contains_key(role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite. An existing role keeps its position.
    fn insert(&mut self, role: String, prompt: String) {
        if let Some(&idx) = self.index.get(&role) {
            self.entries[idx].1 = prompt;
        } else {
            self.index.insert(role.clone(), self.entries.len());
            self.entries.push((role, prompt));
        }
    }

    fn insert_builtins(&mut self) {
        self.insert(TONE_EDITOR.to_string(), TONE_EDITOR_PROMPT.to_string());
    }
}

/// Download the prompt CSV from `url` to `path`, replacing any existing copy.
///
/// Returns the number of bytes written.
pub async fn fetch_remote(http: &reqwest::Client, url: &str, path: &Path) -> Result<usize, PromptError> {
    let unavailable = |reason: String| {
        warn!("Failed to fetch prompts from {url}: {reason}");
        PromptError::ResourceUnavailable {
            resource: url.to_string(),
            reason,
        }
    };

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(format!("HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
    }
    tokio::fs::write(path, &body)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    info!("📥 Downloaded prompts to {} ({} bytes)", path.display(), body.len());
    Ok(body.len())
}
