use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::ChatId;

use crate::openai::{Engine, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::prompts::DEFAULT_PROMPTS_URL;

pub const DEFAULT_CONFIG_PATH: &str = "promptbot.json";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    /// Telegram usernames allowed to use the bot.
    #[serde(default)]
    allow_users: Vec<String>,
    model: Option<String>,
    #[serde(default)]
    temperature: f32,
    openai_base_url: Option<String>,
    /// Where the role prompt CSV is downloaded from.
    prompts_url: Option<String>,
    /// Download the prompt CSV at startup.
    #[serde(default = "default_fetch_prompts")]
    fetch_prompts_on_start: bool,
    /// Max user/assistant messages kept per session (unset = unbounded).
    max_history: Option<usize>,
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, prompts). Defaults to current directory.
    data_dir: Option<String>,
}

fn default_fetch_prompts() -> bool {
    true
}

#[derive(Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub allow_users: Vec<String>,
    pub engine: Engine,
    pub openai_base_url: String,
    pub prompts_url: String,
    pub fetch_prompts_on_start: bool,
    pub max_history: Option<usize>,
    pub log_chat_id: Option<ChatId>,
    pub data_dir: PathBuf,
}

impl Config {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(path, |key| std::env::var(key).ok())
    }

    /// `env` looks up `TELEGRAM_TOKEN`, `OPENAI_API_KEY` and `ALLOW_USERS`.
    pub fn from_sources<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file = match path {
            Some(path) => read_file(path)?,
            None => ConfigFile::default_values(),
        };

        if let Some(token) = env("TELEGRAM_TOKEN").filter(|v| !v.is_empty()) {
            file.telegram_bot_token = token;
        }
        if let Some(key) = env("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            file.openai_api_key = key;
        }
        if let Some(users) = env("ALLOW_USERS").filter(|v| !v.trim().is_empty()) {
            file.allow_users = users.split(',').map(|u| u.trim().to_string()).collect();
        }

        Self::validate(file)
    }

    fn validate(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.openai_api_key.is_empty() {
            return Err(ConfigError::Validation("openai_api_key is required".into()));
        }
        let allow_users: Vec<String> = file
            .allow_users
            .into_iter()
            .filter(|u| !u.trim().is_empty())
            .collect();
        if allow_users.is_empty() {
            return Err(ConfigError::Validation(
                "allow_users must contain at least one username".into(),
            ));
        }
        if !(0.0..=2.0).contains(&file.temperature) {
            return Err(ConfigError::Validation(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                file.temperature
            )));
        }
        if file.max_history == Some(0) {
            return Err(ConfigError::Validation("max_history must be at least 1".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            allow_users,
            engine: Engine {
                model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                temperature: file.temperature,
            },
            openai_base_url: file.openai_base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            prompts_url: file.prompts_url.unwrap_or_else(|| DEFAULT_PROMPTS_URL.to_string()),
            fetch_prompts_on_start: file.fetch_prompts_on_start,
            max_history: file.max_history,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
        })
    }

    /// Local copy of the role prompt CSV.
    pub fn prompts_path(&self) -> PathBuf {
        self.data_dir.join("prompts.csv")
    }
}

impl ConfigFile {
    fn default_values() -> Self {
        Self {
            fetch_prompts_on_start: default_fetch_prompts(),
            ..Self::default()
        }
    }
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn load(content: &str) -> Result<Config, ConfigError> {
        let file = write_config(content);
        Config::from_sources(Some(file.path()), no_env)
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = load(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "openai_api_key": "sk-test",
            "allow_users": ["alice"]
        }"#)
        .expect("should load valid config");
        assert_eq!(config.allow_users, ["alice"]);
        assert_eq!(config.engine, Engine::default());
        assert_eq!(config.openai_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.prompts_url, DEFAULT_PROMPTS_URL);
        assert!(config.fetch_prompts_on_start);
        assert_eq!(config.max_history, None);
        assert_eq!(config.prompts_path(), PathBuf::from("./prompts.csv"));
    }

    #[test]
    fn test_engine_settings() {
        let config = load(r#"{
            "telegram_bot_token": "123:abc",
            "openai_api_key": "sk-test",
            "allow_users": ["alice"],
            "model": "gpt-4o-mini",
            "temperature": 1.5,
            "max_history": 20,
            "log_chat_id": -100123,
            "data_dir": "/var/lib/promptbot"
        }"#)
        .unwrap();
        assert_eq!(config.engine.model, "gpt-4o-mini");
        assert_eq!(config.engine.temperature, 1.5);
        assert_eq!(config.max_history, Some(20));
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
        assert_eq!(config.prompts_path(), PathBuf::from("/var/lib/promptbot/prompts.csv"));
    }

    #[test]
    fn test_env_only() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELEGRAM_TOKEN", "42:secret"),
            ("OPENAI_API_KEY", "sk-env"),
            ("ALLOW_USERS", "alice, bob"),
        ]);
        let config = Config::from_sources(None, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.telegram_bot_token, "42:secret");
        assert_eq!(config.openai_api_key, "sk-env");
        assert_eq!(config.allow_users, ["alice", "bob"]);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(r#"{
            "telegram_bot_token": "123:file",
            "openai_api_key": "sk-file",
            "allow_users": ["alice"]
        }"#);
        let config = Config::from_sources(Some(file.path()), |k| {
            (k == "ALLOW_USERS").then(|| "carol".to_string())
        })
        .unwrap();
        assert_eq!(config.telegram_bot_token, "123:file");
        assert_eq!(config.allow_users, ["carol"]);
    }

    #[test]
    fn test_empty_token() {
        let err = assert_err(load(r#"{"openai_api_key": "sk", "allow_users": ["a"]}"#));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let err = assert_err(load(&format!(
                r#"{{"telegram_bot_token": "{token}", "openai_api_key": "sk", "allow_users": ["a"]}}"#
            )));
            assert!(matches!(err, ConfigError::Validation(_)), "{token}");
        }
    }

    #[test]
    fn test_missing_api_key() {
        let err = assert_err(load(r#"{"telegram_bot_token": "1:a", "allow_users": ["a"]}"#));
        assert!(err.to_string().contains("openai_api_key"));
    }

    #[test]
    fn test_empty_allow_list() {
        let err = assert_err(load(r#"{
            "telegram_bot_token": "1:a",
            "openai_api_key": "sk",
            "allow_users": ["", "  "]
        }"#));
        assert!(err.to_string().contains("allow_users"));
    }

    #[test]
    fn test_temperature_out_of_range() {
        let err = assert_err(load(r#"{
            "telegram_bot_token": "1:a",
            "openai_api_key": "sk",
            "allow_users": ["a"],
            "temperature": 2.5
        }"#));
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_zero_history_cap() {
        let err = assert_err(load(r#"{
            "telegram_bot_token": "1:a",
            "openai_api_key": "sk",
            "allow_users": ["a"],
            "max_history": 0
        }"#));
        assert!(err.to_string().contains("max_history"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::from_sources(Some(Path::new("/nonexistent/path/config.json")), no_env));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let err = assert_err(load("{ invalid json }"));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
