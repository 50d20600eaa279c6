use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use promptbot::access::AllowList;
use promptbot::assistant::Assistant;
use promptbot::config::{Config, DEFAULT_CONFIG_PATH};
use promptbot::openai::OpenAiClient;
use promptbot::prompts::{self, PromptLibrary};
use promptbot::session::SessionStore;
use promptbot::telegram;
use promptbot::telegram_log::TelegramLogLayer;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // An explicit path must exist; the default one is optional.
    let config_path = std::env::args().nth(1).map(PathBuf::from).or_else(|| {
        let default = Path::new(DEFAULT_CONFIG_PATH);
        default.exists().then(|| default.to_path_buf())
    });
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("promptbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            return ExitCode::FAILURE;
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting promptbot...");
    match &config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file, using environment"),
    }
    info!("Model: {} (temperature {})", config.engine.model, config.engine.temperature);
    info!("Allowed users: {:?}", config.allow_users);

    let http = reqwest::Client::new();
    let prompts_path = config.prompts_path();
    if config.fetch_prompts_on_start {
        // Failure is logged inside; the local copy or the built-ins still work.
        prompts::fetch_remote(&http, &config.prompts_url, &prompts_path).await.ok();
    }
    let library = PromptLibrary::load(&prompts_path).unwrap_or_else(|e| {
        warn!("{e}, using built-in prompts only");
        PromptLibrary::builtin()
    });

    let client = match OpenAiClient::new(config.openai_api_key.clone(), config.openai_base_url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create completion client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let assistant = Arc::new(Assistant::new(
        library,
        AllowList::new(&config.allow_users),
        SessionStore::new(config.engine.clone(), config.max_history),
        client,
    ));

    telegram::run(bot, assistant).await;
    ExitCode::SUCCESS
}
