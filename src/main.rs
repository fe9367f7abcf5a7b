use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;

use linkdrop::cli::{self, Cli, Commands};
use linkdrop::core::logging::parse_level;
use linkdrop::core::{config, init_logger, log_startup_configuration, AppContext, Services};
use linkdrop::download::reporter::ReporterConfig;
use linkdrop::download::source::{Acquirer, YtDlpAcquirer, YtDlpConfig};
use linkdrop::download::{Worker, WorkerConfig};
use linkdrop::telegram::handlers::{schema, HandlerDeps};
use linkdrop::telegram::{create_bot, setup_bot_commands, TelegramDelivery, TelegramStatus};

/// Main entry point
///
/// Parses CLI arguments and dispatches to the chosen subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, bot creation) or a one-shot fetch fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    // Log panics that escape a task instead of losing them on stderr
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    init_logger(&config::LOG_FILE_PATH, parse_level(&config::LOG_LEVEL))?;

    match cli.command {
        Some(Commands::Fetch {
            url,
            max_height,
            playlist_items,
            output,
        }) => run_fetch(url, max_height, playlist_items, output).await,
        Some(Commands::Run) | None => run_bot().await,
    }
}

async fn run_fetch(
    url: String,
    max_height: Option<u32>,
    playlist_items: Option<String>,
    output: std::path::PathBuf,
) -> Result<()> {
    log::info!("Fetching {} into {}", url, output.display());
    // Local files are kept as downloaded, no Telegram rewrites.
    let config = YtDlpConfig {
        telegram_compat: false,
        ..YtDlpConfig::from_env()
    };
    let acquirer: Arc<dyn Acquirer> = Arc::new(YtDlpAcquirer::new(config));
    let files = cli::fetch(acquirer, url, max_height, playlist_items, &output, ReporterConfig::from_env()).await?;

    if files.is_empty() {
        println!("Download finished, but the file was not found.");
    }
    for file in files {
        println!("{}", file.display());
    }
    Ok(())
}

async fn run_bot() -> Result<()> {
    log::info!("Starting bot...");
    log_startup_configuration();

    let bot = create_bot()?;

    let context = Arc::new(AppContext::new(config::selection::ttl()));
    let acquirer: Arc<dyn Acquirer> = Arc::new(YtDlpAcquirer::new(YtDlpConfig::from_env()));
    let status = Arc::new(TelegramStatus::new(bot.clone()));
    let delivery = Arc::new(TelegramDelivery::from_env(bot.clone()));

    let worker = Worker::new(
        Arc::clone(&context.queue),
        Arc::clone(&acquirer),
        delivery,
        status.clone(),
        WorkerConfig::from_env(),
    );
    let services = Services::start(Arc::clone(&context), worker, config::selection::sweep_interval());

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let deps = HandlerDeps::new(context, acquirer, status, *config::selection::PLAYLIST_PAGE_SIZE);

    Dispatcher::builder(bot, schema(deps))
        .dependencies(DependencyMap::new())
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Dispatcher shutdown gracefully");
    services.shutdown().await;
    Ok(())
}
