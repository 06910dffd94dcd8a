use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::{webhooks, Polling};
use tokio::time::sleep;

use fetchgram::cli::{Cli, Commands};
use fetchgram::conversion::check_ffmpeg;
use fetchgram::core::{config, health_server, init_logger, metrics, PipelineSettings};
use fetchgram::download::decider::{decide, format_size};
use fetchgram::download::fetcher::{MediaFetcher, YtDlpFetcher};
use fetchgram::download::ytdlp::{self, UpdateOutcome};
use fetchgram::download::{
    DownloadQueue, DownloadRequest, Pipeline, RequesterId, TelegramTransport, TempFileSet, UrlClassifier,
};
use fetchgram::telegram::{create_bot, schema, setup_bot_commands, Bot, HandlerDeps, HandlerError};

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();

    let cli = Cli::parse_args();

    // Log panics from spawned tasks; the dispatcher loop restarts after one
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {}", panic_info);
    }));

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH, &config::LOG_LEVEL)?;

    match cli.command {
        None => run_bot(false).await,
        Some(Commands::Run { webhook }) => run_bot(webhook).await,
        Some(Commands::Fetch { url, output, keep }) => run_cli_fetch(url, output, keep).await,
        Some(Commands::UpdateYtdlp { check }) => run_cli_update_ytdlp(check).await,
    }
}

async fn run_bot(use_webhook: bool) -> Result<()> {
    let settings = PipelineSettings::from_env()?;
    settings.log_summary();
    std::fs::create_dir_all(&settings.fetcher.download_dir)?;

    metrics::init_metrics();
    if *config::health::ENABLED {
        let port = *config::health::PORT;
        log::info!("Starting health server on port {}", port);
        tokio::spawn(async move {
            if let Err(e) = health_server::start_health_server(port).await {
                log::error!("Health server error: {}", e);
            }
        });
    }

    // Sites change often; keep the extractor fresh without delaying startup
    let ytdl_bin = settings.fetcher.ytdl_bin.clone();
    tokio::spawn(async move {
        match ytdlp::ytdlp_version(&ytdl_bin).await {
            Ok(version) => log::info!("yt-dlp version: {}", version),
            Err(e) => log::warn!("yt-dlp is not usable: {}", e),
        }
        ytdlp::update_ytdlp(&ytdl_bin).await;
    });

    if !check_ffmpeg(&settings.transcode.ffmpeg_bin).await {
        log::warn!(
            "{} not found; large videos will be sent uncompressed",
            settings.transcode.ffmpeg_bin
        );
    }

    let bot = create_bot()?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }
    let me = bot.get_me().await?;
    log::info!("Authorized as @{}", me.username());

    let transport = Arc::new(TelegramTransport::new(bot.clone(), settings.send_retry.clone()));
    let pipeline = Arc::new(Pipeline::from_settings(&settings, transport)?);
    let download_queue = Arc::new(DownloadQueue::new(pipeline, settings.max_concurrent));

    let handler = schema(HandlerDeps {
        download_queue: Arc::clone(&download_queue),
        allowed_domains: Arc::new(settings.classifier.allowed_domains.clone()),
        thresholds: settings.thresholds,
        bot_username: me.user.username.clone(),
        bot_id: me.user.id,
    });

    let webhook_url = if use_webhook {
        let raw = config::WEBHOOK_URL
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--webhook requires WEBHOOK_URL"))?;
        Some(url::Url::parse(&raw)?)
    } else {
        None
    };

    let mut restarts = 0;
    loop {
        let bot_clone = bot.clone();
        let handler_clone = handler.clone();
        let webhook_clone = webhook_url.clone();

        // Run the dispatcher in its own task so a panic can be caught and the bot restarted
        let handle = tokio::spawn(async move { dispatch(bot_clone, handler_clone, webhook_clone).await });

        match handle.await {
            Ok(Ok(())) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Ok(Err(e)) => {
                download_queue.close();
                return Err(e);
            }
            Err(join_err) if join_err.is_panic() && restarts < config::dispatcher::MAX_RESTARTS => {
                let delay = config::dispatcher::restart_delay(restarts);
                restarts += 1;
                metrics::DISPATCHER_RESTARTS_TOTAL.inc();
                log::error!(
                    "Dispatcher panicked: {}; restarting in {:?} (attempt {}/{})",
                    join_err,
                    delay,
                    restarts,
                    config::dispatcher::MAX_RESTARTS
                );
                sleep(delay).await;
            }
            Err(join_err) => {
                log::error!("Dispatcher stopped: {}", join_err);
                break;
            }
        }
    }

    download_queue.close();
    Ok(())
}

/// Runs one dispatcher over long polling or, with a URL, the axum webhook listener.
///
/// The webhook listener registers the hook on start and deletes it on shutdown.
async fn dispatch(bot: Bot, handler: UpdateHandler<HandlerError>, webhook_url: Option<url::Url>) -> Result<()> {
    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .enable_ctrlc_handler()
        .build();
    let error_handler = LoggingErrorHandler::with_custom_text("An error from the update listener");

    match webhook_url {
        Some(url) => {
            let addr = SocketAddr::from(([0, 0, 0, 0], *config::PORT));
            log::info!("Starting bot in webhook mode at {} (listening on {})", url, addr);
            let listener = webhooks::axum(bot, webhooks::Options::new(addr, url)).await?;
            dispatcher.dispatch_with_listener(listener, error_handler).await;
        }
        None => {
            log::info!("Starting bot in long polling mode");
            let listener = Polling::builder(bot).drop_pending_updates().build();
            dispatcher.dispatch_with_listener(listener, error_handler).await;
        }
    }
    Ok(())
}

/// `fetch <url>`: classify and download locally, print what the bot would do.
async fn run_cli_fetch(url: String, output: Option<PathBuf>, keep: bool) -> Result<()> {
    let mut settings = PipelineSettings::from_env()?;
    if let Some(dir) = output {
        settings.fetcher.download_dir = dir;
    }

    let classifier = UrlClassifier::with_http_resolver(settings.classifier.clone())?;
    let source_url = classifier.classify(&url).await.into_result()?;
    let request = DownloadRequest::new(source_url, RequesterId(0));

    let fetcher = YtDlpFetcher::new(settings.fetcher.clone());
    let mut temp = TempFileSet::new(request.id.clone());
    let artifact = fetcher.fetch(&request, &mut temp).await?;
    let route = decide(artifact.size_bytes, &settings.thresholds);

    let summary = serde_json::json!({
        "request_id": request.id,
        "source_url": request.source_url.as_str(),
        "path": artifact.local_path.display().to_string(),
        "title": artifact.title,
        "size_bytes": artifact.size_bytes,
        "size": format_size(artifact.size_bytes),
        "route": route,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if keep {
        temp.keep(artifact.path());
        println!("Kept {}", artifact.local_path.display());
    }
    Ok(())
}

/// `update-ytdlp [--check]`
async fn run_cli_update_ytdlp(check: bool) -> Result<()> {
    let bin = config::YTDL_BIN.as_str();
    let version = ytdlp::ytdlp_version(bin).await?;
    println!("yt-dlp version: {}", version);
    if check {
        return Ok(());
    }

    match ytdlp::update_ytdlp(bin).await {
        UpdateOutcome::AlreadyCurrent => println!("yt-dlp is up to date"),
        UpdateOutcome::Updated(summary) => println!("yt-dlp updated: {}", summary),
        UpdateOutcome::Failed(reason) => anyhow::bail!("yt-dlp update failed: {}", reason),
    }
    Ok(())
}
