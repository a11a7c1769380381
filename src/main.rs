mod config;
mod feed;
mod fetch;
mod http;
mod jobs;
mod metrics;
mod models;
mod notify;
mod pipeline;
mod runner;
mod security;
mod targets;
mod telegram;
mod webhook;

use clap::{Parser, Subcommand};
use config::{AppConfig, TelegramSettings, process_env};
use eyre::{WrapErr, eyre};
use fetch::Fetcher;
use jobs::RunRegistry;
use notify::Notifier;
use pipeline::Pipeline;
use runner::Runner;
use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc};
use targets::RemoteTrigger;
use telegram::TelegramClient;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use webhook::AppState;

/// Reconciles the supplier feed against the marketplace reference feed and
/// publishes the result.
#[derive(Parser)]
#[command(name = "maudau-feed", version)]
struct Cli {
    /// YAML config; without it a single `maudau` target is built from env.
    #[arg(long, global = true, env = "FEEDS_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one pipeline target and exit 0 on success, 1 on failure
    Run {
        #[arg(long)]
        target: Option<String>,
    },
    /// Serve the Telegram webhook and the trigger API
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Register the Telegram bot webhook and print its state
    SetWebhook {
        /// Public URL, e.g. https://example.com/telegram/webhook
        #[arg(long)]
        url: String,
        #[arg(long)]
        secret: Option<String>,
        #[arg(long)]
        drop_pending: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(target = "feeds.pipeline", "{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> eyre::Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { target } => {
            let config = AppConfig::load(config_path)?;
            let (name, target) = config.resolve_pipeline_target(target.as_deref())?;
            let http = http::build_client(&config.http)?;
            let telegram = TelegramClient::new(http.clone(), &config.telegram);
            let notifier = Notifier::new(telegram, config.telegram.chat_id.as_deref());
            let runner = Runner::new(Pipeline::new(Fetcher::new(http)), notifier);
            match runner.run_target(name, target).await {
                Ok(report) => {
                    println!("{}", report.summary());
                    Ok(ExitCode::SUCCESS)
                }
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }
        Command::Serve { port } => {
            let config = Arc::new(AppConfig::load(config_path)?);
            serve(config, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::SetWebhook {
            url,
            secret,
            drop_pending,
        } => {
            let settings = match AppConfig::load(config_path) {
                Ok(config) => config.telegram,
                Err(err) => {
                    warn!(target = "feeds.config", error = %err, "using telegram settings from env");
                    TelegramSettings::from_env(process_env)
                }
            };
            let http = http::build_client(&Default::default())?;
            let telegram = TelegramClient::new(http, &settings)
                .ok_or_else(|| eyre!("TELEGRAM_BOT_TOKEN is required"))?;
            let secret = secret.or(settings.webhook_secret);
            let result = telegram
                .set_webhook(&url, secret.as_deref(), drop_pending)
                .await
                .wrap_err("setWebhook failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            let info = telegram
                .webhook_info()
                .await
                .wrap_err("getWebhookInfo failed")?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: Arc<AppConfig>, port: u16) -> eyre::Result<()> {
    let http = http::build_client(&config.http)?;
    let telegram = TelegramClient::new(http.clone(), &config.telegram);
    if config.telegram.webhook_secret.is_none() {
        warn!(
            target = "feeds.webhook",
            "TELEGRAM_WEBHOOK_SECRET is not set; telegram updates will be refused"
        );
    }
    let notifier = Notifier::new(telegram.clone(), config.telegram.chat_id.as_deref());
    if !notifier.is_enabled() {
        warn!(target = "feeds.notify", "TELEGRAM_CHAT_ID is not set; run notifications disabled");
    }
    let runner = Runner::new(Pipeline::new(Fetcher::new(http.clone())), notifier);
    let remote = RemoteTrigger::new(http, &config.trigger);
    let registry = RunRegistry::new(config.clone(), runner, remote);
    let app = webhook::router(AppState::new(registry, telegram));

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "feeds.webhook", targets = config.targets.len(), "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
