use dotenvy::dotenv;
use std::sync::Arc;
use stepwise_bot::config::Settings;
use stepwise_bot::dispatch::{AdmissionQueue, Dispatcher, HandlerRegistry};
use stepwise_bot::handlers::register_builtin;
use stepwise_bot::logging::{self, RedactionPatterns};
use stepwise_bot::transport::{TelegramTransport, Transport};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Patterns first, so nothing is logged unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    logging::init(patterns);

    info!("Starting stepwise bot...");
    let settings = init_settings();

    let transport: Arc<dyn Transport> =
        Arc::new(TelegramTransport::new(settings.telegram_token.clone()));
    let bot_username = resolve_bot_username(&settings, transport.as_ref()).await;

    let queue = Arc::new(AdmissionQueue::new(
        settings.queue_depth,
        settings.queue_parallelism,
    ));
    info!(
        depth = queue.depth(),
        parallelism = queue.parallelism(),
        "Admission queue initialized"
    );

    let mut registry = HandlerRegistry::new();
    register_builtin(&mut registry, queue);

    let dispatcher = Dispatcher::new(transport, registry)
        .with_bot_username(bot_username)
        .with_polling(settings.poll_timeout(), settings.poll_retry());

    if let Err(e) = dispatcher.publish_commands().await {
        warn!("Failed to publish commands: {e}");
    }

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("Bot is running...");
    dispatcher.run().await;
    Ok(())
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            if s.database_url.is_some() {
                info!("Database URL configured for handlers.");
            }
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn resolve_bot_username(settings: &Settings, transport: &dyn Transport) -> Option<String> {
    if let Some(username) = settings.bot_username.clone() {
        return Some(username);
    }
    match transport.bot_username().await {
        Ok(username) => {
            info!(username = ?username, "Bot identity resolved");
            username
        }
        Err(e) => {
            warn!("Failed to fetch bot username: {e}");
            None
        }
    }
}
