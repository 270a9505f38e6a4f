use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use streak_bot::channels::{MessengerGateway, WebhookState, webhook_routes};
use streak_bot::config::BotConfig;
use streak_bot::conversation::ConversationManager;
use streak_bot::motivation::{MotivationFeed, StaticMotivationFeed};
use streak_bot::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export PAGE_ACCESS_TOKEN=... APP_SECRET=... VERIFY_TOKEN=...");
        std::process::exit(1);
    });

    // Initialize tracing, optionally mirrored to a daily log file
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "streak-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("🔥 Streak Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   Graph API: {}", config.graph_api_version);
    eprintln!("   UTC offset: {}", config.utc_offset);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Motivation feed ──────────────────────────────────────────────────
    let feed = match &config.motivation_file {
        Some(path) => StaticMotivationFeed::from_file(path)
            .await
            .with_context(|| format!("loading motivation feed from {}", path.display()))?,
        None => StaticMotivationFeed::built_in(),
    };
    eprintln!("   Motivation lines: {}", feed.len());
    if let Some(dir) = &config.log_dir {
        eprintln!("   Log dir: {}", dir.display());
    }

    // ── Conversation ─────────────────────────────────────────────────────
    let gateway = Arc::new(MessengerGateway::new(
        config.page_access_token.clone(),
        &config.graph_api_version,
    ));
    let manager = Arc::new(ConversationManager::new(
        Arc::clone(&db),
        gateway,
        Arc::new(feed),
        config.utc_offset,
    ));

    let app = webhook_routes(WebhookState::from_config(manager, &config));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Webhook server listening");
    eprintln!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("webhook server")?;

    Ok(())
}
