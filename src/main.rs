use std::sync::Arc;

use anyhow::Context;

use letter_desk::accounts::ensure_admin;
use letter_desk::api::{self, AppState};
use letter_desk::auth::{AccessGate, TokenSigner};
use letter_desk::channels::whatsapp::{HttpBridgeTransport, spawn_session_listener};
use letter_desk::channels::{ChannelManager, TelegramChannel, WhatsAppChannel};
use letter_desk::config::AppConfig;
use letter_desk::letters::LetterWorkflow;
use letter_desk::notifications::{Dispatcher, NotificationRouter};
use letter_desk::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("📬 Letter Desk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!("   Database: {}", config.database_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database at {}",
                    config.database_path.display()
                )
            })?,
    );

    if let Some(admin) = &config.bootstrap_admin {
        ensure_admin(store.as_ref(), admin)
            .await
            .context("Failed to create bootstrap admin")?;
    }

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if let Some(token) = &config.telegram_token {
        let telegram = TelegramChannel::new(token.clone());
        match telegram.health_check().await {
            Ok(()) => tracing::info!("Telegram bot token verified"),
            Err(e) => tracing::warn!(error = %e, "Telegram health check failed; sends may fail"),
        }
        channels.add(Arc::new(telegram));
        eprintln!("   Telegram: enabled");
    }

    let session = match &config.whatsapp {
        Some(wa) => {
            let transport = Arc::new(HttpBridgeTransport::new(wa.bridge_url.clone()));
            let session = Arc::new(WhatsAppChannel::new(transport, wa));
            session
                .start()
                .await
                .context("WhatsApp session could not be initialized")?;
            spawn_session_listener(Arc::clone(&session));
            channels.add(session.clone());
            eprintln!("   WhatsApp: enabled (bridge {})", wa.bridge_url);
            Some(session)
        }
        None => None,
    };

    if channels.is_empty() {
        tracing::warn!("No notification channels configured; notifications will be skipped");
    }

    // ── Workflow ─────────────────────────────────────────────────────────
    let (dispatcher, _dispatch_task) = Dispatcher::spawn(channels, &config.dispatch);
    let router = Arc::new(NotificationRouter::new(Arc::clone(&store), dispatcher));
    let workflow = Arc::new(LetterWorkflow::new(Arc::clone(&store), router));

    let gate = AccessGate::new(TokenSigner::new(
        config.jwt_secret.clone(),
        config.token_ttl,
    ));

    let app = api::router(AppState {
        store,
        gate,
        workflow,
        session,
    });

    // ── Serve ────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
