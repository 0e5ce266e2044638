//! Run command - poll, filter, dedup and deliver loop

use anyhow::{Context, Result};
use post_relay_adapters::{
    dry_run::LogSink,
    outbox::{OutboxSink, OutboxWriter},
    state::{InMemoryStateStore, SqliteStateStore},
    telegram::TelegramSink,
};
use post_relay_domain::{
    CycleReport, DeliverySink, SourceOutcome, StateStore, SystemClock,
    usecases::{Dispatcher, DispatcherConfig, RenderConfig, Renderer},
};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

use crate::args::RunArgs;
use crate::config::{AppConfig, load_secret};
use crate::sources::build_sources;

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("post-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let renderer = Renderer::new(RenderConfig {
        preview_chars: config.telegram.preview_chars,
        include_source_label: config.telegram.include_source_label,
    });

    let sources = build_sources(&config, &client);
    if sources.is_empty() {
        tracing::warn!("No usable sources configured");
    }

    tracing::info!(
        dry_run = args.dry_run,
        once = args.once,
        outbox = ?args.outbox,
        sources = sources.len(),
        "Starting post-relay run"
    );

    // Dry runs never touch the durable store
    let store: Arc<dyn StateStore> = if args.dry_run {
        Arc::new(InMemoryStateStore::new())
    } else {
        Arc::new(
            SqliteStateStore::new(&config.general.state_db_path)
                .await
                .context("Failed to initialize SQLite state store")?,
        )
    };

    let sink: Arc<dyn DeliverySink> = if args.dry_run {
        Arc::new(LogSink::new(renderer))
    } else if let Some(path) = args.outbox.clone() {
        let writer = OutboxWriter::new(path.clone())
            .await
            .context("Failed to initialize outbox writer")?;
        tracing::info!(outbox = %path.display(), "Writing posts to outbox");
        Arc::new(OutboxSink::new(writer, renderer))
    } else {
        build_telegram_sink(&config, client.clone(), renderer)?
    };

    let dispatcher = Dispatcher::new(
        sources,
        store,
        sink,
        Arc::new(SystemClock),
        DispatcherConfig {
            fetch_timeout: Duration::from_secs(config.general.fetch_timeout_secs.max(1)),
            max_concurrent_sources: config.general.max_concurrent_sources.max(1),
        },
    );

    if args.once {
        tracing::info!("Running single poll cycle");
        let report = dispatcher.run_cycle().await;
        log_report(&report);
    } else {
        let poll_interval = config.general.poll_interval();
        if poll_interval.as_secs() != config.general.poll_interval_secs {
            tracing::warn!(
                configured = config.general.poll_interval_secs,
                used = poll_interval.as_secs(),
                "Poll interval raised to the minimum"
            );
        }

        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Set up graceful shutdown
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        };

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = dispatcher.run_cycle().await;
                    log_report(&report);
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutting down gracefully");
                    break;
                }
            }
        }
    }

    tracing::info!("post-relay run completed");
    Ok(())
}

fn build_telegram_sink(
    config: &AppConfig,
    client: reqwest::Client,
    renderer: Renderer,
) -> Result<Arc<dyn DeliverySink>> {
    let bot_token = load_secret(&config.telegram.bot_token_env, "Telegram bot token")?;
    let chat_id = load_secret(&config.telegram.chat_id_env, "Telegram chat id")?;

    Ok(Arc::new(TelegramSink::new(
        client,
        bot_token,
        chat_id.expose_secret().to_string(),
        config.retry.policy(),
        renderer,
        Duration::from_secs(config.telegram.timeout_secs.max(1)),
    )))
}

fn log_report(report: &CycleReport) {
    // Skips and aborts were already logged by the dispatcher
    for (source_id, outcome) in &report.outcomes {
        match outcome {
            SourceOutcome::Completed {
                fetched,
                matched,
                delivered,
                cursor_advanced,
            } => {
                tracing::debug!(
                    source = %source_id,
                    fetched,
                    matched,
                    delivered,
                    cursor_advanced,
                    "Source done"
                );
            }
            SourceOutcome::Skipped { reason } => {
                tracing::debug!(source = %source_id, reason = %reason, "Source skipped");
            }
            SourceOutcome::Aborted { delivered, .. } => {
                tracing::debug!(source = %source_id, delivered, "Source aborted");
            }
            SourceOutcome::Disabled => {}
        }
    }
}
