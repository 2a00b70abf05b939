//! ferry-edge — subscribes to an MQTT topic, buffers what arrives and posts
//! it to the ingestion service in periodic batches.

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use ferry_core::config::EdgeConfig;
use ferry_services::{DeliveryClient, EdgeRelay, FlushScheduler, MessageBuffer};

mod mqtt;

use mqtt::MqttBroker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match EdgeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let settings = &config.settings;
    tracing::info!(
        broker = %config.broker_addr,
        client_id = %config.client_id,
        topic = %config.topic,
        api = %config.batch_api_url,
        flush_interval_secs = settings.flush_interval_secs,
        "ferry-edge starting"
    );

    // ── Broker subscription ──────────────────────────────────────────────────
    let (host, port) = mqtt::parse_broker_addr(&config.broker_addr)?;
    let broker = MqttBroker::new(&config.client_id, &host, port);
    let buffer = MessageBuffer::new(settings.buffer_capacity, settings.overflow);
    let relay = EdgeRelay::new(broker, buffer.clone());

    relay
        .start(&config.topic)
        .await
        .context("failed to start MQTT subscription")?;

    // ── Flush scheduler ──────────────────────────────────────────────────────
    let client = DeliveryClient::new(config.batch_api_url.clone(), settings.request_timeout())
        .context("failed to build HTTP client")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut scheduler = FlushScheduler::new(
        buffer,
        client,
        settings.flush_interval(),
        shutdown_tx.subscribe(),
    )
    .with_final_flush_timeout(settings.shutdown_flush_timeout());
    if settings.retry.enabled {
        scheduler = scheduler.with_retry(settings.retry.max_pending_batches);
    }

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let stats = relay.run(scheduler).await;
    tracing::info!(
        cycles = stats.cycles,
        batches_sent = stats.batches_sent,
        messages_sent = stats.messages_sent,
        messages_lost = stats.messages_lost,
        dropped_on_overflow = relay.buffer().dropped(),
        "ferry-edge stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();
}
