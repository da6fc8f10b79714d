//! Process wiring for `logrelay serve`.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::app_state::AppState;
use crate::config::RelayConfig;
use crate::consumer_loop;
use crate::kafka_source::KafkaSource;
use crate::relay::Relay;
use crate::relay_web::build_relay_router;
use crate::shutdown::shutdown_signal;

/// Bind the subscriber channel, connect to Kafka, and relay until a shutdown signal.
///
/// Failing to bind or to reach the broker returns an error before anything is served.
pub async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let relay = Arc::new(Relay::from_config(&config));
    let state = Arc::new(AppState::new(Arc::clone(&relay), shutdown_tx.clone()));

    let (host, port) = config.server.bind_target();
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind subscriber channel on {host}:{port}"))?;
    let addr = listener.local_addr().context("listener has no local address")?;

    let source = KafkaSource::connect(&config.kafka)
        .await
        .with_context(|| format!("failed to start consuming '{}'", config.kafka.topic))?;
    state.set_ready(true);

    let consumer_shutdown = shutdown_tx.subscribe();
    let sweeper_shutdown = shutdown_tx.subscribe();
    let mut server_shutdown = shutdown_tx.subscribe();

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            state.begin_shutdown();
        });
    }

    let sweeper = relay
        .dedup()
        .spawn_sweeper(config.dedup.sweep_interval(), sweeper_shutdown);

    let mut consumer = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            tracing::info!(topic = source.topic(), "consumer started");
            consumer_loop::run(source, &relay, consumer_shutdown).await
        })
    };

    let app = build_relay_router(Arc::clone(&state), &config.server);
    tracing::info!(
        %addr,
        topic = %config.kafka.topic,
        group_id = %config.kafka.group_id,
        dedup_window_secs = config.dedup.window_secs,
        "log relay running"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
            tracing::info!("closing subscriber connections");
        })
        .await;

    // The server can also stop on its own error; make sure everything else follows.
    state.begin_shutdown();

    match tokio::time::timeout(config.server.shutdown_grace(), &mut consumer).await {
        Ok(Ok(summary)) => tracing::info!(?summary, "consumer stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "consumer task failed"),
        Err(_) => {
            tracing::warn!(
                grace_secs = config.server.shutdown_grace_secs,
                "consumer did not stop in time, aborting"
            );
            consumer.abort();
        }
    }
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "dedup sweeper task failed");
    }

    match relay.dedup().clear() {
        Ok(dropped) => tracing::debug!(dropped, "pending dedup entries dropped"),
        Err(e) => tracing::warn!(error = %e, "could not clear dedup state"),
    }
    tracing::info!(metrics = ?relay.metrics(), "log relay stopped");

    served.context("subscriber channel server failed")
}
