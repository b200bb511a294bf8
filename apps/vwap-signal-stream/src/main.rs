//! VWAP Signal Stream Binary
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin vwap-signal-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DHAN_ACCESS_TOKEN`: API access token
//! - `DHAN_CLIENT_ID`: API client id
//!
//! ## Optional
//! - `VWAP_STREAM_SECURITY_ID` / `VWAP_STREAM_EXCHANGE_SEGMENT`: streamed instrument
//!   (default: 1165486 / `BSE_FNO`)
//! - `VWAP_STREAM_UNDERLYING_SCRIP` / `VWAP_STREAM_UNDERLYING_SEGMENT`: option-chain
//!   underlying (default: 51 / `IDX_I`)
//! - `VWAP_STREAM_TOUCH_THRESHOLD`: touch distance (default: 10.0)
//! - `VWAP_STREAM_HEALTH_PORT`: health and metrics port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: tracing export
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vwap_signal_stream::application::ports::DispatchOutcome;
use vwap_signal_stream::infrastructure::dhan::FeedEvent;
use vwap_signal_stream::infrastructure::events::log_events;
use vwap_signal_stream::infrastructure::telemetry;
use vwap_signal_stream::{
    DhanRestClient, EventHub, FeedClient, FeedClientConfig, HealthServer, HealthServerState,
    PipelineConfig, StreamConfig, StreamEngine, TickPipeline, TokioSignalDispatcher, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fails only if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.exporting(),
        "Starting VWAP signal stream"
    );

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = StreamConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Signal lookups
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<DispatchOutcome>();
    let option_chain = Arc::new(
        DhanRestClient::from_settings(&config.signal, config.credentials.clone())
            .context("building option-chain client")?,
    );
    let dispatcher = Arc::new(TokioSignalDispatcher::new(
        option_chain,
        config.signal.underlying.clone(),
        config.signal.dispatch_timeout,
        outcome_tx,
    ));

    // Ingestion path
    let events = Arc::new(EventHub::new(config.channels.event_capacity));
    let pipeline = TickPipeline::new(
        PipelineConfig {
            session_start: config.session.session_start(),
            touch_threshold: config.session.touch_threshold,
        },
        Arc::new(config.session.clock()),
        dispatcher,
        Arc::clone(&events) as _,
    );
    let stats = pipeline.stats();

    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(config.channels.frame_capacity);
    let engine = StreamEngine::new(pipeline, frame_rx, outcome_rx, shutdown_token.clone());

    // Feed
    let (feed_event_tx, feed_event_rx) = mpsc::channel::<FeedEvent>(64);
    let feed_client = Arc::new(FeedClient::new(
        FeedClientConfig::from_stream_config(&config),
        frame_tx,
        feed_event_tx,
        shutdown_token.clone(),
    ));
    let feed_state = feed_client.state();

    // Health
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed_state,
        stats,
        Arc::clone(&events),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tokio::spawn(log_events(events.subscribe()));
    tokio::spawn(handle_feed_events(feed_event_rx));

    let engine_handle = tokio::spawn(engine.run());

    let feed_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = feed_client.run().await {
            tracing::error!(error = %e, "Feed client stopped");
            feed_shutdown.cancel();
        }
    });

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("VWAP signal stream ready");

    await_shutdown(shutdown_token).await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, engine_handle).await {
        Ok(Ok((pipeline, exit))) => {
            let vwap = pipeline.vwap_statistics();
            tracing::info!(
                ?exit,
                vwap = ?vwap.vwap,
                ticks = vwap.tick_count,
                cumulative_volume = vwap.cumulative_volume,
                "Final session state"
            );
        }
        Ok(Err(e)) => tracing::error!(error = %e, "Stream engine task failed"),
        Err(_) => tracing::warn!("Stream engine did not stop in time"),
    }

    tracing::info!("VWAP signal stream stopped");
    Ok(())
}

/// Log feed connection lifecycle events.
async fn handle_feed_events(mut rx: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => tracing::info!("Market feed connected"),
            FeedEvent::Disconnected { reason } => {
                tracing::warn!(%reason, "Market feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Market feed reconnecting");
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        security_id = %config.instrument.security_id,
        exchange_segment = %config.instrument.exchange_segment,
        underlying = %config.signal.underlying,
        session_start = %config.session.session_start(),
        touch_threshold = config.session.touch_threshold,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.websocket.feed_url,
        rest_base_url = %config.signal.rest_base_url,
        "Broker endpoints"
    );
}

/// Load .env from the current directory or the nearest ancestor holding one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGINT, SIGTERM, or an internal shutdown request.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
        () = shutdown_token.cancelled() => tracing::info!("Internal shutdown requested"),
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
