mod config;
mod errors;
mod history;
mod link;
mod metrics;
mod model;
mod mqtt;
mod orchestrator;
mod rest;
mod sink;
mod state;

use axum::{routing::get, Router};
use clap::Parser;
use config::Config;
use orchestrator::Outputs;
use state::RelayState;
use telemetry_protocol::FixedBackoff;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let thresholds = match config.thresholds() {
        Ok(thresholds) => thresholds,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting telemetry relay");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("Verifier: {}", config.verifier_addr);
    info!("HTTP server: {}", config.http_addr);
    info!(
        "History capacity: {}, thresholds: {}/{}",
        config.history_capacity,
        thresholds.warning(),
        thresholds.critical()
    );

    // Initialize metrics
    metrics::init_metrics();

    let sink = match sink::make_sink(config.database_url.as_deref()).await {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to set up sink: {}", e);
            std::process::exit(1);
        }
    };

    let (relay, commands) = orchestrator::channel(config.channel_capacity.get());
    let (verifier_tx, verifier_rx) = mpsc::channel(4);
    let (mode_tx, mode_rx) = mpsc::channel(16);
    let (sink_tx, sink_rx) = mpsc::channel(config.channel_capacity.get());

    let state = RelayState::new(config.history_capacity, thresholds, config.pending_capacity);
    let orchestrator_handle = tokio::spawn(orchestrator::run_orchestrator(
        commands,
        state,
        Outputs {
            verifier: verifier_tx,
            modes: mode_tx,
            sink: sink_tx,
        },
    ));

    let sink_handle = tokio::spawn(sink::run_sink(sink_rx, sink));

    let link_handle = tokio::spawn(link::run_link(
        config.verifier_addr.clone(),
        relay.clone(),
        verifier_rx,
        FixedBackoff::new(config.reconnect_interval()),
    ));

    let settings = mqtt::MqttSettings {
        broker: config.mqtt_broker.clone(),
        port: config.mqtt_port,
        client_id: format!("relay-{}", uuid::Uuid::new_v4()),
        telemetry_topic: config.telemetry_topic.clone(),
        mode_topic: config.mode_topic.clone(),
    };
    let mqtt_relay = relay.clone();
    let backoff = FixedBackoff::new(config.reconnect_interval());
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(settings, mqtt_relay, mode_rx, backoff).await {
            error!("MQTT task failed: {}", e);
        }
    });

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(relay));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = orchestrator_handle => {
            error!("Orchestrator terminated");
        }
        _ = sink_handle => {
            error!("Sink task terminated");
        }
        _ = link_handle => {
            error!("Verifier link task terminated");
        }
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
