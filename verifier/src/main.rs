mod config;
mod display;
mod errors;
mod server;

use clap::Parser;
use config::Config;
use display::{DisplayMachine, LogDisplay};
use telemetry_protocol::{Backoff, FixedBackoff, Verifier};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting trust verifier");
    info!(
        "Listening on {}, expected VIN: {}, dwell: {:?}",
        config.listen_addr,
        config.expected_vin,
        config.dwell()
    );

    tokio::select! {
        _ = run(&config) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn run(config: &Config) {
    let verifier = Verifier::new(config.expected_vin.clone(), config.secret());
    let mut machine = DisplayMachine::new(LogDisplay);
    let mut backoff = FixedBackoff::new(config.retry_interval());

    let listener = loop {
        match TcpListener::bind(&config.listen_addr).await {
            Ok(listener) => break listener,
            Err(e) => {
                let delay = backoff.next_delay();
                error!("Failed to bind {}: {}. Retrying in {:?}", config.listen_addr, e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    };

    // One link at a time; further connections wait in the accept backlog.
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("Relay connected from {}", peer);
                match server::serve(stream, &verifier, &mut machine, config.dwell()).await {
                    Ok(served) => info!("Relay {} disconnected after {} requests", peer, served),
                    Err(e) => warn!("Link to {} failed: {}", peer, e),
                }
                machine.reset();
            }
            Err(e) => {
                let delay = backoff.next_delay();
                error!("Accept failed: {}. Retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
