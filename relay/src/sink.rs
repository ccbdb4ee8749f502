use crate::errors::Result;
use crate::metrics::{SINK_FAILURES_TOTAL, SINK_STORED_TOTAL};
use crate::model::ForwardedPacket;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use telemetry_protocol::SignedPacket;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Durable destination for verified packets.
#[derive(Debug, Clone)]
pub enum Sink {
    Postgres(PgPool),
    /// Used when no database is configured.
    Log,
}

pub async fn make_sink(database_url: Option<&str>) -> Result<Sink> {
    let Some(database_url) = database_url else {
        info!("No DATABASE_URL set, verified packets will only be logged");
        return Ok(Sink::Log);
    };

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(Sink::Postgres(pool))
}

impl Sink {
    pub async fn store(&self, packet: &ForwardedPacket) -> Result<()> {
        match self {
            Sink::Postgres(pool) => insert(pool, packet).await,
            Sink::Log => {
                info!("Verified packet received at {}: {}", packet.received_at, packet.raw);
                Ok(())
            }
        }
    }
}

/// Stores verified packets as they arrive. A failed store is logged and the
/// packet dropped; there is no retry.
pub async fn run_sink(mut rx: mpsc::Receiver<ForwardedPacket>, sink: Sink) {
    info!("Starting sink");

    while let Some(packet) = rx.recv().await {
        match sink.store(&packet).await {
            Ok(()) => SINK_STORED_TOTAL.inc(),
            Err(e) => {
                SINK_FAILURES_TOTAL.inc();
                error!("Failed to store verified packet, dropping it: {}", e);
            }
        }
    }

    info!("Sink stopped");
}

async fn insert(pool: &PgPool, packet: &ForwardedPacket) -> Result<()> {
    // The verifier only checks identity and tag, so the fields may still fail
    // to parse; the raw text is always kept.
    let parsed = SignedPacket::parse(&packet.raw).ok();
    let fields = parsed.as_ref().map(|s| &s.packet);

    let query = r#"
        INSERT INTO verified_telemetry
            (vin, temperature, mileage, state, dtc, device_ts, signature, raw, received_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#;

    sqlx::query(query)
        .bind(fields.map(|p| p.vin.as_str()))
        .bind(fields.map(|p| p.temperature))
        .bind(fields.and_then(|p| i64::try_from(p.mileage).ok()))
        .bind(fields.map(|p| p.state.as_str()))
        .bind(fields.and_then(|p| p.dtc.as_deref()))
        .bind(fields.and_then(|p| i64::try_from(p.timestamp).ok()))
        .bind(parsed.as_ref().map(|s| s.tag.as_str()))
        .bind(packet.raw.as_str())
        .bind(packet.received_at)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_log_sink_without_database_url() {
        tokio_test::block_on(async {
            let sink = make_sink(None).await.unwrap();
            assert!(matches!(sink, Sink::Log));

            let packet = ForwardedPacket {
                raw: "VIN:A|SIG:00".to_string(),
                received_at: Utc::now(),
            };
            assert!(sink.store(&packet).await.is_ok());
        });
    }

    #[test]
    fn test_run_sink_drains_until_closed() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(4);
            for i in 0..3 {
                tx.send(ForwardedPacket {
                    raw: format!("packet-{}", i),
                    received_at: Utc::now(),
                })
                .await
                .unwrap();
            }
            drop(tx);

            let before = SINK_STORED_TOTAL.get();
            run_sink(rx, Sink::Log).await;
            assert!(SINK_STORED_TOTAL.get() >= before + 3.0);
        });
    }
}
