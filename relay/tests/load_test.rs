//! Live tests against a local broker and a running relay. Run with
//! `cargo test -p relay -- --ignored`.

use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use telemetry_protocol::{
    OperatingMode, SignedPacket, TelemetryPacket, Thresholds, DEFAULT_MODE_TOPIC,
    DEFAULT_TELEMETRY_TOPIC, DEFAULT_VIN,
};
use tokio::time::{sleep, timeout};

fn signed_packet(temperature: f64, mileage: u64, timestamp: u64) -> String {
    SignedPacket::sign(
        TelemetryPacket {
            vin: DEFAULT_VIN.to_string(),
            temperature,
            mileage,
            state: Thresholds::default().classify(temperature),
            dtc: None,
            timestamp,
        },
        DEFAULT_VIN,
    )
    .encode()
}

#[tokio::test]
#[ignore]
async fn test_100_packets_per_second() {
    let test_duration_secs = 10;
    let target_rate = 100;
    let total_messages = test_duration_secs * target_rate;

    let mut mqtt_options = MqttOptions::new("relay-load-test", "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 2000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    sleep(Duration::from_millis(500)).await;

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;
    let mut rng = rand::thread_rng();
    let delay = Duration::from_micros(1_000_000 / target_rate as u64);

    for i in 0..total_messages {
        let payload = signed_packet(rng.gen_range(15.0..45.0), i as u64, i as u64 * 10);
        match client
            .publish(DEFAULT_TELEMETRY_TOPIC, QoS::AtMostOnce, false, payload)
            .await
        {
            Ok(_) => sent_count += 1,
            Err(e) => {
                error_count += 1;
                if error_count < 10 {
                    eprintln!("Send error: {}", e);
                }
            }
        }
        sleep(delay).await;
    }

    let duration = start.elapsed();
    let actual_rate = sent_count as f64 / duration.as_secs_f64();
    println!("Sent {} packets in {:.2}s ({:.1} msg/s)", sent_count, duration.as_secs_f64(), actual_rate);

    assert_eq!(error_count, 0, "publish errors: {}", error_count);
    assert!(actual_rate >= 80.0, "Throughput too low: {:.2} msg/s", actual_rate);
}

#[tokio::test]
#[ignore]
async fn test_relay_publishes_critical_mode() {
    let mut mqtt_options = MqttOptions::new("relay-mode-test", "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
    client
        .subscribe(DEFAULT_MODE_TOPIC, QoS::AtMostOnce)
        .await
        .unwrap();

    let watcher = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if p.payload.as_ref() == OperatingMode::Critical.as_str().as_bytes() {
                        return true;
                    }
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    });

    sleep(Duration::from_millis(500)).await;

    // Normal first, so the critical packet is a transition whatever the
    // relay saw before.
    for (i, temp) in [20.0, 45.0].into_iter().enumerate() {
        client
            .publish(
                DEFAULT_TELEMETRY_TOPIC,
                QoS::AtMostOnce,
                false,
                signed_packet(temp, i as u64, i as u64),
            )
            .await
            .unwrap();
        sleep(Duration::from_millis(200)).await;
    }

    let seen = timeout(Duration::from_secs(5), watcher).await;
    assert!(matches!(seen, Ok(Ok(true))), "relay did not publish CRITICAL");
}
