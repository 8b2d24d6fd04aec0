//! Consumer start and shutdown against a local TCP endpoint: heartbeat
//! freshness while running, final flush of buffered records on exit, and
//! fatal errors when no broker answers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use datapipe_stream::{
    HeartbeatMonitor, MemorySink, Role, SensorReading, StreamConfig, StreamError, StreamingConsumer,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const PAYLOAD: &str = r#"{"latitude":49.4,"longitude":7.7,"time":1700000000000}"#;

fn sensor_config(port: u16, heartbeat_file: &Path) -> StreamConfig {
    let mut config = StreamConfig::for_role(Role::Sensors);
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = port;
    config.broker.tls = false;
    config.heartbeat_file = heartbeat_file.to_path_buf();
    config.heartbeat_interval_secs = 2;
    config
}

/// A port nothing listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn reading(topic: &str) -> SensorReading {
    SensorReading {
        topic: topic.to_string(),
        received_at: chrono::Utc::now(),
        measured_at: None,
        payload: json!({ "value": 1 }),
    }
}

/// MQTT 3.1.1 PUBLISH at QoS 0
fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);
    let mut packet = vec![0x30, remaining as u8, 0, topic.len() as u8];
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload.as_bytes());
    packet
}

/// Accept one client, acknowledge its connect and subscribe, send `publish`,
/// then hold the connection open until the client goes away.
async fn serve_one_client(listener: TcpListener, publish: Vec<u8>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 1024];

    socket.read(&mut buf).await.unwrap();
    socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

    socket.read(&mut buf).await.unwrap();
    socket.write_all(&[0x90, 0x03, buf[2], buf[3], 0x00]).await.unwrap();
    socket.write_all(&publish).await.unwrap();

    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
}

#[tokio::test]
async fn test_routed_publish_is_flushed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat_file = dir.path().join("heartbeat.log");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = sensor_config(listener.local_addr().unwrap().port(), &heartbeat_file);
    let broker = tokio::spawn(serve_one_client(listener, publish_packet("geo/kl/sensor1", PAYLOAD)));

    let sink = Arc::new(MemorySink::<SensorReading>::new());
    let consumer = StreamingConsumer::<SensorReading>::new(config, sink.clone()).unwrap();
    let writer = consumer.writer();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(consumer.run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while writer.is_empty().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // Twice the interval, checked before and after the first periodic beat
    let monitor = HeartbeatMonitor::new(&heartbeat_file, HeartbeatMonitor::default_max_age(2));
    assert!(monitor.check().await.unwrap().is_alive());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(monitor.check().await.unwrap().is_alive());
    assert_eq!(sink.writes(), 0);

    shutdown.cancel();
    running.await.unwrap().unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].topic, "geo/kl/sensor1");
    assert_eq!(records[0].measured_at.as_deref(), Some("2023-11-14 22:13:20"));
    assert!(writer.is_empty().await);

    tokio::time::timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancelled_consumer_flushes_buffer_and_beats() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat_file = dir.path().join("logs/heartbeat.log");
    let config = sensor_config(closed_port().await, &heartbeat_file);

    let sink = Arc::new(MemorySink::<SensorReading>::new());
    let consumer = StreamingConsumer::<SensorReading>::new(config, sink.clone()).unwrap();
    let writer = consumer.writer();
    for topic in ["geo/a/sensor", "geo/b/sensor", "geo/c/sensor"] {
        assert!(!writer.append(reading(topic)).await.unwrap());
    }

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), consumer.run(shutdown))
        .await
        .unwrap();

    // The shutdown and the refused connect race; both end in the same cleanup
    assert!(matches!(result, Ok(()) | Err(StreamError::Connection(_))));
    assert_eq!(sink.records().len(), 3);
    assert_eq!(sink.writes(), 1);
    assert!(heartbeat_file.exists());
}

#[tokio::test]
async fn test_unreachable_broker_is_fatal_after_final_flush() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat_file = dir.path().join("heartbeat.log");
    let config = sensor_config(closed_port().await, &heartbeat_file);

    let sink = Arc::new(MemorySink::<SensorReading>::new());
    let consumer = StreamingConsumer::<SensorReading>::new(config, sink.clone()).unwrap();
    consumer.writer().append(reading("geo/a/sensor")).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), consumer.run(CancellationToken::new()))
        .await
        .unwrap();

    assert!(matches!(result, Err(StreamError::Connection(_))));
    assert_eq!(sink.records().len(), 1);
    assert!(heartbeat_file.exists());
}
