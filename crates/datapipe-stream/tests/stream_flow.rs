//! Message flow from the network loop's hand-off to the sink, without a
//! broker: routed messages go through the bounded channel into the handler
//! task and the buffered writer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use datapipe_stream::consumer::{dispatch, spawn_handler};
use datapipe_stream::{
    BufferedBatchWriter, FieldTestMeasurement, InboundMessage, MemorySink, SensorReading, TopicRouter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn message(topic: &str, payload: &str) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: payload.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn test_selected_sensor_messages_flush_at_capacity() {
    let router = TopicRouter::from_selector("geo/.*").unwrap();
    let sink = Arc::new(MemorySink::<SensorReading>::new());
    let writer = Arc::new(BufferedBatchWriter::<SensorReading>::new(
        sink.clone(),
        3,
        Duration::from_secs(5),
    ));
    let (tx, rx) = mpsc::channel(16);
    let handler = spawn_handler(rx, writer.clone());

    let payload = r#"{"latitude":49.4,"longitude":7.7,"time":1700000000000}"#;
    assert!(dispatch(&router, &tx, message("geo/sensor42", payload)).await);
    assert!(!dispatch(&router, &tx, message("city/sensor42", payload)).await);
    assert!(dispatch(&router, &tx, message("geo/sensor43", payload)).await);
    assert!(dispatch(&router, &tx, message("geo/sensor42", payload)).await);
    drop(tx);
    handler.await.unwrap();

    assert_eq!(sink.writes(), 1);
    assert_eq!(writer.len().await, 0);
    let readings = sink.records();
    assert_eq!(readings.len(), 3);
    assert_eq!(readings[0].topic, "geo/sensor42");
    assert_eq!(readings[0].measured_at.as_deref(), Some("2023-11-14 22:13:20"));
}

#[tokio::test]
async fn test_bad_messages_do_not_stop_the_handler() {
    let router = TopicRouter::from_selector("fieldtester").unwrap();
    let sink = Arc::new(MemorySink::<FieldTestMeasurement>::new());
    let writer = Arc::new(BufferedBatchWriter::<FieldTestMeasurement>::new(
        sink.clone(),
        10,
        Duration::from_secs(5),
    ));
    let (tx, rx) = mpsc::channel(16);
    let handler = spawn_handler(rx, writer.clone());

    let topic = "v3/kl/devices/fieldtester-01/up";
    dispatch(&router, &tx, message(topic, "garbage")).await;
    dispatch(&router, &tx, message(topic, r#"{"latitude":49.4,"longitude":7.7}"#)).await;
    dispatch(&router, &tx, message(topic, r#"{"time":1,"battery":50}"#)).await;
    dispatch(
        &router,
        &tx,
        message(topic, r#"{"time":1700000000000,"latitude":49.4,"longitude":7.7,"rssi":"-101"}"#),
    )
    .await;
    drop(tx);
    handler.await.unwrap();

    assert_eq!(writer.len().await, 1);
    assert_eq!(writer.flush().await.unwrap(), 1);
    assert_eq!(sink.records()[0].rssi, Some(-101));
}

#[tokio::test(start_paused = true)]
async fn test_timer_flush_retries_after_sink_recovers() {
    let sink = Arc::new(MemorySink::<FieldTestMeasurement>::new());
    let writer = Arc::new(BufferedBatchWriter::<FieldTestMeasurement>::new(
        sink.clone(),
        10,
        Duration::from_secs(5),
    ));
    let token = CancellationToken::new();
    let flusher = writer.clone().spawn_periodic_flush(token.clone());

    sink.set_failing(true);
    writer
        .handle_message("fieldtester", br#"{"time":1,"latitude":49.4,"longitude":7.7}"#)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(writer.len().await, 1);
    assert_eq!(sink.writes(), 0);

    sink.set_failing(false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(writer.len().await, 0);
    assert_eq!(sink.records().len(), 1);

    token.cancel();
    flusher.await.unwrap();
}
