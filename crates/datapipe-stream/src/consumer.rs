//! Broker consumer
//!
//! The network loop polls the MQTT event loop, subscribes to every topic on
//! each successful connect, and forwards publishes accepted by the
//! [`TopicRouter`] over a bounded channel. A separate handler task parses and
//! buffers them, so the loop never waits on the buffer lock. Heartbeat and
//! periodic flush run as their own tasks from the start.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BrokerConfig, StreamConfig};
use crate::error::{ConnectionError, Result};
use crate::heartbeat::HeartbeatPublisher;
use crate::record::StreamRecord;
use crate::router::TopicRouter;
use crate::sink::BatchSink;
use crate::writer::BufferedBatchWriter;

/// Subscription covering the whole topic namespace
pub const SUBSCRIBE_ALL: &str = "#";

/// Pause before polling again after a dropped connection
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the client request queue
const REQUEST_CAPACITY: usize = 32;

/// A routed message on its way to the handler task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl From<Publish> for InboundMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }
    }
}

pub fn mqtt_options(broker: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(broker.client_id.clone(), broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
    if let (Some(username), Some(password)) = (&broker.username, &broker.password) {
        options.set_credentials(username.clone(), password.clone());
    }
    if broker.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

/// Parse and buffer messages until every sender is dropped
pub fn spawn_handler<R: StreamRecord>(
    mut rx: mpsc::Receiver<InboundMessage>,
    writer: Arc<BufferedBatchWriter<R>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            // Flush failures keep the buffer and are retried by the next flush
            let _ = writer.handle_message(&message.topic, &message.payload).await;
        }
        tracing::debug!("Message handler drained");
    })
}

/// Forward `message` when the router accepts its topic. Returns whether it
/// was forwarded.
///
/// A full channel makes this wait for the handler, which pauses the network
/// loop until the buffer drains. Messages are held back rather than dropped.
pub async fn dispatch(router: &TopicRouter, tx: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> bool {
    if !router.matches(&message.topic) {
        tracing::trace!(topic = %message.topic, "Topic not selected");
        return false;
    }
    tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "Routing message");
    if tx.send(message).await.is_err() {
        tracing::warn!("Message handler is gone, dropping message");
        return false;
    }
    true
}

pub struct StreamingConsumer<R> {
    config: StreamConfig,
    router: TopicRouter,
    writer: Arc<BufferedBatchWriter<R>>,
    heartbeat: HeartbeatPublisher,
}

impl<R: StreamRecord> StreamingConsumer<R> {
    pub fn new(config: StreamConfig, sink: Arc<dyn BatchSink<R>>) -> Result<Self> {
        let router = TopicRouter::from_selector(&config.topic_selector)?;
        if router.is_empty() {
            tracing::warn!(role = %config.role, "Empty topic selector, every message will be ignored");
        }
        let writer = Arc::new(BufferedBatchWriter::new(
            sink,
            config.max_buffer_size,
            config.flush_interval(),
        ));
        let heartbeat = HeartbeatPublisher::new(&config.heartbeat_file, config.heartbeat_interval());

        Ok(Self {
            config,
            router,
            writer,
            heartbeat,
        })
    }

    pub fn writer(&self) -> Arc<BufferedBatchWriter<R>> {
        self.writer.clone()
    }

    /// Consume until `shutdown` is cancelled or the broker cannot be reached.
    ///
    /// On the way out the client disconnects, the handler channel is drained
    /// and the buffer gets a final flush, whatever the loop returned.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        if let Err(e) = self.heartbeat.beat().await {
            tracing::warn!(path = %self.heartbeat.path().display(), error = %e, "Failed to write heartbeat");
        }
        let tasks = CancellationToken::new();
        let heartbeat = self.heartbeat.clone().spawn(tasks.clone());
        let flusher = self.writer.clone().spawn_periodic_flush(tasks.clone());

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let handler = spawn_handler(rx, self.writer.clone());

        let (client, mut event_loop) = AsyncClient::new(mqtt_options(&self.config.broker), REQUEST_CAPACITY);
        tracing::info!(
            role = %self.config.role,
            broker = %self.config.broker.host,
            port = self.config.broker.port,
            tls = self.config.broker.tls,
            "Connecting to broker"
        );
        let result = self.poll(&client, &mut event_loop, &tx, &shutdown).await;

        if let Err(e) = client.try_disconnect() {
            tracing::debug!(error = %e, "Disconnect request not queued");
        }
        drop(tx);
        if let Err(e) = handler.await {
            tracing::error!(error = %e, "Message handler panicked");
        }
        match self.writer.flush().await {
            Ok(records) => tracing::info!(records, "Final flush complete"),
            Err(e) => {
                let records = self.writer.len().await;
                tracing::error!(records, error = %e, "Final flush failed")
            }
        }

        tasks.cancel();
        let _ = tokio::join!(heartbeat, flusher);
        tracing::info!(role = %self.config.role, "Consumer stopped");
        result
    }

    async fn poll(
        &self,
        client: &AsyncClient,
        event_loop: &mut EventLoop,
        tx: &mpsc::Sender<InboundMessage>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let mut connected = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                }
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected = true;
                        tracing::info!(broker = %self.config.broker.host, "Connected to broker");
                        client
                            .subscribe(SUBSCRIBE_ALL, QoS::AtMostOnce)
                            .await
                            .map_err(ConnectionError::from)?;
                    },
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch(&self.router, tx, publish.into()).await;
                    },
                    Ok(_) => {},
                    Err(rumqttc::ConnectionError::RequestsDone) => return Ok(()),
                    Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                        return Err(ConnectionError::Refused(format!("{code:?}")).into());
                    },
                    Err(e) if !connected => return Err(ConnectionError::from(e).into()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Broker connection lost, reconnecting");
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {},
                        }
                    },
                },
            }
        }
    }
}
