//! Datapipe Stream
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Long-running MQTT consumers that persist selected topics:
//!
//! - **Routing**: [`TopicRouter`] selects topics by regular expression
//! - **Buffering**: [`BufferedBatchWriter`] batches parsed records into bulk writes
//! - **Sinks**: [`BatchSink`] implementations for Postgres and memory
//! - **Liveness**: [`HeartbeatPublisher`] and [`HeartbeatMonitor`] share a timestamp file
//!
//! # Example
//!
//! ```no_run
//! use datapipe_stream::{BatchSink, DiscardSink, FieldTestMeasurement, Role, StreamConfig, StreamingConsumer};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = StreamConfig::from_env(Role::Fieldtester)?;
//! let sink: Arc<dyn BatchSink<FieldTestMeasurement>> = Arc::new(DiscardSink);
//! let consumer = StreamingConsumer::new(config, sink)?;
//! consumer.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod heartbeat;
pub mod record;
pub mod router;
pub mod sink;
pub mod writer;

pub use config::{BrokerConfig, Role, StreamConfig};
pub use consumer::{InboundMessage, StreamingConsumer};
pub use error::{ConnectionError, ParseError, Result, StreamError};
pub use heartbeat::{HeartbeatMonitor, HeartbeatPublisher, HeartbeatStatus};
pub use record::{FieldTestMeasurement, SensorReading, StreamRecord};
pub use router::TopicRouter;
pub use sink::{BatchSink, DiscardSink, MemorySink, PgFieldTestSink, PgSensorSink};
pub use writer::BufferedBatchWriter;
