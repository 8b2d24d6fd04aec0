//! Datapipe Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the datapipe workspace members:
//!
//! - **Error Handling**: [`DatapipeError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Environment**: typed environment lookups and `KEY=VALUE` secret files
//!
//! # Example
//!
//! ```no_run
//! use datapipe_common::env;
//! use datapipe_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let interval: u64 = env::parse_or("MQTT_HEARTBEAT_INTERVAL", 600)?;
//!     tracing::info!(interval, "Configured heartbeat");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{DatapipeError, Result};
