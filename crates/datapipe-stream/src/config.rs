//! Streaming consumer configuration
//!
//! Broker credentials come from the environment first and fall back to the
//! mounted secrets file (`MQTT_SECRETS_FILE`).

use clap::ValueEnum;
use datapipe_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SECRETS_FILE: &str = "/run/secrets/mqtt_secrets";
pub const DEFAULT_HEARTBEAT_FILE: &str = "/logs/heartbeat.log";
pub const DEFAULT_FIELDTEST_TABLE: &str = "lautrer_wissen_klfieldtestmeasurements";
pub const DEFAULT_SENSOR_TABLE: &str = "sensor_latest_values";

/// Which consumer the process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Field tester measurements, bulk inserted
    Fieldtester,
    /// Latest value per sensor topic, upserted
    Sensors,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Fieldtester => "fieldtester",
            Role::Sensors => "sensors",
        }
    }

    /// Topic selector used when `MQTT_TOPIC_SELECTOR` is unset
    pub fn default_selector(&self) -> &'static str {
        match self {
            Role::Fieldtester => "fieldtester",
            Role::Sensors => "^geo/.*sensor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

/// Process settings for one consumer role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub role: Role,
    pub broker: BrokerConfig,
    /// Comma separated regular expressions
    pub topic_selector: String,
    pub heartbeat_file: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub max_buffer_size: usize,
    pub flush_interval_secs: u64,
    /// Capacity of the loop-to-handler channel
    pub channel_capacity: usize,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub fieldtest_table: String,
    pub sensor_table: String,
}

impl StreamConfig {
    /// Defaults for `role` without consulting the environment
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            broker: BrokerConfig {
                host: "localhost".to_string(),
                port: 8883,
                tls: true,
                username: None,
                password: None,
                client_id: format!("datapipe-{role}"),
                keep_alive_secs: 60,
            },
            topic_selector: role.default_selector().to_string(),
            heartbeat_file: PathBuf::from(DEFAULT_HEARTBEAT_FILE),
            heartbeat_interval_secs: 600,
            max_buffer_size: 10,
            flush_interval_secs: 5,
            channel_capacity: 1024,
            database_url: None,
            database_max_connections: 5,
            fieldtest_table: DEFAULT_FIELDTEST_TABLE.to_string(),
            sensor_table: DEFAULT_SENSOR_TABLE.to_string(),
        }
    }

    /// Load settings for `role` from environment variables
    pub fn from_env(role: Role) -> anyhow::Result<Self> {
        let defaults = Self::for_role(role);
        let secrets = env::load_secrets(env::var_or("MQTT_SECRETS_FILE", DEFAULT_SECRETS_FILE))?;

        let config = Self {
            role,
            broker: BrokerConfig {
                host: env::var_or("MQTT_BROKER", &defaults.broker.host),
                port: env::parse_or("MQTT_PORT", defaults.broker.port)?,
                tls: env::flag("MQTT_TLS", defaults.broker.tls)?,
                username: env::var_or_secret("MQTT_USERNAME", &secrets),
                password: env::var_or_secret("MQTT_PASSWORD", &secrets),
                client_id: env::var_or("MQTT_CLIENT_ID", &defaults.broker.client_id),
                keep_alive_secs: env::parse_or("MQTT_KEEP_ALIVE_SECS", defaults.broker.keep_alive_secs)?,
            },
            topic_selector: env::var_or("MQTT_TOPIC_SELECTOR", role.default_selector()),
            heartbeat_file: PathBuf::from(env::var_or("MQTT_HEARTBEAT_FILE_PATH", DEFAULT_HEARTBEAT_FILE)),
            heartbeat_interval_secs: env::parse_or("MQTT_HEARTBEAT_INTERVAL", defaults.heartbeat_interval_secs)?,
            max_buffer_size: env::parse_or("STREAM_MAX_BUFFER_SIZE", defaults.max_buffer_size)?,
            flush_interval_secs: env::parse_or("STREAM_FLUSH_INTERVAL_SECS", defaults.flush_interval_secs)?,
            channel_capacity: env::parse_or("STREAM_CHANNEL_CAPACITY", defaults.channel_capacity)?,
            database_url: env::var_opt("DATABASE_URL"),
            database_max_connections: env::parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            fieldtest_table: env::var_or("STREAM_FIELDTEST_TABLE", DEFAULT_FIELDTEST_TABLE),
            sensor_table: env::var_or("STREAM_SENSOR_TABLE", DEFAULT_SENSOR_TABLE),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.broker.host.trim().is_empty() {
            anyhow::bail!("MQTT_BROKER must not be empty");
        }
        if self.broker.port == 0 {
            anyhow::bail!("MQTT_PORT must be greater than 0");
        }
        if self.broker.username.is_some() != self.broker.password.is_some() {
            anyhow::bail!("MQTT_USERNAME and MQTT_PASSWORD must be set together");
        }
        if self.max_buffer_size == 0 {
            anyhow::bail!("STREAM_MAX_BUFFER_SIZE must be greater than 0");
        }
        if self.flush_interval_secs == 0 {
            anyhow::bail!("STREAM_FLUSH_INTERVAL_SECS must be greater than 0");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("MQTT_HEARTBEAT_INTERVAL must be greater than 0");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("STREAM_CHANNEL_CAPACITY must be greater than 0");
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Table written by this role
    pub fn table(&self) -> &str {
        match self.role {
            Role::Fieldtester => &self.fieldtest_table,
            Role::Sensors => &self.sensor_table,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: &[&str] = &[
        "MQTT_BROKER",
        "MQTT_PORT",
        "MQTT_TLS",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "MQTT_SECRETS_FILE",
        "MQTT_TOPIC_SELECTOR",
        "STREAM_MAX_BUFFER_SIZE",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_per_role() {
        clear();
        std::env::set_var("MQTT_SECRETS_FILE", "/nonexistent/mqtt_secrets");
        let config = StreamConfig::from_env(Role::Sensors).unwrap();
        assert_eq!(config.topic_selector, "^geo/.*sensor");
        assert_eq!(config.table(), DEFAULT_SENSOR_TABLE);
        assert_eq!(config.max_buffer_size, 10);
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(600));
        assert!(config.broker.username.is_none());
        clear();
    }

    #[test]
    #[serial]
    fn test_credentials_fall_back_to_secrets_file() {
        clear();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# broker\nMQTT_USERNAME=reader\nMQTT_PASSWORD=hunter2").unwrap();
        std::env::set_var("MQTT_SECRETS_FILE", file.path());
        std::env::set_var("MQTT_USERNAME", "override");
        std::env::set_var("MQTT_BROKER", "broker.example.org");
        std::env::set_var("MQTT_TLS", "false");

        let config = StreamConfig::from_env(Role::Fieldtester).unwrap();
        assert_eq!(config.broker.username.as_deref(), Some("override"));
        assert_eq!(config.broker.password.as_deref(), Some("hunter2"));
        assert_eq!(config.broker.host, "broker.example.org");
        assert!(!config.broker.tls);
        assert_eq!(config.table(), DEFAULT_FIELDTEST_TABLE);
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_buffer_size_is_rejected() {
        clear();
        std::env::set_var("MQTT_SECRETS_FILE", "/nonexistent/mqtt_secrets");
        std::env::set_var("STREAM_MAX_BUFFER_SIZE", "0");
        assert!(StreamConfig::from_env(Role::Fieldtester).is_err());
        std::env::set_var("STREAM_MAX_BUFFER_SIZE", "ten");
        assert!(StreamConfig::from_env(Role::Fieldtester).is_err());
        clear();
    }
}
