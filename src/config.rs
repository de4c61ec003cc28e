use anyhow::{bail, Result};
use serde::Deserialize;

use crate::event_sourcing::store::{DeliveryMode, SnapshotConfig};

// ============================================================================
// Demo Configuration
// ============================================================================
//
// Read from the process environment (and a `.env` file, if present):
//
//   DATABASE_URL              PostgreSQL URL; in-memory storage when unset
//   DATABASE_MAX_CONNECTIONS  pool size (default 5)
//   SNAPSHOT_INTERVAL         events between snapshots (default 100)
//   DELIVERY_MODE             after-commit | outbox (default after-commit)
//   REDPANDA_BROKERS          publish to Redpanda instead of in-process
//                             (feature = "redpanda")
//   REDPANDA_TOPIC            topic name (default "domain-events")
//
// The library types never read the environment themselves.
//
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,

    #[serde(default = "default_delivery_mode")]
    pub delivery_mode: String,

    #[serde(default)]
    pub redpanda_brokers: Option<String>,

    #[serde(default = "default_redpanda_topic")]
    pub redpanda_topic: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = ::config::Config::builder()
            .add_source(::config::Environment::default().try_parsing(true))
            .build()?;

        let cfg: AppConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        self.snapshots()?;
        self.delivery()?;
        if self.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        Ok(())
    }

    pub fn snapshots(&self) -> Result<SnapshotConfig> {
        match SnapshotConfig::every(self.snapshot_interval) {
            Some(config) => Ok(config),
            None => bail!("SNAPSHOT_INTERVAL must be at least 1"),
        }
    }

    pub fn delivery(&self) -> Result<DeliveryMode> {
        match self.delivery_mode.to_ascii_lowercase().as_str() {
            "after-commit" | "after_commit" => Ok(DeliveryMode::AfterCommit),
            "outbox" => Ok(DeliveryMode::Outbox),
            other => bail!("Unknown DELIVERY_MODE: {}", other),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: default_max_connections(),
            snapshot_interval: default_snapshot_interval(),
            delivery_mode: default_delivery_mode(),
            redpanda_brokers: None,
            redpanda_topic: default_redpanda_topic(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_snapshot_interval() -> u64 {
    100
}

fn default_delivery_mode() -> String {
    "after-commit".to_string()
}

fn default_redpanda_topic() -> String {
    "domain-events".to_string()
}
