//! Server configuration, read from the environment (and `.env`).

use std::{net::SocketAddr, str::FromStr};

use anyhow::{anyhow, ensure, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Sqlite,
    Memory,
}

impl FromStr for ArchiveKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(ArchiveKind::Sqlite),
            "memory" => Ok(ArchiveKind::Memory),
            other => Err(anyhow!("unknown archive kind {other:?}, expected sqlite or memory")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Largest inbound websocket message accepted.
    pub max_message_bytes: usize,
    /// Events queued per connection before further ones are dropped.
    pub outbox_capacity: usize,
    pub archive: ArchiveKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            database_url: "sqlite://huddle.db?mode=rwc".to_owned(),
            db_max_connections: 16,
            max_message_bytes: 40 * 1024,
            outbox_capacity: 256,
            archive: ArchiveKind::Sqlite,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let config = Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            max_message_bytes: parse_or(&lookup, "MAX_MESSAGE_BYTES", defaults.max_message_bytes)?,
            outbox_capacity: parse_or(&lookup, "OUTBOX_CAPACITY", defaults.outbox_capacity)?,
            archive: parse_or(&lookup, "ARCHIVE", defaults.archive)?,
        };

        ensure!(config.outbox_capacity > 0, "OUTBOX_CAPACITY must be at least 1");
        ensure!(config.db_max_connections > 0, "DB_MAX_CONNECTIONS must be at least 1");
        Ok(config)
    }

    /// Pool size for the archive.
    ///
    /// Every sqlite connection to an in-memory url opens its own private
    /// database, so those are pinned to a single connection.
    pub fn db_pool_size(&self) -> u32 {
        if self.database_url.contains(":memory:") || self.database_url.contains("mode=memory") {
            1
        } else {
            self.db_max_connections
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Into<anyhow::Error>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(Into::<anyhow::Error>::into)
            .with_context(|| format!("invalid {key}={raw:?}")),
        None => Ok(default),
    }
}
