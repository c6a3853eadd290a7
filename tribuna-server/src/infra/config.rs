//! Server configuration from CLI flags and environment, with defaults that
//! match a single-instance local deployment.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the Tribuna realtime server.
#[derive(Parser, Debug)]
#[command(name = "tribuna-server")]
#[command(about = "Realtime live-event server with chat, Q&A, polls, and audience analytics")]
pub struct Args {
    /// Server host
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8888)]
    pub port: u16,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Redis base URL; logical databases are derived from it
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub hot_store: HotStoreConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Logical database layout of the hot store: sessions in 0, presence in 2,
/// caches (live polls, rings, snapshots, validator counters, pub/sub) in 3.
#[derive(Debug, Clone)]
pub struct HotStoreConfig {
    pub url: String,
    pub sessions_db: u8,
    pub presence_db: u8,
    pub cache_db: u8,
}

impl HotStoreConfig {
    pub fn url_for(&self, db: u8) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), db)
    }

    pub fn sessions_url(&self) -> String {
        self.url_for(self.sessions_db)
    }

    pub fn presence_url(&self) -> String {
        self.url_for(self.presence_db)
    }

    pub fn cache_url(&self) -> String {
        self.url_for(self.cache_db)
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub presence_window_secs: i64,
    pub ping_writeback_secs: i64,
    pub chat_ring_max: usize,
    pub watch_cache_ttl_secs: u64,
    pub reports_cache_ttl_secs: u64,
    pub snapshot_interval_secs: u64,
    /// Cross-instance broadcast over per-event pub/sub channels.
    pub broadcast_pubsub: bool,
    /// Bound of the relay's re-entry buffer; overflow drops oldest.
    pub relay_buffer: usize,
}

impl Config {
    pub fn from_args(args: &Args) -> Self {
        Self {
            server: ServerConfig {
                host: args.host.clone(),
                port: args.port,
            },
            database: DatabaseConfig {
                url: args.database_url.clone(),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 16),
            },
            hot_store: HotStoreConfig {
                url: args.redis_url.clone(),
                sessions_db: 0,
                presence_db: 2,
                cache_db: 3,
            },
            realtime: RealtimeConfig {
                presence_window_secs: env_or("PRESENCE_WINDOW_SECONDS", 600),
                ping_writeback_secs: env_or("PING_WRITEBACK_SECONDS", 60),
                chat_ring_max: env_or("CHAT_RING_MAX_MESSAGES", 100),
                watch_cache_ttl_secs: env_or("WATCH_CACHE_TTL_SECONDS", 5),
                reports_cache_ttl_secs: env_or("REPORTS_CACHE_TTL_SECONDS", 5),
                snapshot_interval_secs: env_or("SNAPSHOT_INTERVAL_SECONDS", 5),
                broadcast_pubsub: env_or("BROADCAST_PUBSUB", 1u8) == 1,
                relay_buffer: env_or("RELAY_BUFFER", 1024),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_databases_map_onto_the_base_url() {
        let hot = HotStoreConfig {
            url: "redis://cache.internal:6379".to_string(),
            sessions_db: 0,
            presence_db: 2,
            cache_db: 3,
        };
        assert_eq!(hot.sessions_url(), "redis://cache.internal:6379/0");
        assert_eq!(hot.presence_url(), "redis://cache.internal:6379/2");
        assert_eq!(hot.cache_url(), "redis://cache.internal:6379/3");
    }
}
