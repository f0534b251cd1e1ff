//! Redis-backed cache.
//!
//! Values are plain strings written with `SET key value EX ttl`, so expiry
//! is handled by Redis itself. A [`ConnectionManager`] multiplexes one
//! connection across requests and reconnects after failures.

use super::Cache;
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use std::time::Duration;
use tracing::{debug, info};

/// [`Cache`] implementation over a shared Redis connection.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCache {
    /// Connect to a `redis://` URL or a [`ConnectionInfo`].
    pub async fn connect(target: impl IntoConnectionInfo, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(target)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis cache (ttl {}s)", ttl.as_secs());
        Ok(Self {
            connection,
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    /// Connection settings from `host[:port]`, an optional password and a
    /// database index. The password is passed through untouched, so it may
    /// contain any character.
    pub fn connection_info(
        addr: &str,
        password: Option<&str>,
        db: i64,
    ) -> Result<ConnectionInfo, CacheError> {
        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| CacheError::Backend(format!("invalid Redis port in '{addr}'")))?;
                (host, port)
            }
            None => (addr, 6379),
        };
        if host.is_empty() {
            return Err(CacheError::Backend(format!("missing Redis host in '{addr}'")));
        }

        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                db,
                password: password.filter(|p| !p.is_empty()).map(str::to_string),
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut con = self.connection.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut con = self.connection.clone();
        let _: () = con.set_ex(key, value, self.ttl_secs).await?;
        debug!("Cached {} bytes under {}", value.len(), key);
        Ok(())
    }
}
