use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Script,
};
use tracing::info;

use super::CacheStore;
use crate::config::ValkeyConfig;

/// GET and DEL in one server-side step, so a lock is never deleted after
/// it has passed to another owner.
const DELETE_IF_EQ: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// [`CacheStore`] backed by Valkey (or any Redis-compatible server).
///
/// `ConnectionManager` reconnects on its own and is cheap to clone, so every
/// call works on its own handle.
#[derive(Clone)]
pub struct ValkeyStore {
    conn: ConnectionManager,
}

impl ValkeyStore {
    pub async fn connect(config: &ValkeyConfig) -> Result<Self> {
        let client =
            redis::Client::open(config.url()).context("Invalid Valkey connection settings")?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.timeout)
            .set_response_timeout(config.timeout)
            .set_number_of_retries(1);

        let conn = client
            .get_connection_manager_with_config(manager_config)
            .await
            .with_context(|| format!("Failed to connect to Valkey at {}:{}", config.host, config.port))?;

        info!(host = %config.host, port = config.port, db = config.db, "Valkey connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for ValkeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.context("Valkey GET failed")?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .context("Valkey SET EX failed")?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        // -2: no such key, -1: key without expiry.
        let ttl: i64 = conn.ttl(key).await.context("Valkey TTL failed")?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .context("Valkey SET NX failed")?;
        Ok(reply.is_some())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(DELETE_IF_EQ)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .context("Valkey compare-and-delete failed")?;
        Ok(deleted == 1)
    }
}
