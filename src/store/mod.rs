//! Persistent KV adapter (Redis).
//!
//! The cache survives restarts through a single JSON blob. Every failure
//! here is non-fatal: a missing or broken Redis leaves the store disabled
//! and the evaluator pipeline untouched.

use redis::aio::ConnectionManager;
use tracing::{info, warn};

use crate::config::Settings;
use crate::server::ServerDescriptor;

/// Key under which the enriched working set is persisted.
pub const WORKING_SERVERS_KEY: &str = "working_servers";

pub struct KvStore {
    conn: Option<ConnectionManager>,
}

impl KvStore {
    pub async fn connect(settings: &Settings) -> Self {
        let redis = &settings.redis;
        let auth = if redis.password.is_empty() {
            String::new()
        } else {
            format!(":{}@", redis.password)
        };
        let url = format!("redis://{}{}:{}/{}", auth, redis.host, redis.port, redis.db);

        let conn = match Self::open(&url).await {
            Ok(conn) => {
                info!(host = redis.host, port = redis.port, "connected to Redis");
                Some(conn)
            }
            Err(e) => {
                warn!(host = redis.host, port = redis.port, error = %e, "Redis unavailable, persistence disabled");
                None
            }
        };
        Self { conn }
    }

    async fn open(url: &str) -> redis::RedisResult<ConnectionManager> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(conn)
    }

    /// Store without any Redis backing (tests, explicit opt-out).
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn save_servers(&self, key: &str, servers: &[ServerDescriptor], ttl_secs: Option<u64>) {
        let Some(conn) = &self.conn else { return };
        let mut conn = conn.clone();

        let payload = match serde_json::to_string(servers) {
            Ok(p) => p,
            Err(e) => {
                warn!(key, error = %e, "failed to encode servers for persistence");
                return;
            }
        };

        let result: redis::RedisResult<()> = match ttl_secs {
            Some(ttl) => {
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(key, error = %e, "failed to persist servers");
        }
    }

    pub async fn load_servers(&self, key: &str) -> Option<Vec<ServerDescriptor>> {
        let conn = self.conn.as_ref()?;
        let mut conn = conn.clone();

        let data: Option<String> = match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "failed to load persisted servers");
                return None;
            }
        };

        match data {
            Some(json) => match serde_json::from_str(&json) {
                Ok(servers) => Some(servers),
                Err(e) => {
                    warn!(key, error = %e, "persisted servers are not decodable, ignoring");
                    None
                }
            },
            None => None,
        }
    }
}
