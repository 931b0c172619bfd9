//! Redis-backed key/value cache with TTLs.
//!
//! Holds raw feed payloads, NWS zone geometries, route-check results, and
//! rate-limit counters. Every operation fails open: a missing or broken
//! redis connection degrades to cache misses and is never fatal for the
//! caller. `ConnectionManager` reconnects on its own after outages.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[derive(Clone)]
pub struct Cache {
    conn: Option<ConnectionManager>,
}

impl Cache {
    /// Connect to redis. On failure the cache is constructed disabled and
    /// every read is a miss.
    pub async fn connect(url: &str) -> Self {
        let client = match redis::Client::open(url) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Invalid redis URL, cache disabled: {}", e);
                return Self { conn: None };
            }
        };
        match client.get_connection_manager().await {
            Ok(conn) => {
                tracing::info!("Connected to redis");
                Self { conn: Some(conn) }
            }
            Err(e) => {
                tracing::warn!("Failed to connect to redis, cache disabled: {}", e);
                Self { conn: None }
            }
        }
    }

    /// A cache that never hits. Used in tests.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Write a value with no expiry (durable scheduler state). Failures are
    /// logged and swallowed.
    pub async fn set(&self, key: &str, value: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(e) = conn.set::<_, _, ()>(key, value).await {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// Write a value with a TTL. Failures are logged and swallowed.
    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// INCR the key; on the first increment of a window, set the TTL.
    /// Returns the post-increment count, or None when the store is
    /// unreachable (callers treat that as "allow").
    pub async fn incr_window(&self, key: &str, window_secs: u64) -> Option<i64> {
        let mut conn = self.conn.clone()?;
        let count: i64 = match conn.incr(key, 1i64).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Cache INCR failed for {}: {}", key, e);
                return None;
            }
        };
        if count == 1 {
            if let Err(e) = conn.expire::<_, ()>(key, window_secs as i64).await {
                tracing::warn!("Cache EXPIRE failed for {}: {}", key, e);
            }
        }
        Some(count)
    }

    /// Remaining TTL in seconds, when the key exists and has one.
    pub async fn ttl(&self, key: &str) -> Option<i64> {
        let mut conn = self.conn.clone()?;
        match conn.ttl::<_, i64>(key).await {
            Ok(secs) if secs > 0 => Some(secs),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Cache TTL read failed for {}: {}", key, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let cache = Cache::disabled();
        assert_eq!(cache.get("feed:test:raw").await, None);
        // Writes are no-ops, not panics.
        cache.set_ex("feed:test:raw", "{}", 60).await;
        assert_eq!(cache.get("feed:test:raw").await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_incr_fails_open() {
        let cache = Cache::disabled();
        assert_eq!(cache.incr_window("rl:login:x", 900).await, None);
        assert_eq!(cache.ttl("rl:login:x").await, None);
    }
}
