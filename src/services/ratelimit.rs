//! Sliding-window rate gates backed by redis counters.
//!
//! `INCR` the key; the first increment of a window sets the TTL; the call is
//! allowed iff the count stays at or under the limit. Every gate fails open
//! when the counter store is unreachable.

use crate::services::cache::Cache;

/// One gate definition: at most `limit` hits per `window_secs`.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub limit: i64,
    pub window_secs: u64,
}

/// Login attempts per email: 10 per 15 minutes.
pub const LOGIN_GATE: GateConfig = GateConfig {
    limit: 10,
    window_secs: 900,
};

/// Registrations per IP: 5 per hour.
pub const REGISTER_GATE: GateConfig = GateConfig {
    limit: 5,
    window_secs: 3600,
};

/// Geocoding calls per IP: 30 per minute.
pub const GEOCODE_GATE: GateConfig = GateConfig {
    limit: 30,
    window_secs: 60,
};

/// Community report submissions per user: 10 per rolling hour.
pub const REPORTS_GATE: GateConfig = GateConfig {
    limit: 10,
    window_secs: 3600,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Limited {
        /// Seconds until the window resets, when the store reports a TTL.
        retry_after: Option<u64>,
    },
}

pub fn login_key(email: &str) -> String {
    format!("rl:login:{}", email.to_lowercase())
}

pub fn register_key(ip: &str) -> String {
    format!("rl:register:{}", ip)
}

pub fn geocode_key(ip: &str) -> String {
    format!("rl:geocode:{}", ip)
}

pub fn reports_key(user: &str) -> String {
    format!("rate:reports:{}", user)
}

/// Check a gate. Store outage ⇒ `Allowed`.
pub async fn check_gate(cache: &Cache, key: &str, gate: GateConfig) -> GateDecision {
    match cache.incr_window(key, gate.window_secs).await {
        Some(count) if count <= gate.limit => GateDecision::Allowed,
        Some(_) => {
            let retry_after = cache.ttl(key).await.map(|secs| secs as u64);
            GateDecision::Limited { retry_after }
        }
        None => {
            tracing::warn!("Rate gate store unreachable for {}, allowing", key);
            GateDecision::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(login_key("Trucker@Example.com"), "rl:login:trucker@example.com");
        assert_eq!(register_key("203.0.113.7"), "rl:register:203.0.113.7");
        assert_eq!(geocode_key("203.0.113.7"), "rl:geocode:203.0.113.7");
        assert_eq!(reports_key("u-123"), "rate:reports:u-123");
    }

    #[test]
    fn test_gate_windows() {
        assert_eq!(LOGIN_GATE.limit, 10);
        assert_eq!(LOGIN_GATE.window_secs, 900);
        assert_eq!(REGISTER_GATE.limit, 5);
        assert_eq!(REGISTER_GATE.window_secs, 3600);
        assert_eq!(REPORTS_GATE.limit, 10);
        assert_eq!(REPORTS_GATE.window_secs, 3600);
    }

    #[tokio::test]
    async fn test_gate_fails_open_on_store_outage() {
        let cache = Cache::disabled();
        let decision = check_gate(&cache, &reports_key("u-1"), REPORTS_GATE).await;
        assert_eq!(decision, GateDecision::Allowed);
    }
}
