//! Shared helpers: client IP derivation, cache keys, timestamp parsing.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Derive the client IP for rate-limit keys.
///
/// Prefers `X-Real-IP`; falls back to the LAST element of `X-Forwarded-For`
/// (the hop appended by the trusted proxy — earlier elements are
/// client-forgeable); else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    if let Some(fwd) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(last) = fwd.split(',').next_back() {
            let trimmed = last.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    "unknown".to_string()
}

/// Cache key for a route-check result: first 16 hex chars of
/// sha256("oLat:oLng:dLat:dLng:miles").
pub fn route_check_cache_key(
    o_lat: f64,
    o_lng: f64,
    d_lat: f64,
    d_lng: f64,
    corridor_miles: f64,
) -> String {
    let input = format!("{}:{}:{}:{}:{}", o_lat, o_lng, d_lat, d_lng, corridor_miles);
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Tolerant RFC 3339 timestamp parse. Upstream feeds mix `Z` and numeric
/// offsets; anything unparseable becomes `None` rather than an error.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Extract the trailing path segment of a URL (e.g. the zone id from an NWS
/// zone URL like `https://api.weather.gov/zones/forecast/COZ039`).
pub fn url_last_segment(url: &str) -> &str {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers), "10.0.0.1");
    }

    #[test]
    fn test_client_ip_uses_last_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 198.51.100.2, 10.0.0.2"),
        );
        // The last element is the one appended by the trusted proxy.
        assert_eq!(client_ip(&headers), "10.0.0.2");
    }

    #[test]
    fn test_client_ip_single_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_unknown_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
    }

    #[test]
    fn test_route_check_cache_key_is_deterministic() {
        let a = route_check_cache_key(40.0, -74.0, 40.5, -74.0, 10.0);
        let b = route_check_cache_key(40.0, -74.0, 40.5, -74.0, 10.0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_route_check_cache_key_varies_with_input() {
        let a = route_check_cache_key(40.0, -74.0, 40.5, -74.0, 10.0);
        let b = route_check_cache_key(40.0, -74.0, 40.5, -74.0, 11.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_timestamp_z_suffix() {
        let dt = parse_timestamp("2026-01-15T08:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T08:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_numeric_offset() {
        let dt = parse_timestamp("2026-01-15T08:00:00-07:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T15:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        assert!(parse_timestamp("not-a-date").is_none());
    }

    #[test]
    fn test_url_last_segment() {
        assert_eq!(
            url_last_segment("https://api.weather.gov/zones/forecast/COZ039"),
            "COZ039"
        );
        assert_eq!(
            url_last_segment("https://api.weather.gov/zones/forecast/COZ039/"),
            "COZ039"
        );
    }
}
