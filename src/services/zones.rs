//! NWS zone geometry resolver.
//!
//! Alerts frequently arrive without geometry, carrying `affectedZones` URL
//! lists instead. This resolver fetches each zone's polygon, caches it for
//! 24 h under `nws:zone:{zone_id}`, and bounds the fan-out with a semaphore.
//! Individual zone 404s are tolerated by omitting the zone from the result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::helpers::url_last_segment;
use crate::services::cache::Cache;

/// Concurrent zone fetches per resolve call.
const ZONE_FETCH_CONCURRENCY: usize = 8;

/// Per-zone request timeout.
const ZONE_HTTP_TIMEOUT_SECS: u64 = 15;

/// Zone geometries change rarely; cache for a day.
const ZONE_CACHE_TTL_SECS: u64 = 86_400;

fn zone_cache_key(zone_url: &str) -> String {
    format!("nws:zone:{}", url_last_segment(zone_url))
}

/// Resolve a set of zone URLs to their geometries. Unresolvable zones
/// (404s, timeouts, cache-and-fetch both missing) are simply absent from
/// the returned map.
pub async fn resolve_zones(
    http: &reqwest::Client,
    cache: &Cache,
    zone_urls: &[String],
) -> HashMap<String, Value> {
    let unique: Vec<String> = {
        let mut seen = HashSet::new();
        zone_urls
            .iter()
            .filter(|url| seen.insert(url.as_str()))
            .cloned()
            .collect()
    };

    let semaphore = Arc::new(Semaphore::new(ZONE_FETCH_CONCURRENCY));
    let lookups = unique.into_iter().map(|url| {
        let semaphore = semaphore.clone();
        let http = http.clone();
        let cache = cache.clone();
        async move {
            let geometry = resolve_single_zone(&http, &cache, &semaphore, &url).await;
            (url, geometry)
        }
    });

    futures::future::join_all(lookups)
        .await
        .into_iter()
        .filter_map(|(url, geometry)| geometry.map(|g| (url, g)))
        .collect()
}

async fn resolve_single_zone(
    http: &reqwest::Client,
    cache: &Cache,
    semaphore: &Semaphore,
    zone_url: &str,
) -> Option<Value> {
    let key = zone_cache_key(zone_url);
    if let Some(cached) = cache.get(&key).await {
        if let Ok(geometry) = serde_json::from_str::<Value>(&cached) {
            return Some(geometry);
        }
    }

    // Holding a permit across the whole request bounds in-flight fetches.
    let _permit = semaphore.acquire().await.ok()?;

    let response = match http
        .get(zone_url)
        .header("Accept", "application/geo+json")
        .timeout(std::time::Duration::from_secs(ZONE_HTTP_TIMEOUT_SECS))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Zone fetch failed for {}: {}", zone_url, e);
            return None;
        }
    };

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        tracing::debug!("Zone {} not found, skipping", zone_url);
        return None;
    }
    if !response.status().is_success() {
        tracing::warn!(
            "Zone fetch for {} returned HTTP {}",
            zone_url,
            response.status()
        );
        return None;
    }

    let body: Value = match response.json().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Zone response for {} is not JSON: {}", zone_url, e);
            return None;
        }
    };

    let geometry = body.get("geometry").filter(|g| !g.is_null()).cloned()?;
    cache
        .set_ex(&key, &geometry.to_string(), ZONE_CACHE_TTL_SECS)
        .await;
    Some(geometry)
}

/// Flatten polygonal geometries into one MultiPolygon, deduplicating
/// identical polygon rings. Returns `None` when no polygonal input survives.
pub fn merge_to_multipolygon(geometries: &[&Value]) -> Option<Value> {
    let mut seen = HashSet::new();
    let mut polygons: Vec<Value> = Vec::new();

    for geometry in geometries {
        let geometry_type = geometry.get("type").and_then(|t| t.as_str());
        match geometry_type {
            Some("Polygon") => {
                if let Some(coords) = geometry.get("coordinates") {
                    push_unique(&mut polygons, &mut seen, coords);
                }
            }
            Some("MultiPolygon") => {
                if let Some(polys) = geometry.get("coordinates").and_then(|c| c.as_array()) {
                    for poly in polys {
                        push_unique(&mut polygons, &mut seen, poly);
                    }
                }
            }
            _ => {}
        }
    }

    if polygons.is_empty() {
        return None;
    }

    Some(serde_json::json!({
        "type": "MultiPolygon",
        "coordinates": polygons,
    }))
}

fn push_unique(polygons: &mut Vec<Value>, seen: &mut HashSet<String>, poly: &Value) {
    let fingerprint = poly.to_string();
    if seen.insert(fingerprint) {
        polygons.push(poly.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn polygon(offset: f64) -> Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [-106.0 + offset, 39.0], [-105.0 + offset, 39.0],
                [-105.0 + offset, 40.0], [-106.0 + offset, 40.0],
                [-106.0 + offset, 39.0]
            ]]
        })
    }

    #[test]
    fn test_zone_cache_key() {
        assert_eq!(
            zone_cache_key("https://api.weather.gov/zones/forecast/COZ039"),
            "nws:zone:COZ039"
        );
    }

    #[test]
    fn test_merge_two_polygons() {
        let a = polygon(0.0);
        let b = polygon(1.0);
        let merged = merge_to_multipolygon(&[&a, &b]).unwrap();
        assert_eq!(merged["type"], "MultiPolygon");
        assert_eq!(merged["coordinates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_merge_dedupes_identical_polygons() {
        let a = polygon(0.0);
        let b = polygon(0.0);
        let merged = merge_to_multipolygon(&[&a, &b]).unwrap();
        assert_eq!(merged["coordinates"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_merge_flattens_multipolygon_input() {
        let a = polygon(0.0);
        let multi = serde_json::json!({
            "type": "MultiPolygon",
            "coordinates": [
                polygon(1.0)["coordinates"],
                polygon(2.0)["coordinates"]
            ]
        });
        let merged = merge_to_multipolygon(&[&a, &multi]).unwrap();
        assert_eq!(merged["coordinates"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_merge_ignores_non_polygonal_input() {
        let point = serde_json::json!({ "type": "Point", "coordinates": [-105.0, 39.5] });
        let a = polygon(0.0);
        let merged = merge_to_multipolygon(&[&point, &a]).unwrap();
        assert_eq!(merged["coordinates"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_merged_geometry_round_trips_as_geojson() {
        let a = polygon(0.0);
        let b = polygon(1.0);
        let merged = merge_to_multipolygon(&[&a, &b]).unwrap();
        // The merged geometry must itself be valid GeoJSON.
        let parsed = geojson::GeoJson::from_json_value(merged.clone()).unwrap();
        assert!(matches!(parsed, geojson::GeoJson::Geometry(_)));
        // And survive a serialize/parse cycle unchanged.
        let reparsed: Value =
            serde_json::from_str(&serde_json::to_string(&merged).unwrap()).unwrap();
        assert_eq!(merged, reparsed);
    }

    #[test]
    fn test_merge_empty_is_none() {
        assert!(merge_to_multipolygon(&[]).is_none());
        let point = serde_json::json!({ "type": "Point", "coordinates": [-105.0, 39.5] });
        assert!(merge_to_multipolygon(&[&point]).is_none());
    }

    #[tokio::test]
    async fn test_resolve_zones_tolerates_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/forecast/COZ039"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "https://api.weather.gov/zones/forecast/COZ039",
                "geometry": polygon(0.0)
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/forecast/COZ040"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url_a = format!("{}/zones/forecast/COZ039", server.uri());
        let url_b = format!("{}/zones/forecast/COZ040", server.uri());
        let resolved = resolve_zones(
            &reqwest::Client::new(),
            &Cache::disabled(),
            &[url_a.clone(), url_b, url_a.clone()],
        )
        .await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&url_a]["type"], "Polygon");
    }

    #[tokio::test]
    async fn test_resolve_zones_skips_null_geometry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/forecast/COZ041"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "https://api.weather.gov/zones/forecast/COZ041",
                "geometry": null
            })))
            .mount(&server)
            .await;

        let url = format!("{}/zones/forecast/COZ041", server.uri());
        let resolved =
            resolve_zones(&reqwest::Client::new(), &Cache::disabled(), &[url]).await;
        assert!(resolved.is_empty());
    }
}
