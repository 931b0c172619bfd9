//! HGV routing client and corridor construction.
//!
//! Fetches a heavy-goods-vehicle route from openrouteservice (GeoJSON
//! profile, `[lng, lat]` coordinate order) and builds the buffered corridor
//! polygon around it in PostGIS. The corridor radius is metric: the route is
//! cast to geography before buffering so a mile is a mile at any latitude.

use serde_json::Value;
use sqlx::PgPool;

use crate::db::queries;
use crate::errors::AppError;

const ROUTE_HTTP_TIMEOUT_SECS: u64 = 30;

/// Corridor radius bounds in miles.
pub const MIN_CORRIDOR_MILES: f64 = 1.0;
pub const MAX_CORRIDOR_MILES: f64 = 50.0;

/// Default corridor radius when the caller does not supply one.
pub const DEFAULT_CORRIDOR_MILES: f64 = 10.0;

/// A fetched route: GeoJSON geometry for responses, WKT for PostGIS.
#[derive(Debug, Clone)]
pub struct RouteResult {
    /// GeoJSON LineString.
    pub geometry: Value,
    pub wkt: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct OrsRouter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OrsRouter {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(ROUTE_HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        }
    }

    /// Fetch a truck route between two points. HTTP 429 maps to
    /// `ORS_RATE_LIMIT`; an empty feature set maps to `ROUTE_NOT_FOUND`.
    pub async fn fetch_route(
        &self,
        origin_lat: f64,
        origin_lng: f64,
        dest_lat: f64,
        dest_lng: f64,
    ) -> Result<RouteResult, AppError> {
        let url = format!("{}/v2/directions/driving-hgv/geojson", self.base_url);
        let body = serde_json::json!({
            "coordinates": [[origin_lng, origin_lat], [dest_lng, dest_lat]],
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::RouteNotFound(format!("routing request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::OrsRateLimit);
        }
        if !status.is_success() {
            return Err(AppError::RouteNotFound(format!(
                "routing service returned HTTP {}",
                status
            )));
        }

        let parsed: Value = response.json().await.map_err(|e| {
            AppError::RouteNotFound(format!("routing response parse error: {}", e))
        })?;

        let feature = parsed
            .get("features")
            .and_then(|f| f.as_array())
            .and_then(|f| f.first())
            .ok_or_else(|| {
                AppError::RouteNotFound("no route between those points".to_string())
            })?;

        let geometry = feature
            .get("geometry")
            .filter(|g| g.get("type").and_then(|t| t.as_str()) == Some("LineString"))
            .cloned()
            .ok_or_else(|| {
                AppError::RouteNotFound("route feature has no LineString geometry".to_string())
            })?;

        let coordinates = geometry
            .get("coordinates")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                AppError::RouteNotFound("route geometry has no coordinates".to_string())
            })?;
        let wkt = linestring_wkt(coordinates)
            .ok_or_else(|| AppError::RouteNotFound("route geometry is degenerate".to_string()))?;

        let summary = feature.pointer("/properties/summary");
        let distance_meters = summary
            .and_then(|s| s.get("distance"))
            .and_then(|d| d.as_f64())
            .unwrap_or(0.0);
        let duration_seconds = summary
            .and_then(|s| s.get("duration"))
            .and_then(|d| d.as_f64())
            .unwrap_or(0.0);

        Ok(RouteResult {
            geometry,
            wkt,
            distance_meters,
            duration_seconds,
        })
    }
}

/// Serialize GeoJSON LineString coordinates (`[lng, lat]` pairs) as WKT.
/// Returns `None` for fewer than two usable positions.
pub fn linestring_wkt(coordinates: &[Value]) -> Option<String> {
    let points: Vec<String> = coordinates
        .iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            let lng = pair.first()?.as_f64()?;
            let lat = pair.get(1)?.as_f64()?;
            Some(format!("{} {}", lng, lat))
        })
        .collect();

    if points.len() < 2 {
        return None;
    }
    Some(format!("LINESTRING({})", points.join(", ")))
}

/// Validate a requested corridor radius against the [1, 50] mile bounds.
pub fn validate_corridor_miles(miles: f64) -> Result<f64, AppError> {
    if !miles.is_finite() || !(MIN_CORRIDOR_MILES..=MAX_CORRIDOR_MILES).contains(&miles) {
        return Err(AppError::InvalidCorridor(format!(
            "corridorMiles must be between {} and {}, got {}",
            MIN_CORRIDOR_MILES, MAX_CORRIDOR_MILES, miles
        )));
    }
    Ok(miles)
}

/// Buffer the route by `radius_miles` and return the corridor polygon as
/// GeoJSON text.
pub async fn build_corridor(
    pool: &PgPool,
    route_wkt: &str,
    radius_miles: f64,
) -> Result<String, AppError> {
    queries::build_corridor(pool, route_wkt, radius_miles)
        .await
        .map_err(|e| AppError::CorridorBuildFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_linestring_wkt() {
        let coords = serde_json::json!([[-74.0, 40.0], [-74.0, 40.5]]);
        let wkt = linestring_wkt(coords.as_array().unwrap()).unwrap();
        assert_eq!(wkt, "LINESTRING(-74 40, -74 40.5)");
    }

    #[test]
    fn test_linestring_wkt_rejects_single_point() {
        let coords = serde_json::json!([[-74.0, 40.0]]);
        assert!(linestring_wkt(coords.as_array().unwrap()).is_none());
    }

    #[test]
    fn test_corridor_bounds() {
        assert!(validate_corridor_miles(1.0).is_ok());
        assert!(validate_corridor_miles(10.0).is_ok());
        assert!(validate_corridor_miles(50.0).is_ok());

        for bad in [0.99, 50.01, 0.0, -3.0, f64::NAN] {
            match validate_corridor_miles(bad) {
                Err(AppError::InvalidCorridor(_)) => {}
                other => panic!("expected InvalidCorridor for {}, got {:?}", bad, other),
            }
        }
    }

    fn route_body() -> serde_json::Value {
        serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[-74.0, 40.0], [-74.01, 40.2], [-74.0, 40.5]]
                },
                "properties": {
                    "summary": { "distance": 55820.3, "duration": 2514.8 }
                }
            }]
        })
    }

    #[tokio::test]
    async fn test_fetch_route_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/directions/driving-hgv/geojson"))
            .and(header("Authorization", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "coordinates": [[-74.0, 40.0], [-74.0, 40.5]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(route_body()))
            .mount(&server)
            .await;

        let router = OrsRouter::new(&server.uri(), "test-key");
        let route = router.fetch_route(40.0, -74.0, 40.5, -74.0).await.unwrap();
        assert!((route.distance_meters - 55820.3).abs() < 1e-9);
        assert!((route.duration_seconds - 2514.8).abs() < 1e-9);
        assert!(route.wkt.starts_with("LINESTRING(-74 40"));
    }

    #[tokio::test]
    async fn test_fetch_route_429() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/directions/driving-hgv/geojson"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let router = OrsRouter::new(&server.uri(), "test-key");
        assert!(matches!(
            router.fetch_route(40.0, -74.0, 40.5, -74.0).await,
            Err(AppError::OrsRateLimit)
        ));
    }

    #[tokio::test]
    async fn test_fetch_route_empty_features() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/directions/driving-hgv/geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "FeatureCollection",
                "features": []
            })))
            .mount(&server)
            .await;

        let router = OrsRouter::new(&server.uri(), "test-key");
        assert!(matches!(
            router.fetch_route(40.0, -74.0, 40.5, -74.0).await,
            Err(AppError::RouteNotFound(_))
        ));
    }
}
