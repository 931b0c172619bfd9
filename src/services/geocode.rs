//! Geocoding client (openrouteservice / Pelias).
//!
//! Resolves free-text addresses to WGS 84 coordinates for the route-check
//! path, and serves typeahead suggestions. Both operations sit behind the
//! per-IP geocode rate gate at the HTTP layer.

use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::AppError;

const GEOCODE_HTTP_TIMEOUT_SECS: u64 = 15;

/// Suggestions below this input length skip the upstream call entirely.
const SUGGESTION_MIN_CHARS: usize = 3;

const SUGGESTION_LIMIT: u32 = 5;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeocodedPoint {
    pub lat: f64,
    pub lng: f64,
    pub resolved_address: String,
}

#[derive(Debug, Clone)]
pub struct OrsGeocoder {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

// --- Pelias GeoJSON response types (the subset we read) ---

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    features: Vec<GeocodeFeature>,
}

#[derive(Debug, Deserialize)]
struct GeocodeFeature {
    geometry: PointGeometry,
    properties: GeocodeProperties,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct GeocodeProperties {
    label: Option<String>,
}

impl OrsGeocoder {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(GEOCODE_HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        }
    }

    /// Resolve an address to a point. `GEOCODE_NO_RESULTS` when the upstream
    /// returns an empty feature set.
    pub async fn geocode_address(&self, text: &str) -> Result<GeocodedPoint, AppError> {
        let url = format!("{}/geocode/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("text", text),
                ("boundary.country", "US"),
                ("size", "1"),
            ])
            .send()
            .await
            .map_err(|e| AppError::GeocodeError(format!("geocoder request failed: {}", e)))?;

        let parsed = Self::parse_response(response).await?;
        let feature = parsed
            .features
            .into_iter()
            .next()
            .ok_or_else(|| AppError::GeocodeNoResults(text.to_string()))?;

        Ok(Self::feature_to_point(feature, text))
    }

    /// Typeahead suggestions. Inputs under 3 characters short-circuit to an
    /// empty list without an upstream call.
    pub async fn geocode_suggestions(&self, text: &str) -> Result<Vec<GeocodedPoint>, AppError> {
        if text.trim().chars().count() < SUGGESTION_MIN_CHARS {
            return Ok(Vec::new());
        }

        let url = format!("{}/geocode/autocomplete", self.base_url);
        let size = SUGGESTION_LIMIT.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("text", text),
                ("boundary.country", "US"),
                ("size", size.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::GeocodeError(format!("geocoder request failed: {}", e)))?;

        let parsed = Self::parse_response(response).await?;
        Ok(parsed
            .features
            .into_iter()
            .map(|f| Self::feature_to_point(f, text))
            .collect())
    }

    async fn parse_response(response: reqwest::Response) -> Result<GeocodeResponse, AppError> {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::OrsRateLimit);
        }
        if !status.is_success() {
            return Err(AppError::GeocodeError(format!(
                "geocoder returned HTTP {}",
                status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::GeocodeError(format!("geocoder response parse error: {}", e)))
    }

    fn feature_to_point(feature: GeocodeFeature, fallback_label: &str) -> GeocodedPoint {
        let [lng, lat] = feature.geometry.coordinates;
        GeocodedPoint {
            lat,
            lng,
            resolved_address: feature
                .properties
                .label
                .unwrap_or_else(|| fallback_label.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn search_body(features: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "type": "FeatureCollection", "features": features })
    }

    #[tokio::test]
    async fn test_geocode_address_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geocode/search"))
            .and(query_param("text", "Denver, CO"))
            .and(query_param("boundary.country", "US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
                serde_json::json!([{
                    "geometry": { "type": "Point", "coordinates": [-104.9903, 39.7392] },
                    "properties": { "label": "Denver, CO, USA" }
                }]),
            )))
            .mount(&server)
            .await;

        let geocoder = OrsGeocoder::new(&server.uri(), "test-key");
        let point = geocoder.geocode_address("Denver, CO").await.unwrap();
        assert!((point.lat - 39.7392).abs() < 1e-9);
        assert!((point.lng - -104.9903).abs() < 1e-9);
        assert_eq!(point.resolved_address, "Denver, CO, USA");
    }

    #[tokio::test]
    async fn test_geocode_address_no_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geocode/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(search_body(serde_json::json!([]))),
            )
            .mount(&server)
            .await;

        let geocoder = OrsGeocoder::new(&server.uri(), "test-key");
        match geocoder.geocode_address("xyzzy nowhere").await {
            Err(AppError::GeocodeNoResults(text)) => assert_eq!(text, "xyzzy nowhere"),
            other => panic!("expected GeocodeNoResults, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_geocode_429_maps_to_ors_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geocode/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let geocoder = OrsGeocoder::new(&server.uri(), "test-key");
        assert!(matches!(
            geocoder.geocode_address("Denver").await,
            Err(AppError::OrsRateLimit)
        ));
    }

    #[tokio::test]
    async fn test_suggestions_short_input_skips_upstream() {
        // No mock server mounted: a call would fail, so an empty result
        // proves the upstream was never consulted.
        let geocoder = OrsGeocoder::new("http://127.0.0.1:1", "test-key");
        let suggestions = geocoder.geocode_suggestions("de").await.unwrap();
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_suggestions_returns_labels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geocode/autocomplete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
                serde_json::json!([
                    {
                        "geometry": { "type": "Point", "coordinates": [-104.99, 39.74] },
                        "properties": { "label": "Denver, CO, USA" }
                    },
                    {
                        "geometry": { "type": "Point", "coordinates": [-105.08, 39.88] },
                        "properties": { "label": "Denver International Airport" }
                    }
                ]),
            )))
            .mount(&server)
            .await;

        let geocoder = OrsGeocoder::new(&server.uri(), "test-key");
        let suggestions = geocoder.geocode_suggestions("denver").await.unwrap();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].resolved_address, "Denver, CO, USA");
    }
}
