//! National Weather Service active-alerts adapter.
//!
//! Fetches `GET {base}/alerts/active`, filters to road-relevant alert types,
//! and normalizes each feature. Alerts published without geometry keep their
//! `affectedZones` URL list so the ingest engine can resolve and merge zone
//! polygons afterwards.

use serde_json::Value;

use crate::errors::AppError;
use crate::helpers::parse_timestamp;
use crate::services::ingest::NormalizedAlert;

/// NWS requires a contact-identifying User-Agent.
const NWS_HTTP_TIMEOUT_SECS: u64 = 30;

/// Raw-payload cache TTL. Shorter than the default ingest interval on
/// purpose: the cache only dedupes manual trigger bursts, scheduled runs
/// always refetch.
pub const NWS_CACHE_TTL_SECS: u64 = 120;

/// Alert event names are filtered by keyword: anything matching one of these
/// affects road travel. Case-insensitive substring match keeps the filter
/// robust against NWS phrasing variants (Warning vs Advisory vs Watch).
const ROAD_RELEVANT_KEYWORDS: &[&str] = &[
    "winter",
    "snow",
    "ice",
    "blizzard",
    "freez",
    "frost",
    "cold",
    "wind",
    "fog",
    "dust",
    "smoke",
    "flood",
    "tornado",
    "thunderstorm",
    "hurricane",
    "tropical",
    "squall",
    "avalanche",
];

#[derive(Debug, Clone)]
pub struct NwsAdapter {
    name: String,
    url: String,
    user_agent: String,
    client: reqwest::Client,
}

impl NwsAdapter {
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(NWS_HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            name: "nws-alerts".to_string(),
            url: format!("{}/alerts/active", base_url.trim_end_matches('/')),
            user_agent: user_agent.to_string(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_ttl_secs(&self) -> u64 {
        NWS_CACHE_TTL_SECS
    }

    pub async fn fetch(&self) -> Result<String, AppError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/geo+json")
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| AppError::FeedFetch {
                status: None,
                message: format!("nws-alerts: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::FeedFetch {
                status: Some(status.as_u16()),
                message: format!("nws-alerts returned HTTP {}", status),
            });
        }

        response.text().await.map_err(|e| AppError::FeedFetch {
            status: None,
            message: format!("nws-alerts: failed reading body: {}", e),
        })
    }

    /// Normalize the active-alerts FeatureCollection. Non-road-relevant
    /// alerts are dropped; features without an id become `None`.
    pub fn normalize_alerts(&self, raw: &str) -> Result<Vec<Option<NormalizedAlert>>, AppError> {
        let envelope: Value = serde_json::from_str(raw)
            .map_err(|e| AppError::FeedParse(format!("nws-alerts: invalid JSON: {}", e)))?;

        let features = envelope
            .get("features")
            .and_then(|f| f.as_array())
            .ok_or_else(|| {
                AppError::FeedParse("nws-alerts: no features array in payload".to_string())
            })?;

        Ok(features
            .iter()
            .filter(|feature| {
                let event = feature
                    .pointer("/properties/event")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                is_road_relevant(event)
            })
            .map(normalize_alert)
            .collect())
    }
}

/// Whether an alert event name affects road travel.
pub fn is_road_relevant(event: &str) -> bool {
    let lower = event.to_lowercase();
    ROAD_RELEVANT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn normalize_alert(feature: &Value) -> Option<NormalizedAlert> {
    let props = feature.get("properties")?;

    let nws_id = props
        .get("id")
        .and_then(|v| v.as_str())
        .or_else(|| feature.get("id").and_then(|v| v.as_str()))?
        .to_string();

    let str_prop = |key: &str| -> Option<String> {
        props
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
    };

    let affected_zones = props
        .get("affectedZones")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|z| z.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let geometry = feature
        .get("geometry")
        .filter(|g| !g.is_null())
        .filter(|g| {
            matches!(
                geojson::GeoJson::from_json_value((*g).clone()),
                Ok(geojson::GeoJson::Geometry(_))
            )
        })
        .cloned();

    Some(NormalizedAlert {
        nws_id,
        event: str_prop("event").unwrap_or_else(|| "Unknown".to_string()),
        severity: str_prop("severity").unwrap_or_else(|| "Unknown".to_string()),
        urgency: str_prop("urgency"),
        certainty: str_prop("certainty"),
        headline: str_prop("headline"),
        description: str_prop("description"),
        instruction: str_prop("instruction"),
        area_description: str_prop("areaDesc").unwrap_or_default(),
        affected_zones,
        geometry,
        onset: str_prop("onset").and_then(|s| parse_timestamp(&s)),
        expires: str_prop("expires").and_then(|s| parse_timestamp(&s)),
        sender_name: str_prop("senderName"),
        wind_speed: parameter_value(props, &["maxWindGust", "windGust", "windSpeed"]),
        snow_amount: parameter_value(props, &["maxSnowAmount", "snowAmount", "snowLevel"]),
        raw: feature.clone(),
    })
}

/// First value found in the CAP parameter arrays under any of the given
/// keys. Parameters look like `{"maxWindGust": ["55 mph"]}`.
fn parameter_value(props: &Value, keys: &[&str]) -> Option<String> {
    let parameters = props.get("parameters")?;
    for key in keys {
        if let Some(value) = parameters.get(key) {
            let first = match value {
                Value::Array(arr) => arr.first()?,
                other => other,
            };
            match first {
                Value::String(s) if !s.is_empty() => return Some(s.clone()),
                Value::Number(n) => return Some(n.to_string()),
                _ => continue,
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert_feature(id: &str, event: &str, geometry: Value) -> Value {
        serde_json::json!({
            "id": id,
            "type": "Feature",
            "geometry": geometry,
            "properties": {
                "id": id,
                "event": event,
                "severity": "Severe",
                "urgency": "Expected",
                "certainty": "Likely",
                "headline": format!("{} issued", event),
                "description": "Heavy snow expected.",
                "instruction": "Avoid travel.",
                "areaDesc": "Summit County",
                "affectedZones": [
                    "https://api.weather.gov/zones/forecast/COZ039",
                    "https://api.weather.gov/zones/forecast/COZ040"
                ],
                "onset": "2026-02-01T00:00:00Z",
                "expires": "2026-02-02T00:00:00Z",
                "senderName": "NWS Denver CO",
                "parameters": {
                    "maxWindGust": ["45 mph"],
                    "maxSnowAmount": ["18 in"]
                }
            }
        })
    }

    fn collection(features: Vec<Value>) -> String {
        serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
    }

    fn adapter() -> NwsAdapter {
        NwsAdapter::new("https://api.weather.gov", "RoadPulse/0.1 test")
    }

    #[test]
    fn test_road_relevant_filter() {
        assert!(is_road_relevant("Winter Storm Warning"));
        assert!(is_road_relevant("Blizzard Warning"));
        assert!(is_road_relevant("High Wind Warning"));
        assert!(is_road_relevant("Dense Fog Advisory"));
        assert!(is_road_relevant("Flash Flood Warning"));
        assert!(is_road_relevant("Snow Squall Warning"));
        assert!(!is_road_relevant("Rip Current Statement"));
        assert!(!is_road_relevant("Air Quality Alert"));
        assert!(!is_road_relevant("Beach Hazards Statement"));
    }

    #[test]
    fn test_normalize_alert_with_geometry() {
        let geometry = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[-106.2, 39.5], [-106.0, 39.5], [-106.0, 39.7], [-106.2, 39.7], [-106.2, 39.5]]]
        });
        let raw = collection(vec![alert_feature("urn:oid:1", "Winter Storm Warning", geometry)]);
        let alerts = adapter().normalize_alerts(&raw).unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = alerts[0].as_ref().unwrap();

        assert_eq!(alert.nws_id, "urn:oid:1");
        assert_eq!(alert.event, "Winter Storm Warning");
        assert_eq!(alert.severity, "Severe");
        assert_eq!(alert.area_description, "Summit County");
        assert_eq!(alert.affected_zones.len(), 2);
        assert!(alert.geometry.is_some());
        assert_eq!(alert.wind_speed.as_deref(), Some("45 mph"));
        assert_eq!(alert.snow_amount.as_deref(), Some("18 in"));
        assert_eq!(
            alert.expires.unwrap().to_rfc3339(),
            "2026-02-02T00:00:00+00:00"
        );
    }

    #[test]
    fn test_normalize_alert_null_geometry_keeps_zones() {
        let raw = collection(vec![alert_feature(
            "urn:oid:2",
            "Winter Weather Advisory",
            Value::Null,
        )]);
        let alerts = adapter().normalize_alerts(&raw).unwrap();
        let alert = alerts[0].as_ref().unwrap();
        assert!(alert.geometry.is_none());
        assert_eq!(
            alert.affected_zones,
            vec![
                "https://api.weather.gov/zones/forecast/COZ039".to_string(),
                "https://api.weather.gov/zones/forecast/COZ040".to_string(),
            ]
        );
    }

    #[test]
    fn test_irrelevant_alerts_filtered_out() {
        let raw = collection(vec![
            alert_feature("urn:oid:3", "Rip Current Statement", Value::Null),
            alert_feature("urn:oid:4", "Ice Storm Warning", Value::Null),
        ]);
        let alerts = adapter().normalize_alerts(&raw).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].as_ref().unwrap().event, "Ice Storm Warning");
    }

    #[test]
    fn test_missing_optional_fields_do_not_error() {
        let raw = collection(vec![serde_json::json!({
            "id": "urn:oid:5",
            "type": "Feature",
            "geometry": null,
            "properties": {
                "id": "urn:oid:5",
                "event": "High Wind Warning"
            }
        })]);
        let alerts = adapter().normalize_alerts(&raw).unwrap();
        let alert = alerts[0].as_ref().unwrap();
        assert_eq!(alert.severity, "Unknown");
        assert!(alert.headline.is_none());
        assert!(alert.wind_speed.is_none());
        assert!(alert.affected_zones.is_empty());
    }

    #[test]
    fn test_unrecognizable_envelope_is_parse_error() {
        assert!(matches!(
            adapter().normalize_alerts("{\"type\": \"FeatureCollection\"}"),
            Err(AppError::FeedParse(_))
        ));
        assert!(matches!(
            adapter().normalize_alerts("nonsense"),
            Err(AppError::FeedParse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent() {
        let server = MockServer::start().await;
        let body = collection(vec![]);
        Mock::given(method("GET"))
            .and(path("/alerts/active"))
            .and(header_exists("User-Agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&server)
            .await;

        let adapter = NwsAdapter::new(&server.uri(), "RoadPulse/0.1 test");
        let raw = adapter.fetch().await.unwrap();
        assert_eq!(raw, body);
    }

    #[tokio::test]
    async fn test_fetch_5xx_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts/active"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = NwsAdapter::new(&server.uri(), "RoadPulse/0.1 test");
        match adapter.fetch().await {
            Err(AppError::FeedFetch { status, .. }) => assert_eq!(status, Some(500)),
            other => panic!("expected FeedFetch error, got {:?}", other.map(|_| ())),
        }
    }
}
