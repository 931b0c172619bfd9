//! WZDx (Work Zone Data Exchange) feed adapter.
//!
//! One parameterized adapter covers every state DOT feed; the registry below
//! configures name/URL/state per feed. Feeds in the wild span WZDx v2–v4 and
//! deviate from the published format in recurring ways, all handled at the
//! parser boundary so downstream code only ever sees `NormalizedEvent`:
//!
//! - some feeds double-encode the JSON body (a JSON string containing JSON)
//! - some return a bare feature array instead of a FeatureCollection
//! - some advertise v3 but carry v2-style flat properties (no `core_details`)
//! - `road_names` is an array in v4, a scalar in v3
//! - `start_date`/`end_date` sit at properties level in v4, inside
//!   `core_details` in v3

use async_trait::async_trait;
use serde_json::Value;

use crate::db::models::{RoadEventType, Severity};
use crate::errors::AppError;
use crate::helpers::parse_timestamp;
use crate::services::ingest::{FeedAdapter, NormalizedEvent};

/// HTTP timeout for state DOT feeds; several are slow.
const WZDX_HTTP_TIMEOUT_SECS: u64 = 30;

/// Raw-payload cache TTL for WZDx feeds.
pub const WZDX_CACHE_TTL_SECS: u64 = 300;

/// Static identity of one registered WZDx feed.
#[derive(Debug, Clone, Copy)]
pub struct WzdxFeedConfig {
    pub name: &'static str,
    pub url: &'static str,
    pub state: &'static str,
}

/// Registered state DOT work-zone feeds.
pub const WZDX_FEEDS: &[WzdxFeedConfig] = &[
    WzdxFeedConfig {
        name: "wzdx-az",
        url: "https://az511.com/api/wzdx",
        state: "AZ",
    },
    WzdxFeedConfig {
        name: "wzdx-co",
        url: "https://data.cotrip.org/api/v1/wzdx",
        state: "CO",
    },
    WzdxFeedConfig {
        name: "wzdx-ia",
        url: "https://data.iowadot.gov/api/wzdx/feed",
        state: "IA",
    },
    WzdxFeedConfig {
        name: "wzdx-il",
        url: "https://wzdx.travelmidwest.com/wzdx/il",
        state: "IL",
    },
    WzdxFeedConfig {
        name: "wzdx-in",
        url: "https://content.trafficwise.org/json/wzdx.json",
        state: "IN",
    },
    WzdxFeedConfig {
        name: "wzdx-ks",
        url: "https://kandrive.gov/api/wzdx",
        state: "KS",
    },
    WzdxFeedConfig {
        name: "wzdx-ma",
        url: "https://mass511.com/api/wzdx",
        state: "MA",
    },
    WzdxFeedConfig {
        name: "wzdx-mn",
        url: "https://wzdx.dot.state.mn.us/wzdx/feed",
        state: "MN",
    },
    WzdxFeedConfig {
        name: "wzdx-mo",
        url: "https://traveler.modot.org/api/wzdx",
        state: "MO",
    },
    WzdxFeedConfig {
        name: "wzdx-nv",
        url: "https://nvroads.com/api/wzdx",
        state: "NV",
    },
    WzdxFeedConfig {
        name: "wzdx-ny",
        url: "https://511ny.org/api/wzdx",
        state: "NY",
    },
    WzdxFeedConfig {
        name: "wzdx-oh",
        url: "https://publicapi.ohgo.com/api/v1/wzdx",
        state: "OH",
    },
    WzdxFeedConfig {
        name: "wzdx-ok",
        url: "https://oktraffic.org/api/wzdx",
        state: "OK",
    },
    WzdxFeedConfig {
        name: "wzdx-tx",
        url: "https://its.txdot.gov/ITS_WEB/FrontEnd/api/wzdx",
        state: "TX",
    },
    WzdxFeedConfig {
        name: "wzdx-ut",
        url: "https://www.udottraffic.utah.gov/api/v2/get/wzdx",
        state: "UT",
    },
    WzdxFeedConfig {
        name: "wzdx-wi",
        url: "https://511wi.gov/api/wzdx",
        state: "WI",
    },
];

/// Adapter for one WZDx feed.
#[derive(Debug, Clone)]
pub struct WzdxAdapter {
    name: String,
    url: String,
    state: String,
    client: reqwest::Client,
}

impl WzdxAdapter {
    pub fn new(config: &WzdxFeedConfig) -> Self {
        Self::from_parts(config.name, config.url, config.state)
    }

    pub fn from_parts(name: &str, url: &str, state: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(WZDX_HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            name: name.to_string(),
            url: url.to_string(),
            state: state.to_uppercase(),
            client,
        }
    }
}

#[async_trait]
impl FeedAdapter for WzdxAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn state(&self) -> &str {
        &self.state
    }

    fn cache_ttl_secs(&self) -> u64 {
        WZDX_CACHE_TTL_SECS
    }

    async fn fetch(&self) -> Result<String, AppError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::FeedFetch {
                status: None,
                message: format!("{}: {}", self.name, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::FeedFetch {
                status: Some(status.as_u16()),
                message: format!("{} returned HTTP {}", self.name, status),
            });
        }

        response.text().await.map_err(|e| AppError::FeedFetch {
            status: None,
            message: format!("{}: failed reading body: {}", self.name, e),
        })
    }

    fn normalize(&self, raw: &str) -> Result<Vec<Option<NormalizedEvent>>, AppError> {
        let envelope = parse_envelope(raw)?;
        let version = detect_version(&envelope);
        let features = features_of(&envelope)?;

        Ok(features
            .iter()
            .map(|feature| normalize_feature(feature, version, &self.name, &self.state))
            .collect())
    }
}

/// Parse the payload, unwrapping one level of double encoding when the feed
/// serves a JSON string whose content is the actual document.
fn parse_envelope(raw: &str) -> Result<Value, AppError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::FeedParse(format!("invalid JSON: {}", e)))?;

    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner)
            .map_err(|e| AppError::FeedParse(format!("invalid double-encoded JSON: {}", e)))?,
        other => other,
    };

    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        _ => Err(AppError::FeedParse(
            "payload is neither an object nor a feature array".to_string(),
        )),
    }
}

/// Major WZDx version from `road_event_feed_info.version` (alias
/// `feed_info`). Defaults to 3 when absent or unparseable.
fn detect_version(envelope: &Value) -> u32 {
    let feed_info = envelope
        .get("road_event_feed_info")
        .or_else(|| envelope.get("feed_info"));

    feed_info
        .and_then(|info| info.get("version"))
        .and_then(|v| v.as_str())
        .and_then(|v| v.split('.').next())
        .and_then(|major| major.parse().ok())
        .unwrap_or(3)
}

/// The feature list: either `features` of a FeatureCollection or a bare
/// top-level array.
fn features_of(envelope: &Value) -> Result<&Vec<Value>, AppError> {
    if let Some(features) = envelope.as_array() {
        return Ok(features);
    }
    envelope
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| AppError::FeedParse("no features array in payload".to_string()))
}

/// Normalize one feature, or `None` when it has no usable geometry.
fn normalize_feature(
    feature: &Value,
    version: u32,
    source: &str,
    state: &str,
) -> Option<NormalizedEvent> {
    let geometry = feature.get("geometry")?;
    if !has_usable_geometry(geometry) {
        return None;
    }

    let props = feature.get("properties").and_then(|p| p.as_object())?;
    let core = props.get("core_details").filter(|c| c.is_object());

    // Feeds that advertise v3+ but carry flat v2-style properties get the v2
    // treatment: everything lives at properties level.
    let v2_shape = core.is_none();

    let str_at = |obj: Option<&Value>, key: &str| -> Option<String> {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let props_value = Value::Object(props.clone());

    let event_type_str = if v2_shape {
        str_at(Some(&props_value), "event_type")
    } else {
        str_at(core, "event_type")
    };
    let event_type = map_event_type(event_type_str.as_deref());

    let route_name = road_name(&props_value, core);

    let (started_at, expected_end_at) = if v2_shape {
        (
            str_at(Some(&props_value), "start_date").and_then(|s| parse_timestamp(&s)),
            str_at(Some(&props_value), "end_date").and_then(|s| parse_timestamp(&s)),
        )
    } else if version >= 4 {
        // v4: dates at properties level, core_details fallback for strays.
        (
            str_at(Some(&props_value), "start_date")
                .or_else(|| str_at(core, "start_date"))
                .and_then(|s| parse_timestamp(&s)),
            str_at(Some(&props_value), "end_date")
                .or_else(|| str_at(core, "end_date"))
                .and_then(|s| parse_timestamp(&s)),
        )
    } else {
        // v3: dates inside core_details.
        (
            str_at(core, "start_date")
                .or_else(|| str_at(Some(&props_value), "start_date"))
                .and_then(|s| parse_timestamp(&s)),
            str_at(core, "end_date")
                .or_else(|| str_at(Some(&props_value), "end_date"))
                .and_then(|s| parse_timestamp(&s)),
        )
    };

    let source_event_id = feature_id(feature).unwrap_or_else(|| {
        let data_source_id = str_at(core, "data_source_id")
            .or_else(|| str_at(Some(&props_value), "data_source_id"))
            .unwrap_or_else(|| "unknown".to_string());
        let road = route_name.clone().unwrap_or_else(|| "unknown".to_string());
        let start = started_at
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        format!("{}:{}:{}", data_source_id, road, start)
    });

    let vehicle_impact = str_at(Some(&props_value), "vehicle_impact")
        .or_else(|| str_at(core, "vehicle_impact"));
    let severity = map_vehicle_impact(vehicle_impact.as_deref());

    let workers_present = props
        .get("worker_presence")
        .and_then(|wp| wp.get("are_workers_present"))
        .and_then(|v| v.as_bool())
        .or_else(|| props.get("workers_present").and_then(|v| v.as_bool()));

    let description = str_at(core, "description")
        .or_else(|| str_at(Some(&props_value), "description"));
    let direction = str_at(core, "direction").or_else(|| str_at(Some(&props_value), "direction"));

    let title = match &route_name {
        Some(road) => format!("{} on {}", type_label(event_type), road),
        None => format!("{} ({})", type_label(event_type), state),
    };

    Some(NormalizedEvent {
        source: source.to_string(),
        source_event_id,
        state: state.to_string(),
        event_type,
        severity,
        title,
        description,
        direction,
        route_name,
        geometry: geometry.clone(),
        location_description: str_at(Some(&props_value), "location_description")
            .or_else(|| str_at(core, "road_event_location_description")),
        started_at,
        expected_end_at,
        vehicle_impact,
        workers_present,
        vehicle_restrictions: normalize_restrictions(props.get("restrictions")),
        detour_description: str_at(Some(&props_value), "detour")
            .or_else(|| str_at(core, "detour")),
        raw: feature.clone(),
    })
}

/// A geometry is usable when it parses as a GeoJSON geometry (null
/// coordinates and malformed shapes both fail the parse).
fn has_usable_geometry(geometry: &Value) -> bool {
    matches!(
        geojson::GeoJson::from_json_value(geometry.clone()),
        Ok(geojson::GeoJson::Geometry(_))
    )
}

/// Feature-level id, accepting string or numeric ids.
fn feature_id(feature: &Value) -> Option<String> {
    match feature.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Road name: v4 `road_names` array (first entry), v3 scalar `road_name` /
/// `name`, checked in both core_details and flat properties.
fn road_name(props: &Value, core: Option<&Value>) -> Option<String> {
    let first_of_array = |v: Option<&Value>| -> Option<String> {
        v.and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let scalar = |obj: Option<&Value>, key: &str| -> Option<String> {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    first_of_array(core.and_then(|c| c.get("road_names")))
        .or_else(|| first_of_array(props.get("road_names")))
        .or_else(|| scalar(core, "road_name"))
        .or_else(|| scalar(core, "name"))
        .or_else(|| scalar(Some(props), "road_name"))
        .or_else(|| scalar(Some(props), "name"))
}

/// vehicle_impact → severity. Total over every input including None.
pub fn map_vehicle_impact(vehicle_impact: Option<&str>) -> Severity {
    match vehicle_impact {
        Some("all-lanes-closed") => Severity::Critical,
        Some("some-lanes-closed")
        | Some("alternating-one-way")
        | Some("merge-left")
        | Some("merge-right") => Severity::Warning,
        Some("shifting-left") | Some("shifting-right") | Some("reduced-speed-zone") => {
            Severity::Advisory
        }
        _ => Severity::Info,
    }
}

/// event_type → RoadEventType. Unknown values default to CONSTRUCTION,
/// which is what WZDx feeds overwhelmingly carry.
pub fn map_event_type(event_type: Option<&str>) -> RoadEventType {
    match event_type {
        Some("restriction") => RoadEventType::Restriction,
        Some("incident") => RoadEventType::Incident,
        Some("event") => RoadEventType::SpecialEvent,
        _ => RoadEventType::Construction,
    }
}

fn type_label(event_type: RoadEventType) -> &'static str {
    match event_type {
        RoadEventType::Closure => "Road closure",
        RoadEventType::Restriction => "Travel restriction",
        RoadEventType::Construction => "Road work",
        RoadEventType::Incident => "Incident",
        RoadEventType::WeatherClosure => "Weather closure",
        RoadEventType::ChainLaw => "Chain law",
        RoadEventType::SpecialEvent => "Special event",
    }
}

/// Normalize the restrictions array to `[{type, value?, unit?}]`.
fn normalize_restrictions(restrictions: Option<&Value>) -> Value {
    let Some(entries) = restrictions.and_then(|r| r.as_array()) else {
        return Value::Array(vec![]);
    };

    let normalized: Vec<Value> = entries
        .iter()
        .filter_map(|entry| {
            let restriction_type = entry
                .get("restriction_type")
                .or_else(|| entry.get("type"))
                .and_then(|v| v.as_str())?;
            let mut obj = serde_json::Map::new();
            obj.insert("type".to_string(), Value::String(restriction_type.to_string()));
            if let Some(value) = entry.get("value").filter(|v| !v.is_null()) {
                obj.insert("value".to_string(), value.clone());
            }
            if let Some(unit) = entry.get("unit").and_then(|v| v.as_str()) {
                obj.insert("unit".to_string(), Value::String(unit.to_string()));
            }
            Some(Value::Object(obj))
        })
        .collect();

    Value::Array(normalized)
}
