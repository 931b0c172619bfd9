//! Road event list and cluster endpoints (map and alerts UIs).

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::{severity_rank, RoadEvent, RoadEventType, Severity};
use crate::db::queries::{self, RoadEventListFilter};
use crate::errors::{AppError, ErrorResponse};
use crate::routes::{ensure_max_span, parse_bbox, AppState};

const SEVERITY_LADDER: [&str; 4] = ["CRITICAL", "WARNING", "ADVISORY", "INFO"];

/// Query parameters for GET /api/v1/events.
#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// W,S,E,N in WGS 84 degrees; span ≤ 30° per axis.
    pub bbox: Option<String>,
    /// Only active, unexpired events (default true).
    pub active_only: Option<bool>,
    /// Map zoom level; derives the default limit and severity floor.
    pub zoom: Option<i32>,
    /// Exact severity filter; overrides the zoom-derived floor.
    pub severity: Option<String>,
    /// Two-letter state filter.
    pub state: Option<String>,
    /// Event type filter (CLOSURE, CONSTRUCTION, ...).
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One road event in API shape; geometry is inline GeoJSON.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventItem {
    pub id: Uuid,
    pub source: String,
    pub state: String,
    pub event_type: String,
    pub severity: String,
    pub severity_rank: i32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    pub geometry: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_description: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub expected_end_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers_present: Option<bool>,
    pub vehicle_restrictions: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detour_description: Option<String>,
    pub is_active: bool,
}

impl From<RoadEvent> for EventItem {
    fn from(e: RoadEvent) -> Self {
        Self {
            id: e.id,
            source: e.source,
            state: e.state,
            severity_rank: severity_rank(&e.severity),
            event_type: e.event_type,
            severity: e.severity,
            title: e.title,
            description: e.description,
            direction: e.direction,
            route_name: e.route_name,
            geometry: serde_json::from_str(&e.geometry).unwrap_or(Value::Null),
            location_description: e.location_description,
            started_at: e.started_at,
            expected_end_at: e.expected_end_at,
            last_updated_at: e.last_updated_at,
            vehicle_impact: e.vehicle_impact,
            workers_present: e.workers_present,
            vehicle_restrictions: e.vehicle_restrictions,
            detour_description: e.detour_description,
            is_active: e.is_active,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventsResponse {
    pub events: Vec<EventItem>,
    pub total: i64,
    /// The filters actually applied, after zoom defaults.
    pub filters: Value,
}

/// Default limit and severity floor (as a rank) for a zoom level.
/// Low zoom = wide view = fewer, more severe events.
fn zoom_limit_and_floor(zoom: Option<i32>) -> (i64, Option<i32>) {
    match zoom {
        Some(z) if z < 5 => (50, Some(4)),
        Some(z) if z < 8 => (150, Some(3)),
        _ => (500, None),
    }
}

/// Expand an explicit severity or a rank floor into the allowed value list.
fn allowed_severities(
    explicit: Option<&str>,
    floor: Option<i32>,
) -> Result<Option<Vec<String>>, AppError> {
    if let Some(raw) = explicit {
        let severity = Severity::parse(&raw.to_uppercase())
            .ok_or_else(|| AppError::BadRequest(format!("unknown severity '{}'", raw)))?;
        return Ok(Some(vec![severity.as_str().to_string()]));
    }
    Ok(floor.map(|floor| {
        SEVERITY_LADDER
            .iter()
            .filter(|s| severity_rank(s) >= floor)
            .map(|s| s.to_string())
            .collect()
    }))
}

/// List road events.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "Events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Matching road events", body = EventsResponse),
        (status = 400, description = "Invalid bbox or filter", body = ErrorResponse),
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    let bbox = query.bbox.as_deref().map(parse_bbox).transpose()?;
    let active_only = query.active_only.unwrap_or(true);

    let (zoom_limit, floor) = zoom_limit_and_floor(query.zoom);
    // Zoomed-out views may span the whole country; the severity floor and
    // limit bound those. Detail views get the span cap.
    if floor.is_none() {
        if let Some(bbox) = &bbox {
            ensure_max_span(bbox)?;
        }
    }
    let severities = allowed_severities(query.severity.as_deref(), floor)?;
    let limit = query.limit.unwrap_or(zoom_limit).clamp(1, zoom_limit);
    let offset = query.offset.unwrap_or(0).max(0);

    let state_filter = query.state.as_deref().map(str::to_uppercase);
    let event_type = query
        .event_type
        .as_deref()
        .map(|t| {
            RoadEventType::parse(&t.to_uppercase())
                .map(|t| t.as_str().to_string())
                .ok_or_else(|| AppError::BadRequest(format!("unknown event type '{}'", t)))
        })
        .transpose()?;

    let (events, total) = queries::list_road_events(
        &state.pool,
        &RoadEventListFilter {
            bbox,
            active_only,
            severities: severities.as_deref(),
            state: state_filter.as_deref(),
            event_type: event_type.as_deref(),
            limit,
            offset,
        },
    )
    .await?;

    let filters = serde_json::json!({
        "bbox": query.bbox,
        "activeOnly": active_only,
        "zoom": query.zoom,
        "severities": severities,
        "state": state_filter,
        "type": event_type,
        "limit": limit,
        "offset": offset,
    });

    Ok(Json(EventsResponse {
        events: events.into_iter().map(EventItem::from).collect(),
        total,
        filters,
    }))
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct ClustersQuery {
    /// W,S,E,N in WGS 84 degrees.
    pub bbox: String,
    pub zoom: i32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterItem {
    /// GeoJSON Point at the cluster centroid.
    pub geometry: Value,
    pub count: i64,
    pub has_critical: bool,
    pub has_warning: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClustersResponse {
    pub clusters: Vec<ClusterItem>,
}

/// DBSCAN eps in degrees for a zoom level: wide clusters zoomed out,
/// tightening to 0.25° at z7+.
fn cluster_eps(zoom: i32) -> f64 {
    match zoom {
        z if z <= 4 => 2.0,
        5 => 1.5,
        6 => 0.75,
        _ => 0.25,
    }
}

/// Cluster active road events for low-zoom map views.
#[utoipa::path(
    get,
    path = "/api/v1/events/clusters",
    tag = "Events",
    params(ClustersQuery),
    responses(
        (status = 200, description = "Spatial clusters of active events", body = ClustersResponse),
        (status = 400, description = "Invalid bbox", body = ErrorResponse),
    )
)]
pub async fn list_event_clusters(
    State(state): State<AppState>,
    Query(query): Query<ClustersQuery>,
) -> Result<Json<ClustersResponse>, AppError> {
    let bbox = parse_bbox(&query.bbox)?;
    let eps = cluster_eps(query.zoom);

    let clusters = queries::cluster_road_events(&state.pool, bbox, eps).await?;
    Ok(Json(ClustersResponse {
        clusters: clusters
            .into_iter()
            .map(|c| ClusterItem {
                geometry: serde_json::from_str(&c.geometry).unwrap_or(Value::Null),
                count: c.count,
                has_critical: c.has_critical,
                has_warning: c.has_warning,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_ladder() {
        assert_eq!(zoom_limit_and_floor(Some(3)), (50, Some(4)));
        assert_eq!(zoom_limit_and_floor(Some(4)), (50, Some(4)));
        assert_eq!(zoom_limit_and_floor(Some(5)), (150, Some(3)));
        assert_eq!(zoom_limit_and_floor(Some(7)), (150, Some(3)));
        assert_eq!(zoom_limit_and_floor(Some(8)), (500, None));
        assert_eq!(zoom_limit_and_floor(Some(14)), (500, None));
        assert_eq!(zoom_limit_and_floor(None), (500, None));
    }

    #[test]
    fn test_allowed_severities_from_floor() {
        let severities = allowed_severities(None, Some(4)).unwrap().unwrap();
        assert_eq!(severities, vec!["CRITICAL"]);

        let severities = allowed_severities(None, Some(3)).unwrap().unwrap();
        assert_eq!(severities, vec!["CRITICAL", "WARNING"]);

        assert!(allowed_severities(None, None).unwrap().is_none());
    }

    #[test]
    fn test_explicit_severity_overrides_floor() {
        let severities = allowed_severities(Some("info"), Some(4)).unwrap().unwrap();
        assert_eq!(severities, vec!["INFO"]);
    }

    #[test]
    fn test_explicit_severity_rejects_unknown() {
        assert!(matches!(
            allowed_severities(Some("apocalyptic"), None),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_cluster_eps_ladder() {
        assert_eq!(cluster_eps(3), 2.0);
        assert_eq!(cluster_eps(4), 2.0);
        assert_eq!(cluster_eps(5), 1.5);
        assert_eq!(cluster_eps(6), 0.75);
        assert_eq!(cluster_eps(7), 0.25);
        assert_eq!(cluster_eps(12), 0.25);
    }
}
