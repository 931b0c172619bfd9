//! Weather alert list endpoint.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::{severity_rank, WeatherAlert};
use crate::db::queries::{self, AlertListFilter};
use crate::errors::{AppError, ErrorResponse};
use crate::routes::{ensure_max_span, parse_bbox, AppState};

const DEFAULT_ALERT_LIMIT: i64 = 200;
const MAX_ALERT_LIMIT: i64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AlertsQuery {
    /// W,S,E,N in WGS 84 degrees; span ≤ 30° per axis.
    pub bbox: Option<String>,
    /// Only active, unexpired alerts (default true).
    pub active_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertItem {
    pub id: Uuid,
    pub nws_id: String,
    pub event: String,
    pub severity: String,
    pub severity_rank: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certainty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub area_description: String,
    pub geometry: Value,
    pub onset: Option<chrono::DateTime<chrono::Utc>>,
    pub expires: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snow_amount: Option<String>,
    pub is_active: bool,
}

impl From<WeatherAlert> for AlertItem {
    fn from(a: WeatherAlert) -> Self {
        Self {
            id: a.id,
            nws_id: a.nws_id,
            event: a.event,
            severity_rank: severity_rank(&a.severity),
            severity: a.severity,
            urgency: a.urgency,
            certainty: a.certainty,
            headline: a.headline,
            description: a.description,
            instruction: a.instruction,
            area_description: a.area_description,
            geometry: a
                .geometry
                .as_deref()
                .and_then(|g| serde_json::from_str(g).ok())
                .unwrap_or(Value::Null),
            onset: a.onset,
            expires: a.expires,
            sender_name: a.sender_name,
            wind_speed: a.wind_speed,
            snow_amount: a.snow_amount,
            is_active: a.is_active,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertItem>,
    pub total: i64,
}

/// List weather alerts.
#[utoipa::path(
    get,
    path = "/api/v1/alerts",
    tag = "Alerts",
    params(AlertsQuery),
    responses(
        (status = 200, description = "Matching weather alerts", body = AlertsResponse),
        (status = 400, description = "Invalid bbox", body = ErrorResponse),
    )
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, AppError> {
    let bbox = query.bbox.as_deref().map(parse_bbox).transpose()?;
    if let Some(bbox) = &bbox {
        ensure_max_span(bbox)?;
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);

    let (alerts, total) = queries::list_weather_alerts(
        &state.pool,
        &AlertListFilter {
            bbox,
            active_only: query.active_only.unwrap_or(true),
            limit,
            offset: query.offset.unwrap_or(0).max(0),
        },
    )
    .await?;

    Ok(Json(AlertsResponse {
        alerts: alerts.into_iter().map(AlertItem::from).collect(),
        total,
    }))
}
