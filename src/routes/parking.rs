//! Truck parking facility list endpoint.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::ParkingFacility;
use crate::db::queries::{self, ParkingListFilter};
use crate::errors::{AppError, ErrorResponse};
use crate::routes::{ensure_max_span, parse_bbox, AppState};

const DEFAULT_PARKING_LIMIT: i64 = 200;
const MAX_PARKING_LIMIT: i64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ParkingQuery {
    /// W,S,E,N in WGS 84 degrees; span ≤ 30° per axis.
    pub bbox: Option<String>,
    pub active_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParkingItem {
    pub id: Uuid,
    pub source: String,
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    pub location: Value,
    pub total_spaces: Option<i32>,
    pub available_spaces: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    pub amenities: Value,
    pub last_updated_at: chrono::DateTime<chrono::Utc>,
    pub is_active: bool,
}

impl From<ParkingFacility> for ParkingItem {
    fn from(p: ParkingFacility) -> Self {
        Self {
            id: p.id,
            source: p.source,
            name: p.name,
            state: p.state,
            highway: p.highway,
            direction: p.direction,
            location: serde_json::from_str(&p.location).unwrap_or(Value::Null),
            total_spaces: p.total_spaces,
            available_spaces: p.available_spaces,
            trend: p.trend,
            amenities: p.amenities,
            last_updated_at: p.last_updated_at,
            is_active: p.is_active,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParkingResponse {
    pub facilities: Vec<ParkingItem>,
    pub total: i64,
}

/// List truck parking facilities.
#[utoipa::path(
    get,
    path = "/api/v1/parking",
    tag = "Parking",
    params(ParkingQuery),
    responses(
        (status = 200, description = "Matching parking facilities", body = ParkingResponse),
        (status = 400, description = "Invalid bbox", body = ErrorResponse),
    )
)]
pub async fn list_parking(
    State(state): State<AppState>,
    Query(query): Query<ParkingQuery>,
) -> Result<Json<ParkingResponse>, AppError> {
    let bbox = query.bbox.as_deref().map(parse_bbox).transpose()?;
    if let Some(bbox) = &bbox {
        ensure_max_span(bbox)?;
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PARKING_LIMIT)
        .clamp(1, MAX_PARKING_LIMIT);

    let (facilities, total) = queries::list_parking_facilities(
        &state.pool,
        &ParkingListFilter {
            bbox,
            active_only: query.active_only.unwrap_or(true),
            limit,
            offset: query.offset.unwrap_or(0).max(0),
        },
    )
    .await?;

    Ok(Json(ParkingResponse {
        facilities: facilities.into_iter().map(ParkingItem::from).collect(),
        total,
    }))
}
