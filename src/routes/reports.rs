//! Community report endpoints: list, create, vote.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::{severity_rank, CommunityReport};
use crate::db::queries::{self, ReportListFilter};
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::client_ip;
use crate::routes::{ensure_max_span, optional_user_id, parse_bbox, require_user_id, AppState};
use crate::services::reports::{self, NewReport, VoteOutcome};

const DEFAULT_REPORT_LIMIT: i64 = 100;
const MAX_REPORT_LIMIT: i64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReportsQuery {
    /// W,S,E,N in WGS 84 degrees; span ≤ 30° per axis.
    pub bbox: Option<String>,
    pub active_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    pub id: Uuid,
    pub report_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub location: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub severity: String,
    pub severity_rank: i32,
    pub upvotes: i32,
    pub downvotes: i32,
    pub is_active: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<CommunityReport> for ReportItem {
    fn from(r: CommunityReport) -> Self {
        Self {
            id: r.id,
            report_type: r.report_type,
            title: r.title,
            description: r.description,
            location: serde_json::from_str(&r.location).unwrap_or(Value::Null),
            location_description: r.location_description,
            route_name: r.route_name,
            state: r.state,
            severity_rank: severity_rank(&r.severity),
            severity: r.severity,
            upvotes: r.upvotes,
            downvotes: r.downvotes,
            is_active: r.is_active,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReportsResponse {
    pub reports: Vec<ReportItem>,
    pub total: i64,
}

/// List community reports. Soft moderation applies: removed reports and
/// reports voted below the score floor are excluded.
#[utoipa::path(
    get,
    path = "/api/v1/reports",
    tag = "Reports",
    params(ReportsQuery),
    responses(
        (status = 200, description = "Matching reports", body = ReportsResponse),
        (status = 400, description = "Invalid bbox", body = ErrorResponse),
    )
)]
pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<ReportsResponse>, AppError> {
    let bbox = query.bbox.as_deref().map(parse_bbox).transpose()?;
    if let Some(bbox) = &bbox {
        ensure_max_span(bbox)?;
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_REPORT_LIMIT)
        .clamp(1, MAX_REPORT_LIMIT);

    let (reports, total) = queries::list_reports(
        &state.pool,
        &ReportListFilter {
            bbox,
            active_only: query.active_only.unwrap_or(true),
            limit,
            offset: query.offset.unwrap_or(0).max(0),
        },
    )
    .await?;

    Ok(Json(ReportsResponse {
        reports: reports.into_iter().map(ReportItem::from).collect(),
        total,
    }))
}

/// Request body for POST /api/v1/reports.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    /// ROAD_HAZARD | CLOSURE_UPDATE | WEATHER_CONDITION | WAIT_TIME | PARKING_FULL | OTHER
    #[serde(rename = "type")]
    pub report_type: String,
    pub title: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_description: Option<String>,
    pub route_name: Option<String>,
    pub state: Option<String>,
    /// CRITICAL | WARNING | ADVISORY | INFO (default INFO)
    pub severity: Option<String>,
}

/// Submit a community report. Authenticated submitters are rate-limited by
/// user id, anonymous ones by client IP (10 per rolling hour either way).
#[utoipa::path(
    post,
    path = "/api/v1/reports",
    tag = "Reports",
    request_body = CreateReportRequest,
    responses(
        (status = 201, description = "Report created", body = ReportItem),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 429, description = "Submission limit reached", body = ErrorResponse),
    )
)]
pub async fn create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateReportRequest>,
) -> Result<(axum::http::StatusCode, Json<ReportItem>), AppError> {
    let user_id = optional_user_id(&headers);
    let rate_key = user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| client_ip(&headers));

    let report = reports::create_report(
        &state.pool,
        &state.cache,
        user_id,
        &rate_key,
        NewReport {
            report_type: body.report_type,
            title: body.title,
            description: body.description,
            latitude: body.latitude,
            longitude: body.longitude,
            location_description: body.location_description,
            route_name: body.route_name,
            state: body.state,
            severity: body.severity,
        },
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(ReportItem::from(report))))
}

/// Request body for POST /api/v1/reports/{id}/vote.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VoteRequest {
    /// "up" or "down"
    pub vote: String,
}

/// Vote on a report. Repeating the same vote toggles it off; the opposite
/// vote flips it. Requires an authenticated user.
#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/vote",
    tag = "Reports",
    params(("id" = Uuid, Path, description = "Report UUID")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Updated tallies", body = VoteOutcome),
        (status = 401, description = "Missing user identity", body = ErrorResponse),
        (status = 404, description = "Report not found", body = ErrorResponse),
    )
)]
pub async fn vote_on_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<VoteRequest>,
) -> Result<Json<VoteOutcome>, AppError> {
    let user_id = require_user_id(&headers)?;
    let outcome = reports::vote_on_report(&state.pool, report_id, user_id, &body.vote).await?;
    Ok(Json(outcome))
}
