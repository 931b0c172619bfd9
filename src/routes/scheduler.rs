//! Scheduler admin surface and feed-health listing.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::FeedStatus;
use crate::db::queries;
use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::scheduler::{SchedulerCommand, SchedulerStatus};

/// Get the current scheduler status.
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/status",
    tag = "Scheduler",
    responses(
        (status = 200, description = "Current scheduler status", body = SchedulerStatus),
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommandAccepted {
    pub accepted: bool,
    pub action: String,
}

/// Pause scheduled ingestion runs.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/pause",
    tag = "Scheduler",
    responses((status = 200, description = "Command accepted", body = CommandAccepted))
)]
pub async fn pause(State(state): State<AppState>) -> Result<Json<CommandAccepted>, AppError> {
    state.scheduler.send(SchedulerCommand::Pause).await?;
    Ok(Json(CommandAccepted {
        accepted: true,
        action: "pause".to_string(),
    }))
}

/// Resume scheduled ingestion runs.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/resume",
    tag = "Scheduler",
    responses((status = 200, description = "Command accepted", body = CommandAccepted))
)]
pub async fn resume(State(state): State<AppState>) -> Result<Json<CommandAccepted>, AppError> {
    state.scheduler.send(SchedulerCommand::Resume).await?;
    Ok(Json(CommandAccepted {
        accepted: true,
        action: "resume".to_string(),
    }))
}

/// Enqueue a one-off ingestion run immediately. If a run is already in
/// flight, the trigger waits behind it.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/trigger",
    tag = "Scheduler",
    responses((status = 200, description = "Command accepted", body = CommandAccepted))
)]
pub async fn trigger(State(state): State<AppState>) -> Result<Json<CommandAccepted>, AppError> {
    state.scheduler.send(SchedulerCommand::TriggerNow).await?;
    Ok(Json(CommandAccepted {
        accepted: true,
        action: "trigger".to_string(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetIntervalRequest {
    pub interval_minutes: u32,
}

/// Replace the repeating schedule. Applies from the next tick, never the
/// in-flight run.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/interval",
    tag = "Scheduler",
    request_body = SetIntervalRequest,
    responses(
        (status = 200, description = "Command accepted", body = CommandAccepted),
        (status = 400, description = "Invalid interval", body = ErrorResponse),
    )
)]
pub async fn set_interval(
    State(state): State<AppState>,
    Json(body): Json<SetIntervalRequest>,
) -> Result<Json<CommandAccepted>, AppError> {
    if body.interval_minutes == 0 || body.interval_minutes > 24 * 60 {
        return Err(AppError::BadRequest(
            "intervalMinutes must be between 1 and 1440".to_string(),
        ));
    }
    state
        .scheduler
        .send(SchedulerCommand::SetInterval(body.interval_minutes))
        .await?;
    Ok(Json(CommandAccepted {
        accepted: true,
        action: format!("set-interval:{}", body.interval_minutes),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedStatusResponse {
    pub feeds: Vec<FeedStatus>,
}

/// List per-feed health records.
#[utoipa::path(
    get,
    path = "/api/v1/feeds/status",
    tag = "Scheduler",
    responses(
        (status = 200, description = "Health of every registered feed", body = FeedStatusResponse),
    )
)]
pub async fn feed_status(
    State(state): State<AppState>,
) -> Result<Json<FeedStatusResponse>, AppError> {
    let feeds = queries::list_feed_status(&state.pool).await?;
    Ok(Json(FeedStatusResponse { feeds }))
}
