//! Address suggestion endpoint (typeahead for the route-check form).

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::client_ip;
use crate::routes::AppState;
use crate::services::geocode::GeocodedPoint;
use crate::services::ratelimit::{self, GateDecision};

#[derive(Debug, Deserialize, IntoParams)]
pub struct SuggestionsQuery {
    /// Partial address text; under 3 characters returns an empty list
    /// without consulting the geocoder.
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<GeocodedPoint>,
}

/// Address suggestions for partial input.
#[utoipa::path(
    get,
    path = "/api/v1/geocode/suggestions",
    tag = "Route",
    params(SuggestionsQuery),
    responses(
        (status = 200, description = "Candidate addresses", body = SuggestionsResponse),
        (status = 429, description = "Geocoding rate limit", body = ErrorResponse),
    )
)]
pub async fn suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let ip = client_ip(&headers);
    if let GateDecision::Limited { retry_after } = ratelimit::check_gate(
        &state.cache,
        &ratelimit::geocode_key(&ip),
        ratelimit::GEOCODE_GATE,
    )
    .await
    {
        return Err(AppError::RateLimited {
            message: "geocoding limit reached, try again shortly".to_string(),
            retry_after,
        });
    }

    let suggestions = state.geocoder.geocode_suggestions(&query.text).await?;
    Ok(Json(SuggestionsResponse { suggestions }))
}
