use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
    /// Optional structured detail (offending field, retry hints, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing required fields: {0}")]
    MissingFields(String),

    #[error("Invalid bbox: {0}")]
    InvalidBbox(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoords(String),

    #[error("Invalid corridor radius: {0}")]
    InvalidCorridor(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Seconds until the window resets, when known.
        retry_after: Option<u64>,
    },

    #[error("Geocoder returned no results for '{0}'")]
    GeocodeNoResults(String),

    #[error("Geocoding failed: {0}")]
    GeocodeError(String),

    #[error("Routing service rate limit exceeded")]
    OrsRateLimit,

    #[error("No route found: {0}")]
    RouteNotFound(String),

    #[error("Corridor build failed: {0}")]
    CorridorBuildFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Feed fetch failed: {message}")]
    FeedFetch {
        /// Upstream HTTP status, if the request got that far.
        status: Option<u16>,
        message: String,
    },

    #[error("Feed parse failed: {0}")]
    FeedParse(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// Stable error code from the shared taxonomy. Every variant maps to
    /// exactly one code; the HTTP layer never invents its own.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::MissingFields(_) => "MISSING_FIELDS",
            AppError::InvalidBbox(_) => "INVALID_BBOX",
            AppError::InvalidCoords(_) => "INVALID_COORDS",
            AppError::InvalidCorridor(_) => "INVALID_CORRIDOR",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::GeocodeNoResults(_) => "GEOCODE_NO_RESULTS",
            AppError::GeocodeError(_) => "GEOCODE_ERROR",
            AppError::OrsRateLimit => "ORS_RATE_LIMIT",
            AppError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            AppError::CorridorBuildFailed(_) => "CORRIDOR_BUILD_FAILED",
            AppError::QueryFailed(_) => "QUERY_FAILED",
            AppError::FeedFetch { .. } => "FEED_FETCH_ERROR",
            AppError::FeedParse(_) => "FEED_PARSE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Database(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::MissingFields(_)
            | AppError::InvalidBbox(_)
            | AppError::InvalidCoords(_)
            | AppError::InvalidCorridor(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } | AppError::OrsRateLimit => StatusCode::TOO_MANY_REQUESTS,
            AppError::GeocodeNoResults(_) | AppError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            AppError::GeocodeError(_) | AppError::FeedFetch { .. } | AppError::FeedParse(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::CorridorBuildFailed(_)
            | AppError::QueryFailed(_)
            | AppError::Internal(_)
            | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::RateLimited {
                retry_after: Some(secs),
                ..
            } => Some(serde_json::json!({ "retryAfter": secs })),
            AppError::FeedFetch {
                status: Some(status),
                ..
            } => Some(serde_json::json!({ "upstreamStatus": status })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                "Internal database error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: message,
            code: self.code().to_string(),
            details: self.details(),
        };

        (self.status_code(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AppError::BadRequest("x".into()).code(), "BAD_REQUEST");
        assert_eq!(AppError::InvalidBbox("x".into()).code(), "INVALID_BBOX");
        assert_eq!(
            AppError::InvalidCorridor("x".into()).code(),
            "INVALID_CORRIDOR"
        );
        assert_eq!(AppError::OrsRateLimit.code(), "ORS_RATE_LIMIT");
        assert_eq!(
            AppError::FeedFetch {
                status: Some(503),
                message: "x".into()
            }
            .code(),
            "FEED_FETCH_ERROR"
        );
        assert_eq!(AppError::FeedParse("x".into()).code(), "FEED_PARSE_ERROR");
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = AppError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(42),
        };
        let details = err.details().expect("retryAfter should be present");
        assert_eq!(details["retryAfter"], 42);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        let err = AppError::RateLimited {
            message: "slow down".into(),
            retry_after: None,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_database_error_maps_to_internal() {
        let err = AppError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
