pub mod alerts;
pub mod events;
pub mod geocode;
pub mod health;
pub mod parking;
pub mod reports;
pub mod route_check;
pub mod scheduler;

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries::BboxFilter;
use crate::errors::AppError;
use crate::services::cache::Cache;
use crate::services::geocode::OrsGeocoder;
use crate::services::routing::OrsRouter;
use crate::services::scheduler::SchedulerHandle;

/// Maximum bbox span per axis, in degrees.
const MAX_BBOX_SPAN_DEGREES: f64 = 30.0;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cache: Cache,
    pub geocoder: OrsGeocoder,
    pub router: OrsRouter,
    pub scheduler: SchedulerHandle,
}

/// Parse and validate a `bbox=W,S,E,N` query value.
pub(crate) fn parse_bbox(raw: &str) -> Result<BboxFilter, AppError> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| AppError::InvalidBbox("bbox must be four numbers W,S,E,N".to_string()))?;

    if parts.len() != 4 {
        return Err(AppError::InvalidBbox(format!(
            "bbox must have four values, got {}",
            parts.len()
        )));
    }
    let (west, south, east, north) = (parts[0], parts[1], parts[2], parts[3]);

    if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
        return Err(AppError::InvalidBbox(
            "longitudes must be within [-180, 180]".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
        return Err(AppError::InvalidBbox(
            "latitudes must be within [-90, 90]".to_string(),
        ));
    }
    if west >= east {
        return Err(AppError::InvalidBbox("west must be less than east".to_string()));
    }
    if south >= north {
        return Err(AppError::InvalidBbox(
            "south must be less than north".to_string(),
        ));
    }

    Ok(BboxFilter {
        west,
        south,
        east,
        north,
    })
}

/// Enforce the per-axis span cap. Skipped on zoomed-out event views, where
/// the zoom ladder already bounds the result size and a country-wide bbox
/// is the normal request shape.
pub(crate) fn ensure_max_span(bbox: &BboxFilter) -> Result<(), AppError> {
    if bbox.east - bbox.west > MAX_BBOX_SPAN_DEGREES
        || bbox.north - bbox.south > MAX_BBOX_SPAN_DEGREES
    {
        return Err(AppError::InvalidBbox(format!(
            "bbox span exceeds {} degrees per axis",
            MAX_BBOX_SPAN_DEGREES
        )));
    }
    Ok(())
}

/// Opaque user identity minted by the external auth collaborator.
pub(crate) fn optional_user_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

pub(crate) fn require_user_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    optional_user_id(headers)
        .ok_or_else(|| AppError::Unauthorized("a valid X-User-Id header is required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_bbox_valid() {
        let bbox = parse_bbox("-105.5,39.0,-104.5,40.0").unwrap();
        assert_eq!(bbox.west, -105.5);
        assert_eq!(bbox.south, 39.0);
        assert_eq!(bbox.east, -104.5);
        assert_eq!(bbox.north, 40.0);
    }

    #[test]
    fn test_parse_bbox_wrong_arity() {
        assert!(matches!(
            parse_bbox("-105.5,39.0,-104.5"),
            Err(AppError::InvalidBbox(_))
        ));
        assert!(matches!(
            parse_bbox("-105.5,39.0,-104.5,40.0,1.0"),
            Err(AppError::InvalidBbox(_))
        ));
    }

    #[test]
    fn test_parse_bbox_not_numbers() {
        assert!(matches!(
            parse_bbox("a,b,c,d"),
            Err(AppError::InvalidBbox(_))
        ));
    }

    #[test]
    fn test_parse_bbox_inverted_axes() {
        assert!(matches!(
            parse_bbox("-104.5,39.0,-105.5,40.0"),
            Err(AppError::InvalidBbox(_))
        ));
        assert!(matches!(
            parse_bbox("-105.5,40.0,-104.5,39.0"),
            Err(AppError::InvalidBbox(_))
        ));
    }

    #[test]
    fn test_parse_bbox_out_of_bounds() {
        assert!(matches!(
            parse_bbox("-181.0,39.0,-104.5,40.0"),
            Err(AppError::InvalidBbox(_))
        ));
        assert!(matches!(
            parse_bbox("-105.5,-91.0,-104.5,40.0"),
            Err(AppError::InvalidBbox(_))
        ));
    }

    #[test]
    fn test_span_limit() {
        // 31 degrees of longitude.
        let wide = parse_bbox("-105.0,35.0,-74.0,40.0").unwrap();
        assert!(matches!(
            ensure_max_span(&wide),
            Err(AppError::InvalidBbox(_))
        ));
        // 30 degrees exactly is allowed.
        let edge = parse_bbox("-105.0,35.0,-75.0,40.0").unwrap();
        assert!(ensure_max_span(&edge).is_ok());
    }

    #[test]
    fn test_world_bbox_parses_without_span_check() {
        // Zoomed-out event views pass the whole-country box; the span cap
        // is applied separately by routes that need it.
        assert!(parse_bbox("-180,-90,180,90").is_ok());
    }

    #[test]
    fn test_user_id_header() {
        let mut headers = HeaderMap::new();
        assert!(optional_user_id(&headers).is_none());
        assert!(require_user_id(&headers).is_err());

        headers.insert(
            "x-user-id",
            HeaderValue::from_static("8c4f6f1e-3b2a-4d5c-9e8f-1a2b3c4d5e6f"),
        );
        assert!(optional_user_id(&headers).is_some());
        assert!(require_user_id(&headers).is_ok());

        headers.insert("x-user-id", HeaderValue::from_static("not-a-uuid"));
        assert!(optional_user_id(&headers).is_none());
    }
}
