//! Route hazard query engine.
//!
//! Intersects a corridor polygon with the three active hazard tables
//! concurrently, merges the hits into one tagged sequence, and orders them
//! by fractional position along the route (severity breaks near-ties). The
//! tagged `Hazard` enum keeps the merge total and exhaustive — downstream
//! code matches on `kind`, never on table shape.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::severity_rank;
use crate::db::queries;
use crate::errors::AppError;

pub const ROAD_EVENT_CORRIDOR_LIMIT: i64 = 200;
pub const WEATHER_ALERT_CORRIDOR_LIMIT: i64 = 200;
pub const REPORT_CORRIDOR_LIMIT: i64 = 100;

/// Positions closer than this along the route are considered tied and
/// ordered by severity instead.
pub const POSITION_TIE_EPSILON: f64 = 1e-4;

/// Route-check responses are cached this long.
pub const ROUTE_CHECK_CACHE_TTL_SECS: u64 = 300;

/// One hazard on a route, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Hazard {
    #[serde(rename_all = "camelCase")]
    RoadEvent {
        id: Uuid,
        event_type: String,
        severity: String,
        severity_rank: i32,
        title: String,
        description: Option<String>,
        route_name: Option<String>,
        direction: Option<String>,
        state: String,
        geometry: Value,
        started_at: Option<DateTime<Utc>>,
        expected_end_at: Option<DateTime<Utc>>,
        position_along_route: f64,
    },
    #[serde(rename_all = "camelCase")]
    WeatherAlert {
        id: Uuid,
        nws_id: String,
        event: String,
        severity: String,
        severity_rank: i32,
        headline: Option<String>,
        area_description: String,
        geometry: Value,
        onset: Option<DateTime<Utc>>,
        expires: Option<DateTime<Utc>>,
        position_along_route: f64,
    },
    #[serde(rename_all = "camelCase")]
    CommunityReport {
        id: Uuid,
        report_type: String,
        severity: String,
        severity_rank: i32,
        title: String,
        description: Option<String>,
        geometry: Value,
        upvotes: i32,
        downvotes: i32,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        position_along_route: f64,
    },
}

impl Hazard {
    pub fn position(&self) -> f64 {
        match self {
            Hazard::RoadEvent {
                position_along_route,
                ..
            }
            | Hazard::WeatherAlert {
                position_along_route,
                ..
            }
            | Hazard::CommunityReport {
                position_along_route,
                ..
            } => *position_along_route,
        }
    }

    pub fn severity_rank(&self) -> i32 {
        match self {
            Hazard::RoadEvent { severity_rank, .. }
            | Hazard::WeatherAlert { severity_rank, .. }
            | Hazard::CommunityReport { severity_rank, .. } => *severity_rank,
        }
    }
}

/// Counts by severity rank and by hazard kind.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HazardSummary {
    pub total_hazards: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub advisory_count: usize,
    pub info_count: usize,
    pub road_event_count: usize,
    pub weather_alert_count: usize,
    pub community_report_count: usize,
}

/// Run the three corridor intersections concurrently and return the merged,
/// ordered hazard sequence.
pub async fn query_corridor_hazards(
    pool: &PgPool,
    corridor_geojson: &str,
    route_wkt: &str,
) -> Result<Vec<Hazard>, AppError> {
    let (road_events, weather_alerts, reports) = tokio::try_join!(
        queries::road_events_in_corridor(
            pool,
            corridor_geojson,
            route_wkt,
            ROAD_EVENT_CORRIDOR_LIMIT
        ),
        queries::weather_alerts_in_corridor(
            pool,
            corridor_geojson,
            route_wkt,
            WEATHER_ALERT_CORRIDOR_LIMIT
        ),
        queries::reports_in_corridor(pool, corridor_geojson, route_wkt, REPORT_CORRIDOR_LIMIT),
    )
    .map_err(|e| AppError::QueryFailed(format!("corridor hazard query failed: {}", e)))?;

    let mut hazards: Vec<Hazard> = Vec::with_capacity(
        road_events.len() + weather_alerts.len() + reports.len(),
    );

    for row in road_events {
        hazards.push(Hazard::RoadEvent {
            id: row.id,
            severity_rank: severity_rank(&row.severity),
            event_type: row.event_type,
            severity: row.severity,
            title: row.title,
            description: row.description,
            route_name: row.route_name,
            direction: row.direction,
            state: row.state,
            geometry: parse_geojson(&row.geometry),
            started_at: row.started_at,
            expected_end_at: row.expected_end_at,
            position_along_route: row.position,
        });
    }
    for row in weather_alerts {
        hazards.push(Hazard::WeatherAlert {
            id: row.id,
            severity_rank: severity_rank(&row.severity),
            nws_id: row.nws_id,
            event: row.event,
            severity: row.severity,
            headline: row.headline,
            area_description: row.area_description,
            geometry: parse_geojson(&row.geometry),
            onset: row.onset,
            expires: row.expires,
            position_along_route: row.position,
        });
    }
    for row in reports {
        hazards.push(Hazard::CommunityReport {
            id: row.id,
            severity_rank: severity_rank(&row.severity),
            report_type: row.report_type,
            severity: row.severity,
            title: row.title,
            description: row.description,
            geometry: parse_geojson(&row.location),
            upvotes: row.upvotes,
            downvotes: row.downvotes,
            created_at: row.created_at,
            expires_at: row.expires_at,
            position_along_route: row.position,
        });
    }

    sort_hazards(&mut hazards);
    Ok(hazards)
}

/// Order by position along the route ascending; positions within
/// `POSITION_TIE_EPSILON` are tied and ordered by severity rank descending.
pub fn sort_hazards(hazards: &mut [Hazard]) {
    hazards.sort_by(|a, b| {
        let delta = a.position() - b.position();
        if delta.abs() <= POSITION_TIE_EPSILON {
            b.severity_rank().cmp(&a.severity_rank())
        } else if delta < 0.0 {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    });
}

/// Severity counts use the shared rank scale, so weather "Extreme" lands in
/// the critical bucket. Rank 0 (unknown) counts as info.
pub fn summarize(hazards: &[Hazard]) -> HazardSummary {
    let mut summary = HazardSummary {
        total_hazards: hazards.len(),
        ..Default::default()
    };

    for hazard in hazards {
        match hazard.severity_rank() {
            4 => summary.critical_count += 1,
            3 => summary.warning_count += 1,
            2 => summary.advisory_count += 1,
            _ => summary.info_count += 1,
        }
        match hazard {
            Hazard::RoadEvent { .. } => summary.road_event_count += 1,
            Hazard::WeatherAlert { .. } => summary.weather_alert_count += 1,
            Hazard::CommunityReport { .. } => summary.community_report_count += 1,
        }
    }

    summary
}

fn parse_geojson(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn road_event(position: f64, severity: &str) -> Hazard {
        Hazard::RoadEvent {
            id: Uuid::new_v4(),
            event_type: "CONSTRUCTION".to_string(),
            severity: severity.to_string(),
            severity_rank: severity_rank(severity),
            title: format!("{} at {}", severity, position),
            description: None,
            route_name: None,
            direction: None,
            state: "NJ".to_string(),
            geometry: serde_json::json!({ "type": "Point", "coordinates": [-74.0, 40.0] }),
            started_at: None,
            expected_end_at: None,
            position_along_route: position,
        }
    }

    fn weather_alert(position: f64, severity: &str) -> Hazard {
        Hazard::WeatherAlert {
            id: Uuid::new_v4(),
            nws_id: "urn:oid:test".to_string(),
            event: "Winter Storm Warning".to_string(),
            severity: severity.to_string(),
            severity_rank: severity_rank(severity),
            headline: None,
            area_description: "Test County".to_string(),
            geometry: Value::Null,
            onset: None,
            expires: None,
            position_along_route: position,
        }
    }

    #[test]
    fn test_sort_by_position() {
        let mut hazards = vec![
            road_event(0.9, "WARNING"),
            road_event(0.1, "INFO"),
            road_event(0.5, "CRITICAL"),
        ];
        sort_hazards(&mut hazards);
        let positions: Vec<f64> = hazards.iter().map(|h| h.position()).collect();
        assert_eq!(positions, vec![0.1, 0.5, 0.9]);
    }

    #[test]
    fn test_near_ties_break_by_severity() {
        // A and B are within epsilon of each other; CRITICAL must come first
        // even though its raw position is a hair later.
        let mut hazards = vec![
            road_event(0.10001, "CRITICAL"),
            road_event(0.1, "INFO"),
            road_event(0.9, "WARNING"),
        ];
        sort_hazards(&mut hazards);
        assert_eq!(hazards[0].severity_rank(), 4);
        assert_eq!(hazards[1].severity_rank(), 1);
        assert_eq!(hazards[2].severity_rank(), 3);
    }

    #[test]
    fn test_positions_beyond_epsilon_are_not_tied() {
        let mut hazards = vec![road_event(0.102, "CRITICAL"), road_event(0.1, "INFO")];
        sort_hazards(&mut hazards);
        // 0.002 apart: position wins, severity does not.
        assert_eq!(hazards[0].severity_rank(), 1);
    }

    #[test]
    fn test_cross_kind_ordering() {
        let mut hazards = vec![
            weather_alert(0.5, "Extreme"),
            road_event(0.5, "WARNING"),
            road_event(0.2, "INFO"),
        ];
        sort_hazards(&mut hazards);
        assert_eq!(hazards[0].position(), 0.2);
        // At 0.5, Extreme (rank 4) sorts before WARNING (rank 3).
        assert!(matches!(hazards[1], Hazard::WeatherAlert { .. }));
        assert!(matches!(hazards[2], Hazard::RoadEvent { .. }));
    }

    #[test]
    fn test_summarize_counts_by_rank_and_kind() {
        let hazards = vec![
            road_event(0.1, "CRITICAL"),
            road_event(0.2, "INFO"),
            weather_alert(0.3, "Severe"),
            weather_alert(0.4, "Unknown"),
        ];
        let summary = summarize(&hazards);
        assert_eq!(summary.total_hazards, 4);
        assert_eq!(summary.critical_count, 1);
        assert_eq!(summary.warning_count, 1);
        assert_eq!(summary.advisory_count, 0);
        assert_eq!(summary.info_count, 2);
        assert_eq!(summary.road_event_count, 2);
        assert_eq!(summary.weather_alert_count, 2);
        assert_eq!(summary.community_report_count, 0);
    }

    #[test]
    fn test_hazard_serializes_with_kind_tag() {
        let hazard = road_event(0.1, "CRITICAL");
        let json = serde_json::to_value(&hazard).unwrap();
        assert_eq!(json["kind"], "roadEvent");
        assert_eq!(json["severityRank"], 4);
        assert_eq!(json["positionAlongRoute"], 0.1);

        let json = serde_json::to_value(weather_alert(0.2, "Severe")).unwrap();
        assert_eq!(json["kind"], "weatherAlert");
    }
}
