use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Severity for road events and community reports. Weather alerts keep the
/// NWS vocabulary (Extreme/Severe/Moderate/Minor/Unknown) as text; both map
/// onto the same 4..=0 rank scale for cross-kind ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Warning,
    Advisory,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Advisory => "ADVISORY",
            Severity::Info => "INFO",
        }
    }

    pub fn rank(self) -> i32 {
        match self {
            Severity::Critical => 4,
            Severity::Warning => 3,
            Severity::Advisory => 2,
            Severity::Info => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(Severity::Critical),
            "WARNING" => Some(Severity::Warning),
            "ADVISORY" => Some(Severity::Advisory),
            "INFO" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// Rank for any stored severity string, across both vocabularies.
/// Unknown/unmapped values rank 0, below INFO/Minor.
pub fn severity_rank(severity: &str) -> i32 {
    match severity {
        "CRITICAL" | "Extreme" => 4,
        "WARNING" | "Severe" => 3,
        "ADVISORY" | "Moderate" => 2,
        "INFO" | "Minor" => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoadEventType {
    Closure,
    Restriction,
    Construction,
    Incident,
    WeatherClosure,
    ChainLaw,
    SpecialEvent,
}

impl RoadEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            RoadEventType::Closure => "CLOSURE",
            RoadEventType::Restriction => "RESTRICTION",
            RoadEventType::Construction => "CONSTRUCTION",
            RoadEventType::Incident => "INCIDENT",
            RoadEventType::WeatherClosure => "WEATHER_CLOSURE",
            RoadEventType::ChainLaw => "CHAIN_LAW",
            RoadEventType::SpecialEvent => "SPECIAL_EVENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CLOSURE" => Some(RoadEventType::Closure),
            "RESTRICTION" => Some(RoadEventType::Restriction),
            "CONSTRUCTION" => Some(RoadEventType::Construction),
            "INCIDENT" => Some(RoadEventType::Incident),
            "WEATHER_CLOSURE" => Some(RoadEventType::WeatherClosure),
            "CHAIN_LAW" => Some(RoadEventType::ChainLaw),
            "SPECIAL_EVENT" => Some(RoadEventType::SpecialEvent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    RoadHazard,
    ClosureUpdate,
    WeatherCondition,
    WaitTime,
    ParkingFull,
    Other,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::RoadHazard => "ROAD_HAZARD",
            ReportType::ClosureUpdate => "CLOSURE_UPDATE",
            ReportType::WeatherCondition => "WEATHER_CONDITION",
            ReportType::WaitTime => "WAIT_TIME",
            ReportType::ParkingFull => "PARKING_FULL",
            ReportType::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROAD_HAZARD" => Some(ReportType::RoadHazard),
            "CLOSURE_UPDATE" => Some(ReportType::ClosureUpdate),
            "WEATHER_CONDITION" => Some(ReportType::WeatherCondition),
            "WAIT_TIME" => Some(ReportType::WaitTime),
            "PARKING_FULL" => Some(ReportType::ParkingFull),
            "OTHER" => Some(ReportType::Other),
            _ => None,
        }
    }

    /// How long a report of this type stays live after submission.
    pub fn expiry_hours(self) -> i64 {
        match self {
            ReportType::RoadHazard => 4,
            ReportType::ClosureUpdate => 8,
            ReportType::WeatherCondition => 4,
            ReportType::WaitTime => 2,
            ReportType::ParkingFull => 2,
            ReportType::Other => 4,
        }
    }
}

/// A road event row. `geometry` is serialized GeoJSON (ST_AsGeoJSON output).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RoadEvent {
    pub id: Uuid,
    pub source: String,
    pub source_event_id: String,
    pub state: String,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub description: Option<String>,
    pub direction: Option<String>,
    pub route_name: Option<String>,
    pub geometry: String,
    pub location_description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub expected_end_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub vehicle_impact: Option<String>,
    pub workers_present: Option<bool>,
    pub vehicle_restrictions: serde_json::Value,
    pub detour_description: Option<String>,
    pub source_feed_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A weather alert row. `geometry` is serialized GeoJSON, null until the
/// zone resolver attaches one for alerts published without geometry.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WeatherAlert {
    pub id: Uuid,
    pub nws_id: String,
    pub event: String,
    pub severity: String,
    pub urgency: Option<String>,
    pub certainty: Option<String>,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub instruction: Option<String>,
    pub area_description: String,
    pub affected_zones: serde_json::Value,
    pub geometry: Option<String>,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub sender_name: Option<String>,
    pub wind_speed: Option<String>,
    pub snow_amount: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CommunityReport {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub report_type: String,
    pub title: String,
    pub description: Option<String>,
    /// Serialized GeoJSON Point.
    pub location: String,
    pub location_description: Option<String>,
    pub route_name: Option<String>,
    pub state: Option<String>,
    pub severity: String,
    pub upvotes: i32,
    pub downvotes: i32,
    pub moderation_status: String,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Health record for one registered feed. Exactly one row per feed, created
/// lazily on first ingest.
#[derive(Debug, Clone, Serialize, FromRow, utoipa::ToSchema)]
pub struct FeedStatus {
    pub id: Uuid,
    pub feed_name: String,
    pub feed_url: String,
    pub state: Option<String>,
    pub status: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub record_count: Option<i32>,
    pub avg_fetch_ms: Option<i32>,
    pub is_enabled: bool,
    pub refresh_interval_minutes: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ParkingFacility {
    pub id: Uuid,
    pub source: String,
    pub source_facility_id: String,
    pub name: String,
    pub state: String,
    pub highway: Option<String>,
    pub direction: Option<String>,
    /// Serialized GeoJSON Point.
    pub location: String,
    pub total_spaces: Option<i32>,
    pub available_spaces: Option<i32>,
    pub trend: Option<String>,
    pub amenities: serde_json::Value,
    pub last_updated_at: DateTime<Utc>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_rank_ordering() {
        assert!(Severity::Critical.rank() > Severity::Warning.rank());
        assert!(Severity::Warning.rank() > Severity::Advisory.rank());
        assert!(Severity::Advisory.rank() > Severity::Info.rank());
    }

    #[test]
    fn test_severity_rank_both_vocabularies() {
        assert_eq!(severity_rank("CRITICAL"), severity_rank("Extreme"));
        assert_eq!(severity_rank("WARNING"), severity_rank("Severe"));
        assert_eq!(severity_rank("ADVISORY"), severity_rank("Moderate"));
        assert_eq!(severity_rank("INFO"), severity_rank("Minor"));
        assert_eq!(severity_rank("Unknown"), 0);
        assert_eq!(severity_rank(""), 0);
    }

    #[test]
    fn test_severity_round_trip() {
        for s in [
            Severity::Critical,
            Severity::Warning,
            Severity::Advisory,
            Severity::Info,
        ] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
        assert_eq!(Severity::parse("nonsense"), None);
    }

    #[test]
    fn test_report_type_expiry_hours() {
        assert_eq!(ReportType::ClosureUpdate.expiry_hours(), 8);
        assert_eq!(ReportType::WaitTime.expiry_hours(), 2);
        assert_eq!(ReportType::ParkingFull.expiry_hours(), 2);
        assert_eq!(ReportType::Other.expiry_hours(), 4);
    }

    #[test]
    fn test_road_event_type_round_trip() {
        for t in [
            RoadEventType::Closure,
            RoadEventType::Restriction,
            RoadEventType::Construction,
            RoadEventType::Incident,
            RoadEventType::WeatherClosure,
            RoadEventType::ChainLaw,
            RoadEventType::SpecialEvent,
        ] {
            assert_eq!(RoadEventType::parse(t.as_str()), Some(t));
        }
    }
}
