use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    CommunityReport, FeedStatus, ParkingFacility, RoadEvent, WeatherAlert,
};
use crate::services::ingest::{NormalizedAlert, NormalizedEvent};

/// Meters per statute mile, used for geography buffering.
pub(crate) const METERS_PER_MILE: f64 = 1609.344;

/// road_events SELECT column list. Geometry is returned as GeoJSON text.
/// Keep in sync with the `RoadEvent` model struct in `models.rs`.
const ROAD_EVENT_COLS: &str = "\
    id, source, source_event_id, state, event_type, severity, title, description, \
    direction, route_name, ST_AsGeoJSON(geometry) AS geometry, location_description, \
    started_at, expected_end_at, last_updated_at, vehicle_impact, workers_present, \
    vehicle_restrictions, detour_description, source_feed_url, is_active, \
    created_at, updated_at";

/// weather_alerts SELECT column list.
const WEATHER_ALERT_COLS: &str = "\
    id, nws_id, event, severity, urgency, certainty, headline, description, \
    instruction, area_description, affected_zones, ST_AsGeoJSON(geometry) AS geometry, \
    onset, expires, last_updated_at, sender_name, wind_speed, snow_amount, \
    is_active, raw, created_at";

/// community_reports SELECT column list.
const REPORT_COLS: &str = "\
    id, user_id, report_type, title, description, ST_AsGeoJSON(location) AS location, \
    location_description, route_name, state, severity, upvotes, downvotes, \
    moderation_status, is_active, expires_at, created_at";

/// parking_facilities SELECT column list.
const PARKING_COLS: &str = "\
    id, source, source_facility_id, name, state, highway, direction, \
    ST_AsGeoJSON(location) AS location, total_spaces, available_spaces, trend, \
    amenities, last_updated_at, is_active";

/// Vote-score floor for soft moderation: reports scoring below this are
/// hidden from list and corridor queries.
pub(crate) const REPORT_SCORE_FLOOR: i32 = -2;

// ---------------------------------------------------------------------------
// Road event ingest
// ---------------------------------------------------------------------------

/// Upsert one normalized road event keyed by (source, source_event_id),
/// refreshing every mutable field and re-activating the row.
///
/// Returns `true` when a new row was inserted, `false` when an existing row
/// was updated (`xmax = 0` holds only for freshly inserted tuples).
pub(crate) async fn upsert_road_event(
    pool: &PgPool,
    ev: &NormalizedEvent,
    feed_url: &str,
) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(
        "INSERT INTO road_events (
            id, source, source_event_id, state, event_type, severity, title,
            description, direction, route_name, geometry, location_description,
            started_at, expected_end_at, last_updated_at, vehicle_impact,
            workers_present, vehicle_restrictions, detour_description,
            source_feed_url, is_active, raw
         )
         VALUES (
            gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9,
            ST_MakeValid(ST_SetSRID(ST_GeomFromGeoJSON($10::text), 4326)),
            $11, $12, $13, NOW(), $14, $15, $16, $17, $18, TRUE, $19
         )
         ON CONFLICT (source, source_event_id) DO UPDATE SET
             state = EXCLUDED.state,
             event_type = EXCLUDED.event_type,
             severity = EXCLUDED.severity,
             title = EXCLUDED.title,
             description = EXCLUDED.description,
             direction = EXCLUDED.direction,
             route_name = EXCLUDED.route_name,
             geometry = EXCLUDED.geometry,
             location_description = EXCLUDED.location_description,
             started_at = EXCLUDED.started_at,
             expected_end_at = EXCLUDED.expected_end_at,
             last_updated_at = NOW(),
             vehicle_impact = EXCLUDED.vehicle_impact,
             workers_present = EXCLUDED.workers_present,
             vehicle_restrictions = EXCLUDED.vehicle_restrictions,
             detour_description = EXCLUDED.detour_description,
             source_feed_url = EXCLUDED.source_feed_url,
             is_active = TRUE,
             raw = EXCLUDED.raw,
             updated_at = NOW()
         RETURNING (xmax = 0) AS inserted",
    )
    .bind(&ev.source)
    .bind(&ev.source_event_id)
    .bind(&ev.state)
    .bind(ev.event_type.as_str())
    .bind(ev.severity.as_str())
    .bind(&ev.title)
    .bind(&ev.description)
    .bind(&ev.direction)
    .bind(&ev.route_name)
    .bind(ev.geometry.to_string())
    .bind(&ev.location_description)
    .bind(ev.started_at)
    .bind(ev.expected_end_at)
    .bind(&ev.vehicle_impact)
    .bind(ev.workers_present)
    .bind(&ev.vehicle_restrictions)
    .bind(&ev.detour_description)
    .bind(feed_url)
    .bind(&ev.raw)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Reconciliation: deactivate every active row for `source` whose
/// source_event_id was not in the latest fetch. An empty `keep` set is valid
/// and deactivates everything the feed owns.
pub(crate) async fn deactivate_missing_road_events(
    pool: &PgPool,
    source: &str,
    keep: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE road_events
         SET is_active = FALSE, updated_at = NOW()
         WHERE source = $1
           AND is_active
           AND NOT (source_event_id = ANY($2))",
    )
    .bind(source)
    .bind(keep)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Retention purge for road events whose end time elapsed more than
/// `retention_days` ago. Only called when retention is enabled.
pub(crate) async fn purge_old_road_events(
    pool: &PgPool,
    retention_days: u32,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM road_events
         WHERE expected_end_at IS NOT NULL
           AND expected_end_at < NOW() - $1 * INTERVAL '1 day'",
    )
    .bind(retention_days as f64)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Weather alert ingest
// ---------------------------------------------------------------------------

/// Upsert one normalized NWS alert keyed by nws_id. Geometry may be null;
/// the zone resolver attaches a merged MultiPolygon before upsert when the
/// upstream alert carried none.
pub(crate) async fn upsert_weather_alert(
    pool: &PgPool,
    alert: &NormalizedAlert,
) -> Result<bool, sqlx::Error> {
    let geometry_json = alert.geometry.as_ref().map(|g| g.to_string());
    let row: (bool,) = sqlx::query_as(
        "INSERT INTO weather_alerts (
            id, nws_id, event, severity, urgency, certainty, headline,
            description, instruction, area_description, affected_zones,
            geometry, onset, expires, last_updated_at, sender_name,
            wind_speed, snow_amount, is_active, raw
         )
         VALUES (
            gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
            ST_MakeValid(ST_SetSRID(ST_GeomFromGeoJSON($11::text), 4326)),
            $12, $13, NOW(), $14, $15, $16, TRUE, $17
         )
         ON CONFLICT (nws_id) DO UPDATE SET
             event = EXCLUDED.event,
             severity = EXCLUDED.severity,
             urgency = EXCLUDED.urgency,
             certainty = EXCLUDED.certainty,
             headline = EXCLUDED.headline,
             description = EXCLUDED.description,
             instruction = EXCLUDED.instruction,
             area_description = EXCLUDED.area_description,
             affected_zones = EXCLUDED.affected_zones,
             geometry = COALESCE(EXCLUDED.geometry, weather_alerts.geometry),
             onset = EXCLUDED.onset,
             expires = EXCLUDED.expires,
             last_updated_at = NOW(),
             sender_name = EXCLUDED.sender_name,
             wind_speed = EXCLUDED.wind_speed,
             snow_amount = EXCLUDED.snow_amount,
             is_active = TRUE,
             raw = EXCLUDED.raw
         RETURNING (xmax = 0) AS inserted",
    )
    .bind(&alert.nws_id)
    .bind(&alert.event)
    .bind(&alert.severity)
    .bind(&alert.urgency)
    .bind(&alert.certainty)
    .bind(&alert.headline)
    .bind(&alert.description)
    .bind(&alert.instruction)
    .bind(&alert.area_description)
    .bind(serde_json::Value::from(alert.affected_zones.clone()))
    .bind(geometry_json)
    .bind(alert.onset)
    .bind(alert.expires)
    .bind(&alert.sender_name)
    .bind(&alert.wind_speed)
    .bind(&alert.snow_amount)
    .bind(&alert.raw)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Deactivate active alerts not present in the latest fetch.
pub(crate) async fn deactivate_missing_weather_alerts(
    pool: &PgPool,
    keep: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE weather_alerts
         SET is_active = FALSE
         WHERE is_active AND NOT (nws_id = ANY($1))",
    )
    .bind(keep)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Deactivate alerts whose expiry has passed.
pub(crate) async fn deactivate_expired_weather_alerts(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE weather_alerts
         SET is_active = FALSE
         WHERE is_active AND expires IS NOT NULL AND expires < NOW()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Delete alerts more than 24 hours past expiry.
pub(crate) async fn purge_expired_weather_alerts(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM weather_alerts
         WHERE expires IS NOT NULL AND expires < NOW() - INTERVAL '24 hours'",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Feed status + ingestion logs + usage events
// ---------------------------------------------------------------------------

pub(crate) async fn upsert_feed_status_success(
    pool: &PgPool,
    feed_name: &str,
    feed_url: &str,
    state: Option<&str>,
    record_count: i32,
    avg_fetch_ms: i32,
    refresh_interval_minutes: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO feed_status (
            id, feed_name, feed_url, state, status, last_success_at,
            record_count, avg_fetch_ms, refresh_interval_minutes, updated_at
         )
         VALUES (gen_random_uuid(), $1, $2, $3, 'healthy', NOW(), $4, $5, $6, NOW())
         ON CONFLICT (feed_name) DO UPDATE SET
             feed_url = EXCLUDED.feed_url,
             state = EXCLUDED.state,
             status = 'healthy',
             last_success_at = NOW(),
             record_count = EXCLUDED.record_count,
             avg_fetch_ms = EXCLUDED.avg_fetch_ms,
             refresh_interval_minutes = EXCLUDED.refresh_interval_minutes,
             updated_at = NOW()",
    )
    .bind(feed_name)
    .bind(feed_url)
    .bind(state)
    .bind(record_count)
    .bind(avg_fetch_ms)
    .bind(refresh_interval_minutes)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn upsert_feed_status_failure(
    pool: &PgPool,
    feed_name: &str,
    feed_url: &str,
    state: Option<&str>,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO feed_status (
            id, feed_name, feed_url, state, status, last_error_at,
            last_error_message, updated_at
         )
         VALUES (gen_random_uuid(), $1, $2, $3, 'down', NOW(), $4, NOW())
         ON CONFLICT (feed_name) DO UPDATE SET
             status = 'down',
             last_error_at = NOW(),
             last_error_message = EXCLUDED.last_error_message,
             updated_at = NOW()",
    )
    .bind(feed_name)
    .bind(feed_url)
    .bind(state)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn list_feed_status(pool: &PgPool) -> Result<Vec<FeedStatus>, sqlx::Error> {
    sqlx::query_as::<_, FeedStatus>(
        "SELECT id, feed_name, feed_url, state, status, last_success_at, last_error_at,
                last_error_message, record_count, avg_fetch_ms, is_enabled,
                refresh_interval_minutes, updated_at
         FROM feed_status
         ORDER BY feed_name",
    )
    .fetch_all(pool)
    .await
}

pub(crate) struct IngestionLogParams<'a> {
    pub feed_name: &'a str,
    pub status: &'a str,
    pub duration_ms: i32,
    pub inserted_count: i32,
    pub updated_count: i32,
    pub deactivated_count: i32,
    pub error_count: i32,
    pub error_message: Option<&'a str>,
}

pub(crate) async fn insert_ingestion_log(
    pool: &PgPool,
    p: IngestionLogParams<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ingestion_logs (
            id, feed_name, status, duration_ms, inserted_count, updated_count,
            deactivated_count, error_count, error_message
         )
         VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(p.feed_name)
    .bind(p.status)
    .bind(p.duration_ms)
    .bind(p.inserted_count)
    .bind(p.updated_count)
    .bind(p.deactivated_count)
    .bind(p.error_count)
    .bind(p.error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append a usage event. Failures are warned and swallowed — the event
/// stream is observability, never on the request's critical path.
pub(crate) async fn record_usage_event(
    pool: &PgPool,
    event_type: &str,
    metadata: serde_json::Value,
    user_id: Option<Uuid>,
) {
    let result = sqlx::query(
        "INSERT INTO usage_events (id, event_type, metadata, user_id)
         VALUES (gen_random_uuid(), $1, $2, $3)",
    )
    .bind(event_type)
    .bind(metadata)
    .bind(user_id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!("Failed to record {} usage event: {}", event_type, e);
    }
}

// ---------------------------------------------------------------------------
// Hazard list queries (bbox surface)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct BboxFilter {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

pub(crate) struct RoadEventListFilter<'a> {
    pub bbox: Option<BboxFilter>,
    pub active_only: bool,
    /// Allowed severity values (floor expansion already applied). None = all.
    pub severities: Option<&'a [String]>,
    pub state: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub limit: i64,
    pub offset: i64,
}

/// List road events with optional bbox/severity/state/type filters.
/// Returns the page plus the unpaged total for the same filter set.
pub(crate) async fn list_road_events(
    pool: &PgPool,
    f: &RoadEventListFilter<'_>,
) -> Result<(Vec<RoadEvent>, i64), sqlx::Error> {
    const WHERE_CLAUSE: &str = "\
        ($1::float8 IS NULL OR ST_Intersects(geometry, ST_MakeEnvelope($1, $2, $3, $4, 4326)))
        AND (NOT $5 OR (is_active AND (expected_end_at IS NULL OR expected_end_at > NOW())))
        AND ($6::text[] IS NULL OR severity = ANY($6))
        AND ($7::text IS NULL OR state = $7)
        AND ($8::text IS NULL OR event_type = $8)";

    let (west, south, east, north) = match f.bbox {
        Some(b) => (Some(b.west), Some(b.south), Some(b.east), Some(b.north)),
        None => (None, None, None, None),
    };

    let query = format!(
        "SELECT {ROAD_EVENT_COLS}
         FROM road_events
         WHERE {WHERE_CLAUSE}
         ORDER BY CASE severity
                      WHEN 'CRITICAL' THEN 4
                      WHEN 'WARNING' THEN 3
                      WHEN 'ADVISORY' THEN 2
                      ELSE 1
                  END DESC,
                  last_updated_at DESC
         LIMIT $9 OFFSET $10"
    );
    let events = sqlx::query_as::<_, RoadEvent>(&query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .bind(f.severities)
        .bind(f.state)
        .bind(f.event_type)
        .bind(f.limit)
        .bind(f.offset)
        .fetch_all(pool)
        .await?;

    let count_query = format!("SELECT COUNT(*) FROM road_events WHERE {WHERE_CLAUSE}");
    let total: (i64,) = sqlx::query_as(&count_query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .bind(f.severities)
        .bind(f.state)
        .bind(f.event_type)
        .fetch_one(pool)
        .await?;

    Ok((events, total.0))
}

/// One DBSCAN cluster of active road events.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventCluster {
    /// GeoJSON Point for the cluster centroid.
    pub geometry: String,
    pub count: i64,
    pub has_critical: bool,
    pub has_warning: bool,
}

/// Cluster active road events inside a bbox with ST_ClusterDBSCAN.
/// `eps` is in degrees and tightens as zoom increases.
pub(crate) async fn cluster_road_events(
    pool: &PgPool,
    bbox: BboxFilter,
    eps: f64,
) -> Result<Vec<EventCluster>, sqlx::Error> {
    sqlx::query_as::<_, EventCluster>(
        "WITH pts AS (
            SELECT severity, ST_Centroid(geometry) AS pt
            FROM road_events
            WHERE is_active
              AND (expected_end_at IS NULL OR expected_end_at > NOW())
              AND ST_Intersects(geometry, ST_MakeEnvelope($1, $2, $3, $4, 4326))
         ),
         clustered AS (
            SELECT severity, pt,
                   ST_ClusterDBSCAN(pt, eps := $5, minpoints := 1) OVER () AS cluster_id
            FROM pts
         )
         SELECT ST_AsGeoJSON(ST_Centroid(ST_Collect(pt))) AS geometry,
                COUNT(*) AS count,
                BOOL_OR(severity = 'CRITICAL') AS has_critical,
                BOOL_OR(severity = 'WARNING') AS has_warning
         FROM clustered
         GROUP BY cluster_id
         ORDER BY count DESC",
    )
    .bind(bbox.west)
    .bind(bbox.south)
    .bind(bbox.east)
    .bind(bbox.north)
    .bind(eps)
    .fetch_all(pool)
    .await
}

pub(crate) struct AlertListFilter {
    pub bbox: Option<BboxFilter>,
    pub active_only: bool,
    pub limit: i64,
    pub offset: i64,
}

pub(crate) async fn list_weather_alerts(
    pool: &PgPool,
    f: &AlertListFilter,
) -> Result<(Vec<WeatherAlert>, i64), sqlx::Error> {
    const WHERE_CLAUSE: &str = "\
        ($1::float8 IS NULL OR (geometry IS NOT NULL
            AND ST_Intersects(geometry, ST_MakeEnvelope($1, $2, $3, $4, 4326))))
        AND (NOT $5 OR (is_active AND (expires IS NULL OR expires > NOW())))";

    let (west, south, east, north) = match f.bbox {
        Some(b) => (Some(b.west), Some(b.south), Some(b.east), Some(b.north)),
        None => (None, None, None, None),
    };

    let query = format!(
        "SELECT {WEATHER_ALERT_COLS}
         FROM weather_alerts
         WHERE {WHERE_CLAUSE}
         ORDER BY CASE severity
                      WHEN 'Extreme' THEN 4
                      WHEN 'Severe' THEN 3
                      WHEN 'Moderate' THEN 2
                      WHEN 'Minor' THEN 1
                      ELSE 0
                  END DESC,
                  last_updated_at DESC
         LIMIT $6 OFFSET $7"
    );
    let alerts = sqlx::query_as::<_, WeatherAlert>(&query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .bind(f.limit)
        .bind(f.offset)
        .fetch_all(pool)
        .await?;

    let count_query = format!("SELECT COUNT(*) FROM weather_alerts WHERE {WHERE_CLAUSE}");
    let total: (i64,) = sqlx::query_as(&count_query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .fetch_one(pool)
        .await?;

    Ok((alerts, total.0))
}

// ---------------------------------------------------------------------------
// Corridor build + corridor intersection queries
// ---------------------------------------------------------------------------

/// Buffer a route LineString by `radius_miles` on the geography (so the
/// radius is metric, not degree-distorted) and return the corridor polygon
/// as GeoJSON text.
pub(crate) async fn build_corridor(
    pool: &PgPool,
    route_wkt: &str,
    radius_miles: f64,
) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as(
        "SELECT ST_AsGeoJSON(
            ST_Buffer(ST_GeomFromText($1, 4326)::geography, $2)::geometry
         )",
    )
    .bind(route_wkt)
    .bind(radius_miles * METERS_PER_MILE)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Road event hit inside a route corridor, with its fractional position
/// along the route (ST_LineLocatePoint of the hazard centroid).
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CorridorRoadEvent {
    pub id: Uuid,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub description: Option<String>,
    pub direction: Option<String>,
    pub route_name: Option<String>,
    pub state: String,
    pub geometry: String,
    pub started_at: Option<DateTime<Utc>>,
    pub expected_end_at: Option<DateTime<Utc>>,
    pub position: f64,
}

pub(crate) async fn road_events_in_corridor(
    pool: &PgPool,
    corridor_geojson: &str,
    route_wkt: &str,
    limit: i64,
) -> Result<Vec<CorridorRoadEvent>, sqlx::Error> {
    sqlx::query_as::<_, CorridorRoadEvent>(
        "SELECT id, event_type, severity, title, description, direction, route_name,
                state, ST_AsGeoJSON(geometry) AS geometry, started_at, expected_end_at,
                ST_LineLocatePoint(
                    ST_GeomFromText($2, 4326), ST_Centroid(geometry)
                ) AS position
         FROM road_events
         WHERE is_active
           AND (expected_end_at IS NULL OR expected_end_at > NOW())
           AND ST_Intersects(geometry, ST_SetSRID(ST_GeomFromGeoJSON($1::text), 4326))
         LIMIT $3",
    )
    .bind(corridor_geojson)
    .bind(route_wkt)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CorridorWeatherAlert {
    pub id: Uuid,
    pub nws_id: String,
    pub event: String,
    pub severity: String,
    pub headline: Option<String>,
    pub area_description: String,
    pub geometry: String,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub position: f64,
}

pub(crate) async fn weather_alerts_in_corridor(
    pool: &PgPool,
    corridor_geojson: &str,
    route_wkt: &str,
    limit: i64,
) -> Result<Vec<CorridorWeatherAlert>, sqlx::Error> {
    sqlx::query_as::<_, CorridorWeatherAlert>(
        "SELECT id, nws_id, event, severity, headline, area_description,
                ST_AsGeoJSON(geometry) AS geometry, onset, expires,
                ST_LineLocatePoint(
                    ST_GeomFromText($2, 4326), ST_Centroid(geometry)
                ) AS position
         FROM weather_alerts
         WHERE is_active
           AND (expires IS NULL OR expires > NOW())
           AND geometry IS NOT NULL
           AND ST_Intersects(geometry, ST_SetSRID(ST_GeomFromGeoJSON($1::text), 4326))
         LIMIT $3",
    )
    .bind(corridor_geojson)
    .bind(route_wkt)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CorridorReport {
    pub id: Uuid,
    pub report_type: String,
    pub severity: String,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub upvotes: i32,
    pub downvotes: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub position: f64,
}

pub(crate) async fn reports_in_corridor(
    pool: &PgPool,
    corridor_geojson: &str,
    route_wkt: &str,
    limit: i64,
) -> Result<Vec<CorridorReport>, sqlx::Error> {
    sqlx::query_as::<_, CorridorReport>(
        "SELECT id, report_type, severity, title, description,
                ST_AsGeoJSON(location) AS location, upvotes, downvotes,
                created_at, expires_at,
                ST_LineLocatePoint(ST_GeomFromText($2, 4326), location) AS position
         FROM community_reports
         WHERE is_active
           AND (expires_at IS NULL OR expires_at > NOW())
           AND (upvotes - downvotes) >= $4
           AND moderation_status <> 'removed'
           AND ST_Intersects(location, ST_SetSRID(ST_GeomFromGeoJSON($1::text), 4326))
         LIMIT $3",
    )
    .bind(corridor_geojson)
    .bind(route_wkt)
    .bind(limit)
    .bind(REPORT_SCORE_FLOOR)
    .fetch_all(pool)
    .await
}

// ---------------------------------------------------------------------------
// Community reports
// ---------------------------------------------------------------------------

pub(crate) struct InsertReportParams<'a> {
    pub user_id: Option<Uuid>,
    pub report_type: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_description: Option<&'a str>,
    pub route_name: Option<&'a str>,
    pub state: Option<&'a str>,
    pub severity: &'a str,
    pub expires_at: DateTime<Utc>,
}

pub(crate) async fn insert_report(
    pool: &PgPool,
    p: InsertReportParams<'_>,
) -> Result<CommunityReport, sqlx::Error> {
    let query = format!(
        "INSERT INTO community_reports (
            id, user_id, report_type, title, description, location,
            location_description, route_name, state, severity, expires_at
         )
         VALUES (
            gen_random_uuid(), $1, $2, $3, $4,
            ST_SetSRID(ST_MakePoint($5, $6), 4326),
            $7, $8, $9, $10, $11
         )
         RETURNING {REPORT_COLS}"
    );
    sqlx::query_as::<_, CommunityReport>(&query)
        .bind(p.user_id)
        .bind(p.report_type)
        .bind(p.title)
        .bind(p.description)
        .bind(p.longitude)
        .bind(p.latitude)
        .bind(p.location_description)
        .bind(p.route_name)
        .bind(p.state)
        .bind(p.severity)
        .bind(p.expires_at)
        .fetch_one(pool)
        .await
}

pub(crate) struct ReportListFilter {
    pub bbox: Option<BboxFilter>,
    pub active_only: bool,
    pub limit: i64,
    pub offset: i64,
}

/// List reports with soft moderation applied: removed rows and rows voted
/// below the score floor are excluded.
pub(crate) async fn list_reports(
    pool: &PgPool,
    f: &ReportListFilter,
) -> Result<(Vec<CommunityReport>, i64), sqlx::Error> {
    const WHERE_CLAUSE: &str = "\
        ($1::float8 IS NULL OR ST_Intersects(location, ST_MakeEnvelope($1, $2, $3, $4, 4326)))
        AND (NOT $5 OR (is_active AND expires_at > NOW()))
        AND (upvotes - downvotes) >= $6
        AND moderation_status <> 'removed'";

    let (west, south, east, north) = match f.bbox {
        Some(b) => (Some(b.west), Some(b.south), Some(b.east), Some(b.north)),
        None => (None, None, None, None),
    };

    let query = format!(
        "SELECT {REPORT_COLS}
         FROM community_reports
         WHERE {WHERE_CLAUSE}
         ORDER BY created_at DESC
         LIMIT $7 OFFSET $8"
    );
    let reports = sqlx::query_as::<_, CommunityReport>(&query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .bind(REPORT_SCORE_FLOOR)
        .bind(f.limit)
        .bind(f.offset)
        .fetch_all(pool)
        .await?;

    let count_query = format!("SELECT COUNT(*) FROM community_reports WHERE {WHERE_CLAUSE}");
    let total: (i64,) = sqlx::query_as(&count_query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .bind(REPORT_SCORE_FLOOR)
        .fetch_one(pool)
        .await?;

    Ok((reports, total.0))
}

/// Result of applying a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VoteApplyResult {
    NotFound,
    Removed,
    Applied(VoteTally),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VoteTally {
    pub upvotes: i32,
    pub downvotes: i32,
    /// The user's vote after this operation; None when a toggle cleared it.
    pub user_vote: Option<String>,
}

/// Apply one vote atomically. The report row is locked `FOR UPDATE` for the
/// whole transaction so concurrent votes on the same report serialize.
///
/// State machine per (prior vote, new vote):
/// - none    → insert vote, increment the matching counter
/// - same    → delete vote, decrement the counter (toggle off)
/// - opposite→ flip vote, increment new counter, decrement old one
///
/// Counter decrements are clamped with GREATEST(0, ...) so the non-negative
/// invariant survives even a previously drifted row.
pub(crate) async fn vote_on_report(
    pool: &PgPool,
    report_id: Uuid,
    user_id: Uuid,
    vote: &str,
) -> Result<VoteApplyResult, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let report: Option<(String,)> = sqlx::query_as(
        "SELECT moderation_status FROM community_reports WHERE id = $1 FOR UPDATE",
    )
    .bind(report_id)
    .fetch_optional(&mut *tx)
    .await?;

    let moderation_status = match report {
        Some((status,)) => status,
        None => return Ok(VoteApplyResult::NotFound),
    };
    if moderation_status == "removed" {
        return Ok(VoteApplyResult::Removed);
    }

    let prior: Option<(String,)> =
        sqlx::query_as("SELECT vote FROM report_votes WHERE report_id = $1 AND user_id = $2")
            .bind(report_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

    let user_vote = match prior.as_ref().map(|(v,)| v.as_str()) {
        None => {
            sqlx::query(
                "INSERT INTO report_votes (id, report_id, user_id, vote)
                 VALUES (gen_random_uuid(), $1, $2, $3)",
            )
            .bind(report_id)
            .bind(user_id)
            .bind(vote)
            .execute(&mut *tx)
            .await?;
            adjust_vote_counter(&mut tx, report_id, vote, 1).await?;
            Some(vote.to_string())
        }
        Some(prior_vote) if prior_vote == vote => {
            sqlx::query("DELETE FROM report_votes WHERE report_id = $1 AND user_id = $2")
                .bind(report_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            adjust_vote_counter(&mut tx, report_id, vote, -1).await?;
            None
        }
        Some(prior_vote) => {
            let prior_vote = prior_vote.to_string();
            sqlx::query(
                "UPDATE report_votes SET vote = $3, created_at = NOW()
                 WHERE report_id = $1 AND user_id = $2",
            )
            .bind(report_id)
            .bind(user_id)
            .bind(vote)
            .execute(&mut *tx)
            .await?;
            adjust_vote_counter(&mut tx, report_id, vote, 1).await?;
            adjust_vote_counter(&mut tx, report_id, &prior_vote, -1).await?;
            Some(vote.to_string())
        }
    };

    let tally: (i32, i32) =
        sqlx::query_as("SELECT upvotes, downvotes FROM community_reports WHERE id = $1")
            .bind(report_id)
            .fetch_one(&mut *tx)
            .await?;

    tx.commit().await?;

    Ok(VoteApplyResult::Applied(VoteTally {
        upvotes: tally.0,
        downvotes: tally.1,
        user_vote,
    }))
}

async fn adjust_vote_counter(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    report_id: Uuid,
    vote: &str,
    delta: i32,
) -> Result<(), sqlx::Error> {
    let sql = match (vote, delta >= 0) {
        ("up", true) => "UPDATE community_reports SET upvotes = upvotes + 1 WHERE id = $1",
        ("up", false) => {
            "UPDATE community_reports SET upvotes = GREATEST(0, upvotes - 1) WHERE id = $1"
        }
        ("down", true) => "UPDATE community_reports SET downvotes = downvotes + 1 WHERE id = $1",
        ("down", false) => {
            "UPDATE community_reports SET downvotes = GREATEST(0, downvotes - 1) WHERE id = $1"
        }
        _ => return Ok(()),
    };
    sqlx::query(sql).bind(report_id).execute(&mut **tx).await?;
    Ok(())
}

/// Expire reports whose lifetime elapsed. Called on every scheduler tick.
pub(crate) async fn expire_old_reports(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE community_reports
         SET is_active = FALSE
         WHERE is_active AND expires_at < NOW()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Parking facilities
// ---------------------------------------------------------------------------

pub(crate) struct ParkingListFilter {
    pub bbox: Option<BboxFilter>,
    pub active_only: bool,
    pub limit: i64,
    pub offset: i64,
}

pub(crate) async fn list_parking_facilities(
    pool: &PgPool,
    f: &ParkingListFilter,
) -> Result<(Vec<ParkingFacility>, i64), sqlx::Error> {
    const WHERE_CLAUSE: &str = "\
        ($1::float8 IS NULL OR ST_Intersects(location, ST_MakeEnvelope($1, $2, $3, $4, 4326)))
        AND (NOT $5 OR is_active)";

    let (west, south, east, north) = match f.bbox {
        Some(b) => (Some(b.west), Some(b.south), Some(b.east), Some(b.north)),
        None => (None, None, None, None),
    };

    let query = format!(
        "SELECT {PARKING_COLS}
         FROM parking_facilities
         WHERE {WHERE_CLAUSE}
         ORDER BY state, name
         LIMIT $6 OFFSET $7"
    );
    let facilities = sqlx::query_as::<_, ParkingFacility>(&query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .bind(f.limit)
        .bind(f.offset)
        .fetch_all(pool)
        .await?;

    let count_query = format!("SELECT COUNT(*) FROM parking_facilities WHERE {WHERE_CLAUSE}");
    let total: (i64,) = sqlx::query_as(&count_query)
        .bind(west)
        .bind(south)
        .bind(east)
        .bind(north)
        .bind(f.active_only)
        .fetch_one(pool)
        .await?;

    Ok((facilities, total.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_score_floor_matches_soft_moderation() {
        // A report at exactly the floor stays visible; one below it is hidden.
        assert_eq!(REPORT_SCORE_FLOOR, -2);
    }

    #[test]
    fn test_meters_per_mile() {
        assert!((METERS_PER_MILE - 1609.344).abs() < f64::EPSILON);
    }
}
