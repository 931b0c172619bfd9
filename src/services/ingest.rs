//! Feed ingestion engine.
//!
//! One template shared by every adapter: cache-or-fetch the raw payload,
//! normalize, upsert, reconcile (deactivate rows the upstream stopped
//! returning), and record feed health. The NWS variant adds zone-geometry
//! resolution before upsert and an expiry-based purge after reconciliation.
//!
//! Failures after the run starts are recorded as a `down` feed status plus a
//! failed ingestion log, then propagated so the scheduler can isolate the
//! feed from the rest of the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::db::models::{RoadEventType, Severity};
use crate::db::queries::{self, IngestionLogParams};
use crate::errors::AppError;
use crate::services::cache::Cache;
use crate::services::nws::NwsAdapter;
use crate::services::zones;

/// A registered upstream feed: identity plus fetch/normalize capabilities.
///
/// The WZDx family is one parameterized implementation configured by
/// URL + state; NWS is its own implementation. Identity is stable across
/// runs — `name()` keys the feed's rows, status, and cache entries.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Unique, stable feed name (e.g. "wzdx-co").
    fn name(&self) -> &str;
    fn url(&self) -> &str;
    /// Two-letter state code, or "" for nationwide feeds.
    fn state(&self) -> &str;
    /// TTL for the raw-payload cache entry.
    fn cache_ttl_secs(&self) -> u64;

    /// One HTTP GET, bypassing any local cache. Returns the raw payload.
    async fn fetch(&self) -> Result<String, AppError>;

    /// Parse the payload into normalized records; `None` entries are
    /// features without geometry. Missing optional fields never error;
    /// an unrecognizable envelope is `FEED_PARSE_ERROR`.
    fn normalize(&self, raw: &str) -> Result<Vec<Option<NormalizedEvent>>, AppError>;
}

/// A road event normalized out of any WZDx version.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub source: String,
    pub source_event_id: String,
    pub state: String,
    pub event_type: RoadEventType,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub direction: Option<String>,
    pub route_name: Option<String>,
    /// GeoJSON geometry (Point | LineString | MultiLineString | MultiPoint).
    pub geometry: serde_json::Value,
    pub location_description: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub expected_end_at: Option<DateTime<Utc>>,
    pub vehicle_impact: Option<String>,
    pub workers_present: Option<bool>,
    /// [{type, value?, unit?}]
    pub vehicle_restrictions: serde_json::Value,
    pub detour_description: Option<String>,
    pub raw: serde_json::Value,
}

/// A weather alert normalized from the NWS active-alerts feed.
#[derive(Debug, Clone)]
pub struct NormalizedAlert {
    pub nws_id: String,
    pub event: String,
    pub severity: String,
    pub urgency: Option<String>,
    pub certainty: Option<String>,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub instruction: Option<String>,
    pub area_description: String,
    /// Zone URLs to resolve when `geometry` is absent.
    pub affected_zones: Vec<String>,
    /// GeoJSON Polygon | MultiPolygon, if the alert was published with one.
    pub geometry: Option<serde_json::Value>,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub sender_name: Option<String>,
    pub wind_speed: Option<String>,
    pub snow_amount: Option<String>,
    pub raw: serde_json::Value,
}

/// Dependency handles for an ingest run. Created at process init, passed
/// explicitly — no process-global state.
#[derive(Clone)]
pub struct IngestDeps {
    pub pool: PgPool,
    pub cache: Cache,
    pub http: reqwest::Client,
    /// Recorded on the feed-status row so operators see the cadence.
    pub refresh_interval_minutes: u32,
}

/// Counters from one successful ingest.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub feed: String,
    pub record_count: usize,
    pub inserted: i32,
    pub updated: i32,
    pub deactivated: i64,
    pub duration_ms: i64,
    pub fetch_ms: i64,
}

fn raw_cache_key(feed_name: &str) -> String {
    format!("feed:{}:raw", feed_name)
}

/// Read the raw payload from cache, or fetch it and populate the cache.
/// Returns the payload plus the fetch duration (0 on a cache hit).
async fn raw_payload(
    deps: &IngestDeps,
    adapter: &dyn FeedAdapter,
) -> Result<(String, i64), AppError> {
    let key = raw_cache_key(adapter.name());
    if let Some(cached) = deps.cache.get(&key).await {
        tracing::debug!("Feed {}: using cached payload", adapter.name());
        return Ok((cached, 0));
    }

    let fetch_start = Utc::now();
    let raw = adapter.fetch().await?;
    let fetch_ms = (Utc::now() - fetch_start).num_milliseconds();

    deps.cache
        .set_ex(&key, &raw, adapter.cache_ttl_secs())
        .await;

    Ok((raw, fetch_ms))
}

/// Ingest one WZDx (road event) feed.
pub async fn ingest_road_feed(
    deps: &IngestDeps,
    adapter: &dyn FeedAdapter,
) -> Result<IngestOutcome, AppError> {
    let started = Utc::now();
    match ingest_road_feed_inner(deps, adapter, started).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            record_failure(deps, adapter.name(), adapter.url(), adapter.state(), started, &e).await;
            Err(e)
        }
    }
}

async fn ingest_road_feed_inner(
    deps: &IngestDeps,
    adapter: &dyn FeedAdapter,
    started: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    let (raw, fetch_ms) = raw_payload(deps, adapter).await?;

    let records: Vec<NormalizedEvent> = adapter
        .normalize(&raw)?
        .into_iter()
        .flatten()
        .collect();

    let mut inserted = 0;
    let mut updated = 0;
    let mut seen_ids = Vec::with_capacity(records.len());
    for record in &records {
        let was_insert = queries::upsert_road_event(&deps.pool, record, adapter.url()).await?;
        if was_insert {
            inserted += 1;
        } else {
            updated += 1;
        }
        seen_ids.push(record.source_event_id.clone());
    }

    // Reconcile strictly after all upserts: anything this source owned that
    // the latest fetch no longer returned goes inactive. An empty fetch is a
    // valid state that deactivates the whole feed.
    let deactivated =
        queries::deactivate_missing_road_events(&deps.pool, adapter.name(), &seen_ids).await? as i64;

    let duration_ms = (Utc::now() - started).num_milliseconds();
    record_success(
        deps,
        adapter.name(),
        adapter.url(),
        adapter.state(),
        records.len(),
        fetch_ms,
        duration_ms,
        inserted,
        updated,
        deactivated,
    )
    .await;

    Ok(IngestOutcome {
        feed: adapter.name().to_string(),
        record_count: records.len(),
        inserted,
        updated,
        deactivated,
        duration_ms,
        fetch_ms,
    })
}

/// Ingest the NWS active-alerts pipeline: same template as the road feeds,
/// plus zone-geometry resolution for alerts published without geometry and
/// an expiry purge after reconciliation.
pub async fn ingest_nws(deps: &IngestDeps, adapter: &NwsAdapter) -> Result<IngestOutcome, AppError> {
    let started = Utc::now();
    match ingest_nws_inner(deps, adapter, started).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            record_failure(deps, adapter.name(), adapter.url(), "", started, &e).await;
            Err(e)
        }
    }
}

async fn ingest_nws_inner(
    deps: &IngestDeps,
    adapter: &NwsAdapter,
    started: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    let key = raw_cache_key(adapter.name());
    let (raw, fetch_ms) = match deps.cache.get(&key).await {
        Some(cached) => (cached, 0),
        None => {
            let fetch_start = Utc::now();
            let raw = adapter.fetch().await?;
            let fetch_ms = (Utc::now() - fetch_start).num_milliseconds();
            deps.cache.set_ex(&key, &raw, adapter.cache_ttl_secs()).await;
            (raw, fetch_ms)
        }
    };

    let mut alerts: Vec<NormalizedAlert> =
        adapter.normalize_alerts(&raw)?.into_iter().flatten().collect();

    // Batch-resolve zone geometries for alerts that arrived without one.
    let zone_urls: Vec<String> = alerts
        .iter()
        .filter(|a| a.geometry.is_none())
        .flat_map(|a| a.affected_zones.iter().cloned())
        .collect();
    if !zone_urls.is_empty() {
        let resolved = zones::resolve_zones(&deps.http, &deps.cache, &zone_urls).await;
        for alert in alerts.iter_mut().filter(|a| a.geometry.is_none()) {
            let geoms: Vec<&serde_json::Value> = alert
                .affected_zones
                .iter()
                .filter_map(|url| resolved.get(url))
                .collect();
            alert.geometry = zones::merge_to_multipolygon(&geoms);
        }
    }

    let mut inserted = 0;
    let mut updated = 0;
    let mut seen_ids = Vec::with_capacity(alerts.len());
    for alert in &alerts {
        let was_insert = queries::upsert_weather_alert(&deps.pool, alert).await?;
        if was_insert {
            inserted += 1;
        } else {
            updated += 1;
        }
        seen_ids.push(alert.nws_id.clone());
    }

    let mut deactivated =
        queries::deactivate_missing_weather_alerts(&deps.pool, &seen_ids).await? as i64;
    deactivated += queries::deactivate_expired_weather_alerts(&deps.pool).await? as i64;

    let purged = queries::purge_expired_weather_alerts(&deps.pool).await?;
    if purged > 0 {
        tracing::info!("NWS: purged {} alerts >24h past expiry", purged);
    }

    let duration_ms = (Utc::now() - started).num_milliseconds();
    record_success(
        deps,
        adapter.name(),
        adapter.url(),
        "",
        alerts.len(),
        fetch_ms,
        duration_ms,
        inserted,
        updated,
        deactivated,
    )
    .await;

    Ok(IngestOutcome {
        feed: adapter.name().to_string(),
        record_count: alerts.len(),
        inserted,
        updated,
        deactivated,
        duration_ms,
        fetch_ms,
    })
}

/// Best-effort success bookkeeping: a `healthy` feed status, a success
/// ingestion log, and a FEED_INGEST usage event. The ingest itself already
/// succeeded; a bookkeeping write that fails is logged, never propagated,
/// so a healthy run can't be mislabeled as down.
#[allow(clippy::too_many_arguments)]
async fn record_success(
    deps: &IngestDeps,
    feed_name: &str,
    feed_url: &str,
    state: &str,
    record_count: usize,
    fetch_ms: i64,
    duration_ms: i64,
    inserted: i32,
    updated: i32,
    deactivated: i64,
) {
    let state_opt = if state.is_empty() { None } else { Some(state) };
    if let Err(e) = queries::upsert_feed_status_success(
        &deps.pool,
        feed_name,
        feed_url,
        state_opt,
        record_count as i32,
        fetch_ms as i32,
        deps.refresh_interval_minutes as i32,
    )
    .await
    {
        tracing::warn!("Failed to record healthy status for {}: {}", feed_name, e);
    }

    if let Err(e) = queries::insert_ingestion_log(
        &deps.pool,
        IngestionLogParams {
            feed_name,
            status: "success",
            duration_ms: duration_ms as i32,
            inserted_count: inserted,
            updated_count: updated,
            deactivated_count: deactivated as i32,
            error_count: 0,
            error_message: None,
        },
    )
    .await
    {
        tracing::warn!("Failed to record ingestion log for {}: {}", feed_name, e);
    }

    queries::record_usage_event(
        &deps.pool,
        "FEED_INGEST",
        serde_json::json!({
            "feed": feed_name,
            "recordCount": record_count,
            "inserted": inserted,
            "updated": updated,
            "deactivated": deactivated,
        }),
        None,
    )
    .await;
}

/// Best-effort failure bookkeeping: a `down` feed status, a failed ingestion
/// log, and a FEED_ERROR usage event. Bookkeeping errors are logged, never
/// propagated — the original ingest error is what the scheduler sees.
async fn record_failure(
    deps: &IngestDeps,
    feed_name: &str,
    feed_url: &str,
    state: &str,
    started: DateTime<Utc>,
    error: &AppError,
) {
    let message = error.to_string();
    let state_opt = if state.is_empty() { None } else { Some(state) };
    tracing::error!("Feed {} ingest failed: {}", feed_name, message);

    if let Err(e) =
        queries::upsert_feed_status_failure(&deps.pool, feed_name, feed_url, state_opt, &message)
            .await
    {
        tracing::warn!("Failed to record down status for {}: {}", feed_name, e);
    }

    let duration_ms = (Utc::now() - started).num_milliseconds();
    if let Err(e) = queries::insert_ingestion_log(
        &deps.pool,
        IngestionLogParams {
            feed_name,
            status: "failed",
            duration_ms: duration_ms as i32,
            inserted_count: 0,
            updated_count: 0,
            deactivated_count: 0,
            error_count: 1,
            error_message: Some(&message),
        },
    )
    .await
    {
        tracing::warn!("Failed to record ingestion log for {}: {}", feed_name, e);
    }

    queries::record_usage_event(
        &deps.pool,
        "FEED_ERROR",
        serde_json::json!({ "feed": feed_name, "error": message, "code": error.code() }),
        None,
    )
    .await;
}
