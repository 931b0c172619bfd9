//! Ingestion scheduler.
//!
//! A single spawned task owns the repeating ingestion loop — spawning it once
//! at startup is what keeps "at most one repeating job" true across hot
//! reloads. It is commanded over an mpsc channel (pause / resume /
//! trigger-now / set-interval) and publishes observable status behind
//! `Arc<RwLock<_>>` for the admin surface.
//!
//! Semantics:
//! - adapters run strictly sequentially; each feed's error is caught and
//!   recorded per-feed so one failing feed never aborts the rest
//! - a trigger received mid-run waits in the channel and runs once the
//!   current cycle finishes; repeated triggers coalesce into at most one
//!   queued follow-up run
//! - a manual trigger runs even while paused; pause only stops the
//!   repeating schedule
//! - set-interval applies from the next scheduled tick, never the in-flight
//!   run
//! - interval and paused flag persist to the cache and are restored on boot,
//!   so the schedule survives restarts; persistence failures are non-fatal
//! - every tick ends with the community-report expiry sweep (and the road
//!   event retention purge when enabled)

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use utoipa::ToSchema;

use crate::db::queries;
use crate::errors::AppError;
use crate::services::cache::Cache;
use crate::services::ingest::{self, FeedAdapter, IngestDeps, IngestOutcome};
use crate::services::nws::NwsAdapter;

/// Default ingestion cadence.
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;

/// Command channel depth; triggers beyond this are shed at the sender.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

const INTERVAL_CACHE_KEY: &str = "scheduler:interval_minutes";
const PAUSED_CACHE_KEY: &str = "scheduler:paused";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    Pause,
    Resume,
    TriggerNow,
    SetInterval(u32),
}

/// Observable scheduler state.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_paused: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub interval_minutes: u32,
    /// 1 while a cycle is executing, else 0.
    pub active_count: u32,
    /// 1 when a follow-up run is queued behind the current cycle, else 0.
    /// Repeated triggers coalesce into a single queued run.
    pub waiting_count: u32,
}

impl SchedulerStatus {
    fn new(interval_minutes: u32) -> Self {
        Self {
            is_paused: false,
            next_run_at: None,
            last_run_at: None,
            interval_minutes,
            active_count: 0,
            waiting_count: 0,
        }
    }
}

pub type SharedSchedulerStatus = Arc<RwLock<SchedulerStatus>>;

/// Result of one feed within a cycle: the outcome, or the per-feed error
/// message when that feed failed.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedRunResult {
    pub feed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cloneable handle for the admin surface.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
    status: SharedSchedulerStatus,
}

impl SchedulerHandle {
    pub async fn send(&self, command: SchedulerCommand) -> Result<(), AppError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AppError::Internal("scheduler task is not running".to_string()))
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }
}

/// Everything one ingestion cycle needs.
pub struct SchedulerContext {
    pub deps: IngestDeps,
    pub adapters: Vec<Arc<dyn FeedAdapter>>,
    pub nws: NwsAdapter,
    /// Road event purge window in days; 0 disables the purge.
    pub road_event_retention_days: u32,
}

/// Create the handle/status pair and the command receiver for `run_scheduler`.
pub fn scheduler_channel(initial_interval_minutes: u32) -> (SchedulerHandle, SharedSchedulerStatus, mpsc::Receiver<SchedulerCommand>) {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let status: SharedSchedulerStatus =
        Arc::new(RwLock::new(SchedulerStatus::new(initial_interval_minutes)));
    let handle = SchedulerHandle {
        tx,
        status: status.clone(),
    };
    (handle, status, rx)
}

/// Run the scheduler loop. Never returns while the command channel is open.
///
/// Should be spawned via `tokio::spawn(run_scheduler(...))`, exactly once.
pub async fn run_scheduler(
    ctx: SchedulerContext,
    status: SharedSchedulerStatus,
    mut rx: mpsc::Receiver<SchedulerCommand>,
    initial_interval_minutes: u32,
) {
    let (mut interval_minutes, mut paused) =
        restore_persisted_state(&ctx.deps.cache, initial_interval_minutes).await;
    let mut last_run_at: Option<DateTime<Utc>> = None;
    let mut pending_trigger = false;

    tracing::info!(
        "Scheduler started (interval {} min, paused={})",
        interval_minutes,
        paused,
    );

    loop {
        let next_run_at = if paused {
            None
        } else {
            Some(last_run_at.unwrap_or_else(Utc::now) + Duration::minutes(interval_minutes as i64))
        };

        {
            let mut s = status.write().await;
            s.is_paused = paused;
            s.interval_minutes = interval_minutes;
            s.last_run_at = last_run_at;
            s.next_run_at = next_run_at;
            s.waiting_count = u32::from(pending_trigger);
            s.active_count = 0;
        }

        let mut run_now = pending_trigger;
        if !run_now {
            let sleep_duration = next_run_at
                .map(|at| (at - Utc::now()).num_milliseconds().max(0) as u64)
                .unwrap_or(u64::MAX);

            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => {
                            apply_command(
                                command,
                                &ctx.deps.cache,
                                &mut paused,
                                &mut interval_minutes,
                                &mut pending_trigger,
                            )
                            .await;
                        }
                        None => {
                            tracing::info!("Scheduler command channel closed, stopping");
                            return;
                        }
                    }
                    continue;
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(sleep_duration.min(u64::from(u32::MAX)))), if next_run_at.is_some() => {
                    run_now = true;
                }
            }
        }

        if run_now {
            // Collapse everything already queued behind this run. Triggers
            // that buffered while the previous cycle executed all fold into
            // this one follow-up run instead of firing once each.
            while let Ok(command) = rx.try_recv() {
                apply_command(
                    command,
                    &ctx.deps.cache,
                    &mut paused,
                    &mut interval_minutes,
                    &mut pending_trigger,
                )
                .await;
            }
            pending_trigger = false;
            {
                let mut s = status.write().await;
                s.active_count = 1;
                s.waiting_count = 0;
            }

            let cycle_start = Utc::now();
            let results = run_ingest_cycle(&ctx).await;
            let failures = results.iter().filter(|r| r.error.is_some()).count();
            tracing::info!(
                "Ingestion cycle complete in {}ms: {} feeds, {} failed",
                (Utc::now() - cycle_start).num_milliseconds(),
                results.len(),
                failures,
            );

            last_run_at = Some(Utc::now());
        }
    }
}

/// Apply one scheduler command to the loop's state. Manual triggers set the
/// pending flag (they run even while paused, and coalesce); pause/resume
/// and interval changes persist so they survive restarts.
async fn apply_command(
    command: SchedulerCommand,
    cache: &Cache,
    paused: &mut bool,
    interval_minutes: &mut u32,
    pending_trigger: &mut bool,
) {
    match command {
        SchedulerCommand::Pause => {
            *paused = true;
            persist_paused(cache, true).await;
            tracing::info!("Scheduler paused");
        }
        SchedulerCommand::Resume => {
            *paused = false;
            persist_paused(cache, false).await;
            tracing::info!("Scheduler resumed");
        }
        SchedulerCommand::TriggerNow => {
            *pending_trigger = true;
        }
        SchedulerCommand::SetInterval(minutes) => {
            let minutes = minutes.max(1);
            *interval_minutes = minutes;
            persist_interval(cache, minutes).await;
            tracing::info!("Scheduler interval set to {} min", minutes);
        }
    }
}

/// One full cycle: every WZDx adapter sequentially, then the NWS pipeline,
/// then the report expiry sweep and optional retention purge. Per-feed
/// errors are captured in the result vector, never propagated.
pub async fn run_ingest_cycle(ctx: &SchedulerContext) -> Vec<FeedRunResult> {
    let mut results = Vec::with_capacity(ctx.adapters.len() + 1);

    for adapter in &ctx.adapters {
        let result = ingest::ingest_road_feed(&ctx.deps, adapter.as_ref()).await;
        results.push(feed_run_result(adapter.name(), result));
    }

    let nws_result = ingest::ingest_nws(&ctx.deps, &ctx.nws).await;
    results.push(feed_run_result(ctx.nws.name(), nws_result));

    match queries::expire_old_reports(&ctx.deps.pool).await {
        Ok(expired) if expired > 0 => {
            tracing::info!("Expired {} community reports", expired);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Report expiry sweep failed: {}", e),
    }

    if ctx.road_event_retention_days > 0 {
        match queries::purge_old_road_events(&ctx.deps.pool, ctx.road_event_retention_days).await {
            Ok(purged) if purged > 0 => {
                tracing::info!("Purged {} road events past retention", purged);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Road event retention purge failed: {}", e),
        }
    }

    results
}

fn feed_run_result(feed: &str, result: Result<IngestOutcome, AppError>) -> FeedRunResult {
    match result {
        Ok(outcome) => FeedRunResult {
            feed: feed.to_string(),
            result: Some(outcome),
            error: None,
        },
        Err(e) => FeedRunResult {
            feed: feed.to_string(),
            result: None,
            error: Some(e.to_string()),
        },
    }
}

async fn restore_persisted_state(cache: &Cache, initial_interval: u32) -> (u32, bool) {
    let interval = match cache.get(INTERVAL_CACHE_KEY).await {
        Some(value) => value.parse().unwrap_or(initial_interval),
        None => initial_interval,
    };
    let paused = matches!(cache.get(PAUSED_CACHE_KEY).await.as_deref(), Some("true"));
    (interval.max(1), paused)
}

async fn persist_interval(cache: &Cache, minutes: u32) {
    cache.set(INTERVAL_CACHE_KEY, &minutes.to_string()).await;
}

async fn persist_paused(cache: &Cache, paused: bool) {
    cache
        .set(PAUSED_CACHE_KEY, if paused { "true" } else { "false" })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_starts_idle() {
        let status = SchedulerStatus::new(5);
        assert!(!status.is_paused);
        assert_eq!(status.interval_minutes, 5);
        assert_eq!(status.active_count, 0);
        assert_eq!(status.waiting_count, 0);
        assert!(status.next_run_at.is_none());
        assert!(status.last_run_at.is_none());
    }

    #[test]
    fn test_feed_run_result_captures_error() {
        let result = feed_run_result(
            "wzdx-co",
            Err(AppError::FeedFetch {
                status: Some(503),
                message: "wzdx-co returned HTTP 503".to_string(),
            }),
        );
        assert_eq!(result.feed, "wzdx-co");
        assert!(result.result.is_none());
        assert!(result.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_repeated_triggers_coalesce() {
        let cache = Cache::disabled();
        let mut paused = false;
        let mut interval = 5;
        let mut pending = false;

        for _ in 0..3 {
            apply_command(
                SchedulerCommand::TriggerNow,
                &cache,
                &mut paused,
                &mut interval,
                &mut pending,
            )
            .await;
        }
        // Three triggers leave a single queued run, not three.
        assert!(pending);
        assert!(!paused);
        assert_eq!(interval, 5);
    }

    #[tokio::test]
    async fn test_trigger_while_paused_still_queues() {
        let cache = Cache::disabled();
        let mut paused = false;
        let mut interval = 5;
        let mut pending = false;

        apply_command(
            SchedulerCommand::Pause,
            &cache,
            &mut paused,
            &mut interval,
            &mut pending,
        )
        .await;
        assert!(paused);

        apply_command(
            SchedulerCommand::TriggerNow,
            &cache,
            &mut paused,
            &mut interval,
            &mut pending,
        )
        .await;
        // Pause stops the repeating schedule, not manual triggers.
        assert!(pending);
        assert!(paused);
    }

    #[tokio::test]
    async fn test_set_interval_floors_at_one_minute() {
        let cache = Cache::disabled();
        let mut paused = false;
        let mut interval = 5;
        let mut pending = false;

        apply_command(
            SchedulerCommand::SetInterval(0),
            &cache,
            &mut paused,
            &mut interval,
            &mut pending,
        )
        .await;
        assert_eq!(interval, 1);

        apply_command(
            SchedulerCommand::SetInterval(30),
            &cache,
            &mut paused,
            &mut interval,
            &mut pending,
        )
        .await;
        assert_eq!(interval, 30);
    }

    #[tokio::test]
    async fn test_restore_defaults_without_cache() {
        let cache = Cache::disabled();
        let (interval, paused) = restore_persisted_state(&cache, 5).await;
        assert_eq!(interval, 5);
        assert!(!paused);
    }

    #[tokio::test]
    async fn test_handle_send_fails_after_receiver_drop() {
        let (handle, _status, rx) = scheduler_channel(5);
        drop(rx);
        assert!(handle.send(SchedulerCommand::TriggerNow).await.is_err());
    }

    #[tokio::test]
    async fn test_handle_status_snapshot() {
        let (handle, status, _rx) = scheduler_channel(7);
        {
            let mut s = status.write().await;
            s.is_paused = true;
            s.waiting_count = 2;
        }
        let snapshot = handle.status().await;
        assert!(snapshot.is_paused);
        assert_eq!(snapshot.interval_minutes, 7);
        assert_eq!(snapshot.waiting_count, 2);
    }
}
