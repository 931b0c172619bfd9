// RoadPulse API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::AppState;
use services::cache::Cache;
use services::geocode::OrsGeocoder;
use services::ingest::{FeedAdapter, IngestDeps};
use services::nws::NwsAdapter;
use services::routing::OrsRouter;
use services::scheduler::{self, SchedulerContext};
use services::wzdx::{WzdxAdapter, WZDX_FEEDS};

/// Maximum number of connections in the database pool. Sized above the
/// per-run ingestion concurrency (adapters run one at a time) plus request
/// handlers.
const DB_POOL_MAX_CONNECTIONS: u32 = 10;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// RoadPulse API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "RoadPulse API",
        version = "0.1.0",
        description = "Real-time road hazard aggregation for commercial truck drivers. \
            Ingests state DOT work-zone feeds (WZDx v2-v4), NWS weather alerts, and \
            crowdsourced driver reports into a PostGIS store, and answers route-corridor \
            hazard queries ordered by position along the route.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Events", description = "Road events from state DOT feeds"),
        (name = "Alerts", description = "NWS weather alerts"),
        (name = "Reports", description = "Crowdsourced driver reports"),
        (name = "Parking", description = "Truck parking facilities"),
        (name = "Route", description = "Route corridor hazard checks"),
        (name = "Scheduler", description = "Ingestion scheduler control and feed health"),
    ),
    paths(
        routes::health::health_check,
        routes::events::list_events,
        routes::events::list_event_clusters,
        routes::alerts::list_alerts,
        routes::reports::list_reports,
        routes::reports::create_report,
        routes::reports::vote_on_report,
        routes::parking::list_parking,
        routes::route_check::check_route,
        routes::geocode::suggestions,
        routes::scheduler::get_status,
        routes::scheduler::pause,
        routes::scheduler::resume,
        routes::scheduler::trigger,
        routes::scheduler::set_interval,
        routes::scheduler::feed_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::events::EventItem,
            routes::events::EventsResponse,
            routes::events::ClusterItem,
            routes::events::ClustersResponse,
            routes::alerts::AlertItem,
            routes::alerts::AlertsResponse,
            routes::reports::ReportItem,
            routes::reports::ReportsResponse,
            routes::reports::CreateReportRequest,
            routes::reports::VoteRequest,
            routes::parking::ParkingItem,
            routes::parking::ParkingResponse,
            routes::route_check::RouteCheckRequest,
            routes::route_check::RouteCheckResponse,
            routes::geocode::SuggestionsResponse,
            services::geocode::GeocodedPoint,
            routes::scheduler::CommandAccepted,
            routes::scheduler::SetIntervalRequest,
            routes::scheduler::FeedStatusResponse,
            services::hazards::Hazard,
            services::hazards::HazardSummary,
            services::reports::VoteOutcome,
            services::scheduler::SchedulerStatus,
            db::models::FeedStatus,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadpulse_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Connect the cache; a missing redis degrades to cache misses.
    let cache = Cache::connect(&config.redis_url).await;

    // Upstream clients
    let geocoder = OrsGeocoder::new(&config.ors_base_url, &config.ors_api_key);
    let router_client = OrsRouter::new(&config.ors_base_url, &config.ors_api_key);
    let nws = NwsAdapter::new(&config.nws_base_url, &config.nws_user_agent);

    // Registered WZDx adapters, one per state DOT feed.
    let adapters: Vec<Arc<dyn FeedAdapter>> = WZDX_FEEDS
        .iter()
        .map(|feed| Arc::new(WzdxAdapter::new(feed)) as Arc<dyn FeedAdapter>)
        .collect();
    tracing::info!("Registered {} WZDx feeds plus NWS alerts", adapters.len());

    // Shared client for zone-geometry lookups; api.weather.gov requires a
    // contact-identifying User-Agent on every request.
    let zone_http = reqwest::Client::builder()
        .user_agent(config.nws_user_agent.clone())
        .build()
        .expect("Failed to build HTTP client");

    let ingest_deps = IngestDeps {
        pool: pool.clone(),
        cache: cache.clone(),
        http: zone_http,
        refresh_interval_minutes: config.ingest_interval_minutes,
    };

    // Spawn the scheduler exactly once; it owns the repeating ingestion job.
    let (scheduler_handle, scheduler_status, command_rx) =
        scheduler::scheduler_channel(config.ingest_interval_minutes);
    tokio::spawn(scheduler::run_scheduler(
        SchedulerContext {
            deps: ingest_deps,
            adapters,
            nws,
            road_event_retention_days: config.road_event_retention_days,
        },
        scheduler_status,
        command_rx,
        config.ingest_interval_minutes,
    ));

    // Build shared application state
    let app_state = AppState {
        pool,
        cache,
        geocoder,
        router: router_client,
        scheduler: scheduler_handle,
    };

    // CORS — browser clients read hazards and submit reports.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/events", get(routes::events::list_events))
        .route(
            "/api/v1/events/clusters",
            get(routes::events::list_event_clusters),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route(
            "/api/v1/reports",
            get(routes::reports::list_reports).post(routes::reports::create_report),
        )
        .route(
            "/api/v1/reports/:id/vote",
            post(routes::reports::vote_on_report),
        )
        .route("/api/v1/parking", get(routes::parking::list_parking))
        .route("/api/v1/route/check", post(routes::route_check::check_route))
        .route(
            "/api/v1/geocode/suggestions",
            get(routes::geocode::suggestions),
        )
        .route(
            "/api/v1/scheduler/status",
            get(routes::scheduler::get_status),
        )
        .route("/api/v1/scheduler/pause", post(routes::scheduler::pause))
        .route("/api/v1/scheduler/resume", post(routes::scheduler::resume))
        .route("/api/v1/scheduler/trigger", post(routes::scheduler::trigger))
        .route(
            "/api/v1/scheduler/interval",
            post(routes::scheduler::set_interval),
        )
        .route("/api/v1/feeds/status", get(routes::scheduler::feed_status))
        .with_state(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
