use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod domain;
mod error;
mod handlers;
mod models;
mod services;

use crate::config::Config;
use crate::db::DatabasePool;
use crate::domain::{Clock, EventBus, SystemClock};
use crate::services::{
    BuildingService, ContainerLocks, ContainerService, FullnessService, LedgerService,
    TakeoutService,
};

pub type AppState = (
    Arc<BuildingService>,
    Arc<ContainerService>,
    Arc<FullnessService>,
    Arc<TakeoutService>,
    Arc<LedgerService>,
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rcs_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting recycling collection server...");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);

    // Initialize database connection
    let db_pool = DatabasePool::new(&config).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    // Initialize services
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::new();
    let locks = Arc::new(ContainerLocks::new());

    let takeout_service = Arc::new(TakeoutService::new(
        db_pool.clone(),
        clock.clone(),
        events.clone(),
        locks.clone(),
    ));
    let fullness_service = Arc::new(FullnessService::new(
        db_pool.clone(),
        clock.clone(),
        events.clone(),
        locks.clone(),
        takeout_service.clone(),
    ));
    let app_state = (
        Arc::new(BuildingService::new(
            db_pool.clone(),
            clock.clone(),
            fullness_service.clone(),
        )),
        Arc::new(ContainerService::new(
            db_pool.clone(),
            clock.clone(),
            locks,
            fullness_service.clone(),
        )),
        fullness_service,
        takeout_service.clone(),
        Arc::new(LedgerService::new(db_pool.clone(), clock)),
    );

    spawn_event_log(&events);
    if let Some(every) = config.scheduler.sweep_interval() {
        spawn_condition_sweep(takeout_service, every);
    } else {
        info!("Condition sweep disabled");
    }

    let app = app(app_state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(app_state: AppState) -> Router {
    let api_routes = Router::new()
        // Building routes
        .route(
            "/buildings",
            get(handlers::list_buildings).post(handlers::create_building),
        )
        .route("/buildings/:id", get(handlers::get_building))
        .route(
            "/buildings/:id/precollected-mass",
            put(handlers::set_precollected_mass),
        )
        .route(
            "/buildings/:id/sections",
            get(handlers::list_sections).post(handlers::create_section),
        )
        .route("/buildings/:id/condition", get(handlers::get_building_condition))
        .route("/buildings/:id/takeout-status", get(handlers::takeout_status))
        .route("/buildings/:id/check-conditions", post(handlers::check_conditions))
        .route("/buildings/:id/mass-rule-commits", get(handlers::list_mass_rule_commits))
        .route("/buildings/:id/mass-stats", get(handlers::building_mass_stats))
        .route("/buildings/:id/takeouts", get(handlers::list_containers_takeouts))
        .route("/buildings/:id/tank-takeouts", get(handlers::list_tank_takeouts))
        .route("/sections/:id/condition", get(handlers::get_section_condition))
        .route("/conditions/:id", put(handlers::update_condition))
        // Container routes
        .route(
            "/containers",
            get(handlers::list_containers).post(handlers::create_container),
        )
        .route(
            "/containers/:id",
            get(handlers::get_container)
                .put(handlers::update_container)
                .delete(handlers::delete_container),
        )
        .route("/containers/:id/activate", post(handlers::activate_container))
        .route("/containers/:id/claim", post(handlers::claim_container))
        .route("/containers/:id/stats", get(handlers::container_stats))
        .route("/containers/:id/full-reports", post(handlers::report_full))
        .route("/containers/:id/correct-fullness", post(handlers::correct_fullness))
        // Pickup routes
        .route("/takeouts", post(handlers::create_containers_takeout))
        .route("/takeouts/:id", get(handlers::get_containers_takeout))
        .route("/takeouts/:id/confirm", post(handlers::confirm_containers_takeout))
        .route("/tank-takeouts", post(handlers::create_tank_takeout))
        .route("/tank-takeouts/:id", get(handlers::get_tank_takeout_report))
        .route("/tank-takeouts/:id/confirm", post(handlers::confirm_tank_takeout))
        // Statistics
        .route("/stats/collected-mass", get(handlers::collected_mass))
        .with_state(app_state);

    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health_check))
        .nest("/api/v1", api_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_credentials(false),
        )
        .layer(TraceLayer::new_for_http())
}

/// Delivery hook for core signals; for now they are only logged.
fn spawn_event_log(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => info!(%payload, "core event"),
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_condition_sweep(takeout_service: Arc<TakeoutService>, every: Duration) {
    info!("Condition sweep every {:?}", every);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = takeout_service.sweep_time_conditions().await {
                warn!("Condition sweep failed: {}", e);
            }
        }
    });
}

async fn root() -> &'static str {
    "Recycling Collection Server"
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerKind;
    use crate::services::testing::Fixture;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let fx = Fixture::new().await;
        let app = app(fx.state());
        let response = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn report_flow_over_http() {
        let fx = Fixture::new().await;
        let app = app(fx.state());

        let (status, building) = send(
            &app,
            "POST",
            "/api/v1/buildings",
            Some(json!({ "address": "Lomonosova 9" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let building_id = building["id"].as_i64().unwrap();

        let (status, condition) =
            send(&app, "GET", &format!("/api/v1/buildings/{}/condition", building_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/v1/conditions/{}", condition["id"]),
            Some(json!({ "mass": 40 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, container) = send(
            &app,
            "POST",
            "/api/v1/containers",
            Some(json!({ "kind": "ecobox", "building_id": building_id, "floor": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(container["status"], "waiting");
        let container_id = container["id"].as_i64().unwrap();

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/containers/{}/full-reports", container_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/containers/{}/activate", container_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, report) = send(
            &app,
            "POST",
            &format!("/api/v1/containers/{}/full-reports", container_id),
            Some(json!({ "by_staff": false })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report["became_full"], true);
        assert_eq!(report["mass_rule_trigger"], json!({ "scope": "building", "id": building_id }));
        assert_eq!(report["notifications"][0]["event"], "pickup_condition_met");

        let (status, takeout_status) = send(
            &app,
            "GET",
            &format!("/api/v1/buildings/{}/takeout-status", building_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(takeout_status["current_mass"], 45);
        assert_eq!(takeout_status["takeout_notified"], true);
    }

    #[tokio::test]
    async fn pickup_confirmation_over_http() {
        let fx = Fixture::new().await;
        let building = fx.building("Birzhevaya 14").await;
        let container = fx.active_container(building, None, ContainerKind::OfficeBox).await;
        fx.fullness.on_full_report(container, false).await.unwrap();
        let app = app(fx.state());

        let (status, takeout) = send(
            &app,
            "POST",
            "/api/v1/takeouts",
            Some(json!({ "building_id": building })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(takeout["container_ids"], json!([container]));
        let uri = format!("/api/v1/takeouts/{}/confirm", takeout["id"]);

        let (status, confirmed) = send(&app, "POST", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(confirmed["emptied_container_ids"], json!([container]));

        let (status, error) = send(&app, "POST", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(error["error"].is_string());
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        let fx = Fixture::new().await;
        let building = fx.building("Kronverksky 49").await;
        let app = app(fx.state());

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/containers",
            Some(json!({ "kind": "ecobox", "building_id": building, "floor": 500 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/buildings/{}/sections", building),
            Some(json!({ "num": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/api/v1/containers/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn collected_mass_summary_over_http() {
        let fx = Fixture::new().await;
        let app = app(fx.state());

        let (status, summary) = send(&app, "GET", "/api/v1/stats/collected-mass", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["total_mass"], 0.0);
        assert_eq!(summary["trees"], 0);
    }
}
