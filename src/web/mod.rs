//! Web server module

mod error;
mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::achievements::AchievementEngine;
use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::snapshot::SnapshotStore;

pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub aggregator: Arc<Aggregator>,
    pub achievements: Arc<AchievementEngine>,
}

/// API routes plus the frontend (or a placeholder page when `static_dir` is missing)
pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    let api = Router::new()
        .route("/api/calendar", get(routes::api_calendar))
        .route("/api/summary", get(routes::api_summary))
        .route("/api/day/:date", get(routes::api_day))
        .route("/api/device/:date/:mac", get(routes::api_device))
        .route("/api/protocols", get(routes::api_protocols))
        .route("/api/timeseries", get(routes::api_timeseries))
        .route("/api/achievements", get(routes::api_achievements))
        .route("/api/achievements/:id", get(routes::api_achievement))
        .route("/api/files", get(routes::api_files))
        .route("/api/data", get(routes::api_all_data))
        .route("/api/data/:file", get(routes::api_data))
        // Data changes under the scanner, never let clients cache it
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ));

    let app = if static_dir.is_dir() {
        info!("Serving frontend from {}", static_dir.display());
        api.fallback_service(ServeDir::new(static_dir))
    } else {
        info!("Frontend not found at {}, serving placeholder", static_dir.display());
        api.fallback(routes::fallback_page)
    };

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(config: &Config, state: Arc<AppState>) -> Result<()> {
    let app = router(state, &config.static_dir);

    let addr = config.bind_address();
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::AchievementCache;
    use crate::aggregator::testing::RawMacs;
    use crate::snapshot::testing::{flow, row};
    use crate::snapshot::Snapshot;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    const A: &str = "aa:aa:aa:aa:aa:aa";

    fn app() -> Router {
        let store = Arc::new(SnapshotStore::new());
        store.put(
            "/data/20240101.db.gz",
            Snapshot::new(vec![row(A, 100, 10), flow(A, "UDP", 53, 5, 1)]),
        );
        store.put("/data/20240102.db.gz", Snapshot::new(vec![row(A, 1, 1)]));

        let aggregator = Arc::new(Aggregator::new(store.clone(), Arc::new(RawMacs)));
        let achievements = Arc::new(AchievementEngine::new(
            aggregator.clone(),
            Arc::new(AchievementCache::new()),
        ));
        let state = Arc::new(AppState {
            store,
            aggregator,
            achievements,
        });
        router(state, Path::new("/nonexistent/frontend/dist"))
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_calendar() {
        let (status, json) = get_json("/api/calendar").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["date"], "2024-01-01");
        assert_eq!(json[0]["value"], 115);
    }

    #[tokio::test]
    async fn test_day_found_and_missing() {
        let (status, json) = get_json("/api/day/2024-01-01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["downloaded"], 105);
        assert_eq!(json["devices"][A]["uploaded"], 10);

        let (status, json) = get_json("/api/day/2023-12-31").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_device_protocols() {
        let (status, json) = get_json(&format!("/api/device/2024-01-01/{}", A)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["protocol"], "TCP");

        let (status, _) = get_json(&format!("/api/device/2030-01-01/{}", A)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_protocols_requires_mac() {
        let (status, json) = get_json("/api/protocols?from=2024-01-01&to=2024-01-02").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "bad_request");

        let (status, json) =
            get_json(&format!("/api/protocols?from=2024-01-01&to=2024-01-02&mac={}", A)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["downloaded"], 101);
    }

    #[tokio::test]
    async fn test_summary_and_timeseries_with_explicit_range() {
        let (_, json) = get_json("/api/summary?from=2024-01-01&to=2024-01-02").await;
        assert_eq!(json["total_downloaded"], 106);
        assert_eq!(json["days"].as_array().unwrap().len(), 2);

        let (_, json) = get_json("/api/timeseries?from=2024-01-02&to=2024-01-02&macs=bb:bb:bb:bb:bb:bb").await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["downloaded"], 0);
    }

    #[tokio::test]
    async fn test_raw_data_endpoints() {
        let (_, json) = get_json("/api/files").await;
        assert_eq!(json["files"][0], "20240101.db.gz");

        let (_, json) = get_json("/api/data").await;
        assert_eq!(json["20240102.db.gz"]["columns"].as_array().unwrap().len(), 11);

        let (status, json) = get_json("/api/data/20240101.db.gz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);

        let (status, _) = get_json("/api/data/20991231.db.gz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_achievements_report() {
        let (status, json) = get_json("/api/achievements").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["achievements"].as_array().unwrap().len(), 25);
        assert_eq!(json["achievements"][0]["achievement"]["id"], "first_gigabyte");
        assert!(json["achievements"][0].get("unlocked_at").is_none());
    }

    #[tokio::test]
    async fn test_single_achievement() {
        let (status, json) = get_json("/api/achievements/ghost").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["achievement"]["id"], "ghost");
        assert_eq!(json["unlocked"], false);
        assert_eq!(json["target_value"], 1.0);

        let (status, json) = get_json("/api/achievements/first_megabyte").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_placeholder_page_without_frontend() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("NLBW Monitor"));
    }
}
