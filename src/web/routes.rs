//! HTTP API handlers

use axum::{
    extract::{Path, Query, State},
    response::Html,
    Json,
};
use chrono::{Days, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::achievements::{AchievementReport, AchievementStatus};
use crate::aggregator::{format_date, CalendarDay, DayStats, ProtocolStats, RangeSummary};
use crate::snapshot::Snapshot;

/// Default look-back for range queries without explicit bounds
const DEFAULT_RANGE_DAYS: u64 = 30;

/// Served at `/` when no frontend build is present
pub async fn fallback_page() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

#[derive(Debug, Default, Deserialize)]
pub struct MacsQuery {
    /// Comma-separated MAC list
    #[serde(default)]
    pub macs: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub macs: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
}

impl RangeQuery {
    /// Requested bounds, or the last 30 days when either is missing
    fn bounds(&self) -> (String, String) {
        match (non_empty(&self.from), non_empty(&self.to)) {
            (Some(from), Some(to)) => (from.to_string(), to.to_string()),
            _ => {
                let today = Local::now().date_naive();
                let from = today
                    .checked_sub_days(Days::new(DEFAULT_RANGE_DAYS))
                    .unwrap_or(today);
                (format_date(from), format_date(today))
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn split_macs(raw: &Option<String>) -> Vec<String> {
    non_empty(raw)
        .map(|raw| {
            raw.split(',')
                .map(|mac| mac.trim().to_string())
                .filter(|mac| !mac.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// API: Daily totals for the activity calendar
pub async fn api_calendar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MacsQuery>,
) -> Json<Vec<CalendarDay>> {
    Json(state.aggregator.calendar(&split_macs(&query.macs)))
}

/// API: Totals and per-device breakdown over a range
pub async fn api_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Json<RangeSummary> {
    let (from, to) = query.bounds();
    Json(state.aggregator.summary(&from, &to))
}

/// API: Per-device breakdown of one day
pub async fn api_day(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<Json<DayStats>, ApiError> {
    state
        .aggregator
        .day_stats(&date)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no data for {}", date)))
}

/// API: Protocol breakdown of one device on one day
pub async fn api_device(
    State(state): State<Arc<AppState>>,
    Path((date, mac)): Path<(String, String)>,
) -> Result<Json<Vec<ProtocolStats>>, ApiError> {
    state
        .aggregator
        .device_protocols(&date, &mac)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no data for {}", date)))
}

/// API: Protocol breakdown of one device over a range
pub async fn api_protocols(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<ProtocolStats>>, ApiError> {
    let mac = non_empty(&query.mac)
        .ok_or_else(|| ApiError::BadRequest("mac is required".to_string()))?
        .to_string();
    let (from, to) = query.bounds();
    Ok(Json(state.aggregator.device_protocols_range(&from, &to, &mac)))
}

/// API: Per-day device stats over a range
pub async fn api_timeseries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Json<Vec<DayStats>> {
    let (from, to) = query.bounds();
    Json(state.aggregator.timeseries(&from, &to, &split_macs(&query.macs)))
}

/// API: Status of every achievement
pub async fn api_achievements(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AchievementReport>, ApiError> {
    let engine = state.achievements.clone();
    // History scans are CPU-bound
    let report = tokio::task::spawn_blocking(move || engine.report())
        .await
        .map_err(evaluation_failed)?;
    Ok(Json(report))
}

/// API: Status of one achievement
pub async fn api_achievement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AchievementStatus>, ApiError> {
    let engine = state.achievements.clone();
    let wanted = id.clone();
    let status = tokio::task::spawn_blocking(move || {
        engine
            .catalog()
            .iter()
            .find(|achievement| achievement.id == wanted)
            .map(|achievement| engine.evaluate(achievement))
    })
    .await
    .map_err(evaluation_failed)?;

    status
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown achievement {}", id)))
}

fn evaluation_failed(e: tokio::task::JoinError) -> ApiError {
    tracing::error!("Achievement evaluation failed: {}", e);
    ApiError::Internal("achievement evaluation failed".to_string())
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

/// API: Base names of every loaded snapshot
pub async fn api_files(State(state): State<Arc<AppState>>) -> Json<FilesResponse> {
    Json(FilesResponse {
        files: state.store.file_names(),
    })
}

/// API: Every raw snapshot, keyed by base file name
pub async fn api_all_data(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, Arc<Snapshot>>> {
    let data = state
        .store
        .get_all()
        .into_iter()
        .map(|(key, snapshot)| {
            let name = std::path::Path::new(&key)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(&key)
                .to_string();
            (name, snapshot)
        })
        .collect();
    Json(data)
}

/// API: One raw snapshot by base file name
pub async fn api_data(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Json<Arc<Snapshot>>, ApiError> {
    state
        .store
        .find_by_name(&file)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("file {} not found", file)))
}
