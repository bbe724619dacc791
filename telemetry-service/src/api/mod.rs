use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::{
    analytics::{EfficiencyAnalytics, ANALYSIS_WINDOW, EXPECTED_READINGS},
    config::AnalyticsConfig,
    error::{Result, TelemetryError},
    ingest::IngestionEngine,
    state::TelemetryReader,
    store::TelemetryStore,
    validate::{self, MeterReadingInput, VehicleReadingInput},
};

#[derive(Clone)]
pub struct AppState {
    pub ingestion: IngestionEngine,
    pub reader: TelemetryReader,
    pub analytics: EfficiencyAnalytics,
    pub default_anomaly_threshold: f64,
}

impl AppState {
    pub fn new(store: Arc<dyn TelemetryStore>, cfg: &AnalyticsConfig) -> Self {
        Self {
            ingestion: IngestionEngine::new(store.clone()),
            reader: TelemetryReader::new(store.clone()),
            analytics: EfficiencyAnalytics::new(store, cfg.fleet_concurrency),
            default_anomaly_threshold: cfg.default_anomaly_threshold,
        }
    }
}

/// All routes, mounted under `/api`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/telemetry/meter", post(ingest_meter))
        .route("/v1/telemetry/vehicle", post(ingest_vehicle))
        .route("/v1/telemetry/meter/batch", post(batch_meter))
        .route("/v1/telemetry/vehicle/batch", post(batch_vehicle))
        .route("/v1/telemetry/meter/:meter_id/current", get(meter_state))
        .route("/v1/telemetry/vehicle/:vehicle_id/current", get(vehicle_state))
        .route("/v1/telemetry/meter/:meter_id/history", get(meter_history))
        .route("/v1/telemetry/vehicle/:vehicle_id/history", get(vehicle_history))
        .route("/v1/telemetry/meters/current", get(all_meters))
        .route("/v1/telemetry/vehicles/current", get(all_vehicles))
        .route("/v1/analytics/performance/:vehicle_id", get(vehicle_performance))
        .route("/v1/analytics/fleet/performance", get(fleet_performance))
        .route("/v1/analytics/anomalies", get(anomalies));

    Router::new().nest("/api", api).with_state(state)
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = match &self {
            TelemetryError::Validation(_) => StatusCode::BAD_REQUEST,
            TelemetryError::NotFound(_) => StatusCode::NOT_FOUND,
            TelemetryError::Ingestion { .. } | TelemetryError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

type ApiResult = Result<(StatusCode, Json<Value>)>;

fn ok(body: Value) -> ApiResult {
    Ok((StatusCode::OK, Json(body)))
}

#[derive(Deserialize)]
struct Batch<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct WindowEnd {
    end: Option<String>,
}

#[derive(Deserialize)]
struct HistoryWindow {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
struct AnomalyParams {
    threshold: Option<f64>,
    end: Option<String>,
}

/// Explicit `end` if given, otherwise the current time.
fn resolve_end(end: Option<&str>) -> Result<OffsetDateTime> {
    match end {
        Some(raw) => validate::parse_timestamp(raw),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn resolve_window(w: &HistoryWindow) -> Result<(OffsetDateTime, OffsetDateTime)> {
    let end = resolve_end(w.end.as_deref())?;
    let start = match w.start.as_deref() {
        Some(raw) => validate::parse_timestamp(raw)?,
        None => end - ANALYSIS_WINDOW,
    };
    Ok((start, end))
}

async fn ingest_meter(State(state): State<AppState>, Json(input): Json<MeterReadingInput>) -> ApiResult {
    metrics::counter!("http_ingest_requests_total").increment(1);
    tracing::info!(meter_id = %input.meter_id, "meter reading received");
    let count = state.ingestion.ingest_meter(&input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": "Meter data ingested successfully",
            "meterId": input.meter_id.trim(),
            "timestamp": input.timestamp,
            "count": count,
        })),
    ))
}

async fn ingest_vehicle(State(state): State<AppState>, Json(input): Json<VehicleReadingInput>) -> ApiResult {
    metrics::counter!("http_ingest_requests_total").increment(1);
    tracing::info!(vehicle_id = %input.vehicle_id, "vehicle reading received");
    let count = state.ingestion.ingest_vehicle(&input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": "Vehicle data ingested successfully",
            "vehicleId": input.vehicle_id.trim(),
            "timestamp": input.timestamp,
            "count": count,
        })),
    ))
}

async fn batch_meter(State(state): State<AppState>, Json(batch): Json<Batch<MeterReadingInput>>) -> ApiResult {
    metrics::counter!("http_ingest_requests_total").increment(1);
    tracing::info!(records = batch.data.len(), "meter batch received");
    let count = state.ingestion.batch_ingest_meter(&batch.data).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": format!("{count} meter records ingested"),
            "count": count,
        })),
    ))
}

async fn batch_vehicle(State(state): State<AppState>, Json(batch): Json<Batch<VehicleReadingInput>>) -> ApiResult {
    metrics::counter!("http_ingest_requests_total").increment(1);
    tracing::info!(records = batch.data.len(), "vehicle batch received");
    let count = state.ingestion.batch_ingest_vehicle(&batch.data).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": format!("{count} vehicle records ingested"),
            "count": count,
        })),
    ))
}

async fn meter_state(State(state): State<AppState>, Path(meter_id): Path<String>) -> ApiResult {
    let s = state.reader.meter_state(&meter_id).await?;
    ok(json!({ "success": true, "data": s }))
}

async fn vehicle_state(State(state): State<AppState>, Path(vehicle_id): Path<String>) -> ApiResult {
    let s = state.reader.vehicle_state(&vehicle_id).await?;
    ok(json!({ "success": true, "data": s }))
}

async fn all_meters(State(state): State<AppState>) -> ApiResult {
    let states = state.reader.list_meter_states().await?;
    ok(json!({ "success": true, "count": states.len(), "data": states }))
}

async fn all_vehicles(State(state): State<AppState>) -> ApiResult {
    let states = state.reader.list_vehicle_states().await?;
    ok(json!({ "success": true, "count": states.len(), "data": states }))
}

async fn meter_history(
    State(state): State<AppState>,
    Path(meter_id): Path<String>,
    Query(window): Query<HistoryWindow>,
) -> ApiResult {
    let (start, end) = resolve_window(&window)?;
    let rows = state.reader.meter_history(&meter_id, start, end).await?;
    ok(json!({ "success": true, "count": rows.len(), "data": rows }))
}

async fn vehicle_history(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Query(window): Query<HistoryWindow>,
) -> ApiResult {
    let (start, end) = resolve_window(&window)?;
    let rows = state.reader.vehicle_history(&vehicle_id, start, end).await?;
    ok(json!({ "success": true, "count": rows.len(), "data": rows }))
}

async fn vehicle_performance(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Query(window): Query<WindowEnd>,
) -> ApiResult {
    let end = resolve_end(window.end.as_deref())?;
    tracing::info!(vehicle_id = %vehicle_id, %end, "performance requested");
    let report = state.analytics.vehicle_performance(&vehicle_id, end).await?;
    ok(json!({
        "success": true,
        "data": report,
        "thresholds": {
            "optimal": ">=85% - Normal operation",
            "degraded": "75-84% - Needs attention",
            "critical": "<75% - Hardware fault likely",
        },
        "expectedReadings": EXPECTED_READINGS,
    }))
}

async fn fleet_performance(State(state): State<AppState>, Query(window): Query<WindowEnd>) -> ApiResult {
    let end = resolve_end(window.end.as_deref())?;
    let summary = state.analytics.fleet_performance(end).await?;
    ok(json!({ "success": true, "data": summary }))
}

async fn anomalies(State(state): State<AppState>, Query(params): Query<AnomalyParams>) -> ApiResult {
    let threshold = params.threshold.unwrap_or(state.default_anomaly_threshold);
    let end = resolve_end(params.end.as_deref())?;
    let vehicles = state.analytics.detect_anomalies(threshold, end).await?;

    let action = if vehicles.is_empty() {
        "All vehicles operating within normal efficiency range"
    } else {
        "Inspect chargers and EV connections for listed vehicles"
    };
    ok(json!({
        "success": true,
        "data": {
            "threshold": format!("{threshold}%"),
            "anomaliesDetected": vehicles.len(),
            "vehicles": vehicles,
            "action": action,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTelemetryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn app() -> (Arc<InMemoryTelemetryStore>, Router) {
        let store = Arc::new(InMemoryTelemetryStore::new());
        let state = AppState::new(store.clone(), &AnalyticsConfig::default());
        (store, router(state))
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn ingest_then_read_current_state() {
        let (_, app) = app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/telemetry/meter",
                json!({
                    "meterId": "METER-001",
                    "acEnergyConsumedKwh": 0.52,
                    "voltage": 239.8,
                    "timestamp": "2024-06-01T10:00:00Z"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["meterId"], "METER-001");

        let (status, body) = send(&app, get("/api/v1/telemetry/meter/METER-001/current")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["acEnergyConsumedKwh"], 0.52);
        assert_eq!(body["data"]["lastUpdate"], "2024-06-01T10:00:00Z");
    }

    #[tokio::test]
    async fn unknown_vehicle_is_404() {
        let (_, app) = app();
        let (status, body) = send(&app, get("/api/v1/telemetry/vehicle/VEHICLE-404/current")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn invalid_batch_is_400_and_writes_nothing() {
        let (store, app) = app();
        let data: Vec<Value> = (0..10)
            .map(|i| {
                let soc = if i == 7 { 150 } else { 50 };
                json!({
                    "vehicleId": "VEHICLE-001",
                    "stateOfCharge": soc,
                    "dcEnergyDeliveredKwh": 0.4,
                    "batteryTemperatureC": 25,
                    "timestamp": format!("2024-06-01T10:{i:02}:00Z"),
                })
            })
            .collect();

        let (status, _) = send(&app, post_json("/api/v1/telemetry/vehicle/batch", json!({ "data": data }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.count_vehicle_history("VEHICLE-001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn performance_and_anomalies_over_http() {
        let (store, app) = app();
        store.assign_meter("VEHICLE-007", "METER-002").await.unwrap();

        let meters: Vec<Value> = (0..3)
            .map(|i| json!({ "meterId": "METER-002", "acEnergyConsumedKwh": 0.5, "voltage": 240,
                             "timestamp": format!("2024-06-01T10:0{i}:00Z") }))
            .collect();
        let vehicles: Vec<Value> = (0..3)
            .map(|i| json!({ "vehicleId": "VEHICLE-007", "soc": 60, "kwhDeliveredDc": 0.34,
                             "batteryTemp": 38, "timestamp": format!("2024-06-01T10:0{i}:00Z") }))
            .collect();
        let (status, body) = send(&app, post_json("/api/v1/telemetry/meter/batch", json!({ "data": meters }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["count"], 3);
        send(&app, post_json("/api/v1/telemetry/vehicle/batch", json!({ "data": vehicles }))).await;

        let end = "2024-06-01T12:00:00Z";
        let (status, body) = send(&app, get(&format!("/api/v1/analytics/performance/VEHICLE-007?end={end}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["efficiencyPct"], 68.0);
        assert_eq!(body["data"]["status"], "critical");

        let (status, body) = send(&app, get(&format!("/api/v1/analytics/anomalies?end={end}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["anomaliesDetected"], 1);
        assert_eq!(body["data"]["vehicles"][0]["vehicleId"], "VEHICLE-007");

        let (_, body) = send(&app, get(&format!("/api/v1/analytics/fleet/performance?end={end}"))).await;
        assert_eq!(body["data"]["alerts"][0], "CRITICAL: VEHICLE-007 - 68% efficiency");
    }

    #[tokio::test]
    async fn malformed_end_is_400() {
        let (_, app) = app();
        let (status, _) = send(&app, get("/api/v1/analytics/fleet/performance?end=tomorrow")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
