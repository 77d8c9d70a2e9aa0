//! JSON HTTP surface consumed by the presentation layer and the CLI.
//!
//! Handlers only read the latest tick outputs or make small store edits;
//! every failure is answered with `{"error": ...}` and a status code.

use crate::anomaly::DEFAULT_RECENT;
use crate::control::{ControlError, ProcessAction};
use crate::error::StoreError;
use crate::forecast::ForecastError;
use crate::monitor::Monitor;
use crate::store::LimitRule;
use crate::types::ProcessRow;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_HISTORY: usize = 100;
const DEFAULT_ALERTS: usize = 50;

type AppState = State<Arc<Monitor>>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct WhitelistBody {
    name: String,
}

pub fn router(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/system", get(system))
        .route("/processes", get(processes))
        .route("/processes/{pid}/{action}", post(process_action))
        .route("/anomalies", get(anomalies))
        .route("/anomalies/recent", get(recent_anomalies))
        .route("/leaks", get(leaks))
        .route("/history", get(history))
        .route("/forecast", get(forecast))
        .route("/forecast/train", post(train_forecast))
        .route("/alerts", get(alerts))
        .route("/rules", get(list_rules))
        .route("/rules/{pattern}", put(put_rule).delete(delete_rule))
        .route("/whitelist", get(list_whitelist).post(add_whitelist))
        .route("/whitelist/{name}", delete(remove_whitelist))
        .with_state(monitor)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status(State(monitor): AppState) -> impl IntoResponse {
    let latest = monitor.latest();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "counters": monitor.metrics().snapshot(),
        "rules": monitor.rules().rules().len(),
        "whitelist": monitor.whitelist().apps().len(),
        "history_records": monitor.history().len(),
        "model_present": monitor.forecaster().model_path().exists(),
        "last_tick": latest.as_ref().map(|r| r.system.timestamp),
        "process_count": latest.as_ref().map(|r| r.processes.len()),
    }))
}

async fn system(State(monitor): AppState) -> impl IntoResponse {
    Json(monitor.latest().map(|r| r.system.clone()))
}

async fn processes(State(monitor): AppState, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    let rows: Vec<ProcessRow> = monitor
        .latest()
        .map(|r| {
            r.processes
                .iter()
                .take(q.limit.unwrap_or(usize::MAX))
                .map(ProcessRow::from)
                .collect()
        })
        .unwrap_or_default();
    Json(rows)
}

async fn process_action(
    State(monitor): AppState,
    Path((pid, action)): Path<(u32, String)>,
) -> Result<Response, ApiError> {
    let action: ProcessAction = action.parse().map_err(|err: ControlError| {
        ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
    })?;

    let outcome = monitor.controller().act(pid, action);
    info!("[api] manual {action} on pid {pid}: {}", outcome.message);
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(outcome)).into_response())
}

async fn anomalies(State(monitor): AppState) -> impl IntoResponse {
    Json(
        monitor
            .latest()
            .map(|r| r.anomalies.clone())
            .unwrap_or_default(),
    )
}

async fn recent_anomalies(
    State(monitor): AppState,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(
        monitor
            .detector()
            .recent_anomalies(q.limit.unwrap_or(DEFAULT_RECENT)),
    )
}

async fn leaks(State(monitor): AppState) -> impl IntoResponse {
    Json(monitor.latest().map(|r| r.leaks.clone()).unwrap_or_default())
}

async fn history(State(monitor): AppState, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(monitor.history().tail(q.limit.unwrap_or(DEFAULT_HISTORY)))
}

async fn forecast(State(monitor): AppState) -> impl IntoResponse {
    Json(json!({
        "prediction": monitor.latest().and_then(|r| r.prediction),
        "model": monitor.forecaster().load_model(),
    }))
}

async fn train_forecast(State(monitor): AppState) -> Result<Response, ApiError> {
    match monitor.forecaster().train() {
        Ok(report) => Ok(Json(report).into_response()),
        Err(err @ ForecastError::InsufficientData { .. }) => {
            Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()))
        }
        Err(err) => {
            warn!("[api] forecast training failed: {err}");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
            ))
        }
    }
}

async fn alerts(State(monitor): AppState, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    Json(monitor.alerts().recent(q.limit.unwrap_or(DEFAULT_ALERTS)))
}

async fn list_rules(State(monitor): AppState) -> Result<Response, ApiError> {
    Ok(Json(monitor.rules().try_load()?).into_response())
}

async fn put_rule(
    State(monitor): AppState,
    Path(pattern): Path<String>,
    Json(rule): Json<LimitRule>,
) -> Result<Response, ApiError> {
    let key = monitor.rules().upsert(&pattern, rule)?;
    let rules = monitor.rules().try_load()?;
    Ok(Json(json!({ "pattern": key, "rule": rules.get(&key) })).into_response())
}

async fn delete_rule(
    State(monitor): AppState,
    Path(pattern): Path<String>,
) -> Result<Response, ApiError> {
    if monitor.rules().remove(&pattern)? {
        Ok(Json(json!({ "removed": pattern.trim().to_lowercase() })).into_response())
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no rule for pattern '{pattern}'"),
        ))
    }
}

async fn list_whitelist(State(monitor): AppState) -> Result<Response, ApiError> {
    Ok(Json(monitor.whitelist().try_load()?).into_response())
}

async fn add_whitelist(
    State(monitor): AppState,
    Json(body): Json<WhitelistBody>,
) -> Result<Response, ApiError> {
    let added = monitor.whitelist().add(&body.name)?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "name": body.name.trim(), "added": added }))).into_response())
}

async fn remove_whitelist(
    State(monitor): AppState,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    match monitor.whitelist().remove(&name)? {
        0 => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("'{name}' is not whitelisted"),
        )),
        removed => Ok(Json(json!({ "removed": removed })).into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::limits::tests::{FixedSource, RecordingControl, proc};
    use crate::types::ProcessTable;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct Harness {
        _dir: tempfile::TempDir,
        monitor: Arc<Monitor>,
    }

    fn harness(control: RecordingControl) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.runtime.gpu = false;
        let table = ProcessTable::new(vec![
            proc(10, "postgres", 2.0, 300.0, 900.0),
            proc(11, "leaky_app", 5.0, 2000.0, 1.0),
            proc(12, "bash", 0.0, 5.0, 30.0),
        ]);
        let monitor = Monitor::from_parts(
            config,
            Box::new(FixedSource(table.clone())),
            Box::new(FixedSource(table)),
            Arc::new(control),
        );
        Harness {
            _dir: dir,
            monitor: Arc::new(monitor),
        }
    }

    async fn call(monitor: &Arc<Monitor>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router(monitor.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn healthz_ok() {
        let h = harness(RecordingControl::default());
        let (status, body) = call(&h.monitor, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn tick_outputs_are_exposed() {
        let h = harness(RecordingControl::default());
        let (_, before) = call(&h.monitor, "GET", "/system", None).await;
        assert!(before.is_null());

        h.monitor.metrics_tick();

        let (_, system) = call(&h.monitor, "GET", "/system", None).await;
        assert_eq!(system["process_count"], 3);

        let (_, rows) = call(&h.monitor, "GET", "/processes?limit=2", None).await;
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "leaky_app");
        assert!(rows[0].get("ctx_switches").is_none());

        let (_, leaks) = call(&h.monitor, "GET", "/leaks", None).await;
        assert_eq!(leaks[0]["severity"], "critical");

        let (_, history) = call(&h.monitor, "GET", "/history", None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (_, status) = call(&h.monitor, "GET", "/status", None).await;
        assert_eq!(status["counters"]["metric_ticks"], 1);
        assert_eq!(status["process_count"], 3);
    }

    #[tokio::test]
    async fn rules_roundtrip_through_api() {
        let h = harness(RecordingControl::default());

        let (status, body) = call(
            &h.monitor,
            "PUT",
            "/rules/Leaky",
            Some(serde_json::json!({ "ram": 1000, "action": "terminate" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pattern"], "leaky");
        assert_eq!(body["rule"]["ram"], 1000.0);

        let (_, rules) = call(&h.monitor, "GET", "/rules", None).await;
        assert_eq!(rules["leaky"]["action"], "terminate");

        let (status, body) = call(
            &h.monitor,
            "PUT",
            "/rules/x",
            Some(serde_json::json!({ "action": "obliterate" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("obliterate"));

        let (status, _) = call(&h.monitor, "DELETE", "/rules/LEAKY", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&h.monitor, "DELETE", "/rules/leaky", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn whitelist_management() {
        let h = harness(RecordingControl::default());

        let (status, _) = call(
            &h.monitor,
            "POST",
            "/whitelist",
            Some(serde_json::json!({ "name": "Postgres" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(
            &h.monitor,
            "POST",
            "/whitelist",
            Some(serde_json::json!({ "name": "postgres" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], false);

        let (_, list) = call(&h.monitor, "GET", "/whitelist", None).await;
        assert_eq!(list["apps"], serde_json::json!(["Postgres"]));

        let (status, body) = call(&h.monitor, "DELETE", "/whitelist/POSTGRES", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);
        let (status, _) = call(&h.monitor, "DELETE", "/whitelist/postgres", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn enforcement_alerts_are_listed() {
        let h = harness(RecordingControl::default());
        h.monitor
            .rules()
            .upsert(
                "leaky_app",
                LimitRule {
                    ram: Some(1000.0),
                    ..LimitRule::default()
                },
            )
            .unwrap();
        h.monitor.enforce_tick();

        let (_, alerts) = call(&h.monitor, "GET", "/alerts?limit=5", None).await;
        let alerts = alerts.as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0]["alert"],
            "KILLED: leaky_app (11) → RAM 2000MB > 1000MB"
        );
    }

    #[tokio::test]
    async fn forecast_training_needs_history() {
        let h = harness(RecordingControl::default());
        let (status, body) = call(&h.monitor, "POST", "/forecast/train", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("insufficient data"));

        let (status, body) = call(&h.monitor, "GET", "/forecast", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["prediction"].is_null());
        assert!(body["model"].is_null());
    }

    #[tokio::test]
    async fn manual_process_actions() {
        let h = harness(RecordingControl {
            deny: true,
            ..RecordingControl::default()
        });

        let (status, body) = call(&h.monitor, "POST", "/processes/12/suspend", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "access denied for process 12");

        let (status, body) = call(&h.monitor, "POST", "/processes/12/vaporize", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown action 'vaporize'");
    }

    #[tokio::test]
    async fn recent_anomalies_default_to_empty() {
        let h = harness(RecordingControl::default());
        let (status, body) = call(&h.monitor, "GET", "/anomalies/recent?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
        let (_, latest) = call(&h.monitor, "GET", "/anomalies", None).await;
        assert_eq!(latest, serde_json::json!([]));
    }
}
