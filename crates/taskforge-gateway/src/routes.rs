//! Route handlers for the control API.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use taskforge_core::catalog::Job;
use taskforge_core::error::ForgeError;
use taskforge_engine::SchedulerMode;

use super::server::AppState;

/// HTTP error shape: status + `{error, message}`.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<ForgeError> for ApiError {
    fn from(error: ForgeError) -> Self {
        let status = match &error {
            ForgeError::UnknownJob(_) | ForgeError::UnknownRun(_) => StatusCode::NOT_FOUND,
            ForgeError::SchedulerBusy => StatusCode::CONFLICT,
            ForgeError::Config(_) | ForgeError::UnknownGroup(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.engine.status();
    Json(serde_json::json!({
        "running": status.running,
        "mode": status.mode,
        "total_jobs": status.total_jobs,
        "running_runs": status.running_runs,
        "queue_depth": status.queue_depth,
        "uptime_seconds": status.uptime_seconds,
    }))
}

pub async fn scheduler_start(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.engine.start();
    Json(serde_json::json!({ "running": true }))
}

pub async fn scheduler_stop(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.engine.stop().await;
    Json(serde_json::json!({ "running": false }))
}

#[derive(Deserialize)]
pub struct ModeRequest {
    mode: String,
}

pub async fn scheduler_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mode = SchedulerMode::from_str(&request.mode)?;
    state.engine.set_mode(mode);
    Ok(Json(serde_json::json!({ "mode": mode })))
}

pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let jobs = state.engine.list_jobs();
    Json(serde_json::json!({ "tasks": jobs, "total": jobs.len() }))
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(job): Json<Job>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let id = job.id.clone();
    state.engine.create_job(job)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<taskforge_engine::JobDetail>> {
    Ok(Json(state.engine.job_detail(&id)?))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(job): Json<Job>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.update_job(&id, job)?;
    Ok(Json(serde_json::json!({ "id": id })))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.delete_job(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let run_id = state.engine.manual_run(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": run_id })),
    ))
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let run_id = state.engine.cancel_latest(&id)?;
    Ok(Json(serde_json::json!({ "cancelled": run_id })))
}

#[derive(Deserialize)]
pub struct LogQuery {
    run_id: Option<u64>,
    limit: Option<usize>,
}

pub async fn task_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(200);
    let lines = state.engine.run_logs(&id, query.run_id, limit)?;
    Ok(Json(serde_json::json!({ "task": id, "lines": lines })))
}

pub async fn global_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(200);
    Json(serde_json::json!({ "lines": state.engine.global_logs(limit) }))
}

pub async fn recent_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(100);
    Json(serde_json::json!({ "events": state.engine.recent_events(limit) }))
}

pub async fn resource_groups(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "groups": state.engine.group_summaries() }))
}

#[derive(Deserialize)]
pub struct TestNotificationRequest {
    #[serde(default = "default_test_title")]
    title: String,
    #[serde(default = "default_test_message")]
    message: String,
}

fn default_test_title() -> String {
    "Test notification".into()
}

fn default_test_message() -> String {
    "The notification pipeline works.".into()
}

pub async fn test_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TestNotificationRequest>,
) -> Json<serde_json::Value> {
    state.engine.test_notification(request.title, request.message);
    Json(serde_json::json!({ "dispatched": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Local;
    use std::collections::HashMap;
    use taskforge_core::catalog::{
        Catalog, NotifyFlags, ResourceGroupSpec, RetryPolicy, TriggerSpec,
    };
    use taskforge_core::clock::ManualClock;
    use taskforge_core::config::ForgeConfig;
    use taskforge_engine::{Engine, RecordingSink};
    use tower::util::ServiceExt;

    fn test_router() -> axum::Router {
        let catalog = Catalog {
            version: 1,
            groups: vec![ResourceGroupSpec {
                name: "g".into(),
                description: String::new(),
                max_concurrent: 1,
            }],
            jobs: vec![Job {
                id: "a".into(),
                name: "Job A".into(),
                enabled: true,
                priority: 0,
                resource_group: "g".into(),
                trigger: TriggerSpec::Interval { every: "5m".into() },
                command: vec!["/bin/sh".into(), "-c".into(), "echo hi".into()],
                steps: Vec::new(),
                working_directory: None,
                environment: HashMap::new(),
                timeout_seconds: 0,
                retry: RetryPolicy::default(),
                keywords: Vec::new(),
                notify: NotifyFlags::default(),
                prelude: None,
            }],
        };
        let clock = Arc::new(ManualClock::new(Local::now()));
        let engine = Engine::new(
            ForgeConfig::default(),
            catalog,
            clock,
            Arc::new(RecordingSink::default()),
        )
        .unwrap();
        build_router(Arc::new(AppState { engine }))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_reports_the_engine() {
        let app = test_router();
        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["running"], false);
        assert_eq!(body["mode"], "auto");
        assert_eq!(body["total_jobs"], 1);
    }

    #[tokio::test]
    async fn unknown_task_is_404_with_error_shape() {
        let app = test_router();
        let response = app
            .oneshot(Request::get("/api/tasks/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown_job");
        assert!(body["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn manual_run_conflicts_while_auto_scheduler_runs() {
        let app = test_router();
        let started = app
            .clone()
            .oneshot(
                Request::post("/api/scheduler/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(started.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::post("/api/tasks/a/run").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "scheduler_busy");
    }

    #[tokio::test]
    async fn invalid_mode_is_400() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::post("/api/scheduler/mode")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"turbo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_list_and_delete_a_task() {
        let app = test_router();
        let job = serde_json::json!({
            "id": "b",
            "name": "Job B",
            "resource_group": "g",
            "trigger": { "type": "cron", "expression": "*/5 * * * *" },
            "command": ["echo", "b"],
        });
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(job.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(Request::get("/api/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 2);

        let response = app
            .clone()
            .oneshot(Request::delete("/api/tasks/b").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Duplicate creation of an existing id is rejected.
        let dup = serde_json::json!({
            "id": "a",
            "name": "dup",
            "resource_group": "g",
            "trigger": { "type": "interval", "every": "5m" },
            "command": ["true"],
        });
        let response = app
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(dup.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_resource_group_is_rejected() {
        let app = test_router();
        let job = serde_json::json!({
            "id": "orphan",
            "name": "orphan",
            "resource_group": "no-such-group",
            "trigger": { "type": "interval", "every": "5m" },
            "command": ["true"],
        });
        let response = app
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(job.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown_group");
        assert!(body["message"].as_str().unwrap().contains("no-such-group"));
    }

    #[tokio::test]
    async fn bad_trigger_spec_is_rejected() {
        let app = test_router();
        let job = serde_json::json!({
            "id": "bad",
            "name": "bad",
            "resource_group": "g",
            "trigger": { "type": "cron", "expression": "not cron" },
            "command": ["true"],
        });
        let response = app
            .oneshot(
                Request::post("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(job.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_spec");
    }

    #[tokio::test]
    async fn resource_groups_summarize() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::get("/api/resource-groups")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let groups = body["groups"].as_array().unwrap();
        assert!(groups
            .iter()
            .any(|group| group["name"] == "g" && group["max"] == 1 && group["available"] == 1));
    }
}
