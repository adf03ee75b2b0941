//! HTTP adapter exposing worker operations to the manager

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::http::ApiError;
use crate::stats::HostStats;
use crate::task::{State as TaskState, Task, TaskEvent};

use super::Worker;

/// Application state shared across worker handlers
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<Worker>,
}

/// Build the worker HTTP router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:task_id", delete(stop_task))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accept a task event and enqueue its task for execution
///
/// The embedded task is queued carrying the event's desired state; transition
/// validity is checked when the worker dequeues it.
async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(event) = payload
        .map_err(|e| ApiError::bad_request(format!("error parsing task event: {}", e)))?;

    let mut task = event.task;
    task.state = event.state;

    info!("Worker API: accepted task {} (event {})", task.id, event.id);
    state.worker.add_task(task.clone());
    Ok(Json(task))
}

/// Snapshot of all tasks known to this worker
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.worker.get_tasks())
}

/// Latest host stats sample
async fn get_stats(State(state): State<AppState>) -> Json<HostStats> {
    Json(state.worker.stats())
}

/// Enqueue a synthetic stop event for a known task
async fn stop_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: Uuid = task_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("malformed task id: {}", task_id)))?;

    let stored = state
        .worker
        .get_task(id)
        .ok_or_else(|| ApiError::bad_request(format!("no task with id {}", id)))?;

    let mut copy = stored;
    copy.state = TaskState::Completed;

    info!("Worker API: queued stop for task {}", id);
    state.worker.add_task(copy);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerRuntime, RunSpec, RuntimeError};
    use crate::stats::{StatsError, StatsSource};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NullRuntime;

    #[async_trait]
    impl ContainerRuntime for NullRuntime {
        async fn run(&self, _spec: &RunSpec) -> Result<String, RuntimeError> {
            Ok("ctr-0".to_string())
        }

        async fn stop(&self, _container_id: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    struct NullStats;

    impl StatsSource for NullStats {
        fn sample(&self) -> Result<HostStats, StatsError> {
            Ok(HostStats::default())
        }
    }

    fn test_state() -> AppState {
        AppState {
            worker: Arc::new(Worker::new(
                "worker-test",
                Arc::new(NullRuntime),
                Arc::new(NullStats),
            )),
        }
    }

    fn post_event(event: &TaskEvent) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/tasks")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(event).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_task_enqueues_with_desired_state() {
        let state = test_state();
        let app = build_router(state.clone());

        let event = TaskEvent::new(TaskState::Scheduled, Task::new("web", "busybox:latest"));
        let response = app.oneshot(post_event(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let accepted: Task = serde_json::from_slice(&body).unwrap();
        assert_eq!(accepted.id, event.task.id);
        assert_eq!(accepted.state, TaskState::Scheduled);
        assert_eq!(state.worker.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_submit_malformed_body_is_a_400() {
        let app = build_router(test_state());

        let request = Request::builder()
            .method("POST")
            .uri("/tasks")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"state": 1, "unknown": true}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_tasks() {
        let state = test_state();
        let mut task = Task::new("web", "busybox:latest");
        task.state = TaskState::Scheduled;
        state.worker.add_task(task);
        state.worker.run_next().await.unwrap();

        let app = build_router(state);
        let request = Request::builder()
            .uri("/tasks")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let tasks: Vec<Task> = serde_json::from_slice(&body).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_a_400_and_mutates_nothing() {
        let state = test_state();
        let app = build_router(state.clone());

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/tasks/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.worker.queue_len(), 0);
        assert!(state.worker.get_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_stop_known_task_enqueues_completed_copy() {
        let state = test_state();
        let mut task = Task::new("web", "busybox:latest");
        task.state = TaskState::Scheduled;
        let id = task.id;
        state.worker.add_task(task);
        state.worker.run_next().await.unwrap();

        let app = build_router(state.clone());
        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/tasks/{}", id))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.worker.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_get_stats() {
        let state = test_state();
        state.worker.sample_stats();

        let app = build_router(state);
        let request = Request::builder()
            .uri("/stats")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let stats: HostStats = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats.task_count, 0);
    }
}
