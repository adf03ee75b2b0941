//! HTTP adapter exposing manager operations to end users

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
use crate::task::{Task, TaskEvent};

use super::{Manager, ManagerError};

/// Application state shared across manager handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
}

/// Build the manager HTTP router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks", get(list_tasks))
        .route("/tasks/:task_id", delete(stop_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::UnknownTask(_)
            | ManagerError::UnsupportedState { .. }
            | ManagerError::InvalidTransition { .. } => ApiError::bad_request(err.to_string()),
            ManagerError::NoWorkers => ApiError::internal(err.to_string()),
        }
    }
}

/// Accept a task event for placement
async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(event) = payload
        .map_err(|e| ApiError::bad_request(format!("error parsing task event: {}", e)))?;

    let task = state.manager.add_task(event)?;
    info!("Manager API: accepted task {}", task.id);
    Ok((StatusCode::CREATED, Json(task)))
}

/// The manager's view of every known task
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.manager.get_tasks())
}

/// Queue a stop event for a known task
async fn stop_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: Uuid = task_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("malformed task id: {}", task_id)))?;

    state.manager.stop_task(id)?;
    info!("Manager API: queued stop for task {}", id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::client::{GatewayResult, WorkerGateway};
    use super::*;
    use crate::task::State as TaskState;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NullGateway;

    #[async_trait]
    impl WorkerGateway for NullGateway {
        async fn submit_task(&self, _worker: &str, event: &TaskEvent) -> GatewayResult<Task> {
            let mut task = event.task.clone();
            task.state = event.state;
            Ok(task)
        }

        async fn list_tasks(&self, _worker: &str) -> GatewayResult<Vec<Task>> {
            Ok(Vec::new())
        }
    }

    fn test_state() -> AppState {
        AppState {
            manager: Arc::new(Manager::new(
                vec!["w1:5556".to_string()],
                Arc::new(NullGateway),
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
    async fn test_submit_task_returns_201() {
        let state = test_state();
        let app = build_router(state.clone());

        let event = TaskEvent::new(TaskState::Scheduled, Task::new("web", "busybox:latest"));
        let response = app.oneshot(post_event(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let accepted: Task = serde_json::from_slice(&body).unwrap();
        assert_eq!(accepted.id, event.task.id);
        assert_eq!(state.manager.event_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_malformed_body_is_a_400() {
        let app = build_router(test_state());

        let request = Request::builder()
            .method("POST")
            .uri("/tasks")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_running_state_is_a_400() {
        let state = test_state();
        let app = build_router(state.clone());

        let event = TaskEvent::new(TaskState::Running, Task::new("web", "busybox:latest"));
        let response = app.oneshot(post_event(&event)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.manager.event_count(), 0);
    }

    #[tokio::test]
    async fn test_list_tasks() {
        let state = test_state();
        let event = TaskEvent::new(TaskState::Scheduled, Task::new("web", "busybox:latest"));
        state.manager.add_task(event).unwrap();

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
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_a_400() {
        let app = build_router(test_state());

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/tasks/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stop_running_task_returns_204() {
        let state = test_state();

        // A task the fleet reports as running
        let mut task = Task::new("web", "busybox:latest");
        task.state = TaskState::Running;
        task.container_id = Some("ctr-0".to_string());
        state.manager.task_db.insert(task.id, task.clone());

        let app = build_router(state.clone());
        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/tasks/{}", task.id))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.manager.event_count(), 1);
        assert_eq!(state.manager.pending_len(), 1);
    }
}
