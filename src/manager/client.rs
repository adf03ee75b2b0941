//! HTTP gateway for manager -> worker communication

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::task::{Task, TaskEvent};

/// Errors that can occur when talking to a worker
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Worker returned an error response
    #[error("worker returned {status}: {message}")]
    Status { status: u16, message: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Trait defining the worker-facing gateway
///
/// Abstracts the HTTP hop so placement and reconciliation logic can be
/// exercised against an in-memory fake.
#[async_trait]
pub trait WorkerGateway: Send + Sync {
    /// POST a task event to the worker's `/tasks`; returns the accepted task
    async fn submit_task(&self, worker: &str, event: &TaskEvent) -> GatewayResult<Task>;

    /// GET the worker's full task snapshot
    async fn list_tasks(&self, worker: &str) -> GatewayResult<Vec<Task>>;
}

/// reqwest-backed gateway
pub struct HttpWorkerGateway {
    client: Client,
}

impl HttpWorkerGateway {
    pub fn new() -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(GatewayError::Request)?;

        Ok(Self { client })
    }

    /// Build a full URL from a worker address and path
    fn url(worker: &str, path: &str) -> String {
        format!("http://{}/{}", worker, path.trim_start_matches('/'))
    }

    async fn check(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl WorkerGateway for HttpWorkerGateway {
    async fn submit_task(&self, worker: &str, event: &TaskEvent) -> GatewayResult<Task> {
        let response = self
            .client
            .post(Self::url(worker, "tasks"))
            .json(event)
            .send()
            .await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn list_tasks(&self, worker: &str) -> GatewayResult<Vec<Task>> {
        let response = self.client.get(Self::url(worker, "tasks")).send().await?;

        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}
