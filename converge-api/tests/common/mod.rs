//! Shared test utilities for converge-api integration tests.

use converge_api::{AppState, build, create_router};
use converge_engine::{BackoffConfig, ControllerConfig};
use converge_gcp::{InMemoryCloud, OperationPolling};
use reqwest::{Client, Response as ReqwestResponse};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Test server wrapper running the REST API and both controllers against an
/// in-memory cloud.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub cloud: Arc<InMemoryCloud>,
    pub state: Arc<AppState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let cloud = Arc::new(InMemoryCloud::new());
        let config = ControllerConfig {
            poll_interval: Duration::from_millis(50),
            workers: 2,
            queue_capacity: 64,
            reconcile_timeout: Some(Duration::from_secs(5)),
            backoff: BackoffConfig {
                base: Duration::from_millis(10),
                max: Duration::from_millis(100),
                contract_violation_floor: Duration::from_millis(200),
            },
        };
        let polling = OperationPolling {
            interval: Duration::from_millis(1),
            max_attempts: 10,
        };

        let (state, controllers) = build(cloud.clone(), cloud.clone(), config, polling);
        let router = create_router(state.clone());

        // Bind to port 0 to let the OS choose an available port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut server_shutdown = shutdown_rx.clone();

        let controllers_task = tokio::spawn(controllers.run(shutdown_rx));
        let server_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    server_shutdown.changed().await.ok();
                })
                .await
                .expect("Server error");
        });

        Self {
            addr,
            client: Client::new(),
            cloud,
            state,
            shutdown_tx,
            tasks: vec![controllers_task, server_task],
        }
    }

    /// Get base URL for the REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// Perform a GET request.
    pub async fn get(&self, path: &str) -> ReqwestResponse {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a PUT request with JSON body.
    pub async fn put_json<T: Serialize>(&self, path: &str, body: &T) -> ReqwestResponse {
        self.client
            .put(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a POST request without a body.
    pub async fn post(&self, path: &str) -> ReqwestResponse {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Perform a DELETE request.
    pub async fn delete(&self, path: &str) -> ReqwestResponse {
        self.client
            .delete(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Stop the server and the controllers.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("shutdown timed out")
                .unwrap();
        }
    }
}

/// Poll `check` until it returns true, for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
