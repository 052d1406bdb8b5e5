#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use infergov::config::ServerConfig;
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct FakeState {
    healthy: Arc<AtomicBool>,
    metrics: Arc<Mutex<Value>>,
}

/// Loopback HTTP server answering `/health` and `/metrics` like a model server
pub struct FakeModelServer {
    pub port: u16,
    state: FakeState,
    task: JoinHandle<()>,
}

impl FakeModelServer {
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let state = FakeState {
            healthy: Arc::new(AtomicBool::new(true)),
            metrics: Arc::new(Mutex::new(default_metrics())),
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { port, state, task }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_metrics(&self, metrics: Value) {
        *self.state.metrics.lock().unwrap() = metrics;
    }
}

impl Drop for FakeModelServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn health(State(state): State<FakeState>) -> (StatusCode, Json<Value>) {
    if state.healthy.load(Ordering::SeqCst) {
        (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "model_loaded": true })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "loading" })),
        )
    }
}

async fn metrics(State(state): State<FakeState>) -> Json<Value> {
    Json(state.metrics.lock().unwrap().clone())
}

pub fn default_metrics() -> Value {
    json!({
        "memory": { "used": 2_147_483_648u64, "total": 8_589_934_592u64, "percentage": 25.0 },
        "cpu": { "usage": 12.5, "cores": 8 },
        "model": { "status": "ready", "queue_length": 0, "average_response_time": 0.8 },
        "requests": { "total": 10, "successful": 9, "failed": 1 }
    })
}

/// A loopback port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Server directory holding a `/bin/sh` entrypoint, with fast test timings
pub fn create_server_dir(script: &str, port: u16) -> (TempDir, ServerConfig) {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("main.sh"), script).unwrap();

    let config = ServerConfig {
        server_dir: temp_dir.path().to_path_buf(),
        entrypoint: "main.sh".to_string(),
        interpreter: "/bin/sh".to_string(),
        port,
        startup_timeout_ms: 3_000,
        probe_interval_ms: 50,
        probe_timeout_ms: 500,
        stop_timeout_ms: 1_000,
        restart_delay_ms: 50,
        restart_pause_ms: 20,
        health_check_interval_ms: 60_000,
        ..ServerConfig::default()
    };
    (temp_dir, config)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
