use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::info;
use walkdir::WalkDir;

use crate::error::Result;

/// Host/port environment variables services use to reach the resource API.
pub const HOST_ENV: &str = "SUGA_HOST";
pub const PORT_ENV: &str = "SUGA_PORT";

struct ApiState {
    root: PathBuf,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

/// One TCP endpoint serving the resource protocol (storage + pubsub) to all
/// services. Buckets are directories under the state root.
pub struct ResourceApi {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ResourceApi {
    pub async fn start(root: PathBuf, port: u16) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        let state = Arc::new(ApiState {
            root,
            topics: Mutex::new(HashMap::new()),
        });
        let app = router(state);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        info!("resource API listening on {addr}");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, handle })
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/storage/{bucket}", get(list_objects))
        .route(
            "/storage/{bucket}/{*key}",
            get(read_object).put(write_object).delete(delete_object),
        )
        .route("/topics/{topic}/publish", post(publish))
        .route("/topics/{topic}/next", get(next_message))
        .with_state(state)
}

fn object_path(state: &ApiState, bucket: &str, key: &str) -> Option<PathBuf> {
    if bucket.contains("..") || key.split('/').any(|part| part == "..") {
        return None;
    }
    Some(state.root.join(bucket).join(key))
}

async fn read_object(
    State(state): State<Arc<ApiState>>,
    UrlPath((bucket, key)): UrlPath<(String, String)>,
) -> Response {
    let Some(path) = object_path(&state, &bucket, &key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => bytes.into_response(),
        Err(_) => (StatusCode::NOT_FOUND, format!("no object '{key}' in '{bucket}'"))
            .into_response(),
    }
}

async fn write_object(
    State(state): State<Arc<ApiState>>,
    UrlPath((bucket, key)): UrlPath<(String, String)>,
    body: Bytes,
) -> Response {
    let Some(path) = object_path(&state, &bucket, &key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if let Some(parent) = path.parent() {
        if tokio::fs::create_dir_all(parent).await.is_err() {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    match tokio::fs::write(&path, &body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn delete_object(
    State(state): State<Arc<ApiState>>,
    UrlPath((bucket, key)): UrlPath<(String, String)>,
) -> Response {
    let Some(path) = object_path(&state, &bucket, &key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_objects(
    State(state): State<Arc<ApiState>>,
    UrlPath(bucket): UrlPath<String>,
) -> Response {
    let root = state.root.join(&bucket);
    let mut keys: Vec<String> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(&root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    keys.sort();
    Json(json!({ "keys": keys })).into_response()
}

async fn publish(
    State(state): State<Arc<ApiState>>,
    UrlPath(topic): UrlPath<String>,
    body: Bytes,
) -> Response {
    let message = String::from_utf8_lossy(&body).to_string();
    let topics = state.topics.lock().await;
    let delivered = topics
        .get(&topic)
        .map(|sender| sender.send(message).unwrap_or(0))
        .unwrap_or(0);
    Json(json!({ "delivered": delivered })).into_response()
}

/// Long-poll subscription: parks until the next message on the topic.
async fn next_message(
    State(state): State<Arc<ApiState>>,
    UrlPath(topic): UrlPath<String>,
) -> Response {
    let mut receiver = {
        let mut topics = state.topics.lock().await;
        topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    };
    match receiver.recv().await {
        Ok(message) => message.into_response(),
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}
