use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::Result;

/// One schedule registered for a service, addressable by index in sorted
/// trigger-name order.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct TriggerTarget {
    pub port: u16,
    pub schedules: Vec<Schedule>,
}

struct TriggerState {
    targets: HashMap<String, TriggerTarget>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InvokeQuery {
    #[serde(default, rename = "async")]
    run_async: bool,
}

/// Local trigger server: `GET /schedules/{service}/{index}?async=bool`
/// invokes a registered schedule against the service, synchronously by
/// default.
pub struct TriggerServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TriggerServer {
    pub async fn start(port: u16, targets: HashMap<String, TriggerTarget>) -> Result<Self> {
        let state = Arc::new(TriggerState {
            targets,
            client: reqwest::Client::new(),
        });
        let app = Router::new()
            .route("/schedules/{service}/{index}", get(invoke))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        info!("trigger server listening on {addr}");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, handle })
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn invoke(
    State(state): State<Arc<TriggerState>>,
    UrlPath((service, index)): UrlPath<(String, usize)>,
    Query(query): Query<InvokeQuery>,
) -> Response {
    let Some(target) = state.targets.get(&service) else {
        return (StatusCode::NOT_FOUND, format!("unknown service '{service}'")).into_response();
    };
    let Some(schedule) = target.schedules.get(index) else {
        return (
            StatusCode::NOT_FOUND,
            format!(
                "service '{service}' has {} schedule(s); index {index} is out of range",
                target.schedules.len()
            ),
        )
            .into_response();
    };

    let url = format!("http://127.0.0.1:{}{}", target.port, schedule.path);
    if query.run_async {
        let client = state.client.clone();
        tokio::spawn(async move {
            let _ = client.get(&url).send().await;
        });
        return (StatusCode::ACCEPTED, format!("schedule '{}' dispatched", schedule.name))
            .into_response();
    }

    match state.client.get(&url).send().await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, format!("schedule '{}' invoked", schedule.name)).into_response()
        }
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            format!("schedule '{}' failed: {err}", schedule.name),
        )
            .into_response(),
    }
}
