use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;

/// Where a route forwards to.
#[derive(Debug, Clone)]
pub enum Upstream {
    /// A service port, with the route's base path prepended after stripping
    /// the route prefix.
    Service { port: u16, base_path: String },
    /// The resource API's file server for a bucket.
    Bucket { resource_api: SocketAddr, bucket: String },
}

#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub prefix: String,
    pub upstream: Upstream,
}

struct ProxyState {
    name: String,
    routes: Vec<ProxyRoute>,
    client: reqwest::Client,
}

/// HTTP reverse-proxy multiplexer for one entrypoint intent.
pub struct EntrypointProxy {
    pub name: String,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl EntrypointProxy {
    pub async fn start(name: &str, port: u16, mut routes: Vec<ProxyRoute>) -> Result<Self> {
        // Longest prefix wins; sorting up front keeps matching a linear scan.
        routes.sort_by_key(|r| std::cmp::Reverse(r.prefix.len()));
        let state = Arc::new(ProxyState {
            name: name.to_string(),
            routes,
            client: reqwest::Client::new(),
        });
        let app = Router::new().fallback(forward).with_state(state);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        info!("entrypoint '{name}' listening on http://{addr}");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            name: name.to_string(),
            addr,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn forward(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path();
    let Some(route) = state
        .routes
        .iter()
        .find(|route| path.starts_with(route.prefix.as_str()))
    else {
        return (
            StatusCode::NOT_FOUND,
            format!("no route matches '{path}' on entrypoint '{}'", state.name),
        )
            .into_response();
    };

    let rest = &path[route.prefix.len()..];
    let upstream_url = match &route.upstream {
        Upstream::Service { port, base_path } => {
            let base = base_path.trim_end_matches('/');
            format!("http://127.0.0.1:{port}{base}/{rest}")
        }
        Upstream::Bucket {
            resource_api,
            bucket,
        } => format!("http://{resource_api}/storage/{bucket}/{rest}"),
    };
    let upstream_url = match uri.query() {
        Some(query) => format!("{upstream_url}?{query}"),
        None => upstream_url,
    };
    debug!("proxy {} {} -> {upstream_url}", method, path);

    let request = state
        .client
        .request(method, &upstream_url)
        .body(body)
        .build();
    let request = match request {
        Ok(request) => request,
        Err(err) => {
            return (StatusCode::BAD_GATEWAY, format!("proxy error: {err}")).into_response();
        }
    };

    match state.client.execute(request).await {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let headers = upstream.headers().clone();
            match upstream.bytes().await {
                Ok(bytes) => {
                    let mut response = Response::new(Body::from(bytes));
                    *response.status_mut() = status;
                    if let Some(content_type) = headers.get(reqwest::header::CONTENT_TYPE) {
                        response
                            .headers_mut()
                            .insert(axum::http::header::CONTENT_TYPE, content_type.clone());
                    }
                    response
                }
                Err(err) => {
                    (StatusCode::BAD_GATEWAY, format!("proxy error: {err}")).into_response()
                }
            }
        }
        Err(err) => (StatusCode::BAD_GATEWAY, format!("proxy error: {err}")).into_response(),
    }
}
