use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::warn;

use super::archive::zip_directory;
use super::index::ServerIndex;

/// The single pseudo-version served for in-development modules.
pub const DEV_VERSION: &str = "v0.0.0-dev";
const DEV_VERSION_TIME: &str = "2022-01-01T00:00:00Z";

pub fn router(index: Arc<ServerIndex>) -> Router {
    Router::new()
        .route(
            "/api/public/plugin_libraries/{team}/{lib}/versions/{version}/plugins/{name}",
            get(get_plugin),
        )
        .route(
            "/api/teams/{team}/plugin_libraries/{lib}/versions/{version}/plugins/{name}",
            get(get_plugin),
        )
        .route("/terraform-modules/{file}", get(get_terraform_module))
        // Module proxy paths embed arbitrary module identifiers, so they are
        // matched from the raw URI instead of a route pattern.
        .fallback(module_proxy)
        .with_state(index)
}

/// Manifest lookup. Locally the team, library, and version segments are
/// ignored; auth on the team-scoped mirror is, too.
async fn get_plugin(
    State(index): State<Arc<ServerIndex>>,
    UrlPath((_team, _lib, _version, name)): UrlPath<(String, String, String, String)>,
) -> Response {
    match index.plugins.get(&name) {
        Some(entry) => Json(json!({ "manifest": entry.manifest })).into_response(),
        None => (StatusCode::NOT_FOUND, format!("plugin '{name}' not found")).into_response(),
    }
}

async fn get_terraform_module(
    State(index): State<Arc<ServerIndex>>,
    UrlPath(file): UrlPath<String>,
) -> Response {
    let Some(name) = file.strip_suffix(".zip") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(entry) = index.plugins.get(name) else {
        return (StatusCode::NOT_FOUND, format!("plugin '{name}' not found")).into_response();
    };
    let dir = match entry.terraform_dir() {
        Ok(dir) => dir,
        Err(err) => {
            warn!("terraform module for '{name}' unresolvable: {err}");
            return (StatusCode::NOT_FOUND, err.to_string()).into_response();
        }
    };
    match zip_directory(&dir, None) {
        Ok(bytes) => zip_response(bytes),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Module proxy protocol: `@v/list`, `@v/<ver>.info`, `@v/<ver>.mod`,
/// `@v/<ver>.zip`, and `@latest`, all under the declared module path.
async fn module_proxy(State(index): State<Arc<ServerIndex>>, uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    if let Some(module_path) = path.strip_suffix("/@latest") {
        return match index.modules.get(module_path) {
            Some(_) => version_info().into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let Some((module_path, file)) = path.split_once("/@v/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(entry) = index.modules.get(module_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if file == "list" {
        return (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{DEV_VERSION}\n"),
        )
            .into_response();
    }
    if let Some(version) = file.strip_suffix(".info") {
        if version != DEV_VERSION {
            return StatusCode::NOT_FOUND.into_response();
        }
        return version_info().into_response();
    }
    if let Some(version) = file.strip_suffix(".mod") {
        if version != DEV_VERSION {
            return StatusCode::NOT_FOUND.into_response();
        }
        return match std::fs::read_to_string(&entry.file) {
            Ok(contents) => (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                contents,
            )
                .into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        };
    }
    if let Some(version) = file.strip_suffix(".zip") {
        if version != DEV_VERSION {
            return StatusCode::NOT_FOUND.into_response();
        }
        let prefix = format!("{module_path}@{version}");
        return match zip_directory(&entry.dir, Some(&prefix)) {
            Ok(bytes) => zip_response(bytes),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}

fn version_info() -> Json<serde_json::Value> {
    Json(json!({ "Version": DEV_VERSION, "Time": DEV_VERSION_TIME }))
}

fn zip_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/zip")], bytes).into_response()
}
