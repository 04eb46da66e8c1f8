//! Local plugin server: serves plugin manifests and Terraform module zips
//! from a developer's working tree, plus a module proxy for plugin-side
//! runtime code.

mod archive;
mod index;
mod routes;

pub use archive::zip_directory;
pub use index::{discover, ModuleEntry, PluginEntry, ServerIndex};
pub use routes::{router, DEV_VERSION};

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;

pub const DEFAULT_PORT: u16 = 9000;

/// Discovers plugins under `base_dir` and serves them until the task is
/// cancelled.
pub async fn serve(base_dir: &Path, port: u16) -> Result<()> {
    let index = Arc::new(discover(base_dir)?);
    info!(
        "serving {} plugin(s) from {} on port {port}",
        index.plugins.len(),
        base_dir.display()
    );
    let app = router(index);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
