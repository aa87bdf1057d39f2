//! Shared bootstrap for the fullpage binaries.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fullpage_core::{AppConfig, ManifestDirectory, SiteDirectory};

/// JSON logs on stderr, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();
}

/// Site directory described by the configured manifest.
pub async fn load_directory(config: &AppConfig) -> Result<Arc<dyn SiteDirectory>> {
    let path = config
        .site_manifest
        .as_deref()
        .context("site_manifest is not configured (set FULLPAGE_SITE_MANIFEST)")?;
    let directory = ManifestDirectory::load(path)
        .await
        .with_context(|| format!("failed to load site manifest {}", path.display()))?;
    Ok(Arc::new(directory))
}
