//! Export manifest: a machine-readable record of what a run produced.

use crate::download::AssetDownloadResult;
use crate::export::ExportOptions;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Written next to the exported save as `manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    /// RFC 3339 export timestamp.
    pub timestamp: String,
    pub original_save_path: String,
    pub new_save_path: String,
    pub options: ExportOptions,
    /// Per-asset outcomes, including failures and warnings.
    pub assets: Vec<AssetDownloadResult>,
    /// Selected objects and the asset URLs each contributed.
    pub objects: Vec<ManifestObjectEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestObjectEntry {
    pub guid: String,
    pub name: String,
    pub asset_original_urls: Vec<String>,
}

pub async fn write_manifest(
    manifest: &ExportManifest,
    output_folder: &Path,
) -> std::io::Result<PathBuf> {
    let json = serde_json::to_string_pretty(manifest).map_err(std::io::Error::other)?;
    fs::create_dir_all(output_folder).await?;
    let path = output_folder.join(MANIFEST_FILE_NAME);
    fs::write(&path, json).await?;
    info!(path = %path.display(), assets = manifest.assets.len(), "wrote manifest");
    Ok(path)
}
