//! Tabletop Save Asset Backup Library
//!
//! This library turns a tabletop save file that references assets by
//! remote URL into a self-contained backup: it parses the save into an
//! addressable object tree, lets a frontend pick a subset of objects
//! with tri-state selection, scans the selected objects for asset URLs,
//! downloads each distinct URL exactly once with content-addressed
//! dedup, rewrites the save to point at the archived copies, and writes
//! the result plus a manifest to an output folder.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ttsbackup::{
//!     DownloadConfig, ExportOptions, ExportService, ProgressEvent,
//!     SelectionSnapshot, UrlRewriteRule,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let save_path = Path::new("/saves/TS_Save_42.json");
//! let text = tokio::fs::read_to_string(save_path).await?;
//! let document = ttsbackup::save::parse(&text)?;
//!
//! let options = ExportOptions {
//!     output_folder: "/backups/save-42".into(),
//!     new_save_name: "My Backup".into(),
//!     ..ExportOptions::default()
//! };
//!
//! let progress = Arc::new(|event: ProgressEvent| {
//!     if let ProgressEvent::AssetSettled { url, status, completed, total, .. } = event {
//!         println!("[{completed}/{total}] {status:?} {url}");
//!     }
//! });
//!
//! let service = ExportService::new(DownloadConfig::default())?;
//! let manifest = service
//!     .export(
//!         save_path,
//!         &document,
//!         &SelectionSnapshot::all(),
//!         &UrlRewriteRule::default(),
//!         &options,
//!         Some(progress),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! println!("exported {} assets", manifest.assets.len());
//! # Ok(())
//! # }
//! ```

pub mod disk;
pub mod download;
pub mod export;
pub mod rewrite;
pub mod save;
pub mod scan;
pub mod selection;
pub mod settings;

// Re-export commonly used types for convenience
pub use download::{
    AssetDownloadEngine, AssetDownloadResult, AssetFetcher, AssetStatus, DownloadConfig,
    DownloadError, ProgressCallback, ProgressEvent,
};
pub use export::{
    ExportError, ExportManifest, ExportOptions, ExportService, ExportStage, ManifestObjectEntry,
};
pub use rewrite::{RewriteError, UrlRewriteRule};
pub use save::{JsonPath, ObjectNode, SaveDocument, SaveError};
pub use scan::{AssetKind, AssetReference, ScanError};
pub use selection::{SelectionSnapshot, SelectionTree, SelectionValue};
pub use settings::{AppSettings, SettingsStore};
