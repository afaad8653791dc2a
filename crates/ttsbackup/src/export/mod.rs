//! Export orchestrator
//!
//! Runs the whole pipeline for one export: scan the selected objects,
//! download their assets, rewrite the save to point at the archived
//! copies, then write the patched save and a manifest into the output
//! folder. Stage transitions are surfaced through the progress callback
//! and tracing.

pub mod manifest;

pub use manifest::{ExportManifest, ManifestObjectEntry, write_manifest, MANIFEST_FILE_NAME};

use crate::download::{
    AssetDownloadEngine, AssetDownloadResult, AssetStatus, DownloadConfig, DownloadError,
    ProgressCallback, ProgressEvent,
};
use crate::rewrite::{self, RewriteError, UrlRewriteRule};
use crate::save::{SaveDocument, SaveError};
use crate::scan::{self, AssetReference, ScanError};
use crate::selection::SelectionSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// User-facing knobs for one export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub output_folder: PathBuf,
    /// Base name for the exported save file; falls back to the original
    /// save's name when blank.
    pub new_save_name: String,
    pub download_assets: bool,
    /// Share one archived file between assets with identical content.
    pub collapse_shared_assets: bool,
    /// Recorded in the manifest; object transforms are not touched here.
    pub reposition_objects: bool,
    /// Recorded in the manifest; environment fields are not touched here.
    pub keep_environment: bool,
    pub max_concurrency: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_folder: PathBuf::new(),
            new_save_name: String::new(),
            download_assets: true,
            collapse_shared_assets: true,
            reposition_objects: false,
            keep_environment: true,
            max_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportStage {
    Idle,
    Scanning,
    Downloading,
    Rewriting,
    WritingManifest,
    Done,
    Failed,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportStage::Idle => "idle",
            ExportStage::Scanning => "scanning",
            ExportStage::Downloading => "downloading",
            ExportStage::Rewriting => "rewriting",
            ExportStage::WritingManifest => "writing manifest",
            ExportStage::Done => "done",
            ExportStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Save(#[from] SaveError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("building http client: {0}")]
    Client(#[from] DownloadError),

    #[error("i/o failure while {stage}: {source}")]
    Io {
        stage: ExportStage,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("export cancelled")]
    Cancelled,
}

impl From<ScanError> for ExportError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Cancelled => ExportError::Cancelled,
            ScanError::Save(e) => ExportError::Save(e),
        }
    }
}

pub struct ExportService {
    engine: AssetDownloadEngine,
}

impl ExportService {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        Ok(Self {
            engine: AssetDownloadEngine::new(config)?,
        })
    }

    pub fn with_engine(engine: AssetDownloadEngine) -> Self {
        Self { engine }
    }

    /// Run a full export and return the manifest that was written.
    pub async fn export(
        &self,
        original_save_path: &Path,
        document: &SaveDocument,
        selection: &SelectionSnapshot,
        rule: &UrlRewriteRule,
        options: &ExportOptions,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<ExportManifest, ExportError> {
        let result = self
            .run(
                original_save_path,
                document,
                selection,
                rule,
                options,
                &progress,
                cancel,
            )
            .await;
        match &result {
            Ok(manifest) => {
                set_stage(&progress, ExportStage::Done);
                info!(
                    save = %manifest.new_save_path,
                    assets = manifest.assets.len(),
                    "export complete"
                );
            }
            Err(e) => {
                set_stage(&progress, ExportStage::Failed);
                warn!(error = %e, "export failed");
            }
        }
        result
    }

    async fn run(
        &self,
        original_save_path: &Path,
        document: &SaveDocument,
        selection: &SelectionSnapshot,
        rule: &UrlRewriteRule,
        options: &ExportOptions,
        progress: &Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<ExportManifest, ExportError> {
        set_stage(progress, ExportStage::Scanning);
        let references = {
            let document = document.clone();
            let selection = selection.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || scan::scan_assets(&document, &selection, &cancel))
                .await??
        };

        set_stage(progress, ExportStage::Downloading);
        let assets = if options.download_assets {
            self.engine
                .download(references.clone(), options, progress.clone(), cancel.clone())
                .await
        } else {
            Vec::new()
        };
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let overrides = archived_overrides(&assets, rule);

        set_stage(progress, ExportStage::Rewriting);
        let patched = {
            let document = document.clone();
            let references = references.clone();
            let rule = rule.clone();
            tokio::task::spawn_blocking(move || {
                rewrite::rewrite_with_references(&document, &references, &rule, &overrides)
            })
            .await??
        };

        let save_path = options
            .output_folder
            .join(format!("{}.json", save_file_stem(document, options)));
        fs::create_dir_all(&options.output_folder)
            .await
            .map_err(|source| ExportError::Io {
                stage: ExportStage::Rewriting,
                source,
            })?;
        fs::write(&save_path, &patched)
            .await
            .map_err(|source| ExportError::Io {
                stage: ExportStage::Rewriting,
                source,
            })?;

        set_stage(progress, ExportStage::WritingManifest);
        let manifest = ExportManifest {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            original_save_path: original_save_path.display().to_string(),
            new_save_path: save_path.display().to_string(),
            options: options.clone(),
            assets,
            objects: object_entries(&references),
        };
        write_manifest(&manifest, &options.output_folder)
            .await
            .map_err(|source| ExportError::Io {
                stage: ExportStage::WritingManifest,
                source,
            })?;

        Ok(manifest)
    }
}

/// Original URL → new URL for every asset that landed in the archive.
///
/// Archived assets rewrite to `<base>/<archived filename>` when a global
/// base URL is set, and to the archived file's absolute-as-given path
/// otherwise. Failed assets get no entry and keep their original URL.
fn archived_overrides(
    assets: &[AssetDownloadResult],
    rule: &UrlRewriteRule,
) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    for result in assets {
        let archived = matches!(
            result.status,
            AssetStatus::Downloaded | AssetStatus::ReusedFromCache | AssetStatus::SkippedDuplicate
        );
        if !archived {
            continue;
        }
        let Some(local_path) = &result.local_path else {
            continue;
        };
        let new_url = match &rule.global_base_url {
            Some(base) => {
                let file_name = local_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}/{}", base.trim_end_matches('/'), file_name)
            }
            None => local_path.display().to_string(),
        };
        overrides
            .entry(result.asset.original_url.clone())
            .or_insert(new_url);
    }
    overrides
}

/// Selected objects and the asset URLs each contributed, in scan order.
fn object_entries(references: &[AssetReference]) -> Vec<ManifestObjectEntry> {
    let mut by_guid: HashMap<&str, usize> = HashMap::new();
    let mut entries: Vec<ManifestObjectEntry> = Vec::new();
    for reference in references {
        let idx = *by_guid
            .entry(reference.source_guid.as_str())
            .or_insert_with(|| {
                entries.push(ManifestObjectEntry {
                    guid: reference.source_guid.clone(),
                    name: reference.source_name.clone(),
                    asset_original_urls: Vec::new(),
                });
                entries.len() - 1
            });
        entries[idx]
            .asset_original_urls
            .push(reference.original_url.clone());
    }
    entries
}

fn save_file_stem(document: &SaveDocument, options: &ExportOptions) -> String {
    let requested = options.new_save_name.trim();
    let stem = if requested.is_empty() {
        document.original_name.as_deref().unwrap_or("export").trim()
    } else {
        requested
    };
    sanitize_file_stem(if stem.is_empty() { "export" } else { stem })
}

fn sanitize_file_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

fn set_stage(progress: &Option<ProgressCallback>, stage: ExportStage) {
    info!(%stage, "export stage");
    if let Some(callback) = progress {
        callback(ProgressEvent::StageChanged { stage });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_documented_defaults() {
        let options = ExportOptions::default();
        assert!(options.download_assets);
        assert!(options.collapse_shared_assets);
        assert!(!options.reposition_objects);
        assert!(options.keep_environment);
        assert_eq!(options.max_concurrency, 8);
    }

    #[test]
    fn options_deserialize_with_missing_fields() {
        let options: ExportOptions = serde_json::from_str(r#"{"max_concurrency": 2}"#).unwrap();
        assert_eq!(options.max_concurrency, 2);
        assert!(options.download_assets);
    }

    #[test]
    fn file_stem_sanitizes_separators() {
        assert_eq!(sanitize_file_stem("my/save: v2"), "my_save_ v2");
    }

    #[test]
    fn object_entries_group_by_guid_in_scan_order() {
        let refs = vec![
            asset_ref("a1", "obj-a", "http://x/1.png"),
            asset_ref("b2", "obj-b", "http://x/2.png"),
            asset_ref("a1", "obj-a", "http://x/3.png"),
        ];
        let entries = object_entries(&refs);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].guid, "a1");
        assert_eq!(entries[0].asset_original_urls.len(), 2);
        assert_eq!(entries[1].guid, "b2");
    }

    fn asset_ref(guid: &str, name: &str, url: &str) -> AssetReference {
        AssetReference {
            original_url: url.to_string(),
            kind: crate::scan::AssetKind::Image,
            inferred_extension: Some(".png".to_string()),
            source_guid: guid.to_string(),
            source_name: name.to_string(),
            field_path: crate::save::JsonPath::root().key("CustomImage").key("ImageURL"),
        }
    }

    #[tokio::test]
    async fn full_export_writes_patched_save_and_manifest() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tile.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"pixels".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let save_json = format!(
            r#"{{
                "SaveName": "Export Me",
                "ObjectStates": [
                    {{
                        "GUID": "tile1", "Name": "Custom_Tile",
                        "CustomImage": {{ "ImageURL": "{}/tile.png" }}
                    }}
                ]
            }}"#,
            server.uri()
        );
        let document = crate::save::parse(&save_json).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            output_folder: dir.path().to_path_buf(),
            new_save_name: "Backup: Export".to_string(),
            ..ExportOptions::default()
        };

        let service = ExportService::new(DownloadConfig::default()).unwrap();
        let manifest = service
            .export(
                Path::new("/saves/original.json"),
                &document,
                &SelectionSnapshot::all(),
                &UrlRewriteRule::default(),
                &options,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(manifest.assets.len(), 1);
        assert_eq!(manifest.assets[0].status, AssetStatus::Downloaded);
        assert_eq!(manifest.objects.len(), 1);
        assert_eq!(manifest.objects[0].guid, "tile1");

        // Patched save exists under the sanitized name and points at the archive.
        let save_path = dir.path().join("Backup_ Export.json");
        assert_eq!(manifest.new_save_path, save_path.display().to_string());
        let patched = tokio::fs::read_to_string(&save_path).await.unwrap();
        let archived = manifest.assets[0].local_path.as_ref().unwrap();
        assert!(patched.contains(&archived.display().to_string()));
        assert!(!patched.contains("/tile.png\""));

        // The archived bytes and the manifest file are on disk.
        assert_eq!(tokio::fs::read(archived).await.unwrap(), b"pixels");
        let manifest_text = tokio::fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME))
            .await
            .unwrap();
        assert!(manifest_text.contains("tile1"));
        assert!(manifest_text.contains("Downloaded"));
    }

    #[tokio::test]
    async fn export_without_downloads_passes_save_through_untouched() {
        let save_json = r#"{
            "SaveName": "Untouched",
            "ObjectStates": [
                { "GUID": "a1", "Name": "Tile",
                  "CustomImage": { "ImageURL": "http://cdn.example/a.png" } }
            ]
        }"#;
        let document = crate::save::parse(save_json).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            output_folder: dir.path().to_path_buf(),
            download_assets: false,
            ..ExportOptions::default()
        };

        let service = ExportService::new(DownloadConfig::default()).unwrap();
        let manifest = service
            .export(
                Path::new("/saves/original.json"),
                &document,
                &SelectionSnapshot::all(),
                &UrlRewriteRule::default(),
                &options,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(manifest.assets.is_empty());
        // No mapping applied: the written save is the original text.
        let written = tokio::fs::read_to_string(dir.path().join("Untouched.json"))
            .await
            .unwrap();
        assert_eq!(written, save_json);
    }

    #[tokio::test]
    async fn pre_cancelled_export_fails_with_cancelled() {
        let document = crate::save::parse(r#"{ "SaveName": "X", "ObjectStates": [] }"#).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            output_folder: dir.path().to_path_buf(),
            ..ExportOptions::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let service = ExportService::new(DownloadConfig::default()).unwrap();
        let result = service
            .export(
                Path::new("/saves/original.json"),
                &document,
                &SelectionSnapshot::all(),
                &UrlRewriteRule::default(),
                &options,
                None,
                cancel,
            )
            .await;
        assert!(matches!(result, Err(ExportError::Cancelled)));
    }
}
