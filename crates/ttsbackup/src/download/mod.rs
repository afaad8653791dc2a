//! Bounded-concurrency asset download with content-addressed dedup
//!
//! Within one run the engine guarantees at most one network fetch per
//! distinct URL: the first requester registers an in-flight slot under a
//! mutex, later requesters await the same slot and settle as duplicates.
//! Fetched payloads are hashed (sha256) and archived under the hash, which
//! doubles as the filename and as the key for collapsing distinct URLs that
//! turn out to carry identical bytes.
//!
//! The dedup cache lives only for the duration of one `download` call;
//! every export run starts cold.

pub mod fetch;
pub mod progress;


pub use fetch::{AssetFetcher, DownloadConfig, DownloadError, HttpFetcher};
pub use progress::{
    ConsoleProgressReporter, IntoProgressCallback, NullProgressReporter, ProgressCallback,
    ProgressEvent, ProgressReporter,
};

use crate::export::ExportOptions;
use crate::scan::{is_http_url, AssetReference};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Terminal (and initial) states of one asset's download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetStatus {
    Pending,
    Downloaded,
    ReusedFromCache,
    SkippedDuplicate,
    Failed,
    LocalPathWarning,
}

/// Outcome record for one scanned asset. Created `Pending`, settled exactly
/// once to a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct AssetDownloadResult {
    pub asset: AssetReference,
    pub local_path: Option<PathBuf>,
    pub hash: Option<String>,
    pub status: AssetStatus,
    pub error: Option<String>,
}

impl AssetDownloadResult {
    pub fn pending(asset: AssetReference) -> Self {
        Self {
            asset,
            local_path: None,
            hash: None,
            status: AssetStatus::Pending,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != AssetStatus::Pending
    }
}

/// Per-URL fetch outcome shared by every requester of that URL.
#[derive(Debug, Clone)]
enum UrlOutcome {
    Archived {
        local_path: PathBuf,
        hash: String,
        reused: bool,
    },
    Failed {
        error: String,
    },
}

/// Shared state of one download run. The in-flight map is the only
/// concurrently mutated structure; registration is serialized by its mutex.
struct RunState {
    inflight: Mutex<HashMap<String, Arc<OnceCell<UrlOutcome>>>>,
    archived_by_hash: Mutex<HashMap<String, PathBuf>>,
    settled: AtomicUsize,
}

/// The download and dedup engine.
pub struct AssetDownloadEngine {
    fetcher: Arc<dyn AssetFetcher>,
    config: DownloadConfig,
}

impl AssetDownloadEngine {
    /// Engine with the production HTTP fetcher.
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Ok(Self { fetcher, config })
    }

    /// Engine with an injected fetcher (tests, alternative transports).
    pub fn with_fetcher(fetcher: Arc<dyn AssetFetcher>, config: DownloadConfig) -> Self {
        Self { fetcher, config }
    }

    /// Download a batch of asset references with bounded concurrency.
    ///
    /// Per-asset failures never abort the batch. On cancellation, assets
    /// that already reached a terminal status are returned; the rest are
    /// abandoned.
    pub async fn download(
        &self,
        assets: Vec<AssetReference>,
        options: &ExportOptions,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Vec<AssetDownloadResult> {
        let total = assets.len();
        if total == 0 {
            return Vec::new();
        }
        debug!(
            assets = total,
            max_concurrency = options.max_concurrency,
            "starting download batch"
        );

        let state = RunState {
            inflight: Mutex::new(HashMap::new()),
            archived_by_hash: Mutex::new(HashMap::new()),
            settled: AtomicUsize::new(0),
        };
        let state = &state;

        let results: Vec<Option<AssetDownloadResult>> = stream::iter(assets)
            .map(|asset| {
                let progress = progress.clone();
                let cancel = cancel.clone();
                async move {
                    self.settle_one(asset, options, state, total, progress, cancel)
                        .await
                }
            })
            .buffer_unordered(options.max_concurrency.max(1))
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    async fn settle_one(
        &self,
        asset: AssetReference,
        options: &ExportOptions,
        state: &RunState,
        total: usize,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Option<AssetDownloadResult> {
        let url = asset.original_url.trim().to_string();

        if !is_http_url(&url) {
            warn!(value = %url, "asset value is not fetchable, flagging as local path");
            return Some(settle(
                state,
                total,
                &progress,
                AssetDownloadResult {
                    asset,
                    local_path: None,
                    hash: None,
                    status: AssetStatus::LocalPathWarning,
                    error: Some("value looks like a local file path, not a fetchable URL".into()),
                },
            ));
        }

        if cancel.is_cancelled() {
            return None;
        }

        // Register under the lock: whoever inserts the slot owns the fetch.
        let (slot, first) = {
            let mut inflight = state.inflight.lock().await;
            match inflight.get(&url) {
                Some(slot) => (slot.clone(), false),
                None => {
                    let slot = Arc::new(OnceCell::new());
                    inflight.insert(url.clone(), slot.clone());
                    (slot, true)
                }
            }
        };

        let outcome = slot
            .get_or_try_init(|| {
                self.fetch_and_archive(&url, asset.inferred_extension.as_deref(), options, state, &progress, &cancel)
            })
            .await
            .map(|outcome| outcome.clone());

        let result = match outcome {
            // Initialization only errors on cancellation; nothing settles.
            Err(_) => return None,
            Ok(UrlOutcome::Archived { local_path, hash, reused }) => {
                let status = match (first, reused) {
                    (false, _) => AssetStatus::SkippedDuplicate,
                    (true, false) => AssetStatus::Downloaded,
                    (true, true) => AssetStatus::ReusedFromCache,
                };
                AssetDownloadResult {
                    asset,
                    local_path: Some(local_path),
                    hash: Some(hash),
                    status,
                    error: None,
                }
            }
            Ok(UrlOutcome::Failed { error }) => AssetDownloadResult {
                asset,
                local_path: None,
                hash: None,
                status: if first {
                    AssetStatus::Failed
                } else {
                    AssetStatus::SkippedDuplicate
                },
                error: Some(error),
            },
        };

        Some(settle(state, total, &progress, result))
    }

    /// One real fetch per distinct URL: retry with backoff, hash, archive.
    async fn fetch_and_archive(
        &self,
        url: &str,
        extension: Option<&str>,
        options: &ExportOptions,
        state: &RunState,
        progress: &Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<UrlOutcome, DownloadError> {
        if let Some(callback) = progress {
            callback(ProgressEvent::DownloadStarted { url: url.to_string() });
        }

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(%url, attempt, "retrying fetch");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(self.config.retry_delay_for(attempt)) => {}
                }
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                result = self.fetcher.fetch(url) => result,
            };

            match fetched {
                Ok(payload) => return Ok(self.archive(url, extension, payload, options, state).await),
                Err(e) => {
                    warn!(%url, attempt, error = %e, "fetch attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Ok(UrlOutcome::Failed {
            error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "fetch failed".to_string()),
        })
    }

    async fn archive(
        &self,
        url: &str,
        extension: Option<&str>,
        payload: Vec<u8>,
        options: &ExportOptions,
        state: &RunState,
    ) -> UrlOutcome {
        let hash = hex::encode(Sha256::digest(&payload));

        // Held across the write so two tasks can't race the same hash.
        let mut archived = state.archived_by_hash.lock().await;

        if options.collapse_shared_assets {
            if let Some(existing) = archived.get(&hash) {
                debug!(%url, %hash, "content hash already archived, reusing");
                return UrlOutcome::Archived {
                    local_path: existing.clone(),
                    hash,
                    reused: true,
                };
            }
        }

        let file_name = format!("{hash}{}", extension.unwrap_or(""));
        let local_path = options.output_folder.join(file_name);
        if let Err(e) = fs::create_dir_all(&options.output_folder).await {
            return UrlOutcome::Failed { error: format!("creating output folder: {e}") };
        }
        if let Err(e) = fs::write(&local_path, &payload).await {
            return UrlOutcome::Failed { error: format!("writing archive file: {e}") };
        }

        archived.insert(hash.clone(), local_path.clone());
        debug!(%url, path = %local_path.display(), "asset archived");
        UrlOutcome::Archived { local_path, hash, reused: false }
    }
}

fn settle(
    state: &RunState,
    total: usize,
    progress: &Option<ProgressCallback>,
    result: AssetDownloadResult,
) -> AssetDownloadResult {
    let completed = state.settled.fetch_add(1, Ordering::Relaxed) + 1;
    if let Some(callback) = progress {
        callback(ProgressEvent::AssetSettled {
            url: result.asset.original_url.clone(),
            status: result.status,
            completed,
            total,
            fraction: completed as f64 / total as f64,
        });
    }
    result
}
