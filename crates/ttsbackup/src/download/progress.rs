//! Progress reporting for long-running export stages

use crate::download::AssetStatus;
use crate::export::ExportStage;
use std::sync::Arc;

/// Progress callback shared by scan, download, and export stages.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted while an export runs. Granularity is one asset's
/// settlement, not byte-level.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageChanged {
        stage: ExportStage,
    },
    DownloadStarted {
        url: String,
    },
    AssetSettled {
        url: String,
        status: AssetStatus,
        completed: usize,
        total: usize,
        /// Fractional completion in 0..1.
        fraction: f64,
    },
}

/// Trait form of the callback for consumers that prefer methods over
/// matching on events.
pub trait ProgressReporter: Send + Sync {
    fn on_stage_changed(&self, _stage: ExportStage) {}
    fn on_download_started(&self, _url: &str) {}
    fn on_asset_settled(&self, _url: &str, _status: AssetStatus, _fraction: f64) {}
}

pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event| match event {
            ProgressEvent::StageChanged { stage } => self.on_stage_changed(stage),
            ProgressEvent::DownloadStarted { url } => self.on_download_started(&url),
            ProgressEvent::AssetSettled { url, status, fraction, .. } => {
                self.on_asset_settled(&url, status, fraction)
            }
        })
    }
}

/// Reporter that does nothing.
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Simple console reporter used by the CLI.
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter {
    pub verbose: bool,
}

impl ConsoleProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn on_stage_changed(&self, stage: ExportStage) {
        println!("stage: {stage}");
    }

    fn on_download_started(&self, url: &str) {
        if self.verbose {
            println!("  fetching {url}");
        }
    }

    fn on_asset_settled(&self, url: &str, status: AssetStatus, fraction: f64) {
        println!("  [{:>3.0}%] {status:?}: {url}", fraction * 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        stages: Arc<AtomicUsize>,
        settles: Arc<AtomicUsize>,
    }

    impl ProgressReporter for Counting {
        fn on_stage_changed(&self, _stage: ExportStage) {
            self.stages.fetch_add(1, Ordering::Relaxed);
        }

        fn on_asset_settled(&self, _url: &str, _status: AssetStatus, _fraction: f64) {
            self.settles.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn reporter_adapts_into_a_callback() {
        let stages = Arc::new(AtomicUsize::new(0));
        let settles = Arc::new(AtomicUsize::new(0));
        let callback = Counting {
            stages: stages.clone(),
            settles: settles.clone(),
        }
        .into_callback();

        callback(ProgressEvent::StageChanged {
            stage: ExportStage::Scanning,
        });
        callback(ProgressEvent::AssetSettled {
            url: "http://x/a.png".into(),
            status: AssetStatus::Downloaded,
            completed: 1,
            total: 2,
            fraction: 0.5,
        });
        callback(ProgressEvent::DownloadStarted {
            url: "http://x/b.png".into(),
        });

        assert_eq!(stages.load(Ordering::Relaxed), 1);
        assert_eq!(settles.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn null_reporter_ignores_everything() {
        let callback = NullProgressReporter.into_callback();
        callback(ProgressEvent::StageChanged {
            stage: ExportStage::Done,
        });
    }
}
