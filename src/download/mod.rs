//! Batch chapter downloads into the local store.

pub mod worker;

use std::sync::Arc;

use crate::app::CancellationFlag;
use crate::domain::ChapterInfo;
use crate::source::{CatalogSource, Source};
use crate::store::CatalogRepository;

pub use worker::{spawn_download_worker, DownloadJob, DownloadWorker, DownloadWorkerHandle};

/// Outcome of one batch, by chapter key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    /// Already stored before the batch started.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }
}

/// Downloads chapters one after another.
///
/// Cancellation is checked before each chapter and again before its content
/// is committed, so a cancelled batch never leaves a partial chapter behind.
/// Failures are recorded and the batch moves on; nothing is retried.
pub struct ChapterDownloader {
    repository: Arc<dyn CatalogRepository>,
}

impl ChapterDownloader {
    pub fn new(repository: Arc<dyn CatalogRepository>) -> Self {
        Self { repository }
    }

    pub async fn download(
        &self,
        source: &dyn CatalogSource,
        chapters: &[ChapterInfo],
        cancel: &CancellationFlag,
    ) -> DownloadReport {
        let source_id = source.id();
        let mut report = DownloadReport::default();

        for chapter in chapters {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.repository.is_chapter_downloaded(source_id, &chapter.key) {
                Ok(true) => {
                    report.skipped.push(chapter.key.clone());
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed.push((chapter.key.clone(), e.to_string()));
                    continue;
                }
            }

            let pages = match source.get_page_list(chapter).await {
                Ok(pages) if pages.is_empty() => {
                    report.failed.push((chapter.key.clone(), "chapter has no content".into()));
                    continue;
                }
                Ok(pages) => pages,
                Err(e) if e.is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(source_id, chapter = %chapter.key, error = %e, "Chapter download failed");
                    report.failed.push((chapter.key.clone(), e.to_string()));
                    continue;
                }
            };

            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.repository.save_chapter_content(source_id, chapter, &pages) {
                Ok(()) => {
                    tracing::debug!(source_id, chapter = %chapter.key, pages = pages.len(), "Chapter stored");
                    report.downloaded.push(chapter.key.clone());
                }
                Err(e) => report.failed.push((chapter.key.clone(), e.to_string())),
            }
        }

        tracing::info!(
            source_id,
            downloaded = report.downloaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "Download batch finished"
        );
        report
    }
}
