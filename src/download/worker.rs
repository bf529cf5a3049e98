use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::app::{CancellationFlag, CatalogError, Result};
use crate::domain::ChapterInfo;
use crate::download::{ChapterDownloader, DownloadReport};
use crate::source::{CatalogSource, Source};

/// One queued batch.
pub struct DownloadJob {
    pub source: Arc<dyn CatalogSource>,
    pub chapters: Vec<ChapterInfo>,
    pub cancel: CancellationFlag,
}

impl DownloadJob {
    pub fn new(source: Arc<dyn CatalogSource>, chapters: Vec<ChapterInfo>) -> Self {
        Self {
            source,
            chapters,
            cancel: CancellationFlag::new(),
        }
    }
}

enum DownloadMessage {
    Run(DownloadJob, oneshot::Sender<DownloadReport>),
    Shutdown,
}

/// Handle to queue jobs on the background download worker.
#[derive(Clone)]
pub struct DownloadWorkerHandle {
    tx: mpsc::Sender<DownloadMessage>,
}

impl DownloadWorkerHandle {
    /// Queue a job. The receiver resolves with the report once it has run.
    pub async fn queue(&self, job: DownloadJob) -> Result<oneshot::Receiver<DownloadReport>> {
        let (done, report) = oneshot::channel();
        self.tx
            .send(DownloadMessage::Run(job, done))
            .await
            .map_err(|_| CatalogError::Other("download worker has stopped".into()))?;
        Ok(report)
    }

    /// Stop after the jobs already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(DownloadMessage::Shutdown).await;
    }
}

/// Runs queued jobs one at a time.
pub struct DownloadWorker {
    downloader: ChapterDownloader,
    rx: mpsc::Receiver<DownloadMessage>,
}

impl DownloadWorker {
    pub fn new(downloader: ChapterDownloader, queue_size: usize) -> (Self, DownloadWorkerHandle) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        (Self { downloader, rx }, DownloadWorkerHandle { tx })
    }

    pub async fn run(mut self) {
        info!("Download worker started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                DownloadMessage::Run(job, done) => {
                    let report = self
                        .downloader
                        .download(job.source.as_ref(), &job.chapters, &job.cancel)
                        .await;
                    if done.send(report).is_err() {
                        warn!(source_id = job.source.id(), "Download finished but nobody is waiting for the report");
                    }
                }
                DownloadMessage::Shutdown => {
                    info!("Download worker shutting down");
                    break;
                }
            }
        }
    }
}

/// Spawn the download worker as a tokio task.
pub fn spawn_download_worker(downloader: ChapterDownloader, queue_size: usize) -> DownloadWorkerHandle {
    let (worker, handle) = DownloadWorker::new(downloader, queue_size);

    tokio::spawn(async move {
        worker.run().await;
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::testing::ScriptedSource;
    use crate::store::SqliteStore;
    use crate::store::CatalogRepository;

    #[tokio::test]
    async fn test_queued_jobs_run_in_order() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let handle = spawn_download_worker(ChapterDownloader::new(store.clone()), 4);
        let source: Arc<dyn CatalogSource> = Arc::new(
            ScriptedSource::default()
                .with_chapter("a", &["alpha"])
                .with_chapter("b", &["beta"]),
        );

        let first = handle
            .queue(DownloadJob::new(source.clone(), vec![ChapterInfo::new("a", "A")]))
            .await
            .unwrap();
        let second = handle
            .queue(DownloadJob::new(source, vec![ChapterInfo::new("b", "B")]))
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().downloaded, vec!["a"]);
        assert_eq!(second.await.unwrap().downloaded, vec!["b"]);
        assert!(store.is_chapter_downloaded(99, "a").unwrap());
    }

    #[tokio::test]
    async fn test_queue_after_shutdown_fails() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let (worker, handle) = DownloadWorker::new(ChapterDownloader::new(store), 1);
        let task = tokio::spawn(worker.run());

        handle.shutdown().await;
        task.await.unwrap();

        let source: Arc<dyn CatalogSource> = Arc::new(ScriptedSource::default());
        assert!(handle.queue(DownloadJob::new(source, Vec::new())).await.is_err());
    }
}
