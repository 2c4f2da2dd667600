//! Queue and download lifecycle (C8).
//!
//! The queue is an ordered list, not a priority heap: priority is realized
//! purely by position in `order`, and `move_entries` is how a caller
//! expresses priority changes. At most one download is ever active
//! (`max_active` is fixed at 1) — the processor loop always promotes the
//! first `Queued` entry in order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PostProcess};
use crate::driver;
use crate::error::{DownloadError, Error, LifecycleError, Result};
use crate::nzb::NzbDescriptor;
use crate::postprocess;
use crate::state_store::StateStore;
use crate::types::{Download, DownloadId, Event, MoveDirection, NntpServer, QueueStats, Status};

struct Inner {
    order: Vec<DownloadId>,
    downloads: HashMap<DownloadId, Download>,
}

/// The engine's download queue: tracks every known download, its ordering,
/// and drives the single active download to completion.
pub struct Queue {
    inner: Mutex<Inner>,
    events: broadcast::Sender<Event>,
    store: Arc<dyn StateStore>,
    next_id: AtomicU64,
}

impl Queue {
    /// Create an empty queue backed by `store` for snapshot persistence.
    pub fn new(store: Arc<dyn StateStore>) -> (Self, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(256);
        (
            Self {
                inner: Mutex::new(Inner {
                    order: Vec::new(),
                    downloads: HashMap::new(),
                }),
                events: tx,
                store,
                next_id: AtomicU64::new(1),
            },
            rx,
        )
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Add a download to the back of the queue. `metadata` is opaque
    /// caller-supplied key/value data; the importer reads a `media_item_id`
    /// entry from it, and a `season_pack` boolean entry controls whether
    /// completion notifies the importer once per contained media file.
    pub async fn enqueue(
        &self,
        name: String,
        nzb: NzbDescriptor,
        download_dir: PathBuf,
        post_process: PostProcess,
        password: Option<String>,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> DownloadId {
        let id = DownloadId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let total_bytes = nzb.total_bytes();
        let password = password.or_else(|| nzb.password().map(str::to_string));

        let download = Download {
            id,
            name: name.clone(),
            added_at: Utc::now(),
            status: Status::Queued,
            total_bytes,
            downloaded_bytes: 0,
            progress_percent: 0.0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            post_process,
            download_dir,
            password,
            error: None,
            cancel: CancellationToken::new(),
            nzb,
            metadata,
            logs: std::collections::VecDeque::new(),
        };

        let mut inner = self.inner.lock().await;
        inner.order.push(id);
        inner.downloads.insert(id, download);
        drop(inner);

        let _ = self.events.send(Event::DownloadAdded { id, name });
        self.persist_order().await;
        id
    }

    /// Fetch a snapshot of one download's current state.
    pub async fn get(&self, id: DownloadId) -> Option<Download> {
        self.inner.lock().await.downloads.get(&id).cloned()
    }

    /// List all downloads in queue order.
    pub async fn list(&self) -> Vec<Download> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.downloads.get(id))
            .map(|d| d.clone())
            .collect()
    }

    /// Remove a download entirely, cancelling it first if active.
    pub async fn delete(&self, id: DownloadId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let download = inner
            .downloads
            .remove(&id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        download.cancel.cancel();
        inner.order.retain(|&x| x != id);
        drop(inner);
        let _ = self.events.send(Event::QueueReordered);
        self.persist_order().await;
        Ok(())
    }

    /// Pause a queued or downloading entry; holds its position in `order`.
    pub async fn pause(&self, id: DownloadId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let download = inner
            .downloads
            .get_mut(&id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        match download.status {
            Status::Queued | Status::Downloading => {
                download.status = Status::Paused;
                download.cancel.cancel();
                Ok(())
            }
            other => Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                operation: "pause",
                current_state: format!("{other:?}"),
            }
            .into()),
        }
    }

    /// Resume a paused entry back to Queued.
    pub async fn resume(&self, id: DownloadId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let download = inner
            .downloads
            .get_mut(&id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        match download.status {
            Status::Paused => {
                download.status = Status::Queued;
                download.cancel = CancellationToken::new();
                Ok(())
            }
            other => Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                operation: "resume",
                current_state: format!("{other:?}"),
            }
            .into()),
        }
    }

    /// Retry a failed entry by resetting it to Queued.
    pub async fn retry(&self, id: DownloadId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let download = inner
            .downloads
            .get_mut(&id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        match download.status {
            Status::Failed => {
                download.status = Status::Queued;
                download.error = None;
                download.downloaded_bytes = 0;
                download.progress_percent = 0.0;
                download.cancel = CancellationToken::new();
                Ok(())
            }
            other => Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                operation: "retry",
                current_state: format!("{other:?}"),
            }
            .into()),
        }
    }

    /// Reorder a download within the queue.
    pub async fn move_entries(&self, id: DownloadId, direction: MoveDirection) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .order
            .iter()
            .position(|&x| x == id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        match direction {
            MoveDirection::Top => {
                let entry = inner.order.remove(pos);
                inner.order.insert(0, entry);
            }
            MoveDirection::Bottom => {
                let entry = inner.order.remove(pos);
                inner.order.push(entry);
            }
            MoveDirection::Up => {
                if pos > 0 {
                    inner.order.swap(pos, pos - 1);
                }
            }
            MoveDirection::Down => {
                if pos + 1 < inner.order.len() {
                    inner.order.swap(pos, pos + 1);
                }
            }
        }

        // If the currently active download is no longer the first
        // non-completed entry, demote it back to queued and fire its
        // cancellation signal — this realizes priority-by-order.
        let active_id = inner.order.iter().copied().find(|id| {
            matches!(
                inner.downloads.get(id).map(|d| d.status),
                Some(Status::Downloading)
            )
        });
        let demoted = active_id.filter(|active_id| {
            let first_non_completed = inner
                .order
                .iter()
                .copied()
                .find(|id| !matches!(inner.downloads.get(id).map(|d| d.status), Some(Status::Complete)));
            first_non_completed != Some(*active_id)
        });
        if let Some(demoted_id) = demoted {
            if let Some(download) = inner.downloads.get_mut(&demoted_id) {
                download.status = Status::Queued;
                download.cancel.cancel();
                download.cancel = CancellationToken::new();
            }
        }

        drop(inner);
        let _ = self.events.send(Event::QueueReordered);
        if let Some(demoted_id) = demoted {
            let _ = self.events.send(Event::DownloadStatusChanged {
                id: demoted_id,
                status: Status::Queued,
            });
        }
        self.persist_order().await;
        Ok(())
    }

    /// Aggregate statistics across every download currently tracked.
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats {
            total: inner.order.len(),
            queued: 0,
            downloading: 0,
            paused: 0,
            processing: 0,
            completed: 0,
            failed: 0,
        };
        for download in inner.downloads.values() {
            match download.status {
                Status::Queued => stats.queued += 1,
                Status::Downloading => stats.downloading += 1,
                Status::Paused => stats.paused += 1,
                Status::Processing => stats.processing += 1,
                Status::Complete => stats.completed += 1,
                Status::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Find the first `Queued` download in order, if any.
    async fn next_queued(&self) -> Option<DownloadId> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .copied()
            .find(|id| matches!(inner.downloads.get(id).map(|d| d.status), Some(Status::Queued)))
    }

    async fn persist_order(&self) {
        let inner = self.inner.lock().await;
        let ids: Vec<u64> = inner.order.iter().map(|id| id.get()).collect();
        drop(inner);
        if let Err(e) = self
            .store
            .config_set("queue.order", serde_json::json!(ids))
            .await
        {
            tracing::warn!(error = %e, "failed to persist queue order snapshot");
        }
    }

    async fn set_status(&self, id: DownloadId, status: Status) {
        let mut inner = self.inner.lock().await;
        if let Some(download) = inner.downloads.get_mut(&id) {
            download.status = status;
        }
        drop(inner);
        let _ = self.events.send(Event::DownloadStatusChanged { id, status });
    }

    /// Drive the queue forward forever: whenever nothing is active, promote
    /// the first queued entry and run it to completion (including
    /// post-processing), then loop. Exits when `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, server: NntpServer, config: Config, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                let _ = self.events.send(Event::Shutdown);
                return;
            }

            let Some(id) = self.next_queued().await else {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => continue,
                    _ = shutdown.cancelled() => continue,
                }
            };

            self.run_one(id, &server, &config).await;
        }
    }

    async fn run_one(&self, id: DownloadId, server: &NntpServer, config: &Config) {
        self.set_status(id, Status::Downloading).await;

        let (name, nzb, download_dir, cancel, post_process, password) = {
            let inner = self.inner.lock().await;
            let download = match inner.downloads.get(&id) {
                Some(d) => d,
                None => return,
            };
            (
                download.name.clone(),
                download.nzb.clone(),
                download.download_dir.clone(),
                download.cancel.clone(),
                download.post_process,
                download.password.clone(),
            )
        };

        let result = driver::run_download(
            id,
            &nzb,
            server.clone(),
            config.retry.clone(),
            &download_dir,
            cancel,
            self.events.clone(),
        )
        .await;

        match result {
            Ok(dir) => {
                self.set_status(id, Status::Processing).await;
                match postprocess::run(&dir, &name, config, post_process, &nzb, password.as_deref()).await {
                    Ok(()) => {
                        self.set_status(id, Status::Complete).await;
                        let _ = self
                            .events
                            .send(Event::DownloadCompleted { id, destination: dir });
                    }
                    Err(e) => self.fail(id, e).await,
                }
            }
            Err(e) => {
                if matches!(e, Error::Download(DownloadError::Cancelled)) {
                    // A pause() already set Paused, and move_entries() demoting
                    // this download back to first-non-completed already set
                    // Queued; either way the status is already correct and
                    // this isn't a real failure.
                    let status = self.inner.lock().await.downloads.get(&id).map(|d| d.status);
                    if matches!(status, Some(Status::Paused) | Some(Status::Queued)) {
                        return;
                    }
                }
                self.fail(id, e).await
            }
        }
    }

    async fn fail(&self, id: DownloadId, error: Error) {
        let message = error.to_string();
        let mut inner = self.inner.lock().await;
        if let Some(download) = inner.downloads.get_mut(&id) {
            download.status = Status::Failed;
            download.error = Some(message.clone());
        }
        drop(inner);
        let _ = self.events.send(Event::DownloadFailed { id, error: message });
    }
}
