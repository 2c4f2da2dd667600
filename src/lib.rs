//! # usenet-dl
//!
//! Backend library for downloading and reconstructing files described by
//! Usenet NZB descriptors.
//!
//! ## Design Philosophy
//!
//! usenet-dl is designed to be:
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to events, no polling required
//! - **Narrow surface** - one queue, one active download at a time, and an
//!   [`Importer`] seam for handing finished files to an external media manager
//!
//! ## Quick Start
//!
//! ```no_run
//! use usenet_dl::{Engine, Config, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         servers: vec![
//!             ServerConfig {
//!                 host: "news.example.com".to_string(),
//!                 port: 563,
//!                 tls: true,
//!                 username: Some("user".to_string()),
//!                 password: Some("pass".to_string()),
//!                 connections: 10,
//!                 priority: 0,
//!             }
//!         ],
//!         ..Default::default()
//!     };
//!
//!     let engine = Engine::start(config).await?;
//!
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     run_with_shutdown(engine).await?;
//!
//!     Ok(())
//! }
//! # use usenet_dl::run_with_shutdown;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// File assembly: turns arriving out-of-order segments into complete files.
pub mod assembler;
/// Configuration types.
pub mod config;
/// Download driver: wires a connection pool to assemblers for one download.
pub mod driver;
/// Error types.
pub mod error;
/// Seam for notifying an external media manager of finished downloads.
pub mod importer;
/// NNTP client (connect, auth, ARTICLE retrieval).
pub mod nntp;
/// NZB descriptor parsing and filename recovery.
pub mod nzb;
/// Connection pool and segment worker farm.
pub mod pool;
/// Post-download processing: archive detection, ordering, extraction, cleanup.
pub mod postprocess;
/// Queue and download lifecycle state machine.
pub mod queue;
/// Retry logic with exponential backoff.
pub mod retry;
/// Opaque key/value state persistence.
pub mod state_store;
/// Core types and events.
pub mod types;
/// yEnc decoding.
pub mod yenc;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use config::{Config, PostProcess, ServerConfig};
pub use error::{DecodeError, DownloadError, Error, LifecycleError, PostProcessError, Result};
pub use importer::{Importer, NoopImporter};
pub use queue::Queue;
pub use types::{Download, DownloadId, Event, MoveDirection, NntpServer, QueueStats, Status};

use nzb::NzbDescriptor;
use state_store::{SqliteStateStore, StateStore};

/// The library's single entry point: owns the queue, the state store, and
/// the background task that drives downloads and hands finished files to an
/// [`Importer`].
pub struct Engine {
    queue: Arc<Queue>,
    shutdown: CancellationToken,
    run_task: tokio::task::JoinHandle<()>,
    importer_task: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// Open the configured state store, restore queue order if a snapshot
    /// exists, and start the background processor loop using a no-op
    /// importer.
    pub async fn start(config: Config) -> Result<Self> {
        Self::start_with_importer(config, Arc::new(NoopImporter)).await
    }

    /// As [`Self::start`], but notifying `importer` once a download's files
    /// have landed in their final destination.
    pub async fn start_with_importer(
        config: Config,
        importer: Arc<dyn Importer>,
    ) -> Result<Self> {
        let store: Arc<dyn StateStore> =
            Arc::new(SqliteStateStore::open(&config.database_path).await?);

        let (queue, mut events) = Queue::new(store);
        let queue = Arc::new(queue);

        let server = config
            .servers
            .iter()
            .min_by_key(|s| s.priority)
            .cloned()
            .map(NntpServer::from)
            .ok_or_else(|| Error::Config {
                message: "at least one server must be configured".into(),
                key: Some("servers".into()),
            })?;

        let shutdown = CancellationToken::new();

        let run_task = {
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                queue.run(server, config, shutdown).await;
            })
        };

        let importer_task = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(Event::DownloadCompleted { id, destination }) => {
                            let download = queue.get(id).await;
                            let media_item_id =
                                download.as_ref().and_then(|d| d.media_item_id().map(str::to_string));
                            let is_season_pack =
                                download.as_ref().map(|d| d.is_season_pack()).unwrap_or(false);

                            if is_season_pack {
                                match media_files_in(&destination).await {
                                    Ok(files) => {
                                        for file in files {
                                            importer.notify(&file, media_item_id.as_deref()).await;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!(
                                            error = %e,
                                            destination = %destination.display(),
                                            "failed to enumerate season pack media files"
                                        );
                                    }
                                }
                            } else {
                                importer
                                    .notify(&destination, media_item_id.as_deref())
                                    .await;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Ok(Self {
            queue,
            shutdown,
            run_task,
            importer_task,
        })
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.queue.subscribe()
    }

    /// Parse an NZB document and add it to the back of the queue.
    ///
    /// `metadata` is caller-supplied opaque data threaded through to the
    /// [`Importer`] on completion: a `media_item_id` entry becomes the
    /// identifier passed to [`Importer::notify`], and a truthy `season_pack`
    /// entry causes every media file in the destination directory to be
    /// notified individually instead of the directory as a whole.
    pub async fn enqueue(
        &self,
        name: String,
        nzb_xml: &str,
        download_dir: PathBuf,
        post_process: PostProcess,
        password: Option<String>,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<DownloadId> {
        let parsed: NzbDescriptor = nzb::parse(nzb_xml)?;
        Ok(self
            .queue
            .enqueue(name, parsed, download_dir, post_process, password, metadata)
            .await)
    }

    /// Fetch a snapshot of one download's current state.
    pub async fn get(&self, id: DownloadId) -> Option<Download> {
        self.queue.get(id).await
    }

    /// List all downloads in queue order.
    pub async fn list(&self) -> Vec<Download> {
        self.queue.list().await
    }

    /// Remove a download entirely, cancelling it first if active.
    pub async fn delete(&self, id: DownloadId) -> Result<()> {
        self.queue.delete(id).await
    }

    /// Pause a queued or downloading entry.
    pub async fn pause(&self, id: DownloadId) -> Result<()> {
        self.queue.pause(id).await
    }

    /// Resume a paused entry back to Queued.
    pub async fn resume(&self, id: DownloadId) -> Result<()> {
        self.queue.resume(id).await
    }

    /// Retry a failed entry by resetting it to Queued.
    pub async fn retry(&self, id: DownloadId) -> Result<()> {
        self.queue.retry(id).await
    }

    /// Reorder a download within the queue.
    pub async fn move_entries(&self, id: DownloadId, direction: MoveDirection) -> Result<()> {
        self.queue.move_entries(id, direction).await
    }

    /// Aggregate statistics across every download currently tracked.
    pub async fn stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Signal the background processor loop to stop after its current
    /// download (if any) finishes, and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        let _ = self.run_task.await;
        self.importer_task.abort();
        Ok(())
    }
}

const SEASON_PACK_MEDIA_EXTENSIONS: [&str; 3] = ["mkv", "mp4", "avi"];

/// List the canonical-extension media files directly under `dir`, used to
/// fan out importer notification for a season pack.
async fn media_files_in(dir: &std::path::Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let is_media = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| SEASON_PACK_MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_media {
            files.push(path);
        }
    }
    Ok(files)
}

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls [`Engine::shutdown`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(engine: Engine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
