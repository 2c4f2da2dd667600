//! Download driver (C6).
//!
//! Wires an NZB descriptor to a [`ConnectionPool`] and a [`FileAssembler`]
//! per file: enqueues every segment as a job, consumes results as they
//! arrive (out of order), and tracks aggregate progress/speed/ETA for the
//! download. A segment that exhausts its retry budget fails the whole
//! download — partial output is removed rather than left half-written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::assembler::FileAssembler;
use crate::config::RetryConfig;
use crate::error::{DownloadError, Result};
use crate::nzb::NzbDescriptor;
use crate::pool::{ConnectionPool, SegmentJob, SegmentResult};
use crate::types::{DownloadId, Event, NntpServer};

const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Progress reported back to the queue as the download proceeds.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Bytes downloaded and assembled so far.
    pub downloaded_bytes: u64,
    /// Total declared bytes across all files.
    pub total_bytes: u64,
    /// Instantaneous speed, bytes/sec, over the last sampling window.
    pub speed_bytes_per_sec: u64,
    /// Estimated seconds remaining, if speed is measurable.
    pub eta_seconds: Option<u64>,
}

/// Derive each file's output filename, preferring subject-line filename
/// recovery and falling back to a positional name so every file gets a
/// stable path even when recovery fails.
fn resolve_filenames(nzb: &NzbDescriptor) -> Vec<String> {
    nzb.files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            crate::nzb::recover_filename(&file.subject).unwrap_or_else(|| format!("file_{i}.bin"))
        })
        .collect()
}

/// Run a complete download: bring up the connection pool, assemble every
/// file, and return the directory containing the finished files.
///
/// `on_progress` is invoked periodically (at most once per second) with the
/// current aggregate progress.
pub async fn run_download(
    id: DownloadId,
    nzb: &NzbDescriptor,
    server: NntpServer,
    retry_config: RetryConfig,
    download_dir: &Path,
    cancel: CancellationToken,
    events: tokio::sync::broadcast::Sender<Event>,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(download_dir).await?;

    let filenames = resolve_filenames(nzb);
    let total_bytes = nzb.total_bytes();
    let total_segments: usize = nzb.files.iter().map(|f| f.segments.len()).sum();

    let mut assemblers = Vec::with_capacity(nzb.files.len());
    for (i, file) in nzb.files.iter().enumerate() {
        let path = download_dir.join(&filenames[i]);
        let assembler = FileAssembler::create(&path, file.segments.len()).await?;
        assemblers.push(assembler);
    }

    let (result_tx, mut result_rx) = mpsc::channel::<SegmentResult>(1000);
    let pool = ConnectionPool::bring_up(server, retry_config, result_tx).await?;

    for (file_index, file) in nzb.files.iter().enumerate() {
        for (segment_index, segment) in file.segments_in_order().into_iter().enumerate() {
            if cancel.is_cancelled() {
                pool.shutdown().await;
                cleanup_partial(download_dir).await;
                return Err(DownloadError::Cancelled.into());
            }
            pool.enqueue(SegmentJob {
                file_index,
                segment_index,
                message_id: segment.message_id.clone(),
            })
            .await?;
        }
    }

    let mut downloaded_bytes: u64 = 0;
    let mut completed_segments = 0usize;
    let mut last_sample = Instant::now();
    let mut last_sample_bytes: u64 = 0;
    let mut speed_bytes_per_sec: u64 = 0;

    let outcome: Result<()> = loop {
        if completed_segments == total_segments {
            break Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                break Err(DownloadError::Cancelled.into());
            }
            result = result_rx.recv() => {
                let Some(result) = result else {
                    break Err(DownloadError::Cancelled.into());
                };
                match result.outcome {
                    Ok(data) => {
                        downloaded_bytes += data.len() as u64;
                        completed_segments += 1;
                        assemblers[result.file_index]
                            .write_segment(result.segment_index, data)
                            .await?;

                        if last_sample.elapsed() >= SPEED_SAMPLE_INTERVAL {
                            let elapsed = last_sample.elapsed().as_secs_f64().max(0.001);
                            speed_bytes_per_sec =
                                ((downloaded_bytes - last_sample_bytes) as f64 / elapsed) as u64;
                            last_sample = Instant::now();
                            last_sample_bytes = downloaded_bytes;

                            let eta_seconds = if speed_bytes_per_sec > 0 {
                                Some((total_bytes.saturating_sub(downloaded_bytes)) / speed_bytes_per_sec)
                            } else {
                                None
                            };

                            let _ = events.send(Event::DownloadProgress {
                                id,
                                percent: percent(downloaded_bytes, total_bytes),
                                speed_bytes_per_sec,
                                eta_seconds,
                            });
                        }
                    }
                    Err(e) => {
                        break Err(e);
                    }
                }
            }
        }
    };

    pool.shutdown().await;

    match outcome {
        Ok(()) => {
            for assembler in assemblers {
                assembler.close().await?;
            }
            Ok(download_dir.to_path_buf())
        }
        Err(e) => {
            cleanup_partial(download_dir).await;
            Err(e)
        }
    }
}

fn percent(downloaded: u64, total: u64) -> f32 {
    if total == 0 {
        100.0
    } else {
        (downloaded as f64 / total as f64 * 100.0) as f32
    }
}

async fn cleanup_partial(download_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(download_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, path = %download_dir.display(), "failed to clean up partial download directory");
        }
    }
}

/// Summary statistics for one file within an active download, used for
/// snapshotting queue state.
#[derive(Debug, Clone)]
pub struct FileProgress {
    /// Output path.
    pub path: PathBuf,
    /// Segments received so far.
    pub segments_received: usize,
    /// Total segments expected.
    pub segments_total: usize,
}

/// Build a lookup of file index -> declared size, used by callers that need
/// to preallocate or report per-file progress without re-walking the NZB.
pub fn file_sizes(nzb: &NzbDescriptor) -> HashMap<usize, u64> {
    nzb.files
        .iter()
        .enumerate()
        .map(|(i, f)| (i, f.total_bytes()))
        .collect()
}
