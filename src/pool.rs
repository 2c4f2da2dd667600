//! Connection pool and worker farm (C5).
//!
//! Brings up `N` NNTP connections in parallel for a server, then runs one
//! worker loop per surviving connection pulling [`SegmentJob`]s off a shared
//! bounded queue. Workers retry a failed fetch-and-decode up to the
//! configured attempt limit before reporting a permanent failure back to
//! the driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error, Result};
use crate::nntp::NntpClient;
use crate::retry::download_with_retry;
use crate::types::NntpServer;
use crate::yenc;

/// One unit of work: fetch and decode a single segment.
#[derive(Clone, Debug)]
pub struct SegmentJob {
    /// Index of the file this segment belongs to, within the NZB.
    pub file_index: usize,
    /// 0-based position of this segment within its file's assembler.
    pub segment_index: usize,
    /// NNTP message-id to fetch (without angle brackets).
    pub message_id: String,
}

/// Outcome of processing a [`SegmentJob`].
#[derive(Debug)]
pub struct SegmentResult {
    /// Index of the file this segment belongs to.
    pub file_index: usize,
    /// 0-based position of this segment within its file's assembler.
    pub segment_index: usize,
    /// Decoded bytes on success, or the permanent failure after retries were exhausted.
    pub outcome: std::result::Result<Vec<u8>, Error>,
}

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// A live pool of worker tasks, each holding one NNTP connection.
pub struct ConnectionPool {
    job_tx: mpsc::Sender<SegmentJob>,
    workers: JoinSet<()>,
}

impl ConnectionPool {
    /// Bring up connections for `server` and start one worker per surviving
    /// connection. Returns [`DownloadError::NoConnections`] if every
    /// connection attempt failed.
    pub async fn bring_up(
        server: NntpServer,
        retry_config: RetryConfig,
        result_tx: mpsc::Sender<SegmentResult>,
    ) -> Result<Self> {
        let attempts: Vec<_> = (0..server.connections.max(1))
            .map(|_| {
                let server = server.clone();
                tokio::spawn(async move { NntpClient::connect(&server).await })
            })
            .collect();

        let mut clients = Vec::new();
        for attempt in attempts {
            match attempt.await {
                Ok(Ok(client)) => clients.push(client),
                Ok(Err(e)) => tracing::warn!(error = %e, host = %server.host, "connection attempt failed during bring-up"),
                Err(e) => tracing::warn!(error = %e, "connection bring-up task panicked"),
            }
        }

        if clients.is_empty() {
            return Err(DownloadError::NoConnections { host: server.host }.into());
        }

        let queue_capacity = (server.connections * 10).max(1000);
        let (job_tx, job_rx) = mpsc::channel(queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = JoinSet::new();
        for client in clients {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let retry_config = retry_config.clone();
            workers.spawn(worker_loop(client, job_rx, result_tx, retry_config));
        }

        Ok(Self { job_tx, workers })
    }

    /// Enqueue a segment job. Blocks (applying backpressure) if the queue is full.
    pub async fn enqueue(&self, job: SegmentJob) -> Result<()> {
        self.job_tx
            .send(job)
            .await
            .map_err(|_| DownloadError::Cancelled.into())
    }

    /// Close the job queue and wait up to 5 seconds for workers to drain and
    /// close their connections. Workers still running past the deadline are
    /// aborted.
    pub async fn shutdown(mut self) {
        drop(self.job_tx);
        let drain = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
            while self.workers.join_next().await.is_some() {}
        });
        if drain.await.is_err() {
            tracing::warn!("connection pool shutdown deadline exceeded, aborting workers");
            self.workers.abort_all();
        }
    }
}

async fn worker_loop(
    mut client: NntpClient,
    job_rx: Arc<Mutex<mpsc::Receiver<SegmentJob>>>,
    result_tx: mpsc::Sender<SegmentResult>,
    retry_config: RetryConfig,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let outcome = if job.message_id.is_empty() {
            Err(DownloadError::EmptyMessageId {
                file_index: job.file_index,
                segment_index: job.segment_index,
            }
            .into())
        } else {
            let message_id = job.message_id.clone();
            let outcome = download_with_retry(&retry_config, || {
                fetch_and_decode(&mut client, &message_id)
            })
            .await;

            outcome.map_err(|e| {
                DownloadError::SegmentFailed {
                    file_index: job.file_index,
                    segment_index: job.segment_index,
                    reason: e.to_string(),
                }
                .into()
            })
        };

        if result_tx
            .send(SegmentResult {
                file_index: job.file_index,
                segment_index: job.segment_index,
                outcome,
            })
            .await
            .is_err()
        {
            break;
        }
    }

    client.close().await;
}

async fn fetch_and_decode(client: &mut NntpClient, message_id: &str) -> Result<Vec<u8>> {
    let body = client.get_article(message_id).await?;
    let decoded = yenc::decode(&body)?;
    if !yenc::is_within_size_tolerance(decoded.data.len() as u64, decoded.header.size) {
        tracing::warn!(
            message_id,
            decoded_len = decoded.data.len(),
            expected_len = decoded.header.size,
            "decoded segment size outside +/-50% tolerance of declared size"
        );
    }
    Ok(decoded.data)
}
