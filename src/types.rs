//! Core types for usenet-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use crate::config::PostProcess;

/// Maximum number of log lines retained per download; older lines are
/// dropped as new ones arrive.
pub const MAX_LOG_LINES: usize = 50;

/// Unique identifier for a download, assigned in insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u64);

impl DownloadId {
    /// Create a new DownloadId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DownloadId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<DownloadId> for u64 {
    fn from(id: DownloadId) -> Self {
        id.0
    }
}

impl PartialEq<u64> for DownloadId {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DownloadId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Download status, following the state machine: a download moves forward
/// through Queued -> Downloading -> Processing -> Complete, can be Paused
/// and Resumed back to Queued/Downloading, and can fail from Downloading
/// or Processing into Failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Queued and waiting for its turn as the single active download
    Queued,
    /// Segments are being fetched and assembled
    Downloading,
    /// Paused by the user; holds its position in the queue
    Paused,
    /// Download finished; extraction/cleanup is running
    Processing,
    /// Successfully completed
    Complete,
    /// Failed with error
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum (used by the state store snapshot format)
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Queued,
            1 => Status::Downloading,
            2 => Status::Paused,
            3 => Status::Processing,
            4 => Status::Complete,
            5 => Status::Failed,
            _ => Status::Failed,
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Queued => 0,
            Status::Downloading => 1,
            Status::Paused => 2,
            Status::Processing => 3,
            Status::Complete => 4,
            Status::Failed => 5,
        }
    }
}

/// Direction for a queue reorder operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    /// Move to the front of the queue
    Top,
    /// Move to the back of the queue
    Bottom,
    /// Move one position earlier
    Up,
    /// Move one position later
    Down,
}

/// Event emitted during the download lifecycle, broadcast to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A download was added to the queue
    DownloadAdded {
        /// Download ID
        id: DownloadId,
        /// Download name
        name: String,
    },

    /// Download progress update
    DownloadProgress {
        /// Download ID
        id: DownloadId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Current speed in bytes per second
        speed_bytes_per_sec: u64,
        /// Estimated seconds to completion (None if not yet measurable)
        eta_seconds: Option<u64>,
    },

    /// A download transitioned to a new status
    DownloadStatusChanged {
        /// Download ID
        id: DownloadId,
        /// New status
        status: Status,
    },

    /// Download completed successfully
    DownloadCompleted {
        /// Download ID
        id: DownloadId,
        /// Final destination directory
        destination: PathBuf,
    },

    /// Download failed
    DownloadFailed {
        /// Download ID
        id: DownloadId,
        /// Error message
        error: String,
    },

    /// The queue order changed (move operation or removal)
    QueueReordered,

    /// Graceful shutdown initiated
    Shutdown,
}

/// A single NNTP server pool the engine can draw connections from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NntpServer {
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// Use implicit TLS
    pub tls: bool,
    /// Username for AUTHINFO
    pub username: Option<String>,
    /// Password for AUTHINFO
    pub password: Option<String>,
    /// Number of connections to maintain in the pool
    pub connections: usize,
    /// Priority; lower is tried first when more than one server is configured
    pub priority: i32,
}

impl From<crate::config::ServerConfig> for NntpServer {
    fn from(c: crate::config::ServerConfig) -> Self {
        Self {
            host: c.host,
            port: c.port,
            tls: c.tls,
            username: c.username,
            password: c.password,
            connections: c.connections,
            priority: c.priority,
        }
    }
}

/// A download tracked by the queue.
///
/// `cancel` is a [`tokio_util::sync::CancellationToken`] shared with the
/// running driver task; cancelling it causes the driver to stop issuing new
/// segment jobs and unwind without writing a partial file to the final
/// destination.
#[derive(Clone, Debug)]
pub struct Download {
    /// Unique identifier
    pub id: DownloadId,
    /// Name (derived from the NZB descriptor or its filename)
    pub name: String,
    /// When this download was added to the queue
    pub added_at: DateTime<Utc>,
    /// Current status
    pub status: Status,
    /// Total size across all files/segments, in bytes, from the NZB descriptor
    pub total_bytes: u64,
    /// Bytes successfully downloaded and assembled so far
    pub downloaded_bytes: u64,
    /// Progress percentage derived from downloaded_bytes / total_bytes
    pub progress_percent: f32,
    /// Instantaneous speed measured over the last sampling interval
    pub speed_bytes_per_sec: u64,
    /// Estimated seconds remaining, None until speed is measurable
    pub eta_seconds: Option<u64>,
    /// Post-processing mode to apply once all files are assembled
    pub post_process: PostProcess,
    /// Output directory for this download's files
    pub download_dir: PathBuf,
    /// Password supplied with this download (if any), tried first in the cascade
    pub password: Option<String>,
    /// Error message, set only when status is Failed
    pub error: Option<String>,
    /// Cancellation token observed by the running driver task
    pub cancel: tokio_util::sync::CancellationToken,
    /// Parsed NZB descriptor driving this download
    pub nzb: crate::nzb::NzbDescriptor,
    /// Opaque key/value metadata supplied by the caller at enqueue time.
    /// May carry a `media_item_id` used by the importer, and/or a
    /// `season_pack` flag that fans out import notification per file.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Bounded ring of the most recent timestamped log lines, newest last.
    pub logs: VecDeque<(DateTime<Utc>, String)>,
}

impl Download {
    /// Append a log line, evicting the oldest entry if the ring is full.
    pub fn push_log(&mut self, timestamp: DateTime<Utc>, line: String) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back((timestamp, line));
    }

    /// The media-item identifier supplied by the caller at enqueue time, if any.
    pub fn media_item_id(&self) -> Option<&str> {
        self.metadata.get("media_item_id").and_then(|v| v.as_str())
    }

    /// Whether this download was declared a season pack at enqueue time.
    pub fn is_season_pack(&self) -> bool {
        self.metadata
            .get("season_pack")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Snapshot of queue-wide statistics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total number of downloads in the queue
    pub total: usize,
    /// Number of queued downloads (waiting for their turn)
    pub queued: usize,
    /// Number actively downloading
    pub downloading: usize,
    /// Number paused
    pub paused: usize,
    /// Number in post-processing
    pub processing: usize,
    /// Number completed
    pub completed: usize,
    /// Number failed
    pub failed: usize,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_i32_for_all_variants() {
        let cases = [
            (Status::Queued, 0),
            (Status::Downloading, 1),
            (Status::Paused, 2),
            (Status::Processing, 3),
            (Status::Complete, 4),
            (Status::Failed, 5),
        ];

        for (variant, expected_int) in cases {
            assert_eq!(variant.to_i32(), expected_int);
            assert_eq!(Status::from_i32(expected_int), variant);
        }
    }

    #[test]
    fn status_from_unknown_integer_defaults_to_failed() {
        assert_eq!(Status::from_i32(99), Status::Failed);
        assert_eq!(Status::from_i32(-1), Status::Failed);
    }

    #[test]
    fn download_id_from_u64_and_back() {
        let id = DownloadId::from(42_u64);
        let raw: u64 = id.into();
        assert_eq!(raw, 42);
    }

    #[test]
    fn download_id_from_str_parses_valid_integer() {
        let id = DownloadId::from_str("123").unwrap();
        assert_eq!(id.get(), 123);
    }

    #[test]
    fn download_id_from_str_rejects_non_numeric() {
        assert!(DownloadId::from_str("abc").is_err());
    }

    #[test]
    fn download_id_from_str_rejects_negative() {
        assert!(DownloadId::from_str("-7").is_err());
    }

    #[test]
    fn download_id_display_matches_inner_value() {
        let id = DownloadId::new(999);
        assert_eq!(id.to_string(), "999");
    }

    fn sample_download() -> Download {
        Download {
            id: DownloadId::new(1),
            name: "Show.S01-GROUP".into(),
            added_at: Utc::now(),
            status: Status::Queued,
            total_bytes: 0,
            downloaded_bytes: 0,
            progress_percent: 0.0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            post_process: PostProcess::None,
            download_dir: PathBuf::new(),
            password: None,
            error: None,
            cancel: tokio_util::sync::CancellationToken::new(),
            nzb: crate::nzb::NzbDescriptor::default(),
            metadata: std::collections::HashMap::new(),
            logs: std::collections::VecDeque::new(),
        }
    }

    #[test]
    fn push_log_evicts_oldest_once_full() {
        let mut download = sample_download();
        for i in 0..MAX_LOG_LINES + 5 {
            download.push_log(Utc::now(), format!("line {i}"));
        }
        assert_eq!(download.logs.len(), MAX_LOG_LINES);
        assert_eq!(download.logs.front().unwrap().1, "line 5");
        assert_eq!(download.logs.back().unwrap().1, format!("line {}", MAX_LOG_LINES + 4));
    }

    #[test]
    fn media_item_id_reads_from_metadata() {
        let mut download = sample_download();
        assert_eq!(download.media_item_id(), None);
        download
            .metadata
            .insert("media_item_id".into(), serde_json::json!("tvdb:12345"));
        assert_eq!(download.media_item_id(), Some("tvdb:12345"));
    }

    #[test]
    fn is_season_pack_defaults_to_false() {
        let mut download = sample_download();
        assert!(!download.is_season_pack());
        download.metadata.insert("season_pack".into(), serde_json::json!(true));
        assert!(download.is_season_pack());
    }

    #[test]
    fn nntp_server_from_server_config_preserves_fields() {
        let config = crate::config::ServerConfig {
            host: "news.example.com".into(),
            port: 563,
            tls: true,
            username: Some("user1".into()),
            password: Some("secret".into()),
            connections: 10,
            priority: 0,
        };

        let server: NntpServer = config.into();
        assert_eq!(server.host, "news.example.com");
        assert_eq!(server.port, 563);
        assert!(server.tls);
        assert_eq!(server.connections, 10);
    }
}
