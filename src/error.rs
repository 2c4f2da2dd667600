//! Error types for usenet-dl.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for usenet-dl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usenet-dl.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable message describing the problem.
        message: String,
        /// The configuration key that caused the error, if known.
        key: Option<String>,
    },

    /// NNTP protocol or connection error.
    #[error("NNTP error: {0}")]
    Nntp(String),

    /// yEnc decode error.
    #[error("yEnc decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Download-related error (driver, assembler, queue).
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Post-processing error (type detection, ordering, extraction).
    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    /// Queue lifecycle error — invalid state transition.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Invalid NZB descriptor.
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress, not accepting new work.
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Serialization error (state store values).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State store backend error.
    #[error("state store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// External extractor process failed to launch or run.
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported in this build (e.g. missing binary).
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// yEnc decoding failures (C2).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No `=ybegin` marker was found in the article body.
    #[error("missing =ybegin marker")]
    MissingBegin,

    /// Decoding produced zero bytes of output.
    #[error("decode produced no bytes")]
    EmptyDecode,

    /// An escape sequence (`=`) was the last byte of a line with nothing following it.
    #[error("malformed escape sequence at end of line")]
    MalformedEscape,
}

/// Download driver errors (C5/C6).
#[derive(Debug, Error)]
pub enum DownloadError {
    /// A segment's `message_id` was empty.
    #[error("empty message-id for file {file_index} segment {segment_index}")]
    EmptyMessageId {
        /// Index of the file within the NZB.
        file_index: usize,
        /// 0-based segment index within the file.
        segment_index: usize,
    },

    /// A segment failed permanently after exhausting its retry budget.
    #[error("segment {segment_index} of file {file_index} failed: {reason}")]
    SegmentFailed {
        /// Index of the file within the NZB.
        file_index: usize,
        /// 0-based segment index within the file.
        segment_index: usize,
        /// Underlying failure reason.
        reason: String,
    },

    /// The download was cancelled before completion.
    #[error("download cancelled")]
    Cancelled,

    /// The connection pool could not be constructed (zero surviving connections).
    #[error("no connections survived bring-up for server {host}")]
    NoConnections {
        /// Configured server host.
        host: String,
    },

    /// Writing an assembled file failed.
    #[error("assembler I/O error for {path}: {reason}")]
    AssemblerIo {
        /// Output path of the assembler that failed.
        path: PathBuf,
        /// Underlying failure reason.
        reason: String,
    },
}

/// Post-processor errors (C7).
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// The archive set could not be fully extracted because a volume was missing.
    #[error("incomplete archive: {archive}")]
    IncompleteArchive {
        /// Path of the archive (first volume) that failed extraction.
        archive: PathBuf,
    },

    /// The archive data failed a CRC check during extraction.
    #[error("corrupted archive: {archive}")]
    CorruptedArchive {
        /// Path of the archive (first volume) that failed extraction.
        archive: PathBuf,
    },

    /// The extractor could not locate one of the archive's volumes.
    #[error("missing volume for archive: {archive}")]
    MissingVolume {
        /// Path of the archive (first volume) that failed extraction.
        archive: PathBuf,
    },

    /// Extraction failed for a reason not otherwise classified.
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// Path of the archive (first volume) that failed extraction.
        archive: PathBuf,
        /// Captured extractor output or failure reason.
        reason: String,
    },

    /// Every candidate password was rejected.
    #[error("all {count} passwords failed for archive {archive}")]
    AllPasswordsFailed {
        /// Path of the archive that requires a password.
        archive: PathBuf,
        /// Number of passwords that were tried.
        count: usize,
    },

    /// Renaming a multi-volume archive set to canonical volume names failed.
    #[error("failed to rename {source} to {dest}: {reason}")]
    RenameFailed {
        /// Source path.
        source: PathBuf,
        /// Destination path.
        dest: PathBuf,
        /// Underlying I/O failure reason.
        reason: String,
    },

    /// The configured extractor binary could not be located.
    #[error("extractor binary not found: {0}")]
    ExtractorNotFound(String),
}

/// Queue/lifecycle state-machine errors (C8).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested transition is not valid from the download's current status.
    #[error("cannot {operation} download {id} in state {current_state}")]
    InvalidTransition {
        /// The download ID.
        id: String,
        /// The operation attempted (e.g. "pause", "resume", "retry").
        operation: &'static str,
        /// The current status blocking the operation.
        current_state: String,
    },

    /// The download id was not present in the queue.
    #[error("download {0} not found in queue")]
    NotFound(String),
}
