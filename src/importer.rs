//! Hook for notifying an external media manager once a download's files
//! have landed in their final destination.
//!
//! The engine never embeds a media-library integration itself — `Importer`
//! is the seam a host application implements to wire one in. The default
//! no-op implementation is used when no importer is configured.

use async_trait::async_trait;
use std::path::Path;

/// Notified when a download's final files are in place on disk.
#[async_trait]
pub trait Importer: Send + Sync {
    /// Called once post-processing has placed final files under `source_path`.
    ///
    /// `media_item_id` is an opaque identifier supplied by the caller when the
    /// download was enqueued (e.g. a library entry id), if one was given.
    async fn notify(&self, source_path: &Path, media_item_id: Option<&str>);
}

/// Importer that does nothing; used when no external media manager is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopImporter;

#[async_trait]
impl Importer for NoopImporter {
    async fn notify(&self, _source_path: &Path, _media_item_id: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn noop_importer_does_not_panic() {
        let importer = NoopImporter;
        importer.notify(&PathBuf::from("/tmp/whatever"), Some("abc")).await;
        importer.notify(&PathBuf::from("/tmp/whatever"), None).await;
    }
}
