//! Removal of intermediate archive volumes after a successful extraction.

use std::path::Path;

use crate::error::Result;

/// Delete every file in `volumes`, logging (not erroring) on individual
/// failures — cleanup is best-effort once extraction has already succeeded.
pub async fn remove_volumes(volumes: &[impl AsRef<Path>]) -> Result<()> {
    for volume in volumes {
        let path = volume.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to remove archive volume during cleanup");
            }
        }
    }
    Ok(())
}
