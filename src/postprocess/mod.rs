//! Post-download processing: archive detection, RAR volume ordering, the
//! password cascade, extraction, and cleanup.
//!
//! [`run`] is the single entry point the queue's processor loop calls once a
//! download's files have all been assembled.

pub mod cleanup;
pub mod extract;
pub mod magic;
pub mod password_list;
pub mod rar_order;

use std::path::{Path, PathBuf};

use crate::config::{Config, PostProcess};
use crate::error::{Error, PostProcessError, Result};
use crate::nzb::NzbDescriptor;
use crate::postprocess::magic::FileKind;

/// One archive set discovered in a download directory: a primary path used
/// for error reporting and the full ordered list of volumes to feed the
/// extractor.
struct ArchiveSet {
    kind: FileKind,
    primary: PathBuf,
    volumes: Vec<PathBuf>,
}

/// Run post-processing for a completed download.
///
/// `PostProcess::None` skips everything. `Unpack` extracts any archives
/// found. `UnpackAndCleanup` extracts and then removes the source volumes.
pub async fn run(
    dir: &Path,
    name: &str,
    config: &Config,
    post_process: PostProcess,
    nzb: &NzbDescriptor,
    password: Option<&str>,
) -> Result<()> {
    if post_process == PostProcess::None {
        return Ok(());
    }

    let archive_sets = discover_archive_sets(dir, name).await?;

    for set in &archive_sets {
        extract_with_password_cascade(set, name, config, nzb, password).await?;

        if post_process == PostProcess::UnpackAndCleanup {
            cleanup::remove_volumes(&set.volumes).await?;
        }
    }

    Ok(())
}

fn canonical_video_extension(kind: FileKind) -> Option<&'static str> {
    match kind {
        FileKind::Matroska => Some("mkv"),
        FileKind::Mp4 => Some("mp4"),
        FileKind::Avi => Some("avi"),
        _ => None,
    }
}

async fn rename_or_fail(source: &Path, dest: &Path) -> Result<()> {
    tokio::fs::rename(source, dest)
        .await
        .map_err(|e| {
            Error::PostProcess(PostProcessError::RenameFailed {
                source: source.to_path_buf(),
                dest: dest.to_path_buf(),
                reason: e.to_string(),
            })
        })
}

/// Walk `dir` (non-recursively — downloads land flat), rename video files to
/// their canonical extension, group RAR volumes together (renaming a
/// multi-volume set to `<name>.partNN.rar`), and treat every ZIP/7z file as
/// its own single-volume set.
async fn discover_archive_sets(dir: &Path, name: &str) -> Result<Vec<ArchiveSet>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut rar_candidates: Vec<(String, PathBuf, Vec<u8>)> = Vec::new();
    let mut other_sets = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let kind = magic::detect_file(&path).await?;

        if let Some(ext) = canonical_video_extension(kind) {
            let canonical = path.with_extension(ext);
            if canonical != path {
                rename_or_fail(&path, &canonical).await?;
            }
            continue;
        }

        match kind {
            FileKind::Rar => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let header = read_header(&path).await?;
                rar_candidates.push((file_name, path, header));
            }
            FileKind::Zip | FileKind::SevenZip => {
                other_sets.push(ArchiveSet {
                    kind,
                    primary: path.clone(),
                    volumes: vec![path],
                });
            }
            _ => {}
        }
    }

    let mut sets = other_sets;

    if !rar_candidates.is_empty() {
        let names_and_headers: Vec<(String, Vec<u8>)> = rar_candidates
            .iter()
            .map(|(file_name, _, header)| (file_name.clone(), header.clone()))
            .collect();
        let ordered = rar_order::order_volumes(&names_and_headers);

        let by_name: std::collections::HashMap<&str, &PathBuf> = rar_candidates
            .iter()
            .map(|(file_name, path, _)| (file_name.as_str(), path))
            .collect();

        let volumes: Vec<PathBuf> = ordered
            .iter()
            .filter_map(|v| by_name.get(v.name.as_str()).map(|p| (*p).clone()))
            .collect();

        let volumes = if volumes.len() >= 2 {
            let dir = volumes[0].parent().map(Path::to_path_buf).unwrap_or_default();
            let mut renamed = Vec::with_capacity(volumes.len());
            for (index, source) in volumes.iter().enumerate() {
                let dest = dir.join(format!("{name}.part{:02}.rar", index + 1));
                if *source != dest {
                    rename_or_fail(source, &dest).await?;
                    renamed.push(dest);
                } else {
                    renamed.push(source.clone());
                }
            }
            renamed
        } else {
            volumes
        };

        if let Some(primary) = volumes.first().cloned() {
            sets.push(ArchiveSet {
                kind: FileKind::Rar,
                primary,
                volumes,
            });
        }
    }

    Ok(sets)
}

async fn read_header(path: &Path) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; 64];
    let n = file.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

async fn extract_with_password_cascade(
    set: &ArchiveSet,
    name: &str,
    config: &Config,
    nzb: &NzbDescriptor,
    password: Option<&str>,
) -> Result<()> {
    let download_password = password.or_else(|| nzb.password());
    let candidates = password_list::build_candidates(
        download_password,
        name,
        &config.tools,
        &config.passwords,
    );
    let attempted = candidates.len();

    let dest_dir = set
        .primary
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    for candidate in &candidates {
        let outcome = extract::extract(set.kind, &set.primary, &dest_dir, candidate, &config.tools)
            .await?;

        if outcome.success {
            return Ok(());
        }
        if !outcome.wrong_password {
            return Err(Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: set.primary.clone(),
                reason: outcome.output,
            }));
        }
    }

    Err(Error::PostProcess(PostProcessError::AllPasswordsFailed {
        archive: set.primary.clone(),
        count: attempted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PasswordCascadeConfig, RetryConfig, ToolsConfig};
    use tempfile::tempdir;

    fn test_config() -> Config {
        Config {
            servers: Vec::new(),
            download: Default::default(),
            tools: ToolsConfig {
                password_file: None,
                try_empty_password: true,
                unrar_path: None,
                unzip_path: None,
                sevenzip_path: None,
                search_path: false,
            },
            passwords: PasswordCascadeConfig {
                indexer_name: None,
                common_passwords: Vec::new(),
            },
            retry: RetryConfig::default(),
            database_path: "test.db".into(),
        }
    }

    fn empty_nzb() -> NzbDescriptor {
        NzbDescriptor::default()
    }

    #[tokio::test]
    async fn run_with_none_post_process_does_nothing_even_without_extractors() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("movie.rar"), b"Rar!\x1a\x07\x00")
            .await
            .unwrap();

        let result = run(
            dir.path(),
            "Movie.2020",
            &test_config(),
            PostProcess::None,
            &empty_nzb(),
            None,
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_with_no_archives_present_succeeds_trivially() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("readme.txt"), b"hello")
            .await
            .unwrap();

        let result = run(
            dir.path(),
            "Movie.2020",
            &test_config(),
            PostProcess::Unpack,
            &empty_nzb(),
            None,
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_surfaces_extractor_not_found_as_extraction_failure() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("movie.rar"), b"Rar!\x1a\x07\x00")
            .await
            .unwrap();

        let result = run(
            dir.path(),
            "Movie.2020",
            &test_config(),
            PostProcess::Unpack,
            &empty_nzb(),
            None,
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn discover_archive_sets_groups_rar_volumes_in_order() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("movie.part02.rar"), b"Rar!\x1a\x07\x00")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("movie.part01.rar"), b"Rar!\x1a\x07\x00")
            .await
            .unwrap();

        let sets = discover_archive_sets(dir.path(), "Movie.2020").await.unwrap();

        assert_eq!(sets.len(), 1);
        assert_eq!(
            sets[0].primary.file_name().unwrap().to_string_lossy(),
            "Movie.2020.part01.rar"
        );
        assert_eq!(sets[0].volumes.len(), 2);
    }

    #[tokio::test]
    async fn discover_archive_sets_renames_multivolume_rar_to_canonical_parts() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("obfuscated1"), b"Rar!\x1a\x07\x00")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("obfuscated2.rar"), b"Rar!\x1a\x07\x00")
            .await
            .unwrap();

        let sets = discover_archive_sets(dir.path(), "Movie.2020")
            .await
            .unwrap();

        assert_eq!(sets.len(), 1);
        let names: Vec<_> = sets[0]
            .volumes
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"Movie.2020.part01.rar".to_string()));
        assert!(names.contains(&"Movie.2020.part02.rar".to_string()));
    }

    #[tokio::test]
    async fn discover_archive_sets_renames_video_files_to_canonical_extension() {
        let dir = tempdir().unwrap();
        let mut mkv = vec![0x1A, 0x45, 0xDF, 0xA3];
        mkv.extend_from_slice(&[0; 12]);
        tokio::fs::write(dir.path().join("video.bin"), &mkv)
            .await
            .unwrap();

        discover_archive_sets(dir.path(), "Movie.2020").await.unwrap();

        assert!(dir.path().join("video.mkv").exists());
        assert!(!dir.path().join("video.bin").exists());
    }

    #[tokio::test]
    async fn discover_archive_sets_treats_each_zip_as_its_own_set() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.zip"), b"PK\x03\x04")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("b.zip"), b"PK\x03\x04")
            .await
            .unwrap();

        let sets = discover_archive_sets(dir.path(), "Movie.2020").await.unwrap();

        assert_eq!(sets.len(), 2);
    }
}
