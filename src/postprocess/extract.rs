//! External archive extraction via `unrar`, `unzip`, or `7z`.
//!
//! Binaries are discovered with the [`which`] crate unless an explicit path
//! is configured. Each extractor is invoked once per password candidate; the
//! caller decides when to stop trying (see
//! [`super::password_list::build_candidates`]).

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::error::{Error, PostProcessError, Result};
use crate::postprocess::magic::FileKind;

/// Result of a single extraction attempt.
#[derive(Debug)]
pub struct ExtractOutcome {
    /// Whether the archiver reported success.
    pub success: bool,
    /// Whether the failure looks password-related (wrong password vs. some
    /// other corruption), used by the caller to decide whether to keep
    /// trying further passwords or give up.
    pub wrong_password: bool,
    /// Combined stdout+stderr, used for diagnostics on failure.
    pub output: String,
}

fn resolve_binary(configured: &Option<PathBuf>, name: &str, search_path: bool) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.clone());
    }
    if search_path {
        which::which(name).ok()
    } else {
        None
    }
}

/// Extract `archive` (the first/only volume; `unrar`/`7z` locate sibling
/// volumes themselves) into `dest_dir` using `password`.
pub async fn extract(
    kind: FileKind,
    archive: &Path,
    dest_dir: &Path,
    password: &str,
    tools: &ToolsConfig,
) -> Result<ExtractOutcome> {
    match kind {
        FileKind::Rar => extract_rar(archive, dest_dir, password, tools).await,
        FileKind::Zip => extract_zip(archive, dest_dir, password, tools).await,
        FileKind::SevenZip => extract_7z(archive, dest_dir, password, tools).await,
        _ => Err(PostProcessError::ExtractionFailed {
            archive: archive.to_path_buf(),
            reason: "not an extractable archive type".into(),
        }
        .into()),
    }
}

async fn extract_rar(
    archive: &Path,
    dest_dir: &Path,
    password: &str,
    tools: &ToolsConfig,
) -> Result<ExtractOutcome> {
    let binary = resolve_binary(&tools.unrar_path, "unrar", tools.search_path)
        .ok_or_else(|| PostProcessError::ExtractorNotFound("unrar".into()))?;

    let password_arg = if password.is_empty() {
        "-p-".to_string()
    } else {
        format!("-p{password}")
    };
    let dest_arg = format!("{}{}", dest_dir.display(), std::path::MAIN_SEPARATOR);

    let output = Command::new(&binary)
        .arg("x")
        .arg("-o+")
        .arg("-y")
        .arg(&password_arg)
        .arg(archive)
        .arg(&dest_arg)
        .output()
        .await
        .map_err(|e| Error::ExternalTool(format!("failed to execute unrar: {e}")))?;

    Ok(interpret_output(output))
}

async fn extract_zip(
    archive: &Path,
    dest_dir: &Path,
    password: &str,
    tools: &ToolsConfig,
) -> Result<ExtractOutcome> {
    let binary = resolve_binary(&tools.unzip_path, "unzip", tools.search_path)
        .ok_or_else(|| PostProcessError::ExtractorNotFound("unzip".into()))?;

    let mut cmd = Command::new(&binary);
    cmd.arg("-o");
    if !password.is_empty() {
        cmd.arg("-P").arg(password);
    }
    cmd.arg(archive).arg("-d").arg(dest_dir);

    let output = cmd
        .output()
        .await
        .map_err(|e| Error::ExternalTool(format!("failed to execute unzip: {e}")))?;

    Ok(interpret_output(output))
}

async fn extract_7z(
    archive: &Path,
    dest_dir: &Path,
    password: &str,
    tools: &ToolsConfig,
) -> Result<ExtractOutcome> {
    let binary = resolve_binary(&tools.sevenzip_path, "7z", tools.search_path)
        .ok_or_else(|| PostProcessError::ExtractorNotFound("7z".into()))?;

    let password_arg = format!("-p{password}");
    let dest_arg = format!("-o{}", dest_dir.display());

    let output = Command::new(&binary)
        .arg("x")
        .arg("-y")
        .arg(&password_arg)
        .arg(&dest_arg)
        .arg(archive)
        .output()
        .await
        .map_err(|e| Error::ExternalTool(format!("failed to execute 7z: {e}")))?;

    Ok(interpret_output(output))
}

fn interpret_output(output: std::process::Output) -> ExtractOutcome {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push('\n');
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    let lower = combined.to_lowercase();
    let wrong_password = lower.contains("password")
        || lower.contains("encrypted")
        || lower.contains("enter password");

    ExtractOutcome {
        success: output.status.success(),
        wrong_password,
        output: combined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> ToolsConfig {
        ToolsConfig {
            password_file: None,
            try_empty_password: true,
            unrar_path: None,
            unzip_path: None,
            sevenzip_path: None,
            search_path: false,
        }
    }

    #[tokio::test]
    async fn extract_rejects_unknown_kind() {
        let result = extract(
            FileKind::Matroska,
            Path::new("movie.mkv"),
            Path::new("/tmp"),
            "",
            &tools(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn extract_rar_errors_when_binary_not_found() {
        let result = extract_rar(Path::new("a.rar"), Path::new("/tmp"), "", &tools()).await;
        match result {
            Err(Error::PostProcess(PostProcessError::ExtractorNotFound(name))) => {
                assert_eq!(name, "unrar")
            }
            other => panic!("expected ExtractorNotFound, got {other:?}"),
        }
    }

    #[test]
    fn interpret_output_detects_wrong_password_phrase() {
        let output = std::process::Output {
            status: fake_exit_status(1),
            stdout: b"CRC failed in encrypted file. Wrong password?".to_vec(),
            stderr: Vec::new(),
        };
        let outcome = interpret_output(output);
        assert!(!outcome.success);
        assert!(outcome.wrong_password);
    }

    #[test]
    fn interpret_output_success_is_not_wrong_password() {
        let output = std::process::Output {
            status: fake_exit_status(0),
            stdout: b"All OK".to_vec(),
            stderr: Vec::new(),
        };
        let outcome = interpret_output(output);
        assert!(outcome.success);
        assert!(!outcome.wrong_password);
    }

    #[cfg(unix)]
    fn fake_exit_status(code: i32) -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code << 8)
    }

    #[cfg(not(unix))]
    fn fake_exit_status(code: i32) -> std::process::ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code as u32)
    }
}
