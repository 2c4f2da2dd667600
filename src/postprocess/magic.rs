//! Magic-byte file type detection.
//!
//! Extraction decisions are made from the first bytes of a file, not its
//! extension — obfuscated uploads routinely carry wrong or missing
//! extensions, so trusting them would silently skip archives that need
//! extracting.

use std::path::Path;

/// File type detected from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// RAR archive (RAR4 or RAR5 signature)
    Rar,
    /// ZIP archive
    Zip,
    /// 7-Zip archive
    SevenZip,
    /// Matroska/WebM container
    Matroska,
    /// MP4/M4V (ISO base media) container
    Mp4,
    /// AVI (RIFF) container
    Avi,
    /// Not one of the recognized archive or video signatures
    Unknown,
}

impl FileKind {
    /// True for archive formats this module knows how to order/extract.
    pub fn is_archive(self) -> bool {
        matches!(self, FileKind::Rar | FileKind::Zip | FileKind::SevenZip)
    }
}

const RAR4_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x00";
const RAR5_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x01\x00";
const ZIP_SIGNATURES: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const SEVENZ_SIGNATURE: &[u8] = b"7z\xBC\xAF\x27\x1C";
const MATROSKA_SIGNATURE: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
const RIFF_SIGNATURE: &[u8] = b"RIFF";
const AVI_TAG: &[u8] = b"AVI ";

/// Detect the file type from a byte buffer (at least the first 32 bytes).
pub fn detect(buf: &[u8]) -> FileKind {
    if buf.starts_with(RAR5_SIGNATURE) || buf.starts_with(RAR4_SIGNATURE) {
        return FileKind::Rar;
    }
    if ZIP_SIGNATURES.iter().any(|sig| buf.starts_with(sig)) {
        return FileKind::Zip;
    }
    if buf.starts_with(SEVENZ_SIGNATURE) {
        return FileKind::SevenZip;
    }
    if buf.starts_with(MATROSKA_SIGNATURE) {
        return FileKind::Matroska;
    }
    if buf.starts_with(RIFF_SIGNATURE) && buf.len() >= 12 && &buf[8..12] == AVI_TAG {
        return FileKind::Avi;
    }
    if buf.len() >= 12 && &buf[4..8] == b"ftyp" {
        return FileKind::Mp4;
    }
    FileKind::Unknown
}

/// Read enough of `path` to run [`detect`] on it.
pub async fn detect_file(path: &Path) -> std::io::Result<FileKind> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = [0u8; 32];
    let n = file.read(&mut buf).await?;
    Ok(detect(&buf[..n]))
}
