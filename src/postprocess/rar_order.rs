//! RAR multi-volume ordering.
//!
//! `unrar`/`7z` generally figure out volume order themselves given the
//! first volume, but renamed or obfuscated uploads may not have the
//! extension the archiver expects, so this module derives an ordering key
//! for each candidate RAR file using, in order of preference:
//!
//! 1. The filename pattern (`.partNN.rar`, or the legacy `.rNN`/`.rar` scheme).
//! 2. The RAR5 archive header's volume-number vint field.
//! 3. The RAR4 header's volume flag bits.
//! 4. A stable ordinal fallback (original position) when nothing else applies.

use once_cell::sync::Lazy;
use regex::Regex;

static PART_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.part(\d+)\.rar$").unwrap());
static LEGACY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.r(\d+)$").unwrap());

/// Volume index derived purely from the filename, if it matches a known pattern.
///
/// `.partNN.rar` volumes are 1-indexed in the name (`part01` is volume 0).
/// The legacy scheme's first volume is `name.rar` (volume 0), continuations
/// are `name.r00`, `name.r01`, ... (volume 1, 2, ...).
pub fn volume_index_from_filename(name: &str) -> Option<u32> {
    if let Some(caps) = PART_PATTERN.captures(name) {
        let n: u32 = caps[1].parse().ok()?;
        return Some(n.saturating_sub(1));
    }
    if let Some(caps) = LEGACY_PATTERN.captures(name) {
        let n: u32 = caps[1].parse().ok()?;
        return Some(n + 1);
    }
    if name.to_lowercase().ends_with(".rar") {
        return Some(0);
    }
    None
}

/// Parse a RAR5 vint: 7 data bits per byte, little-endian groups, MSB set
/// means another byte follows. Returns the value and number of bytes consumed.
fn read_vint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    None
}

const RAR5_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x01\x00";
const ARCHIVE_FLAG_MULTIVOLUME: u64 = 0x0001;
const ARCHIVE_FLAG_VOLUME_NUMBER_PRESENT: u64 = 0x0002;
const HEADER_FLAG_HAS_EXTRA: u64 = 0x0001;
const HEADER_FLAG_HAS_DATA: u64 = 0x0002;

/// Parse a RAR5 main archive header's 0-based volume index from the first
/// bytes of the file. Returns `Some(0)` whenever the archive flags say this
/// isn't a multivolume archive, or don't carry a volume-number field at all
/// (which includes the first volume); returns `None` only when the header
/// itself can't be parsed (wrong signature, truncated, not a main header),
/// leaving the caller to fall through to the next strategy.
pub fn rar5_volume_number(buf: &[u8]) -> Option<u32> {
    let rest = buf.strip_prefix(RAR5_SIGNATURE)?;
    // CRC32 (4 bytes), then header size vint, header type vint, header flags vint.
    let rest = rest.get(4..)?;
    let (_header_size, n) = read_vint(rest)?;
    let rest = rest.get(n..)?;
    let (header_type, n) = read_vint(rest)?;
    if header_type != 1 {
        return None;
    }
    let rest = rest.get(n..)?;
    let (header_flags, n) = read_vint(rest)?;
    let mut rest = rest.get(n..)?;

    if header_flags & HEADER_FLAG_HAS_EXTRA != 0 {
        let (_extra_size, n) = read_vint(rest)?;
        rest = rest.get(n..)?;
    }
    if header_flags & HEADER_FLAG_HAS_DATA != 0 {
        let (_data_size, n) = read_vint(rest)?;
        rest = rest.get(n..)?;
    }

    let (archive_flags, n) = read_vint(rest)?;
    let rest = rest.get(n..)?;

    if archive_flags & ARCHIVE_FLAG_MULTIVOLUME == 0 {
        return Some(0);
    }
    if archive_flags & ARCHIVE_FLAG_VOLUME_NUMBER_PRESENT == 0 {
        return Some(0);
    }
    let (volume_number, _) = read_vint(rest)?;
    Some(volume_number as u32 + 1)
}

const RAR4_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x00";
const RAR4_FLAG_MULTIVOLUME: u16 = 0x0100;
const RAR4_FLAG_FIRST_VOLUME: u16 = 0x0001;

/// Parse a RAR4 main header's volume flags. Returns `Some(false)` when the
/// archive isn't a multivolume set or this is its first volume (both sort
/// as 0), and `Some(true)` for a later volume whose actual index is
/// otherwise unknown from the header alone (RAR4 doesn't encode a volume
/// number, only "is a continuation"). `None` if the header can't be read.
pub fn rar4_is_volume(buf: &[u8]) -> Option<bool> {
    if !buf.starts_with(RAR4_SIGNATURE) {
        return None;
    }
    // Main header starts at offset 7 (after the 7-byte signature);
    // flags are a little-endian u16 at offset 3 within that header, i.e.
    // absolute offset 10..12.
    let flags = u16::from_le_bytes(buf.get(10..12)?.try_into().ok()?);
    if flags & RAR4_FLAG_MULTIVOLUME == 0 {
        return Some(false);
    }
    if flags & RAR4_FLAG_FIRST_VOLUME != 0 {
        return Some(false);
    }
    Some(true)
}

/// One candidate RAR volume and the key to sort it by.
#[derive(Debug, Clone)]
pub struct RarVolume {
    /// Original filename.
    pub name: String,
    /// Original position in the unordered listing, used as a stable fallback.
    pub ordinal: usize,
    /// Resolved ordering key (lower sorts first).
    pub order_key: u32,
}

/// Order a set of candidate RAR filenames, given each file's header bytes
/// (for RAR5/RAR4 fallback when the filename pattern doesn't resolve).
pub fn order_volumes(files: &[(String, Vec<u8>)]) -> Vec<RarVolume> {
    let mut volumes: Vec<RarVolume> = files
        .iter()
        .enumerate()
        .map(|(ordinal, (name, header))| {
            let order_key = volume_index_from_filename(name)
                .or_else(|| rar5_volume_number(header))
                .or_else(|| rar4_is_volume(header).map(|is_continuation| if is_continuation { 1 } else { 0 }))
                .unwrap_or(ordinal as u32 + 1000);
            RarVolume {
                name: name.clone(),
                ordinal,
                order_key,
            }
        })
        .collect();

    volumes.sort_by_key(|v| (v.order_key, v.ordinal));
    volumes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_pattern_gives_zero_indexed_volume() {
        assert_eq!(volume_index_from_filename("movie.part01.rar"), Some(0));
        assert_eq!(volume_index_from_filename("movie.part02.rar"), Some(1));
        assert_eq!(volume_index_from_filename("MOVIE.PART10.RAR"), Some(9));
    }

    #[test]
    fn legacy_pattern_orders_first_volume_before_continuations() {
        assert_eq!(volume_index_from_filename("movie.rar"), Some(0));
        assert_eq!(volume_index_from_filename("movie.r00"), Some(1));
        assert_eq!(volume_index_from_filename("movie.r01"), Some(2));
    }

    #[test]
    fn unmatched_filename_returns_none() {
        assert_eq!(volume_index_from_filename("movie.mkv"), None);
    }

    fn encode_vint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
        out
    }

    #[test]
    fn read_vint_decodes_single_byte() {
        assert_eq!(read_vint(&[0x05]), Some((5, 1)));
    }

    #[test]
    fn read_vint_decodes_multi_byte_value() {
        let encoded = encode_vint(300);
        assert_eq!(read_vint(&encoded), Some((300, encoded.len())));
    }

    fn build_rar5_header(archive_flags: u64, volume_number: Option<u32>) -> Vec<u8> {
        let mut buf = RAR5_SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]); // CRC32, irrelevant for this parse
        let mut header_body = Vec::new();
        header_body.extend(encode_vint(1)); // header type = main archive header
        header_body.extend(encode_vint(archive_flags));
        if let Some(vol) = volume_number {
            header_body.extend(encode_vint(vol as u64));
        }
        buf.extend(encode_vint(header_body.len() as u64)); // header size vint
        buf.extend(header_body);
        buf
    }

    #[test]
    fn rar5_volume_number_parses_present_field() {
        let buf = build_rar5_header(
            ARCHIVE_FLAG_MULTIVOLUME | ARCHIVE_FLAG_VOLUME_NUMBER_PRESENT,
            Some(2),
        );
        assert_eq!(rar5_volume_number(&buf), Some(3));
    }

    #[test]
    fn rar5_volume_number_absent_field_returns_zero() {
        let buf = build_rar5_header(ARCHIVE_FLAG_MULTIVOLUME, None);
        assert_eq!(rar5_volume_number(&buf), Some(0));
    }

    #[test]
    fn rar5_volume_number_non_multivolume_returns_zero() {
        let buf = build_rar5_header(ARCHIVE_FLAG_VOLUME_NUMBER_PRESENT, Some(5));
        assert_eq!(rar5_volume_number(&buf), Some(0));
    }

    fn build_rar4_header(flags: u16) -> Vec<u8> {
        let mut buf = RAR4_SIGNATURE.to_vec(); // 7 bytes
        buf.extend_from_slice(&[0, 0, 0]); // pad to offset 10
        buf.extend_from_slice(&flags.to_le_bytes());
        buf
    }

    #[test]
    fn rar4_non_volume_archive_returns_false() {
        let buf = build_rar4_header(0x0000);
        assert_eq!(rar4_is_volume(&buf), Some(false));
    }

    #[test]
    fn rar4_first_volume_is_distinguished_from_continuation() {
        let first = build_rar4_header(RAR4_FLAG_MULTIVOLUME | RAR4_FLAG_FIRST_VOLUME);
        let cont = build_rar4_header(RAR4_FLAG_MULTIVOLUME);
        assert_eq!(rar4_is_volume(&first), Some(false));
        assert_eq!(rar4_is_volume(&cont), Some(true));
    }

    #[test]
    fn order_volumes_sorts_by_part_number_even_when_listed_out_of_order() {
        let files = vec![
            ("movie.part03.rar".to_string(), vec![]),
            ("movie.part01.rar".to_string(), vec![]),
            ("movie.part02.rar".to_string(), vec![]),
        ];
        let ordered = order_volumes(&files);
        assert_eq!(
            ordered.iter().map(|v| v.name.clone()).collect::<Vec<_>>(),
            vec!["movie.part01.rar", "movie.part02.rar", "movie.part03.rar"]
        );
    }

    #[test]
    fn order_volumes_sorts_legacy_scheme_out_of_order_listing() {
        let files = vec![
            ("movie.r01".to_string(), vec![]),
            ("movie.rar".to_string(), vec![]),
            ("movie.r00".to_string(), vec![]),
        ];
        let ordered = order_volumes(&files);
        assert_eq!(
            ordered.iter().map(|v| v.name.clone()).collect::<Vec<_>>(),
            vec!["movie.rar", "movie.r00", "movie.r01"]
        );
    }
}
