//! NZB descriptor parsing and subject-line filename recovery.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// One segment (article) of a file within an NZB.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NzbSegment {
    /// Size in bytes as declared by the indexer (may not match the decoded size exactly).
    pub bytes: u64,
    /// 1-based segment number within the file.
    pub number: u32,
    /// NNTP message-id, without angle brackets.
    pub message_id: String,
}

/// One file entry within an NZB, with its ordered segments.
#[derive(Clone, Debug)]
pub struct NzbFile {
    /// Raw subject line, used for filename recovery.
    pub subject: String,
    /// Newsgroups this file was posted to.
    pub groups: Vec<String>,
    /// Segments in the order given by the descriptor (not necessarily message order).
    pub segments: Vec<NzbSegment>,
}

impl NzbFile {
    /// Sum of all segment byte counts, as declared (not decoded size).
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }

    /// Segments sorted by their 1-based segment number.
    pub fn segments_in_order(&self) -> Vec<&NzbSegment> {
        let mut segs: Vec<&NzbSegment> = self.segments.iter().collect();
        segs.sort_by_key(|s| s.number);
        segs
    }
}

/// A parsed NZB descriptor: top-level metadata plus an ordered list of files.
#[derive(Clone, Debug, Default)]
pub struct NzbDescriptor {
    /// `<meta>` key/value pairs (e.g. `password`, `tag`).
    pub meta: HashMap<String, String>,
    /// Files described by this NZB, in document order.
    pub files: Vec<NzbFile>,
}

impl NzbDescriptor {
    /// Total declared size across every file and segment.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_bytes()).sum()
    }

    /// Password embedded in the NZB's `<meta>` block, if present.
    pub fn password(&self) -> Option<&str> {
        self.meta.get("password").map(|s| s.as_str())
    }
}

/// Parse an NZB XML document into an [`NzbDescriptor`].
pub fn parse(xml: &str) -> Result<NzbDescriptor> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut descriptor = NzbDescriptor::default();
    let mut buf = Vec::new();

    let mut current_file: Option<NzbFile> = None;
    let mut current_meta_key: Option<String> = None;
    let mut current_segment: Option<(u64, u32)> = None;
    let mut in_groups = false;
    let mut in_segments = false;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::InvalidNzb(e.to_string()))?
        {
            Event::Start(e) => match e.name().as_ref() {
                b"meta" => {
                    current_meta_key = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"type")
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| v.to_string());
                }
                b"file" => {
                    let subject = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"subject")
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    current_file = Some(NzbFile {
                        subject,
                        groups: Vec::new(),
                        segments: Vec::new(),
                    });
                }
                b"groups" => in_groups = true,
                b"segments" => in_segments = true,
                b"segment" => {
                    let mut bytes = 0u64;
                    let mut number = 0u32;
                    for attr in e.attributes().flatten() {
                        let value = attr.unescape_value().unwrap_or_default();
                        match attr.key.as_ref() {
                            b"bytes" => bytes = value.parse().unwrap_or(0),
                            b"number" => number = value.parse().unwrap_or(0),
                            _ => {}
                        }
                    }
                    current_segment = Some((bytes, number));
                }
                _ => {}
            },
            Event::Text(e) => {
                let text = e.unescape().map_err(|e| Error::InvalidNzb(e.to_string()))?;
                if in_groups {
                    if let Some(file) = current_file.as_mut() {
                        file.groups.push(text.to_string());
                    }
                } else if in_segments {
                    if let (Some(file), Some((bytes, number))) =
                        (current_file.as_mut(), current_segment.take())
                    {
                        let message_id = text.trim_matches(|c| c == '<' || c == '>').to_string();
                        file.segments.push(NzbSegment {
                            bytes,
                            number,
                            message_id,
                        });
                    }
                } else if let Some(key) = current_meta_key.take() {
                    descriptor.meta.insert(key, text.to_string());
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"file" => {
                    if let Some(file) = current_file.take() {
                        descriptor.files.push(file);
                    }
                }
                b"groups" => in_groups = false,
                b"segments" => in_segments = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if descriptor.files.is_empty() {
        return Err(Error::InvalidNzb("no <file> entries found".into()));
    }

    Ok(descriptor)
}

/// Recover a filename from an NZB `<file subject="...">` line using a
/// four-strategy cascade, each tried in order until one yields a plausible
/// filename:
///
/// 1. A bracketed token, e.g. `[movie.mkv]`, that ends in a sentinel
///    extension (`.rar`, `.nfo`, `.sfv`, `.mkv`) or matches `.rNN`.
/// 2. The last double-quoted substring, e.g. `"movie.mkv"`, unless it's a
///    bare `N/M` part counter.
/// 3. The right-most token, scanning right to left after trimming a
///    trailing `(n/m)`/`[n/m]` part indicator and/or `yEnc` marker, whose
///    last `.` is followed by a 2-4 character extension.
/// 4. The right-most token anywhere in the subject with a plausible
///    extension.
///
/// Returns `None` if no strategy produces a plausible filename.
pub fn recover_filename(subject: &str) -> Option<String> {
    if let Some(name) = extract_bracketed(subject) {
        return Some(name);
    }
    if let Some(name) = extract_quoted(subject) {
        if has_plausible_extension(&name) && !is_n_of_m(&name) {
            return Some(name);
        }
    }
    if let Some(name) = extract_before_part_marker(subject) {
        return Some(name);
    }
    extract_last_extension_token(subject).filter(|n| looks_like_filename(n))
}

const BRACKET_SENTINEL_EXTENSIONS: [&str; 4] = [".rar", ".nfo", ".sfv", ".mkv"];

/// Scan every `[...]` group in `subject`, left to right, and return the
/// first whose contents contain a dot, are at least 6 characters, carry no
/// path separators, and end in a sentinel extension or `.rNN`.
fn extract_bracketed(subject: &str) -> Option<String> {
    let mut rest = subject;
    while let Some(start) = rest.find('[') {
        let after_open = &rest[start + 1..];
        let Some(end) = after_open.find(']') else {
            break;
        };
        let candidate = &after_open[..end];
        if is_plausible_bracket_candidate(candidate) {
            return Some(candidate.to_string());
        }
        rest = &after_open[end + 1..];
    }
    None
}

fn is_plausible_bracket_candidate(s: &str) -> bool {
    if s.len() < 6 || !s.contains('.') || s.contains('/') || s.contains('\\') {
        return false;
    }
    let lower = s.to_lowercase();
    BRACKET_SENTINEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) || matches_rnn_extension(&lower)
}

/// True if `s` ends in `.rNN` for two decimal digits `NN`.
fn matches_rnn_extension(lower: &str) -> bool {
    match lower.rfind('.') {
        Some(idx) => {
            let ext = &lower[idx + 1..];
            ext.len() == 3 && ext.starts_with('r') && ext[1..].chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// True if `s` is a bare `N/M` part counter, e.g. `1/20`.
fn is_n_of_m(s: &str) -> bool {
    match s.split_once('/') {
        Some((n, m)) => {
            !n.is_empty()
                && !m.is_empty()
                && n.chars().all(|c| c.is_ascii_digit())
                && m.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Take the last double-quoted substring in `subject`, if any.
fn extract_quoted(subject: &str) -> Option<String> {
    let last_close = subject.rfind('"')?;
    let start = subject[..last_close].rfind('"')?;
    Some(subject[start + 1..last_close].to_string())
}

fn extract_before_part_marker(subject: &str) -> Option<String> {
    let trimmed = strip_trailing_part_indicators(subject);
    trimmed
        .split_whitespace()
        .rev()
        .find(|tok| !is_bracketed_token(tok) && has_extension_of_len(tok, 2, 4))
        .map(|s| s.to_string())
}

/// Repeatedly strip a trailing `(n/m)`/`[n/m]` part indicator and/or a
/// trailing `yEnc`/`YENC`/`yenc` marker.
fn strip_trailing_part_indicators(subject: &str) -> &str {
    let mut s = subject.trim_end();
    loop {
        if let Some(stripped) = strip_trailing_marker(s) {
            s = stripped.trim_end();
            continue;
        }
        if let Some(stripped) = s
            .strip_suffix("yEnc")
            .or_else(|| s.strip_suffix("YENC"))
            .or_else(|| s.strip_suffix("yenc"))
        {
            s = stripped.trim_end();
            continue;
        }
        break;
    }
    s
}

fn strip_trailing_marker(s: &str) -> Option<&str> {
    let (open, close) = if s.ends_with(')') {
        ('(', ')')
    } else if s.ends_with(']') {
        ('[', ']')
    } else {
        return None;
    };
    let start = s[..s.len() - 1].rfind(open)?;
    let inner = &s[start + 1..s.len() - 1];
    is_n_of_m(inner).then(|| &s[..start])
}

fn is_bracketed_token(tok: &str) -> bool {
    tok.starts_with('[') && tok.ends_with(']')
}

fn has_extension_of_len(s: &str, min: usize, max: usize) -> bool {
    match s.rfind('.') {
        Some(idx) if idx + 1 < s.len() => {
            let ext = &s[idx + 1..];
            ext.len() >= min && ext.len() <= max && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

fn extract_last_extension_token(subject: &str) -> Option<String> {
    subject
        .split_whitespace()
        .rev()
        .find(|tok| has_plausible_extension(tok))
        .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '_' && c != '-').to_string())
}

fn looks_like_filename(s: &str) -> bool {
    !s.is_empty() && has_plausible_extension(s)
}

fn has_plausible_extension(s: &str) -> bool {
    match s.rfind('.') {
        Some(idx) if idx + 1 < s.len() => {
            let ext = &s[idx + 1..];
            ext.len() >= 2
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}
