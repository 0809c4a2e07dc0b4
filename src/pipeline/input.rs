//! Upload validation and name sanitising.
//!
//! Uploads are checked twice: the extension decides how the deck is
//! converted, and the leading magic bytes must agree with it. A renamed text
//! file is rejected here instead of surfacing as an office-suite crash two
//! minutes later.

use crate::error::SlidePullError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest stored file or set name, in characters.
pub const MAX_NAME_LEN: usize = 100;

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const OLE_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];
const PDF_MAGIC: [u8; 4] = *b"%PDF";

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static UNSAFE_SET_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static regex"));

/// What kind of file was uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeckKind {
    /// Already a PDF; conversion is skipped.
    Pdf,
    /// Needs the office suite. `extension` is lower-case without the dot.
    Presentation { extension: String },
}

impl DeckKind {
    pub fn needs_conversion(&self) -> bool {
        matches!(self, DeckKind::Presentation { .. })
    }
}

/// Validate an uploaded deck and classify it.
pub fn validate_upload(filename: &str, bytes: &[u8], max_bytes: u64) -> Result<DeckKind, SlidePullError> {
    if bytes.is_empty() {
        return Err(SlidePullError::EmptyUpload {
            filename: filename.to_string(),
        });
    }
    if bytes.len() as u64 > max_bytes {
        return Err(SlidePullError::FileTooLarge {
            size: bytes.len() as u64,
            limit: max_bytes,
        });
    }

    let extension = extension_of(filename);
    let expected: &[[u8; 4]] = match extension.as_str() {
        "pdf" => &[PDF_MAGIC],
        "pptx" | "ppsx" | "odp" | "key" => &[ZIP_MAGIC],
        "ppt" | "pps" => &[OLE_MAGIC],
        _ => return Err(SlidePullError::UnsupportedFormat { extension }),
    };

    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    if !expected.contains(&magic) {
        return Err(SlidePullError::NotADeck {
            filename: filename.to_string(),
            magic,
        });
    }

    Ok(if extension == "pdf" {
        DeckKind::Pdf
    } else {
        DeckKind::Presentation { extension }
    })
}

/// Lower-case extension without the dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    let base = base_name(filename);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

/// Make a client-supplied filename safe to store and to use in blob names.
///
/// Directory components are dropped, runs of unsafe characters become `_`,
/// `..` collapses, and the result is capped at [`MAX_NAME_LEN`] characters
/// (keeping the extension). Falls back to `presentation`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = base_name(filename.trim());
    let mut cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "_").into_owned();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();
    if cleaned.is_empty() {
        return "presentation".to_string();
    }

    if cleaned.chars().count() <= MAX_NAME_LEN {
        return cleaned;
    }
    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < 10 => {
            let keep = MAX_NAME_LEN - ext.len() - 1;
            format!("{}.{}", stem.chars().take(keep).collect::<String>(), ext)
        }
        _ => cleaned.chars().take(MAX_NAME_LEN).collect(),
    }
}

/// Sanitised filename without its extension.
pub fn file_stem(filename: &str) -> String {
    let clean = sanitize_filename(filename);
    match clean.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => clean,
    }
}

/// Normalise a slide-set name: whitespace becomes `_`, anything outside
/// `[A-Za-z0-9_-]` is dropped, length capped at [`MAX_NAME_LEN`].
pub fn sanitize_set_name(name: &str) -> Result<String, SlidePullError> {
    let spaced = WHITESPACE.replace_all(name.trim(), "_");
    let cleaned: String = UNSAFE_SET_CHARS
        .replace_all(&spaced, "")
        .chars()
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        return Err(SlidePullError::InvalidSetName(name.to_string()));
    }
    Ok(cleaned)
}
