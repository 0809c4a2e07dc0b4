//! Inputs and results of the pipeline entry points.
//!
//! Everything here is `Serialize` so the HTTP layer can return it as JSON
//! unchanged.

use crate::error::SlidePullError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ── Deck conversion ──────────────────────────────────────────────────────

/// An uploaded deck, as received.
#[derive(Debug, Clone)]
pub struct DeckUpload {
    pub owner: String,
    /// Client-supplied name; sanitised before use.
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Timing and size figures for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub page_count: usize,
    /// False when the upload was already a PDF.
    pub converted: bool,
    pub input_bytes: u64,
    pub pdf_bytes: u64,
    /// Bytes of every image and thumbnail stored.
    pub image_bytes: u64,
    pub convert_duration_ms: u64,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of [`crate::Pipeline::convert_deck`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckSummary {
    pub deck_id: i64,
    pub page_count: usize,
    /// Signed URL of the converted PDF.
    pub pdf_url: String,
    /// Public `/s/pdf/{code}` link.
    pub share_url: String,
    pub stats: ConversionStats,
}

// ── Slide sets ───────────────────────────────────────────────────────────

/// Body of a set-creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    pub name: String,
    pub image_ids: Vec<i64>,
}

/// Result of [`crate::Pipeline::create_slide_set`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideSetSummary {
    pub set_id: i64,
    /// Sanitised name.
    pub name: String,
    pub slide_count: usize,
    /// Page numbers in set order.
    pub pages: Vec<usize>,
    pub share_url: String,
    /// Signed URL of the QR code PNG.
    pub qrcode_url: String,
    pub pdf_size_kb: u64,
}

// ── Library views ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckListing {
    pub deck_id: i64,
    pub filename: String,
    pub page_count: usize,
    pub file_size_kb: i64,
    pub download_count: i64,
    pub uploaded_at: DateTime<Utc>,
    pub pdf_url: String,
    pub share_url: String,
    pub sets: Vec<SetListing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetListing {
    pub set_id: i64,
    pub name: String,
    pub slide_count: i64,
    pub pages: Vec<usize>,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
    pub pdf_url: String,
    pub share_url: String,
    pub qrcode_url: String,
}

/// One page as shown in the slide picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideView {
    pub image_id: i64,
    pub page_number: usize,
    pub width: u32,
    pub height: u32,
    pub image_url: String,
    pub thumbnail_url: String,
}

// ── Sharing ──────────────────────────────────────────────────────────────

/// The two kinds of public share link: `/s/pdf/…` and `/s/set/…`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Pdf,
    Set,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Pdf => "pdf",
            LinkKind::Set => "set",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkKind {
    type Err = SlidePullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(LinkKind::Pdf),
            "set" => Ok(LinkKind::Set),
            other => Err(SlidePullError::InvalidLinkKind(other.to_string())),
        }
    }
}

/// A file resolved from a share link or an owner download.
#[derive(Debug, Clone)]
pub struct SharedFile {
    /// Download name, always ending in `.pdf`.
    pub filename: String,
    /// `None` when the store could not be read and the caller should
    /// redirect to `fallback_url` instead.
    pub bytes: Option<Vec<u8>>,
    /// Signed blob URL, refreshed if it was about to expire.
    pub fallback_url: String,
}

// ── Local mode ───────────────────────────────────────────────────────────

/// Files written by [`crate::LocalConverter::convert`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOutput {
    pub pdf_path: PathBuf,
    pub image_paths: Vec<PathBuf>,
    pub thumbnail_paths: Vec<PathBuf>,
    /// Present when a page selection was requested.
    pub set_pdf_path: Option<PathBuf>,
    pub qrcode_path: Option<PathBuf>,
    pub stats: ConversionStats,
}
