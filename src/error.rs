//! Error types for the slidepull library.
//!
//! * [`SlidePullError`] is returned by every pipeline entry point
//!   (`convert_deck`, `create_slide_set`, the library/share helpers). A deck
//!   conversion is all-or-nothing: a single failed page aborts the whole deck
//!   and triggers blob rollback, so there is no per-page error type.
//! * Storage and database failures keep their own enums
//!   ([`crate::storage::StorageError`], [`crate::db::DatabaseError`]) and are
//!   wrapped here transparently.
//!
//! The HTTP layer maps these onto status codes in [`crate::server::ApiError`].

use crate::db::DatabaseError;
use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the slidepull pipeline.
#[derive(Debug, Error)]
pub enum SlidePullError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The uploaded body was empty.
    #[error("Uploaded file '{filename}' is empty")]
    EmptyUpload { filename: String },

    /// The upload exceeds the configured size limit.
    #[error("File too large: {size} bytes (limit is {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    /// Extension is not one of the accepted deck formats.
    #[error("Unsupported file type '{extension}'. Upload a .pptx, .ppt, .pps, .ppsx, .odp, .key or .pdf file")]
    UnsupportedFormat { extension: String },

    /// Extension and content disagree (e.g. a renamed text file).
    #[error("File '{filename}' does not look like a slide deck\nFirst bytes: {magic:?}")]
    NotADeck { filename: String, magic: [u8; 4] },

    // ── Office conversion errors ──────────────────────────────────────────
    /// The office-suite binary could not be spawned.
    #[error(
        "Office suite not found at '{path}'\n\
Install LibreOffice or set SOFFICE_PATH to the soffice binary."
    )]
    OfficeNotFound { path: PathBuf },

    /// Every conversion command variant failed.
    #[error("Deck conversion failed after {attempts} attempts: {detail}")]
    ConversionFailed { attempts: usize, detail: String },

    /// Every conversion command variant hit the timeout.
    #[error("Deck conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; protected decks are not supported.
    #[error("PDF '{path}' is encrypted. Remove the password and upload again.")]
    PasswordRequired { path: PathBuf },

    /// The document opened fine but has no pages.
    #[error("The document has no pages")]
    NoPages,

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// Image decode / encode failure outside rasterisation.
    #[error("Image processing failed: {0}")]
    Image(String),

    /// Building the slide-set PDF failed.
    #[error("Failed to assemble PDF: {0}")]
    PdfAssemblyFailed(String),

    /// QR code generation failed (payload too long for any QR version).
    #[error("QR code generation failed: {0}")]
    QrGenerationFailed(String),

    // ── Library errors ────────────────────────────────────────────────────
    /// Deck id/code does not exist or belongs to another owner.
    #[error("Presentation not found")]
    DeckNotFound,

    /// Slide set id/code does not exist or belongs to another owner.
    #[error("Slide set not found")]
    SetNotFound,

    /// The set exists but its PDF was never stored.
    #[error("The slide set PDF is missing. Recreate the set.")]
    SetPdfMissing,

    /// Selection is empty or references slides outside the deck.
    #[error("Invalid slide selection: {0}")]
    InvalidSelection(String),

    /// Set name is empty after sanitising.
    #[error("Invalid set name '{0}': use letters, digits, '_' or '-'")]
    InvalidSetName(String),

    /// Share link kind is neither `pdf` nor `set`.
    #[error("Invalid link type '{0}'")]
    InvalidLinkKind(String),

    // ── Backend errors ────────────────────────────────────────────────────
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a local output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Shutdown ──────────────────────────────────────────────────────────
    /// The service is shutting down; partial work was rolled back.
    #[error("Conversion cancelled: the service is shutting down")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SlidePullError {
    /// True when the caller supplied something unusable, as opposed to a
    /// failure in the service or its backends.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyUpload { .. }
                | Self::FileTooLarge { .. }
                | Self::UnsupportedFormat { .. }
                | Self::NotADeck { .. }
                | Self::CorruptPdf { .. }
                | Self::PasswordRequired { .. }
                | Self::NoPages
                | Self::InvalidSelection(_)
                | Self::InvalidSetName(_)
                | Self::InvalidLinkKind(_)
        )
    }
}
