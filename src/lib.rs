//! # slidepull
//!
//! Turn uploaded slide decks into PDFs and per-slide images, let users pick
//! slides, and hand out the picked subset as a new PDF with a share link and
//! a QR code.
//!
//! ## Pipeline Overview
//!
//! ```text
//! deck (.pptx / .odp / .key / .pdf …)
//!  │
//!  ├─ 1. Input    size / extension / magic-byte checks, name sanitising
//!  ├─ 2. Office   headless office suite → PDF (3 command variants, timeout)
//!  ├─ 3. Render   pdfium rasterises each page (spawn_blocking, bounded channel)
//!  ├─ 4. Store    PDF, full image and thumbnail per page → blob store
//!  ├─ 5. Record   deck + pages in one SQLite transaction
//!  │              (any failure after the first upload rolls the blobs back)
//!  │
//!  └─ later: slide set
//!      ├─ fetch the chosen page images back from the store
//!      ├─ assemble a PDF (lopdf), generate a QR code for /s/set/{code}
//!      └─ store both, record the set
//! ```
//!
//! Progress for each conversion is published through
//! [`ConversionProgressCallback`]; the HTTP service feeds it into a
//! [`ProgressTracker`] that clients poll.
//!
//! ## Quick Start (local mode)
//!
//! ```rust,no_run
//! use slidepull::{LocalConverter, NoopProgressCallback, ServiceConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().build()?;
//!     let output = LocalConverter::new(config)
//!         .convert(Path::new("talk.pptx"), Path::new("out"), None, &NoopProgressCallback)
//!         .await?;
//!     eprintln!("{} slides in {}ms", output.stats.page_count, output.stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `slidepull` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! slidepull = { version = "0.3", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! * An office suite exposing `soffice` (LibreOffice) for non-PDF decks.
//! * A pdfium shared library, found via config, `PDFIUM_LIB_PATH` or the
//!   system library path.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod library;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod sets;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    PageSelection, RenderQuality, RenderSettings, ServiceConfig, ServiceConfigBuilder,
    SetExportSettings, StorageSettings,
};
pub use convert::{LocalConverter, LocalSet, Pipeline};
pub use db::{Database, DatabaseError};
pub use error::SlidePullError;
pub use output::{
    ConversionStats, DeckListing, DeckSummary, DeckUpload, LinkKind, LocalOutput, SetListing,
    SetRequest, SharedFile, SlideSetSummary, SlideView,
};
pub use pipeline::office::{DeckConverter, OfficeConverter};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer, RenderedPage};
pub use progress::{
    ConversionProgressCallback, JobId, JobProgress, JobStatus, NoopProgressCallback,
    ProgressCallback, ProgressTracker, Stage,
};
pub use storage::{BlobMeta, BlobStore, StorageError};
