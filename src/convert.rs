//! Deck conversion entry points.
//!
//! ## Service vs. local mode
//!
//! [`Pipeline::convert_deck`] is what the HTTP server runs: it stores every
//! artifact in the blob store, records the deck in the database and reports
//! progress for polling. It is all-or-nothing. Any failure after the first
//! upload deletes every blob written so far and leaves no rows behind.
//!
//! [`LocalConverter`] runs the same conversion and rasterisation against a
//! plain output directory for the CLI, with no store or database.
//!
//! ## Why stream pages through a channel?
//!
//! Rendering is blocking and uploading is async. Pages flow from the
//! rasteriser (on the blocking pool) over a small bounded channel, so page
//! N+1 renders while page N uploads and at most a handful of encoded pages
//! sit in memory, however long the deck.

use crate::config::{PageSelection, RenderSettings, ServiceConfig};
use crate::db::{repository, Database};
use crate::error::SlidePullError;
use crate::output::{ConversionStats, DeckSummary, DeckUpload, LinkKind, LocalOutput};
use crate::pipeline::assemble::{assemble_pdf, SetPage};
use crate::pipeline::input::{self, DeckKind};
use crate::pipeline::office::{DeckConverter, OfficeConverter};
use crate::pipeline::qr::qr_png;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer, RenderedPage};
use crate::progress::{ConversionProgressCallback, Stage};
use crate::storage::sas::{self, SasPolicy};
use crate::storage::{BlobMeta, BlobPaths, BlobStore, UploadLedger};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pages buffered between the rasteriser and the uploader.
const PAGE_BUFFER: usize = 4;

/// Length of share-link codes.
pub(crate) const CODE_LEN: usize = 16;

/// Random alphanumeric share code.
pub(crate) fn unique_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LEN)
        .map(char::from)
        .collect()
}

/// Long-lived service object: configuration plus every backend the
/// pipeline talks to. Cheap to share behind an `Arc`.
pub struct Pipeline {
    pub(crate) config: Arc<ServiceConfig>,
    pub(crate) store: Arc<dyn BlobStore>,
    pub(crate) db: Database,
    pub(crate) converter: Arc<dyn DeckConverter>,
    pub(crate) rasterizer: Arc<dyn Rasterizer>,
    pub(crate) sas: SasPolicy,
}

impl Pipeline {
    /// Build a pipeline using LibreOffice and pdfium as configured.
    pub fn new(config: ServiceConfig, store: Arc<dyn BlobStore>, db: Database) -> Self {
        let converter = Arc::new(OfficeConverter::from_config(&config));
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone()));
        let sas = SasPolicy::from(&config);
        Self {
            config: Arc::new(config),
            store,
            db,
            converter,
            rasterizer,
            sas,
        }
    }

    /// Replace the office-suite converter.
    pub fn with_converter(mut self, converter: Arc<dyn DeckConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Replace the rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Convert an uploaded deck and store all of its artifacts.
    ///
    /// Fires `on_conversion_complete` or `on_conversion_failed` exactly once.
    /// On failure nothing written for this deck remains in the store or the
    /// database.
    pub async fn convert_deck(
        &self,
        upload: DeckUpload,
        progress: &dyn ConversionProgressCallback,
    ) -> Result<DeckSummary, SlidePullError> {
        self.convert_deck_until(upload, progress, &CancellationToken::new())
            .await
    }

    /// [`Self::convert_deck`], stopping with [`SlidePullError::Cancelled`]
    /// once `cancel` fires. Cancellation is checked while the office suite
    /// runs, between pages and before the database write; blobs stored up to
    /// that point are rolled back like any other failure.
    pub async fn convert_deck_until(
        &self,
        upload: DeckUpload,
        progress: &dyn ConversionProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<DeckSummary, SlidePullError> {
        info!("Starting conversion of '{}' for {}", upload.filename, upload.owner);
        match self.convert_deck_inner(upload, progress, cancel).await {
            Ok(summary) => {
                progress.on_conversion_complete(summary.deck_id, summary.page_count);
                Ok(summary)
            }
            Err(e) => {
                warn!("Conversion failed: {}", e);
                progress.on_conversion_failed(&e.to_string());
                Err(e)
            }
        }
    }

    async fn convert_deck_inner(
        &self,
        upload: DeckUpload,
        progress: &dyn ConversionProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<DeckSummary, SlidePullError> {
        let total_start = Instant::now();
        let now = Utc::now();

        // ── Step 1: Validate and stage ───────────────────────────────────
        let kind = input::validate_upload(&upload.filename, &upload.bytes, self.config.max_upload_bytes)?;
        let filename = input::sanitize_filename(&upload.filename);
        let stem = input::file_stem(&upload.filename);
        let deck_key = Uuid::new_v4().simple().to_string();
        let work = scratch_dir()?;

        // ── Step 2: Convert to PDF ───────────────────────────────────────
        progress.on_stage(Stage::Converting);
        let convert_start = Instant::now();
        // Dropping the conversion future kills the office process.
        let pdf_path = tokio::select! {
            staged = stage_pdf(self.converter.as_ref(), &kind, &filename, &upload.bytes, work.path()) => staged?,
            _ = cancel.cancelled() => return Err(SlidePullError::Cancelled),
        };
        let convert_duration_ms = convert_start.elapsed().as_millis() as u64;
        let pdf_bytes = read_file(&pdf_path).await?;

        let mut stats = ConversionStats {
            converted: kind.needs_conversion(),
            input_bytes: upload.bytes.len() as u64,
            pdf_bytes: pdf_bytes.len() as u64,
            convert_duration_ms,
            ..Default::default()
        };

        let mut ledger = UploadLedger::new(self.store.as_ref());
        let target = DeckTarget {
            owner: &upload.owner,
            deck_key: &deck_key,
            stem: &stem,
            filename: &filename,
            now,
        };
        let stored = self
            .store_deck(&mut ledger, &target, &pdf_path, pdf_bytes, &mut stats, progress, cancel)
            .await;

        match stored {
            Ok(summary) => {
                stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
                info!(
                    "Deck {} stored: {} pages, {}ms total",
                    summary.deck_id, summary.page_count, stats.total_duration_ms
                );
                Ok(DeckSummary { stats, ..summary })
            }
            Err(e) => {
                warn!("Rolling back {} blob(s) for deck {}", ledger.len(), deck_key);
                ledger.rollback().await;
                Err(e)
            }
        }
    }

    async fn store_deck(
        &self,
        ledger: &mut UploadLedger<'_>,
        target: &DeckTarget<'_>,
        pdf_path: &Path,
        pdf_bytes: Vec<u8>,
        stats: &mut ConversionStats,
        progress: &dyn ConversionProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<DeckSummary, SlidePullError> {
        // ── Step 3: Upload the PDF ───────────────────────────────────────
        let pdf_blob = BlobPaths::deck_pdf(target.owner, target.stem, target.deck_key);
        ledger
            .put(&pdf_blob, pdf_bytes, &BlobMeta::pdf_attachment(target.stem))
            .await?;
        let pdf_sas = sas::issue(self.store.as_ref(), &pdf_blob, &self.sas, None, target.now)?;

        // ── Step 4: Render and upload pages ──────────────────────────────
        progress.on_stage(Stage::Rendering);
        let render_start = Instant::now();
        let mut job = RenderJob::spawn(Arc::clone(&self.rasterizer), pdf_path.to_path_buf(), self.config.render);

        let mut pages = Vec::new();
        let consumed = async {
            let mut started = false;
            loop {
                let page = tokio::select! {
                    page = job.next() => page,
                    _ = cancel.cancelled() => return Err(SlidePullError::Cancelled),
                };
                let Some(page) = page else { break };
                if !started {
                    progress.on_conversion_start(page.total_pages);
                    started = true;
                }
                let (page_number, total) = (page.page_number, page.total_pages);
                stats.image_bytes += (page.full.bytes.len() + page.thumbnail.bytes.len()) as u64;
                pages.push(self.store_page(ledger, target, page).await?);
                progress.on_page_complete(page_number, total);
            }
            Ok::<(), SlidePullError>(())
        }
        .await;
        let total_pages = job.finish(consumed).await?;
        if total_pages == 0 || pages.is_empty() {
            return Err(SlidePullError::NoPages);
        }
        stats.page_count = pages.len();
        stats.render_duration_ms = render_start.elapsed().as_millis() as u64;
        info!("Rendered and stored {} pages in {}ms", pages.len(), stats.render_duration_ms);

        // ── Step 5: Record the deck ──────────────────────────────────────
        if cancel.is_cancelled() {
            return Err(SlidePullError::Cancelled);
        }
        progress.on_stage(Stage::Saving);
        let unique_code = unique_code();
        let deck = repository::NewDeck {
            deck_key: target.deck_key.to_string(),
            owner: target.owner.to_string(),
            original_filename: target.filename.to_string(),
            blob_name: pdf_blob.clone(),
            sas: pdf_sas.clone(),
            unique_code: unique_code.clone(),
            file_size_kb: stats.input_bytes.div_ceil(1024) as i64,
            uploaded_at: target.now,
        };
        let page_count = pages.len();
        let deck_id = self
            .db
            .call(move |conn| repository::insert_deck_with_pages(conn, &deck, &pages))
            .await?;

        Ok(DeckSummary {
            deck_id,
            page_count,
            pdf_url: pdf_sas.url(self.store.as_ref(), &pdf_blob),
            share_url: self.config.share_url(LinkKind::Pdf.as_str(), &unique_code),
            stats: ConversionStats::default(),
        })
    }

    /// Upload one page's image and thumbnail concurrently.
    async fn store_page(
        &self,
        ledger: &mut UploadLedger<'_>,
        target: &DeckTarget<'_>,
        page: RenderedPage,
    ) -> Result<repository::NewPage, SlidePullError> {
        let image_blob = BlobPaths::slide_image(target.owner, target.deck_key, page.page_number);
        let thumbnail_blob = BlobPaths::slide_thumbnail(target.owner, target.deck_key, page.page_number);
        ledger.record([image_blob.clone(), thumbnail_blob.clone()]);

        let meta = BlobMeta::png();
        let (width, height) = (page.full.width, page.full.height);
        tokio::try_join!(
            self.store.put(&image_blob, page.full.bytes, &meta),
            self.store.put(&thumbnail_blob, page.thumbnail.bytes, &meta),
        )?;
        debug!("Stored page {} of {}", page.page_number, page.total_pages);

        let store = self.store.as_ref();
        Ok(repository::NewPage {
            page_number: page.page_number,
            image_sas: sas::issue(store, &image_blob, &self.sas, None, target.now)?,
            image_blob,
            width,
            height,
            thumbnail_sas: sas::issue(store, &thumbnail_blob, &self.sas, None, target.now)?,
            thumbnail_blob,
        })
    }
}

/// Names shared by every blob of one deck.
struct DeckTarget<'a> {
    owner: &'a str,
    deck_key: &'a str,
    stem: &'a str,
    filename: &'a str,
    now: DateTime<Utc>,
}

// ── Local mode ───────────────────────────────────────────────────────────

/// A slide set to assemble in local mode.
#[derive(Debug, Clone)]
pub struct LocalSet {
    pub name: String,
    pub selection: PageSelection,
}

/// Converts decks into a directory on disk.
///
/// Output layout:
///
/// ```text
/// out_dir/{stem}.pdf
/// out_dir/images/slide_{n}.png
/// out_dir/thumbnails/slide_{n}.png
/// out_dir/sets/{set}.pdf                       (when a set is requested)
/// out_dir/sets/{set}_qr.png
/// ```
pub struct LocalConverter {
    config: ServiceConfig,
    converter: Arc<dyn DeckConverter>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl LocalConverter {
    pub fn new(config: ServiceConfig) -> Self {
        let converter = Arc::new(OfficeConverter::from_config(&config));
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_lib_path.clone()));
        Self {
            config,
            converter,
            rasterizer,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn DeckConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub async fn convert(
        &self,
        input_path: &Path,
        out_dir: &Path,
        set: Option<&LocalSet>,
        progress: &dyn ConversionProgressCallback,
    ) -> Result<LocalOutput, SlidePullError> {
        let total_start = Instant::now();
        let display_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = tokio::fs::read(input_path)
            .await
            .map_err(|e| SlidePullError::Internal(format!("cannot read {}: {e}", input_path.display())))?;
        let kind = input::validate_upload(&display_name, &bytes, self.config.max_upload_bytes)?;
        let filename = input::sanitize_filename(&display_name);
        let stem = input::file_stem(&display_name);
        let work = scratch_dir()?;

        // ── Step 1: Convert to PDF ───────────────────────────────────────
        progress.on_stage(Stage::Converting);
        let convert_start = Instant::now();
        let pdf_path = stage_pdf(self.converter.as_ref(), &kind, &filename, &bytes, work.path()).await?;
        let pdf_bytes = read_file(&pdf_path).await?;
        let mut stats = ConversionStats {
            converted: kind.needs_conversion(),
            input_bytes: bytes.len() as u64,
            pdf_bytes: pdf_bytes.len() as u64,
            convert_duration_ms: convert_start.elapsed().as_millis() as u64,
            ..Default::default()
        };
        let out_pdf = out_dir.join(format!("{stem}.pdf"));
        write_output(&out_pdf, &pdf_bytes).await?;

        // ── Step 2: Render pages to disk ─────────────────────────────────
        progress.on_stage(Stage::Rendering);
        let render_start = Instant::now();
        let mut job = RenderJob::spawn(Arc::clone(&self.rasterizer), pdf_path, self.config.render);
        let mut image_paths = Vec::new();
        let mut thumbnail_paths = Vec::new();
        let consumed = async {
            let mut started = false;
            while let Some(page) = job.next().await {
                if !started {
                    progress.on_conversion_start(page.total_pages);
                    started = true;
                }
                let image = out_dir.join("images").join(format!("slide_{}.png", page.page_number));
                let thumb = out_dir.join("thumbnails").join(format!("slide_{}.png", page.page_number));
                stats.image_bytes += (page.full.bytes.len() + page.thumbnail.bytes.len()) as u64;
                write_output(&image, &page.full.bytes).await?;
                write_output(&thumb, &page.thumbnail.bytes).await?;
                image_paths.push(image);
                thumbnail_paths.push(thumb);
                progress.on_page_complete(page.page_number, page.total_pages);
            }
            Ok::<(), SlidePullError>(())
        }
        .await;
        let total_pages = job.finish(consumed).await?;
        if total_pages == 0 {
            return Err(SlidePullError::NoPages);
        }
        stats.page_count = total_pages;
        stats.render_duration_ms = render_start.elapsed().as_millis() as u64;

        // ── Step 3: Optional slide set ───────────────────────────────────
        let (set_pdf_path, qrcode_path) = match set {
            Some(set) => {
                progress.on_stage(Stage::Saving);
                let (pdf, qr) = self.write_local_set(set, &image_paths, out_dir).await?;
                (Some(pdf), Some(qr))
            }
            None => (None, None),
        };

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        progress.on_conversion_complete(0, total_pages);
        info!(
            "Local conversion complete: {} pages into {} in {}ms",
            total_pages,
            out_dir.display(),
            stats.total_duration_ms
        );

        Ok(LocalOutput {
            pdf_path: out_pdf,
            image_paths,
            thumbnail_paths,
            set_pdf_path,
            qrcode_path,
            stats,
        })
    }

    async fn write_local_set(
        &self,
        set: &LocalSet,
        image_paths: &[PathBuf],
        out_dir: &Path,
    ) -> Result<(PathBuf, PathBuf), SlidePullError> {
        let name = input::sanitize_set_name(&set.name)?;
        let selected = set.selection.to_page_numbers(image_paths.len());
        if selected.is_empty() {
            return Err(SlidePullError::InvalidSelection(format!(
                "no selected page exists in a {}-page deck",
                image_paths.len()
            )));
        }

        let mut pages = Vec::with_capacity(selected.len());
        for page_number in selected {
            pages.push(SetPage {
                page_number,
                image: read_file(&image_paths[page_number - 1]).await?,
            });
        }

        let zoom = self.config.render.zoom;
        let export = self.config.set_export;
        let title = name.clone();
        let pdf = tokio::task::spawn_blocking(move || assemble_pdf(&title, &pages, zoom, &export))
            .await
            .map_err(|e| SlidePullError::Internal(format!("Assembly task panicked: {}", e)))??;

        // Own directory, so a set named like the deck cannot replace it.
        let sets_dir = out_dir.join("sets");
        let pdf_path = sets_dir.join(format!("{name}.pdf"));
        write_output(&pdf_path, &pdf).await?;

        let absolute = std::path::absolute(&pdf_path).unwrap_or_else(|_| pdf_path.clone());
        let target = url::Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| absolute.display().to_string());
        let qr_path = sets_dir.join(format!("{name}_qr.png"));
        write_output(&qr_path, &qr_png(&target)?).await?;

        Ok((pdf_path, qr_path))
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Rasterisation running on the blocking pool, feeding a bounded channel.
struct RenderJob {
    pages: mpsc::Receiver<RenderedPage>,
    handle: JoinHandle<Result<usize, SlidePullError>>,
}

impl RenderJob {
    fn spawn(rasterizer: Arc<dyn Rasterizer>, pdf_path: PathBuf, settings: RenderSettings) -> Self {
        let (tx, pages) = mpsc::channel(PAGE_BUFFER);
        let handle = tokio::task::spawn_blocking(move || {
            let mut sink = |page: RenderedPage| {
                tx.blocking_send(page)
                    .map_err(|_| SlidePullError::Internal("page consumer stopped".into()))
            };
            rasterizer.rasterize(&pdf_path, &settings, &mut sink)
        });
        Self { pages, handle }
    }

    async fn next(&mut self) -> Option<RenderedPage> {
        self.pages.recv().await
    }

    /// Stop consuming and wait for the rasteriser. A consumer error takes
    /// precedence: the rasteriser then only reports the closed channel.
    async fn finish(self, consumed: Result<(), SlidePullError>) -> Result<usize, SlidePullError> {
        let RenderJob { pages, handle } = self;
        drop(pages);
        let rendered = handle
            .await
            .map_err(|e| SlidePullError::Internal(format!("Render task panicked: {}", e)))?;
        consumed?;
        rendered
    }
}

fn scratch_dir() -> Result<tempfile::TempDir, SlidePullError> {
    tempfile::Builder::new()
        .prefix("slidepull-")
        .tempdir()
        .map_err(|e| SlidePullError::Internal(format!("tempdir: {e}")))
}

/// Write the upload into `work` and return the path of its PDF, converting
/// presentations first.
async fn stage_pdf(
    converter: &dyn DeckConverter,
    kind: &DeckKind,
    filename: &str,
    bytes: &[u8],
    work: &Path,
) -> Result<PathBuf, SlidePullError> {
    let input_path = work.join(filename);
    write_output(&input_path, bytes).await?;
    if !kind.needs_conversion() {
        debug!("Upload is already a PDF, skipping conversion");
        return Ok(input_path);
    }
    let out_dir = work.join("converted");
    tokio::fs::create_dir_all(&out_dir)
        .await
        .map_err(|e| SlidePullError::OutputWriteFailed {
            path: out_dir.clone(),
            source: e,
        })?;
    converter.convert_to_pdf(&input_path, &out_dir).await
}

async fn read_file(path: &Path) -> Result<Vec<u8>, SlidePullError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SlidePullError::Internal(format!("cannot read {}: {e}", path.display())))
}

/// Atomic write: temp file in the same directory, then rename.
async fn write_output(path: &Path, bytes: &[u8]) -> Result<(), SlidePullError> {
    let failed = |e: std::io::Error| SlidePullError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp, path).await.map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_codes_are_alphanumeric() {
        let a = unique_code();
        let b = unique_code();
        assert_eq!(a.len(), CODE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn write_output_creates_parents_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images").join("slide_1.png");
        write_output(&path, b"png").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
        assert!(!dir.path().join("images").join("slide_1.png.tmp").exists());
    }
}
