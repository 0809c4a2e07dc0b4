//! Shared fixtures: a fake office suite, a fake rasteriser producing
//! synthetic slides, and a pipeline wired to a temp-dir blob store and an
//! in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use slidepull::pipeline::encode::{encode_png, fit_width};
use slidepull::server::AppState;
use slidepull::storage::local::LocalBlobStore;
use slidepull::{
    Database, DeckConverter, DeckUpload, Pipeline, Rasterizer, RenderSettings, RenderedPage,
    ServiceConfig, SlidePullError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const BASE_URL: &str = "http://slides.test";

/// Bytes that pass the `.pptx` magic check.
pub const PPTX_BYTES: &[u8] = b"PK\x03\x04 not really a presentation";

/// Writes a placeholder PDF instead of running an office suite.
#[derive(Default)]
pub struct FakeConverter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DeckConverter for FakeConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, SlidePullError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "deck".into());
        let out = out_dir.join(format!("{stem}.pdf"));
        tokio::fs::write(&out, b"%PDF-1.4\n% placeholder\n")
            .await
            .map_err(|e| SlidePullError::Internal(e.to_string()))?;
        Ok(out)
    }
}

/// Emits `pages` solid-colour 160x90 slides, optionally failing at one page
/// or pausing after each one.
pub struct FakeRasterizer {
    pub pages: usize,
    pub fail_at: Option<usize>,
    pub delay: Duration,
}

impl FakeRasterizer {
    pub fn pages(pages: usize) -> Self {
        Self {
            pages,
            fail_at: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_at(pages: usize, page: usize) -> Self {
        Self {
            fail_at: Some(page),
            ..Self::pages(pages)
        }
    }

    /// Pauses `delay` after every page, long enough to cancel mid-deck.
    pub fn slow(pages: usize, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::pages(pages)
        }
    }
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        _pdf_path: &Path,
        settings: &RenderSettings,
        sink: &mut slidepull::pipeline::render::PageSink<'_>,
    ) -> Result<usize, SlidePullError> {
        if self.pages == 0 {
            return Err(SlidePullError::NoPages);
        }
        for n in 1..=self.pages {
            if self.fail_at == Some(n) {
                return Err(SlidePullError::RasterisationFailed {
                    page: n,
                    detail: "synthetic failure".into(),
                });
            }
            let shade = (n * 40 % 256) as u8;
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(160, 90, Rgb([shade, 20, 200])));
            let encode = |i: &DynamicImage| encode_png(i).map_err(|e| SlidePullError::Image(e.to_string()));
            sink(RenderedPage {
                page_number: n,
                total_pages: self.pages,
                full: encode(&img)?,
                thumbnail: encode(&fit_width(&img, settings.thumbnail_width))?,
            })?;
            std::thread::sleep(self.delay);
        }
        Ok(self.pages)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<LocalBlobStore>,
    pub converter: Arc<FakeConverter>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(rasterizer: FakeRasterizer) -> Self {
        Self::with_config(
            rasterizer,
            ServiceConfig::builder().public_base_url(BASE_URL).build().unwrap(),
        )
    }

    pub fn with_config(rasterizer: FakeRasterizer, config: ServiceConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalBlobStore::new(dir.path(), b"test-key".to_vec(), BASE_URL).unwrap());
        let converter = Arc::new(FakeConverter::default());
        let pipeline = Pipeline::new(config, store.clone(), Database::open_in_memory().unwrap())
            .with_converter(converter.clone())
            .with_rasterizer(Arc::new(rasterizer));
        Self {
            dir,
            store,
            converter,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.pipeline.clone()).with_local_blobs(self.store.clone())
    }

    /// Every stored blob file for `owner`, sidecars excluded.
    pub fn blob_files(&self, owner: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_files(&self.dir.path().join(owner), &mut found);
        found.sort();
        found
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

pub fn pptx_upload(owner: &str, filename: &str) -> DeckUpload {
    DeckUpload {
        owner: owner.to_string(),
        filename: filename.to_string(),
        bytes: PPTX_BYTES.to_vec(),
    }
}

/// Last path segment of a share URL.
pub fn code_of(share_url: &str) -> &str {
    share_url.rsplit('/').next().unwrap_or_default()
}
