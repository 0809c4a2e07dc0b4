//! End-to-end tests against a real office suite and a real pdfium.
//!
//! Gated behind the `E2E_ENABLED` environment variable so they do not run in
//! CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/opt/pdfium/lib cargo test --test e2e -- --nocapture
//!
//! Deck tests also need `soffice` on the PATH (or `SOFFICE_PATH`) and a
//! presentation at `test_cases/sample.pptx`.

use image::{DynamicImage, Rgb, RgbImage};
use slidepull::pipeline::assemble::{assemble_pdf, SetPage};
use slidepull::pipeline::encode::encode_png;
use slidepull::{
    LocalConverter, LocalSet, NoopProgressCallback, PageSelection, PdfiumRasterizer, Rasterizer,
    RenderSettings, RenderedPage, ServiceConfig, SetExportSettings, SlidePullError,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no file at `path`.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
    ($path:expr) => {{
        e2e_skip_unless_ready!();
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("slidepull=debug"))
        .with_test_writer()
        .try_init();
}

fn config() -> ServiceConfig {
    let mut builder = ServiceConfig::builder();
    if let Ok(soffice) = std::env::var("SOFFICE_PATH") {
        builder = builder.soffice_path(soffice);
    }
    builder.build().expect("valid config")
}

/// A three-page 16:9 PDF built from solid-colour slides.
fn synthetic_pdf(dir: &std::path::Path) -> PathBuf {
    let pages: Vec<SetPage> = (1..=3u8)
        .map(|n| {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1440, 810, Rgb([n * 60, 90, 30])));
            SetPage {
                page_number: n as usize,
                image: encode_png(&img).unwrap().bytes,
            }
        })
        .collect();
    let bytes = assemble_pdf("synthetic", &pages, 2.0, &SetExportSettings::default()).unwrap();
    let path = dir.join("synthetic.pdf");
    std::fs::write(&path, bytes).unwrap();
    path
}

// ── Rasterisation (pdfium only) ──────────────────────────────────────────────

#[test]
fn test_pdfium_renders_every_page_with_thumbnails() {
    e2e_skip_unless_ready!();
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let pdf = synthetic_pdf(dir.path());

    let settings = RenderSettings::default();
    let mut seen = Vec::new();
    let total = PdfiumRasterizer::default()
        .rasterize(&pdf, &settings, &mut |page: RenderedPage| {
            seen.push((page.page_number, page.full.width, page.thumbnail.width));
            Ok::<(), SlidePullError>(())
        })
        .expect("rasterize should succeed");

    assert_eq!(total, 3);
    let numbers: Vec<usize> = seen.iter().map(|s| s.0).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    for (page, full, thumb) in seen {
        // 720pt wide at 2x
        assert!((1430..=1450).contains(&full), "page {page}: full width {full}");
        assert_eq!(thumb, settings.thumbnail_width, "page {page}");
    }
}

#[tokio::test]
async fn test_local_pdf_with_slide_set() {
    e2e_skip_unless_ready!();
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let pdf = synthetic_pdf(dir.path());
    let out = dir.path().join("out");

    let set = LocalSet {
        name: "pick".into(),
        selection: PageSelection::Set(vec![3, 1]),
    };
    let output = LocalConverter::new(config())
        .convert(&pdf, &out, Some(&set), &NoopProgressCallback)
        .await
        .expect("conversion should succeed");

    assert_eq!(output.stats.page_count, 3);
    assert!(!output.stats.converted);
    assert_eq!(output.image_paths.len(), 3);
    assert!(output.thumbnail_paths.iter().all(|p| p.exists()));

    let set_pdf = std::fs::read(output.set_pdf_path.unwrap()).unwrap();
    let doc = lopdf::Document::load_mem(&set_pdf).unwrap();
    assert_eq!(doc.get_pages().len(), 2);
    assert!(output.qrcode_path.unwrap().exists());
}

// ── Deck conversion (office suite + pdfium) ─────────────────────────────────

#[tokio::test]
async fn test_local_pptx_conversion() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.pptx"));
    init_logging();
    let out = tempfile::tempdir().unwrap();

    let output = LocalConverter::new(config())
        .convert(&path, out.path(), None, &NoopProgressCallback)
        .await
        .expect("conversion should succeed");

    assert!(output.stats.converted);
    assert!(output.stats.page_count > 0);
    assert_eq!(output.image_paths.len(), output.stats.page_count);
    let pdf = std::fs::read(&output.pdf_path).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    println!(
        "Converted {} slides in {}ms (office {}ms, render {}ms)",
        output.stats.page_count,
        output.stats.total_duration_ms,
        output.stats.convert_duration_ms,
        output.stats.render_duration_ms
    );
}

#[tokio::test]
async fn test_missing_office_suite_is_reported() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.pptx"));
    let out = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .soffice_path("/definitely/not/soffice")
        .build()
        .unwrap();

    let err = LocalConverter::new(config)
        .convert(&path, out.path(), None, &NoopProgressCallback)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SlidePullError::OfficeNotFound { .. }),
        "got {err}"
    );
}
