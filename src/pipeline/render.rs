//! PDF rasterisation: every page becomes a full-size PNG and a thumbnail.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and must not run on Tokio worker threads. [`Rasterizer`] is a plain
//! blocking trait; the pipeline calls it from `spawn_blocking` and receives
//! pages through the `sink` closure, which forwards them over a bounded
//! channel so uploads overlap with rendering.
//!
//! ## Why cap pixels as well as zoom?
//!
//! Slides are usually 720 × 405 pt, so 2× zoom yields a 1440 × 810 image.
//! Converted posters or A0 handouts would explode at the same zoom;
//! `max_rendered_pixels` bounds either edge regardless of page size.

use crate::config::RenderSettings;
use crate::error::SlidePullError;
use crate::pipeline::encode::{encode_png, fit_width, EncodedImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rasterised page, ready to upload.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-indexed.
    pub page_number: usize,
    pub total_pages: usize,
    pub full: EncodedImage,
    pub thumbnail: EncodedImage,
}

/// Receives rendered pages in page order. Returning an error stops rendering.
pub type PageSink<'a> = dyn FnMut(RenderedPage) -> Result<(), SlidePullError> + 'a;

/// Renders the pages of a PDF. Implementations block.
pub trait Rasterizer: Send + Sync {
    /// Render every page of `pdf_path` into `sink` and return the page count.
    fn rasterize(
        &self,
        pdf_path: &Path,
        settings: &RenderSettings,
        sink: &mut PageSink<'_>,
    ) -> Result<usize, SlidePullError>;
}

/// [`Rasterizer`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// `lib_path` may name the library file or the directory holding it.
    /// `None` falls back to `PDFIUM_LIB_PATH`, then the system library.
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }

    fn bind(&self) -> Result<Pdfium, SlidePullError> {
        let configured = self
            .lib_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match configured {
            Some(path) => {
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path)
                } else {
                    path.clone()
                };
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(&lib).map_err(|e| {
                    SlidePullError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
                })?
            }
            None => Pdfium::bind_to_system_library()
                .map_err(|e| SlidePullError::PdfiumBindingFailed(format!("system library: {:?}", e)))?,
        };
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf_path: &Path,
        settings: &RenderSettings,
        sink: &mut PageSink<'_>,
    ) -> Result<usize, SlidePullError> {
        let pdfium = self.bind()?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| map_load_error(pdf_path, e))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(SlidePullError::NoPages);
        }
        info!("PDF loaded: {} pages", total_pages);

        let max = settings.max_rendered_pixels as i32;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(settings.zoom)
            .set_maximum_width(max)
            .set_maximum_height(max);

        for idx in 0..total_pages {
            let page_number = idx + 1;
            let failed = |detail: String| SlidePullError::RasterisationFailed {
                page: page_number,
                detail,
            };

            let page = pages.get(idx as u16).map_err(|e| failed(format!("{:?}", e)))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| failed(format!("{:?}", e)))?;
            let image = bitmap.as_image();

            let full = encode_png(&image).map_err(|e| failed(e.to_string()))?;
            let thumbnail =
                encode_png(&fit_width(&image, settings.thumbnail_width)).map_err(|e| failed(e.to_string()))?;
            debug!(
                "Rendered page {} → {}x{} px (thumb {}x{})",
                page_number, full.width, full.height, thumbnail.width, thumbnail.height
            );

            sink(RenderedPage {
                page_number,
                total_pages,
                full,
                thumbnail,
            })?;
        }

        Ok(total_pages)
    }
}

fn map_load_error(path: &Path, e: PdfiumError) -> SlidePullError {
    let detail = format!("{:?}", e);
    if detail.contains("Password") || detail.contains("password") {
        SlidePullError::PasswordRequired {
            path: path.to_path_buf(),
        }
    } else {
        SlidePullError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}
