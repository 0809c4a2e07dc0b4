//! Slide-set PDF assembly.
//!
//! The set PDF is rebuilt from the stored page images rather than by copying
//! pages out of the deck PDF: converted decks often carry embedded fonts and
//! media for every slide, and image pages guarantee the set looks exactly
//! like the thumbnails the user picked from.
//!
//! Each slide becomes one page holding a single JPEG XObject drawn
//! edge-to-edge. The page size is the rendered pixel size divided by the
//! render zoom, which gives back the original slide size in points.

use crate::config::SetExportSettings;
use crate::error::SlidePullError;
use crate::pipeline::encode::{encode_jpeg, fit_width};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::debug;

/// Full-size image of one selected slide.
#[derive(Debug, Clone)]
pub struct SetPage {
    pub page_number: usize,
    /// PNG (or any format the `image` crate decodes).
    pub image: Vec<u8>,
}

/// Build a PDF with one page per entry of `pages`, in order.
///
/// `zoom` is the factor the images were rendered at.
pub fn assemble_pdf(
    title: &str,
    pages: &[SetPage],
    zoom: f32,
    settings: &SetExportSettings,
) -> Result<Vec<u8>, SlidePullError> {
    if pages.is_empty() {
        return Err(SlidePullError::InvalidSelection("select at least one slide".into()));
    }
    let zoom = if zoom > 0.0 { zoom } else { 1.0 };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let decoded = image::load_from_memory(&page.image).map_err(|e| {
            SlidePullError::Image(format!("slide {}: {}", page.page_number, e))
        })?;
        let width_pt = decoded.width() as f32 / zoom;
        let height_pt = decoded.height() as f32 / zoom;

        let jpeg = encode_jpeg(&fit_width(&decoded, settings.max_image_width), settings.jpeg_quality)
            .map_err(|e| SlidePullError::Image(format!("slide {}: {}", page.page_number, e)))?;
        debug!(
            "Slide {}: {}x{} px → {}x{} JPEG ({} bytes), page {:.0}x{:.0} pt",
            page.page_number,
            decoded.width(),
            decoded.height(),
            jpeg.width,
            jpeg.height,
            jpeg.bytes.len(),
            width_pt,
            height_pt
        );

        let mut image_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => jpeg.width as i64,
                "Height" => jpeg.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg.bytes,
        );
        image_stream.allows_compression = false;
        let image_id = doc.add_object(image_stream);

        let content = format!("q {width_pt:.2} 0 0 {height_pt:.2} 0 0 cm /Im0 Do Q");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Producer" => Object::string_literal("slidepull"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| SlidePullError::PdfAssemblyFailed(e.to_string()))?;
    Ok(buf)
}
