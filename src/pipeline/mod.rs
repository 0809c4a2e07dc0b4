//! Pipeline stages for deck conversion and slide-set export.
//!
//! Each submodule implements exactly one transformation step. Stages never
//! touch blob storage or the database; orchestration lives in
//! [`crate::convert`] and [`crate::sets`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ office ──▶ render ──▶ encode          (deck upload)
//! (check)  (soffice)  (pdfium)   (PNG)
//!
//! stored PNGs ──▶ encode ──▶ assemble ──▶ qr      (slide set)
//!                 (JPEG)     (lopdf)     (share link)
//! ```
//!
//! 1. [`input`]: validate the upload and sanitise names
//! 2. [`office`]: presentation → PDF through headless LibreOffice, with
//!    fallback command variants, a timeout and a bounded pool
//! 3. [`render`]: rasterise every page; blocking, since pdfium is not
//!    async-safe
//! 4. [`encode`]: PNG for storage, downscaled JPEG for export
//! 5. [`assemble`]: build the slide-set PDF from selected page images
//! 6. [`qr`]: QR code PNG pointing at the set's share link

pub mod assemble;
pub mod encode;
pub mod input;
pub mod office;
pub mod qr;
pub mod render;
