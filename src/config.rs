//! Configuration types for the slidepull service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Storage credentials live separately in
//! [`StorageSettings`] so the main config can be logged freely.

use crate::error::SlidePullError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for deck conversion, set export and sharing.
///
/// # Example
/// ```rust
/// use slidepull::{RenderQuality, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .public_base_url("https://slides.example.com")
///     .quality(RenderQuality::Mid)
///     .conversion_timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.render.zoom, 1.5);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Externally reachable base URL, used for share links and QR codes.
    /// Default: `http://localhost:8000`.
    pub public_base_url: String,

    /// Office-suite binary used for deck → PDF. Default: `soffice`.
    pub soffice_path: PathBuf,

    /// Timeout for one conversion attempt in seconds. Default: 120.
    pub conversion_timeout_secs: u64,

    /// Number of office-suite processes allowed at once. Default: 2.
    ///
    /// Each process holds a few hundred MB of memory while converting.
    pub max_concurrent_conversions: usize,

    /// Explicit pdfium library location. Falls back to `PDFIUM_LIB_PATH` and
    /// then the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Page rasterisation settings.
    pub render: RenderSettings,

    /// Slide-set PDF export settings.
    pub set_export: SetExportSettings,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Lifetime of issued SAS tokens in seconds. Default: 7 days.
    pub sas_ttl_secs: u64,

    /// A stored token is reissued once it is within this many seconds of
    /// expiry. Default: 300.
    pub sas_refresh_margin_secs: u64,

    /// Concurrent blob transfers per request. Default: 4.
    pub transfer_concurrency: usize,

    /// How long finished job-progress records stay pollable, in seconds.
    /// Default: 3600.
    pub job_retention_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8000".to_string(),
            soffice_path: PathBuf::from("soffice"),
            conversion_timeout_secs: 120,
            max_concurrent_conversions: 2,
            pdfium_lib_path: None,
            render: RenderSettings::default(),
            set_export: SetExportSettings::default(),
            max_upload_bytes: 50 * 1024 * 1024,
            sas_ttl_secs: 7 * 24 * 60 * 60,
            sas_refresh_margin_secs: 300,
            transfer_concurrency: 4,
            job_retention_secs: 3600,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Public URL of a share link, e.g. `https://host/s/set/AbC123`.
    pub fn share_url(&self, kind: &str, code: &str) -> String {
        format!(
            "{}/s/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            kind,
            code
        )
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = path.into();
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs.max(5);
        self
    }

    pub fn max_concurrent_conversions(mut self, n: usize) -> Self {
        self.config.max_concurrent_conversions = n.max(1);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn quality(mut self, quality: RenderQuality) -> Self {
        self.config.render.zoom = quality.zoom();
        self
    }

    pub fn zoom(mut self, zoom: f32) -> Self {
        self.config.render.zoom = zoom.clamp(0.5, 4.0);
        self
    }

    pub fn thumbnail_width(mut self, px: u32) -> Self {
        self.config.render.thumbnail_width = px.clamp(64, 1024);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.render.max_rendered_pixels = px.max(256);
        self
    }

    pub fn set_max_image_width(mut self, px: u32) -> Self {
        self.config.set_export.max_image_width = px.max(320);
        self
    }

    pub fn set_jpeg_quality(mut self, quality: u8) -> Self {
        self.config.set_export.jpeg_quality = quality.clamp(30, 100);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn sas_ttl_secs(mut self, secs: u64) -> Self {
        self.config.sas_ttl_secs = secs.clamp(60, 365 * 24 * 60 * 60);
        self
    }

    pub fn sas_refresh_margin_secs(mut self, secs: u64) -> Self {
        self.config.sas_refresh_margin_secs = secs;
        self
    }

    pub fn transfer_concurrency(mut self, n: usize) -> Self {
        self.config.transfer_concurrency = n.max(1);
        self
    }

    pub fn job_retention_secs(mut self, secs: u64) -> Self {
        self.config.job_retention_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, SlidePullError> {
        let c = &self.config;
        if !(c.public_base_url.starts_with("http://") || c.public_base_url.starts_with("https://"))
        {
            return Err(SlidePullError::InvalidConfig(format!(
                "public base URL must start with http:// or https://, got '{}'",
                c.public_base_url
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(SlidePullError::InvalidConfig(
                "max upload size must be greater than zero".into(),
            ));
        }
        if c.sas_refresh_margin_secs >= c.sas_ttl_secs {
            return Err(SlidePullError::InvalidConfig(format!(
                "SAS refresh margin ({}s) must be shorter than the SAS lifetime ({}s)",
                c.sas_refresh_margin_secs, c.sas_ttl_secs
            )));
        }
        if c.soffice_path.as_os_str().is_empty() {
            return Err(SlidePullError::InvalidConfig(
                "office binary path is empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Render / export settings ─────────────────────────────────────────────

/// How pages are rasterised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Scale factor applied to the page's point size. Default: 2.0.
    pub zoom: f32,
    /// Thumbnail width in pixels; height follows the aspect ratio. Default: 300.
    pub thumbnail_width: u32,
    /// Cap on either edge of the full-size image. Default: 4000.
    pub max_rendered_pixels: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            zoom: 2.0,
            thumbnail_width: 300,
            max_rendered_pixels: 4000,
        }
    }
}

/// How slide-set PDFs are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetExportSettings {
    /// Slides wider than this are downscaled before embedding. Default: 1600.
    pub max_image_width: u32,
    /// JPEG quality for embedded slides. Default: 80.
    pub jpeg_quality: u8,
}

impl Default for SetExportSettings {
    fn default() -> Self {
        Self {
            max_image_width: 1600,
            jpeg_quality: 80,
        }
    }
}

/// Resolution presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    /// 1× page size.
    Standard,
    /// 1.5× page size.
    Mid,
    /// 2× page size (default).
    #[default]
    Max,
}

impl RenderQuality {
    pub fn zoom(self) -> f32 {
        match self {
            RenderQuality::Standard => 1.0,
            RenderQuality::Mid => 1.5,
            RenderQuality::Max => 2.0,
        }
    }
}

// ── Storage settings ─────────────────────────────────────────────────────

/// Which blob backend to use and its credentials.
#[derive(Clone)]
pub enum StorageSettings {
    /// Files under `root`, served by this process with HMAC-signed URLs.
    Local { root: PathBuf, signing_key: Vec<u8> },
    /// Azure Blob Storage container.
    Azure {
        account: String,
        access_key: String,
        container: String,
    },
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSettings::Local { root, .. } => f
                .debug_struct("Local")
                .field("root", root)
                .field("signing_key", &"<redacted>")
                .finish(),
            StorageSettings::Azure {
                account, container, ..
            } => f
                .debug_struct("Azure")
                .field("account", account)
                .field("access_key", &"<redacted>")
                .field("container", container)
                .finish(),
        }
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages go into a locally assembled slide set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed
    /// page numbers that exist in a deck of `total_pages`.
    pub fn to_page_numbers(&self, total_pages: usize) -> Vec<usize> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => vec![*p],
            PageSelection::Range(start, end) => ((*start).max(1)..=(*end).min(total_pages)).collect(),
            PageSelection::Set(pages) => pages.clone(),
        };
        pages.retain(|&p| p >= 1 && p <= total_pages);
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}
