//! Blob storage: every artifact the pipeline produces lives here.
//!
//! ## Data layout
//!
//! ```text
//! {owner}/pdf/{stem}_{deck_key}.pdf              converted deck
//! {owner}/images/{deck_key}/slide_{n}.png        full-size page images
//! {owner}/thumbnails/{deck_key}/slide_{n}.png    300 px thumbnails
//! {owner}/sets/{deck_key}/{name}_{code}.pdf      slide-set PDFs
//! {owner}/qrcodes/{code}_qr.png                  QR code per set
//! ```
//!
//! Two backends implement [`BlobStore`]:
//!
//! * [`local::LocalBlobStore`]: plain files, URLs signed with HMAC and served
//!   by this process under `/blobs/…`.
//! * [`azure::AzureBlobStore`]: Azure Blob Storage over its REST API with
//!   service SAS tokens.
//!
//! Clients never receive credentials. They get a blob URL plus a
//! time-limited token (see [`sas`]).

pub mod azure;
pub mod local;
pub mod sas;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use sas::{SasPermissions, SasPolicy, SasToken};

/// Errors raised by blob backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob '{name}' not found")]
    NotFound { name: String },

    #[error("Invalid blob name '{name}'")]
    InvalidName { name: String },

    #[error("Blob storage I/O error on '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob storage request for '{name}' failed: {reason}")]
    Request { name: String, reason: String },

    #[error("Blob storage returned HTTP {status} for '{name}': {body}")]
    Http {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Invalid storage credentials: {0}")]
    Credentials(String),

    #[error("Signature rejected: {0}")]
    InvalidSignature(String),
}

/// Properties stored alongside a blob and replayed when it is served.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlobMeta {
    pub content_type: String,
    pub content_disposition: Option<String>,
}

impl BlobMeta {
    pub fn png() -> Self {
        Self {
            content_type: "image/png".into(),
            content_disposition: None,
        }
    }

    pub fn pdf() -> Self {
        Self {
            content_type: "application/pdf".into(),
            content_disposition: None,
        }
    }

    /// A PDF that browsers should save as `filename`.
    pub fn pdf_attachment(filename: &str) -> Self {
        Self {
            content_type: "application/pdf".into(),
            content_disposition: Some(attachment_disposition(filename)),
        }
    }
}

/// `attachment; filename="…"`, appending `.pdf` when missing.
pub fn attachment_disposition(filename: &str) -> String {
    let mut name: String = filename
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    if !name.to_ascii_lowercase().ends_with(".pdf") {
        name.push_str(".pdf");
    }
    format!("attachment; filename=\"{name}\"")
}

/// Object storage used by the pipeline.
///
/// Names are `/`-separated relative paths (see the module docs). `delete` of
/// a missing blob succeeds so rollback can be retried blindly.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend label for logs (`local`, `azure`).
    fn backend(&self) -> &'static str;

    async fn put(&self, name: &str, bytes: Vec<u8>, meta: &BlobMeta) -> Result<(), StorageError>;

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Unsigned URL of the blob.
    fn blob_url(&self, name: &str) -> String;

    /// Produce a query-string token granting `permissions` on one blob until
    /// `expires_at`. `content_disposition` is baked into the signature.
    fn sign(
        &self,
        name: &str,
        permissions: SasPermissions,
        expires_at: DateTime<Utc>,
        content_disposition: Option<&str>,
    ) -> Result<String, StorageError>;
}

/// Blob naming scheme.
pub struct BlobPaths;

impl BlobPaths {
    pub fn deck_pdf(owner: &str, stem: &str, deck_key: &str) -> String {
        format!("{owner}/pdf/{stem}_{deck_key}.pdf")
    }

    pub fn slide_image(owner: &str, deck_key: &str, page: usize) -> String {
        format!("{owner}/images/{deck_key}/slide_{page}.png")
    }

    pub fn slide_thumbnail(owner: &str, deck_key: &str, page: usize) -> String {
        format!("{owner}/thumbnails/{deck_key}/slide_{page}.png")
    }

    pub fn set_pdf(owner: &str, deck_key: &str, set_name: &str, code: &str) -> String {
        format!("{owner}/sets/{deck_key}/{set_name}_{code}.pdf")
    }

    pub fn set_qrcode(owner: &str, code: &str) -> String {
        format!("{owner}/qrcodes/{code}_qr.png")
    }
}

// ── Rollback ─────────────────────────────────────────────────────────────

/// Remembers every blob written for one unit of work so a failure can
/// remove them again.
///
/// Names are recorded *before* the upload starts: a half-written blob is
/// cleaned up too, and deleting one that never landed is a no-op.
pub(crate) struct UploadLedger<'a> {
    store: &'a dyn BlobStore,
    names: Vec<String>,
}

impl<'a> UploadLedger<'a> {
    pub(crate) fn new(store: &'a dyn BlobStore) -> Self {
        Self {
            store,
            names: Vec::new(),
        }
    }

    /// Record `name`, then upload it.
    pub(crate) async fn put(&mut self, name: &str, bytes: Vec<u8>, meta: &BlobMeta) -> Result<(), StorageError> {
        self.names.push(name.to_string());
        self.store.put(name, bytes, meta).await
    }

    /// Record several names whose uploads the caller drives itself.
    pub(crate) fn record<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.names.extend(names);
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    /// Delete everything recorded. Failures are logged, never raised.
    pub(crate) async fn rollback(self) {
        let total = self.names.len();
        let mut failed = 0;
        for name in self.names.iter().rev() {
            if let Err(e) = self.store.delete(name).await {
                failed += 1;
                tracing::warn!("Rollback: could not delete blob '{}': {}", name, e);
            }
        }
        tracing::info!(
            "Rolled back {} blob(s) on {} ({} failed)",
            total,
            self.store.backend(),
            failed
        );
    }
}

/// Reject names that could escape a container or filesystem root.
pub(crate) fn validate_blob_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.contains('\0')
        || name
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StorageError::InvalidName {
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}
