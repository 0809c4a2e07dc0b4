//! The owner's library (listing and deleting decks and sets) and public
//! share-link resolution.
//!
//! Every URL handed out carries a SAS token. Stored tokens are reused while
//! they have more than `sas_refresh_margin_secs` left, otherwise a fresh one
//! is issued and written back, so links in a listing never expire mid-session.

use crate::convert::Pipeline;
use crate::db::{repository, DatabaseError};
use crate::error::SlidePullError;
use crate::output::{DeckListing, LinkKind, SetListing, SharedFile, SlideView};
use crate::pipeline::input;
use crate::storage::sas::{refresh_if_needed, SasPolicy};
use crate::storage::{attachment_disposition, BlobStore, SasToken, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Refresh `token` if needed and return the signed URL plus the token to
/// persist, if it changed. Runs inside [`crate::db::Database::call`].
fn signed_url(
    store: &dyn BlobStore,
    name: &str,
    token: &SasToken,
    policy: &SasPolicy,
    disposition: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(String, Option<SasToken>), DatabaseError> {
    let r = refresh_if_needed(store, name, Some(token), policy, disposition, now)
        .map_err(|e| DatabaseError::Task(format!("signing '{name}': {e}")))?;
    let url = r.token.url(store, name);
    Ok((url, r.refreshed.then_some(r.token)))
}

fn download_name(original: &str) -> String {
    format!("{}.pdf", input::file_stem(original))
}

impl Pipeline {
    /// The owner's decks, newest first, each with its slide sets.
    pub async fn list_decks(&self, owner: &str) -> Result<Vec<DeckListing>, SlidePullError> {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let policy = self.sas;
        let owner = owner.to_string();

        let listings = self
            .db
            .call(move |conn| {
                let now = Utc::now();
                let store = store.as_ref();
                let decks = repository::list_decks(conn, &owner)?;
                let sets = repository::list_sets(conn, &owner)?;

                let mut listings = Vec::with_capacity(decks.len());
                for deck in decks {
                    let (pdf_url, fresh) = signed_url(store, &deck.blob_name, &deck.sas, &policy, None, now)?;
                    if let Some(t) = fresh {
                        repository::update_deck_sas(conn, deck.deck_id, &t)?;
                    }

                    let mut deck_sets = Vec::new();
                    for set in sets.iter().filter(|s| s.deck_id == deck.deck_id) {
                        let disposition = attachment_disposition(&set.name);
                        let (set_url, fresh) =
                            signed_url(store, &set.blob_name, &set.sas, &policy, Some(&disposition), now)?;
                        if let Some(t) = fresh {
                            repository::update_set_sas(conn, set.set_id, &t)?;
                        }
                        let (qr_url, fresh) = signed_url(store, &set.qrcode_blob, &set.qrcode_sas, &policy, None, now)?;
                        if let Some(t) = fresh {
                            repository::update_set_qrcode_sas(conn, set.set_id, &t)?;
                        }
                        deck_sets.push(SetListing {
                            set_id: set.set_id,
                            name: set.name.clone(),
                            slide_count: set.slide_count,
                            pages: repository::set_member_pages(conn, set.set_id)?,
                            download_count: set.download_count,
                            created_at: set.created_at,
                            pdf_url: set_url,
                            share_url: config.share_url(LinkKind::Set.as_str(), &set.unique_code),
                            qrcode_url: qr_url,
                        });
                    }

                    listings.push(DeckListing {
                        deck_id: deck.deck_id,
                        page_count: deck.num_slides as usize,
                        file_size_kb: deck.file_size_kb,
                        download_count: deck.download_count,
                        uploaded_at: deck.uploaded_at,
                        pdf_url,
                        share_url: config.share_url(LinkKind::Pdf.as_str(), &deck.unique_code),
                        filename: deck.original_filename,
                        sets: deck_sets,
                    });
                }
                Ok(listings)
            })
            .await?;
        Ok(listings)
    }

    /// Every page of one of the owner's decks, with image and thumbnail URLs.
    pub async fn list_slides(&self, owner: &str, deck_id: i64) -> Result<Vec<SlideView>, SlidePullError> {
        let store = Arc::clone(&self.store);
        let policy = self.sas;
        let owner = owner.to_string();

        self.db
            .call(move |conn| {
                if repository::get_deck(conn, &owner, deck_id)?.is_none() {
                    return Ok(None);
                }
                let now = Utc::now();
                let store = store.as_ref();
                let mut views = Vec::new();
                for slide in repository::list_slides(conn, deck_id)? {
                    let (image_url, fresh) = signed_url(store, &slide.image_blob, &slide.image_sas, &policy, None, now)?;
                    if let Some(t) = fresh {
                        repository::update_image_sas(conn, slide.image_id, &t)?;
                    }
                    let (thumbnail_url, fresh) =
                        signed_url(store, &slide.thumbnail_blob, &slide.thumbnail_sas, &policy, None, now)?;
                    if let Some(t) = fresh {
                        repository::update_thumbnail_sas(conn, slide.thumbnail_id, &t)?;
                    }
                    views.push(SlideView {
                        image_id: slide.image_id,
                        page_number: slide.page_number,
                        width: slide.width,
                        height: slide.height,
                        image_url,
                        thumbnail_url,
                    });
                }
                Ok(Some(views))
            })
            .await?
            .ok_or(SlidePullError::DeckNotFound)
    }

    /// Delete a deck with its pages and sets, then their blobs.
    pub async fn delete_deck(&self, owner: &str, deck_id: i64) -> Result<(), SlidePullError> {
        let owner_key = owner.to_string();
        let blobs = self
            .db
            .call(move |conn| repository::delete_deck(conn, &owner_key, deck_id))
            .await?
            .ok_or(SlidePullError::DeckNotFound)?;
        self.delete_blobs(&blobs).await;
        info!("Deleted deck {} for {} ({} blobs)", deck_id, owner, blobs.len());
        Ok(())
    }

    /// Delete a slide set and its PDF and QR code.
    pub async fn delete_set(&self, owner: &str, set_id: i64) -> Result<(), SlidePullError> {
        let owner_key = owner.to_string();
        let blobs = self
            .db
            .call(move |conn| repository::delete_set(conn, &owner_key, set_id))
            .await?
            .ok_or(SlidePullError::SetNotFound)?;
        self.delete_blobs(&blobs).await;
        info!("Deleted slide set {} for {}", set_id, owner);
        Ok(())
    }

    /// Rows are already gone, so a blob that cannot be deleted is only logged.
    async fn delete_blobs(&self, names: &[String]) {
        for name in names {
            if let Err(e) = self.store.delete(name).await {
                warn!("Could not delete blob '{}': {}", name, e);
            }
        }
    }

    /// Resolve a public share link (`/s/{link_kind}/{code}`).
    ///
    /// Counts the download, refreshes the stored token if needed and fetches
    /// the file. For decks a failed read yields `bytes: None` so the caller
    /// can redirect to `fallback_url`; for sets it is an error.
    pub async fn open_share(&self, link_kind: &str, code: &str) -> Result<SharedFile, SlidePullError> {
        let kind: LinkKind = link_kind.parse()?;
        let store = Arc::clone(&self.store);
        let policy = self.sas;
        let code = code.to_string();

        let (blob_name, filename, fallback_url) = self
            .db
            .call(move |conn| {
                let now = Utc::now();
                let store = store.as_ref();
                let resolved = match kind {
                    LinkKind::Pdf => {
                        let Some(deck) = repository::get_deck_by_code(conn, &code)? else {
                            return Ok(Err(SlidePullError::DeckNotFound));
                        };
                        repository::increment_deck_downloads(conn, deck.deck_id)?;
                        let (url, fresh) = signed_url(store, &deck.blob_name, &deck.sas, &policy, None, now)?;
                        if let Some(t) = fresh {
                            repository::update_deck_sas(conn, deck.deck_id, &t)?;
                        }
                        (deck.blob_name, download_name(&deck.original_filename), url)
                    }
                    LinkKind::Set => {
                        let Some(set) = repository::get_set_by_code(conn, &code)? else {
                            return Ok(Err(SlidePullError::SetNotFound));
                        };
                        repository::increment_set_downloads(conn, set.set_id)?;
                        if set.blob_name.is_empty() {
                            return Ok(Err(SlidePullError::SetPdfMissing));
                        }
                        let disposition = attachment_disposition(&set.name);
                        let (url, fresh) =
                            signed_url(store, &set.blob_name, &set.sas, &policy, Some(&disposition), now)?;
                        if let Some(t) = fresh {
                            repository::update_set_sas(conn, set.set_id, &t)?;
                        }
                        (set.blob_name, format!("{}.pdf", set.name), url)
                    }
                };
                Ok(Ok(resolved))
            })
            .await??;

        let bytes = match self.store.get(&blob_name).await {
            Ok(bytes) => Some(bytes),
            Err(StorageError::NotFound { .. }) if kind == LinkKind::Set => {
                return Err(SlidePullError::SetPdfMissing);
            }
            Err(e) if kind == LinkKind::Set => return Err(e.into()),
            Err(e) => {
                warn!("Share link {}: reading '{}' failed, falling back to redirect: {}", kind, blob_name, e);
                None
            }
        };

        Ok(SharedFile {
            filename,
            bytes,
            fallback_url,
        })
    }

    /// Owner download of a deck's PDF. Not counted as a share download.
    pub async fn download_deck(&self, owner: &str, deck_id: i64) -> Result<SharedFile, SlidePullError> {
        let owner_key = owner.to_string();
        let deck = self
            .db
            .call(move |conn| repository::get_deck(conn, &owner_key, deck_id))
            .await?
            .ok_or(SlidePullError::DeckNotFound)?;

        let bytes = self.store.get(&deck.blob_name).await?;
        let fallback_url = deck.sas.url(self.store.as_ref(), &deck.blob_name);
        Ok(SharedFile {
            filename: download_name(&deck.original_filename),
            bytes: Some(bytes),
            fallback_url,
        })
    }
}
