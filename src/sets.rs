//! Slide-set creation: a user-picked subset of a deck's pages becomes a new
//! PDF with its own share link and QR code.
//!
//! Nothing is re-rendered. The full-size page images stored at conversion
//! time are fetched back from the blob store and re-packed by
//! [`crate::pipeline::assemble`].

use crate::convert::{unique_code, Pipeline};
use crate::db::repository::{self, NewSlideSet};
use crate::error::SlidePullError;
use crate::output::{LinkKind, SetRequest, SlideSetSummary};
use crate::pipeline::assemble::{assemble_pdf, SetPage};
use crate::pipeline::input;
use crate::pipeline::qr::qr_png;
use crate::storage::sas;
use crate::storage::{attachment_disposition, BlobMeta, BlobPaths, UploadLedger};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{info, warn};

impl Pipeline {
    /// Build a slide set from `request.image_ids` of the owner's deck.
    ///
    /// Duplicate ids are ignored and slides are ordered by page number. Every
    /// id must belong to the deck. On failure the set's blobs are removed.
    pub async fn create_slide_set(
        &self,
        owner: &str,
        deck_id: i64,
        request: SetRequest,
    ) -> Result<SlideSetSummary, SlidePullError> {
        let start = Instant::now();
        let name = input::sanitize_set_name(&request.name)?;
        let wanted: BTreeSet<i64> = request.image_ids.iter().copied().collect();
        if wanted.is_empty() {
            return Err(SlidePullError::InvalidSelection("select at least one slide".into()));
        }

        // ── Step 1: Resolve the selection ────────────────────────────────
        let owner_key = owner.to_string();
        let ids: Vec<i64> = wanted.iter().copied().collect();
        let (deck, slides) = self
            .db
            .call(move |conn| {
                let Some(deck) = repository::get_deck(conn, &owner_key, deck_id)? else {
                    return Ok(None);
                };
                let slides = repository::get_slides(conn, deck_id, &ids)?;
                Ok(Some((deck, slides)))
            })
            .await?
            .ok_or(SlidePullError::DeckNotFound)?;

        if slides.len() != wanted.len() {
            let found: BTreeSet<i64> = slides.iter().map(|s| s.image_id).collect();
            let missing: Vec<String> = wanted.difference(&found).map(|id| id.to_string()).collect();
            return Err(SlidePullError::InvalidSelection(format!(
                "slide id(s) {} are not part of this presentation",
                missing.join(", ")
            )));
        }

        // ── Step 2: Fetch page images ────────────────────────────────────
        let fetches: Vec<_> = slides
            .iter()
            .map(|slide| async move {
                let image = self.store.get(&slide.image_blob).await?;
                Ok::<_, SlidePullError>(SetPage {
                    page_number: slide.page_number,
                    image,
                })
            })
            .collect();
        let pages: Vec<SetPage> = stream::iter(fetches)
            .buffered(self.config.transfer_concurrency)
            .try_collect()
            .await?;
        let page_numbers: Vec<usize> = pages.iter().map(|p| p.page_number).collect();

        // ── Step 3: Assemble ─────────────────────────────────────────────
        let zoom = self.config.render.zoom;
        let export = self.config.set_export;
        let title = name.clone();
        let pdf = tokio::task::spawn_blocking(move || assemble_pdf(&title, &pages, zoom, &export))
            .await
            .map_err(|e| SlidePullError::Internal(format!("Assembly task panicked: {}", e)))??;
        let pdf_size_kb = (pdf.len() as u64).div_ceil(1024);

        // ── Step 4: Upload PDF and QR code ───────────────────────────────
        let code = unique_code();
        let share_url = self.config.share_url(LinkKind::Set.as_str(), &code);
        let qr = qr_png(&share_url)?;
        let blob_name = BlobPaths::set_pdf(owner, &deck.deck_key, &name, &code);
        let qrcode_blob = BlobPaths::set_qrcode(owner, &code);
        let disposition = attachment_disposition(&name);

        let mut ledger = UploadLedger::new(self.store.as_ref());
        let stored = async {
            ledger
                .put(&blob_name, pdf, &BlobMeta::pdf_attachment(&name))
                .await?;
            ledger.put(&qrcode_blob, qr, &BlobMeta::png()).await?;

            // ── Step 5: Record the set ───────────────────────────────────
            let now = Utc::now();
            let store = self.store.as_ref();
            let row = NewSlideSet {
                deck_id,
                owner: owner.to_string(),
                name: name.clone(),
                sas: sas::issue(store, &blob_name, &self.sas, Some(&disposition), now)?,
                blob_name: blob_name.clone(),
                qrcode_sas: sas::issue(store, &qrcode_blob, &self.sas, None, now)?,
                qrcode_blob: qrcode_blob.clone(),
                unique_code: code.clone(),
                created_at: now,
                members: slides.iter().map(|s| s.image_id).collect(),
            };
            let qrcode_url = row.qrcode_sas.url(store, &qrcode_blob);
            let set_id = self
                .db
                .call(move |conn| repository::insert_slide_set(conn, &row))
                .await?;
            Ok::<_, SlidePullError>((set_id, qrcode_url))
        }
        .await;

        let (set_id, qrcode_url) = match stored {
            Ok(v) => v,
            Err(e) => {
                warn!("Slide set '{}' failed, rolling back: {}", name, e);
                ledger.rollback().await;
                return Err(e);
            }
        };

        info!(
            "Created slide set {} '{}' ({} slides, {} KB) in {}ms",
            set_id,
            name,
            page_numbers.len(),
            pdf_size_kb,
            start.elapsed().as_millis()
        );

        Ok(SlideSetSummary {
            set_id,
            name,
            slide_count: page_numbers.len(),
            pages: page_numbers,
            share_url,
            qrcode_url,
            pdf_size_kb,
        })
    }
}
