//! Pipeline-level tests: conversion, rollback, slide sets and share links,
//! run against fakes so no office suite or pdfium is needed.

mod common;

use common::{code_of, pptx_upload, FakeConverter, FakeRasterizer, Harness, BASE_URL, PPTX_BYTES};
use slidepull::storage::BlobStore;
use slidepull::{
    DeckUpload, JobStatus, LocalConverter, LocalSet, NoopProgressCallback, PageSelection,
    ProgressTracker, ServiceConfig, SetRequest, SlidePullError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Make every insert into `table` fail, as a full disk would.
async fn reject_inserts(h: &Harness, table: &'static str) {
    h.pipeline
        .database()
        .call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table}
                 BEGIN SELECT RAISE(ABORT, 'database or disk is full'); END;"
            ))?;
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn conversion_stores_every_artifact_and_reports_progress() {
    let h = Harness::new(FakeRasterizer::pages(3));
    let tracker = ProgressTracker::new();
    let job = tracker.register("alice");

    let summary = h
        .pipeline
        .convert_deck(pptx_upload("alice", "Q3 Review.pptx"), &tracker.reporter(job))
        .await
        .unwrap();

    assert_eq!(summary.page_count, 3);
    assert!(summary.stats.converted);
    assert!(summary.share_url.starts_with(&format!("{BASE_URL}/s/pdf/")));
    assert_eq!(code_of(&summary.share_url).len(), 16);
    assert!(summary.pdf_url.contains("sig="));
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 1);

    let progress = tracker.get(job).unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!((progress.current, progress.total), (3, 3));
    assert_eq!(progress.deck_id, Some(summary.deck_id));

    // 1 PDF + 3 images + 3 thumbnails
    assert_eq!(h.blob_files("alice").len(), 7);

    let slides = h.pipeline.list_slides("alice", summary.deck_id).await.unwrap();
    let pages: Vec<usize> = slides.iter().map(|s| s.page_number).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!((slides[0].width, slides[0].height), (160, 90));
}

#[tokio::test]
async fn pdf_uploads_skip_the_office_suite() {
    let h = Harness::new(FakeRasterizer::pages(2));
    let upload = DeckUpload {
        owner: "alice".into(),
        filename: "handout.pdf".into(),
        bytes: b"%PDF-1.7\n%%EOF\n".to_vec(),
    };
    let summary = h.pipeline.convert_deck(upload, &NoopProgressCallback).await.unwrap();
    assert!(!summary.stats.converted);
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_page_rolls_back_blobs_and_rows() {
    let h = Harness::new(FakeRasterizer::failing_at(4, 3));
    let tracker = ProgressTracker::new();
    let job = tracker.register("alice");

    let err = h
        .pipeline
        .convert_deck(pptx_upload("alice", "talk.pptx"), &tracker.reporter(job))
        .await
        .unwrap_err();

    assert!(matches!(err, SlidePullError::RasterisationFailed { page: 3, .. }), "got {err}");
    assert!(h.blob_files("alice").is_empty(), "left behind: {:?}", h.blob_files("alice"));
    assert!(h.pipeline.list_decks("alice").await.unwrap().is_empty());

    let progress = tracker.get(job).unwrap();
    assert_eq!(progress.status, JobStatus::Failed);
    assert!(progress.error.unwrap().contains("page 3"));
}

#[tokio::test]
async fn rejected_upload_writes_nothing() {
    let h = Harness::new(FakeRasterizer::pages(1));
    let upload = DeckUpload {
        owner: "alice".into(),
        filename: "notes.pptx".into(),
        bytes: b"just some text".to_vec(),
    };
    let err = h.pipeline.convert_deck(upload, &NoopProgressCallback).await.unwrap_err();
    assert!(matches!(err, SlidePullError::NotADeck { .. }));
    assert!(h.blob_files("alice").is_empty());
}

#[tokio::test]
async fn slide_set_is_deduplicated_ordered_and_shareable() {
    let h = Harness::new(FakeRasterizer::pages(5));
    let deck = h
        .pipeline
        .convert_deck(pptx_upload("alice", "talk.pptx"), &NoopProgressCallback)
        .await
        .unwrap();
    let slides = h.pipeline.list_slides("alice", deck.deck_id).await.unwrap();
    let id_of = |page: usize| slides[page - 1].image_id;

    let set = h
        .pipeline
        .create_slide_set(
            "alice",
            deck.deck_id,
            SetRequest {
                name: "best of!".into(),
                image_ids: vec![id_of(4), id_of(2), id_of(4)],
            },
        )
        .await
        .unwrap();

    assert_eq!(set.name, "best_of");
    assert_eq!(set.slide_count, 2);
    assert_eq!(set.pages, vec![2, 4]);
    assert!(set.share_url.starts_with(&format!("{BASE_URL}/s/set/")));
    assert!(set.pdf_size_kb > 0);

    let shared = h.pipeline.open_share("set", code_of(&set.share_url)).await.unwrap();
    assert_eq!(shared.filename, "best_of.pdf");
    assert!(shared.bytes.unwrap().starts_with(b"%PDF"));

    let listing = h.pipeline.list_decks("alice").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].download_count, 0);
    assert_eq!(listing[0].sets.len(), 1);
    assert_eq!(listing[0].sets[0].download_count, 1);
    assert_eq!(listing[0].sets[0].pages, vec![2, 4]);
}

#[tokio::test]
async fn slide_set_rejects_foreign_slides_and_decks() {
    let h = Harness::new(FakeRasterizer::pages(2));
    let a = h
        .pipeline
        .convert_deck(pptx_upload("alice", "a.pptx"), &NoopProgressCallback)
        .await
        .unwrap();
    let b = h
        .pipeline
        .convert_deck(pptx_upload("alice", "b.pptx"), &NoopProgressCallback)
        .await
        .unwrap();
    let other_slide = h.pipeline.list_slides("alice", b.deck_id).await.unwrap()[0].image_id;

    let request = |ids: Vec<i64>| SetRequest {
        name: "mix".into(),
        image_ids: ids,
    };

    let err = h
        .pipeline
        .create_slide_set("alice", a.deck_id, request(vec![other_slide]))
        .await
        .unwrap_err();
    assert!(matches!(err, SlidePullError::InvalidSelection(_)), "got {err}");

    let err = h
        .pipeline
        .create_slide_set("alice", a.deck_id, request(vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, SlidePullError::InvalidSelection(_)));

    let err = h
        .pipeline
        .create_slide_set("mallory", a.deck_id, request(vec![other_slide]))
        .await
        .unwrap_err();
    assert!(matches!(err, SlidePullError::DeckNotFound));

    // Nothing beyond the two decks was written.
    assert!(h.blob_files("alice").iter().all(|p| !p.to_string_lossy().contains("/sets/")));
}

#[tokio::test]
async fn deck_share_link_counts_downloads() {
    let h = Harness::new(FakeRasterizer::pages(1));
    let deck = h
        .pipeline
        .convert_deck(pptx_upload("alice", "Q3 Review.pptx"), &NoopProgressCallback)
        .await
        .unwrap();

    let code = code_of(&deck.share_url);
    for _ in 0..2 {
        let file = h.pipeline.open_share("pdf", code).await.unwrap();
        assert!(file.filename.ends_with(".pdf"));
        assert!(file.bytes.is_some());
    }
    // Owner downloads are not counted.
    h.pipeline.download_deck("alice", deck.deck_id).await.unwrap();

    let listing = h.pipeline.list_decks("alice").await.unwrap();
    assert_eq!(listing[0].download_count, 2);
}

#[tokio::test]
async fn share_link_errors() {
    let h = Harness::new(FakeRasterizer::pages(1));
    assert!(matches!(
        h.pipeline.open_share("zip", "abc").await,
        Err(SlidePullError::InvalidLinkKind(_))
    ));
    assert!(matches!(
        h.pipeline.open_share("pdf", "missing").await,
        Err(SlidePullError::DeckNotFound)
    ));
    assert!(matches!(
        h.pipeline.open_share("set", "missing").await,
        Err(SlidePullError::SetNotFound)
    ));
}

#[tokio::test]
async fn missing_blobs_fall_back_or_fail_per_link_kind() {
    let h = Harness::new(FakeRasterizer::pages(2));
    let deck = h
        .pipeline
        .convert_deck(pptx_upload("alice", "talk.pptx"), &NoopProgressCallback)
        .await
        .unwrap();
    let first = h.pipeline.list_slides("alice", deck.deck_id).await.unwrap()[0].image_id;
    let set = h
        .pipeline
        .create_slide_set(
            "alice",
            deck.deck_id,
            SetRequest {
                name: "one".into(),
                image_ids: vec![first],
            },
        )
        .await
        .unwrap();

    for path in h.blob_files("alice") {
        let name = path.strip_prefix(h.dir.path()).unwrap().to_string_lossy().into_owned();
        if name.contains("/pdf/") || name.contains("/sets/") {
            h.store.delete(&name).await.unwrap();
        }
    }

    let deck_file = h.pipeline.open_share("pdf", code_of(&deck.share_url)).await.unwrap();
    assert!(deck_file.bytes.is_none());
    assert!(deck_file.fallback_url.contains("sig="));

    assert!(matches!(
        h.pipeline.open_share("set", code_of(&set.share_url)).await,
        Err(SlidePullError::SetPdfMissing)
    ));
}

#[tokio::test]
async fn deleting_a_deck_removes_its_sets_and_blobs() {
    let h = Harness::new(FakeRasterizer::pages(2));
    let deck = h
        .pipeline
        .convert_deck(pptx_upload("alice", "talk.pptx"), &NoopProgressCallback)
        .await
        .unwrap();
    let first = h.pipeline.list_slides("alice", deck.deck_id).await.unwrap()[0].image_id;
    let set = h
        .pipeline
        .create_slide_set(
            "alice",
            deck.deck_id,
            SetRequest {
                name: "one".into(),
                image_ids: vec![first],
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        h.pipeline.delete_deck("mallory", deck.deck_id).await,
        Err(SlidePullError::DeckNotFound)
    ));
    h.pipeline.delete_deck("alice", deck.deck_id).await.unwrap();

    assert!(h.blob_files("alice").is_empty());
    assert!(h.pipeline.list_decks("alice").await.unwrap().is_empty());
    assert!(matches!(
        h.pipeline.open_share("set", code_of(&set.share_url)).await,
        Err(SlidePullError::SetNotFound)
    ));
    assert!(matches!(
        h.pipeline.delete_set("alice", set.set_id).await,
        Err(SlidePullError::SetNotFound)
    ));
}

#[tokio::test]
async fn failed_deck_insert_rolls_back_every_blob() {
    let h = Harness::new(FakeRasterizer::pages(3));
    reject_inserts(&h, "deck").await;
    let tracker = ProgressTracker::new();
    let job = tracker.register("alice");

    let err = h
        .pipeline
        .convert_deck(pptx_upload("alice", "talk.pptx"), &tracker.reporter(job))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("disk is full"), "got {err}");
    assert!(h.blob_files("alice").is_empty(), "left behind: {:?}", h.blob_files("alice"));
    assert!(h.pipeline.list_decks("alice").await.unwrap().is_empty());
    assert_eq!(tracker.get(job).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn failed_set_insert_rolls_back_set_blobs_only() {
    let h = Harness::new(FakeRasterizer::pages(3));
    let deck = h
        .pipeline
        .convert_deck(pptx_upload("alice", "talk.pptx"), &NoopProgressCallback)
        .await
        .unwrap();
    let slides = h.pipeline.list_slides("alice", deck.deck_id).await.unwrap();
    let deck_blobs = h.blob_files("alice");
    reject_inserts(&h, "slide_set").await;

    let err = h
        .pipeline
        .create_slide_set(
            "alice",
            deck.deck_id,
            SetRequest {
                name: "picks".into(),
                image_ids: vec![slides[0].image_id, slides[2].image_id],
            },
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("disk is full"), "got {err}");
    assert_eq!(h.blob_files("alice"), deck_blobs);
    let listing = h.pipeline.list_decks("alice").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert!(listing[0].sets.is_empty());
}

#[tokio::test]
async fn cancelled_conversion_rolls_back_mid_deck() {
    let h = Harness::new(FakeRasterizer::slow(4, Duration::from_millis(200)));
    let tracker = ProgressTracker::new();
    let job = tracker.register("alice");
    let cancel = CancellationToken::new();

    let pipeline = h.pipeline.clone();
    let reporter = tracker.reporter(job);
    let token = cancel.clone();
    let running = tokio::spawn(async move {
        pipeline
            .convert_deck_until(pptx_upload("alice", "talk.pptx"), &reporter, &token)
            .await
    });

    for _ in 0..200 {
        if tracker.get(job).unwrap().current >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(tracker.get(job).unwrap().current >= 1, "no page was stored");
    cancel.cancel();

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, SlidePullError::Cancelled), "got {err}");
    assert!(h.blob_files("alice").is_empty(), "left behind: {:?}", h.blob_files("alice"));
    assert!(h.pipeline.list_decks("alice").await.unwrap().is_empty());

    let progress = tracker.get(job).unwrap();
    assert_eq!(progress.status, JobStatus::Failed);
    assert!(progress.error.unwrap().contains("shutting down"));
}

#[tokio::test]
async fn local_conversion_keeps_deck_and_set_apart() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("talk.pptx");
    std::fs::write(&input, PPTX_BYTES).unwrap();
    let out = dir.path().join("out");

    let config = ServiceConfig::builder().public_base_url(BASE_URL).build().unwrap();
    let converter = Arc::new(FakeConverter::default());
    let local = LocalConverter::new(config)
        .with_converter(converter.clone())
        .with_rasterizer(Arc::new(FakeRasterizer::pages(3)));
    // Same name as the deck stem.
    let set = LocalSet {
        name: "talk".into(),
        selection: PageSelection::Set(vec![3, 1]),
    };

    let output = local
        .convert(&input, &out, Some(&set), &NoopProgressCallback)
        .await
        .unwrap();

    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.stats.page_count, 3);
    assert_eq!(output.image_paths.len(), 3);
    assert!(output.image_paths.iter().chain(&output.thumbnail_paths).all(|p| p.is_file()));

    assert_eq!(output.pdf_path, out.join("talk.pdf"));
    assert_eq!(std::fs::read(&output.pdf_path).unwrap(), b"%PDF-1.4\n% placeholder\n");

    let set_pdf = output.set_pdf_path.unwrap();
    assert_eq!(set_pdf, out.join("sets").join("talk.pdf"));
    let doc = lopdf::Document::load(&set_pdf).unwrap();
    assert_eq!(doc.get_pages().len(), 2);

    let qr = output.qrcode_path.unwrap();
    assert_eq!(qr, out.join("sets").join("talk_qr.png"));
    assert!(std::fs::read(&qr).unwrap().starts_with(b"\x89PNG"));
}
