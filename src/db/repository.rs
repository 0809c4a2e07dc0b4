use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use crate::db::DatabaseError;
use crate::storage::SasToken;

// ── Row types ────────────────────────────────────────────────────────────

/// A converted deck ready to be recorded.
#[derive(Debug, Clone)]
pub struct NewDeck {
    pub deck_key: String,
    pub owner: String,
    pub original_filename: String,
    pub blob_name: String,
    pub sas: SasToken,
    pub unique_code: String,
    pub file_size_kb: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// One rendered page: its full image plus its thumbnail.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub page_number: usize,
    pub image_blob: String,
    pub image_sas: SasToken,
    pub width: u32,
    pub height: u32,
    pub thumbnail_blob: String,
    pub thumbnail_sas: SasToken,
}

#[derive(Debug, Clone)]
pub struct DeckRow {
    pub deck_id: i64,
    pub deck_key: String,
    pub owner: String,
    pub original_filename: String,
    pub blob_name: String,
    pub sas: SasToken,
    pub unique_code: String,
    pub num_slides: i64,
    pub file_size_kb: i64,
    pub download_count: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SlideRow {
    pub image_id: i64,
    pub deck_id: i64,
    pub page_number: usize,
    pub image_blob: String,
    pub image_sas: SasToken,
    pub width: u32,
    pub height: u32,
    pub thumbnail_id: i64,
    pub thumbnail_blob: String,
    pub thumbnail_sas: SasToken,
}

#[derive(Debug, Clone)]
pub struct NewSlideSet {
    pub deck_id: i64,
    pub owner: String,
    pub name: String,
    pub blob_name: String,
    pub sas: SasToken,
    pub qrcode_blob: String,
    pub qrcode_sas: SasToken,
    pub unique_code: String,
    pub created_at: DateTime<Utc>,
    /// Image ids in set order.
    pub members: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct SlideSetRow {
    pub set_id: i64,
    pub deck_id: i64,
    pub owner: String,
    pub name: String,
    pub blob_name: String,
    pub sas: SasToken,
    pub qrcode_blob: String,
    pub qrcode_sas: SasToken,
    pub unique_code: String,
    pub slide_count: i64,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
}

fn sas_at(row: &Row<'_>, token: usize, expiry: usize) -> rusqlite::Result<SasToken> {
    Ok(SasToken {
        token: row.get(token)?,
        expires_at: row.get(expiry)?,
    })
}

// ── Decks ────────────────────────────────────────────────────────────────

const DECK_COLUMNS: &str = "deck_id, deck_key, owner, original_filename, blob_name, sas_token,
     sas_token_expiry, unique_code, num_slides, file_size_kb, download_count, uploaded_at";

fn deck_from_row(row: &Row<'_>) -> rusqlite::Result<DeckRow> {
    Ok(DeckRow {
        deck_id: row.get(0)?,
        deck_key: row.get(1)?,
        owner: row.get(2)?,
        original_filename: row.get(3)?,
        blob_name: row.get(4)?,
        sas: sas_at(row, 5, 6)?,
        unique_code: row.get(7)?,
        num_slides: row.get(8)?,
        file_size_kb: row.get(9)?,
        download_count: row.get(10)?,
        uploaded_at: row.get(11)?,
    })
}

/// Insert a deck and all of its pages atomically. Returns the new deck id.
pub fn insert_deck_with_pages(
    conn: &mut Connection,
    deck: &NewDeck,
    pages: &[NewPage],
) -> Result<i64, DatabaseError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO deck (deck_key, owner, original_filename, blob_name, sas_token,
         sas_token_expiry, unique_code, num_slides, file_size_kb, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            deck.deck_key,
            deck.owner,
            deck.original_filename,
            deck.blob_name,
            deck.sas.token,
            deck.sas.expires_at,
            deck.unique_code,
            pages.len() as i64,
            deck.file_size_kb,
            deck.uploaded_at,
        ],
    )?;
    let deck_id = tx.last_insert_rowid();

    {
        let mut image_stmt = tx.prepare(
            "INSERT INTO image (deck_id, page_number, blob_name, sas_token, sas_token_expiry,
             width, height) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut thumb_stmt = tx.prepare(
            "INSERT INTO thumbnail (image_id, deck_id, blob_name, sas_token, sas_token_expiry)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for page in pages {
            image_stmt.execute(params![
                deck_id,
                page.page_number as i64,
                page.image_blob,
                page.image_sas.token,
                page.image_sas.expires_at,
                page.width,
                page.height,
            ])?;
            let image_id = tx.last_insert_rowid();
            thumb_stmt.execute(params![
                image_id,
                deck_id,
                page.thumbnail_blob,
                page.thumbnail_sas.token,
                page.thumbnail_sas.expires_at,
            ])?;
        }
    }

    tx.commit()?;
    Ok(deck_id)
}

pub fn get_deck(conn: &Connection, owner: &str, deck_id: i64) -> Result<Option<DeckRow>, DatabaseError> {
    let sql = format!("SELECT {DECK_COLUMNS} FROM deck WHERE deck_id = ?1 AND owner = ?2");
    Ok(conn
        .query_row(&sql, params![deck_id, owner], deck_from_row)
        .optional()?)
}

pub fn get_deck_by_code(conn: &Connection, code: &str) -> Result<Option<DeckRow>, DatabaseError> {
    let sql = format!("SELECT {DECK_COLUMNS} FROM deck WHERE unique_code = ?1");
    Ok(conn.query_row(&sql, params![code], deck_from_row).optional()?)
}

/// Owner's decks, newest first.
pub fn list_decks(conn: &Connection, owner: &str) -> Result<Vec<DeckRow>, DatabaseError> {
    let sql = format!(
        "SELECT {DECK_COLUMNS} FROM deck WHERE owner = ?1 ORDER BY uploaded_at DESC, deck_id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner], deck_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn increment_deck_downloads(conn: &Connection, deck_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE deck SET download_count = download_count + 1 WHERE deck_id = ?1",
        params![deck_id],
    )?;
    Ok(())
}

pub fn update_deck_sas(conn: &Connection, deck_id: i64, sas: &SasToken) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE deck SET sas_token = ?2, sas_token_expiry = ?3 WHERE deck_id = ?1",
        params![deck_id, sas.token, sas.expires_at],
    )?;
    Ok(())
}

/// Delete a deck (pages and sets cascade). Returns every blob name that
/// belonged to it, or `None` when the owner has no such deck.
pub fn delete_deck(
    conn: &mut Connection,
    owner: &str,
    deck_id: i64,
) -> Result<Option<Vec<String>>, DatabaseError> {
    let tx = conn.transaction()?;
    let deck_blob: Option<String> = tx
        .query_row(
            "SELECT blob_name FROM deck WHERE deck_id = ?1 AND owner = ?2",
            params![deck_id, owner],
            |row| row.get(0),
        )
        .optional()?;
    let Some(deck_blob) = deck_blob else {
        return Ok(None);
    };

    let mut blobs = vec![deck_blob];
    {
        let mut stmt = tx.prepare(
            "SELECT blob_name FROM image WHERE deck_id = ?1
             UNION ALL SELECT blob_name FROM thumbnail WHERE deck_id = ?1
             UNION ALL SELECT blob_name FROM slide_set WHERE deck_id = ?1
             UNION ALL SELECT qrcode_blob_name FROM slide_set WHERE deck_id = ?1",
        )?;
        let names = stmt
            .query_map(params![deck_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        blobs.extend(names);
    }

    tx.execute("DELETE FROM deck WHERE deck_id = ?1", params![deck_id])?;
    tx.commit()?;
    Ok(Some(blobs))
}

// ── Pages ────────────────────────────────────────────────────────────────

/// All pages of a deck in page order.
pub fn list_slides(conn: &Connection, deck_id: i64) -> Result<Vec<SlideRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT i.image_id, i.deck_id, i.page_number, i.blob_name, i.sas_token, i.sas_token_expiry,
                i.width, i.height, t.thumbnail_id, t.blob_name, t.sas_token, t.sas_token_expiry
         FROM image i JOIN thumbnail t ON t.image_id = i.image_id
         WHERE i.deck_id = ?1
         ORDER BY i.page_number",
    )?;
    let rows = stmt
        .query_map(params![deck_id], |row| {
            Ok(SlideRow {
                image_id: row.get(0)?,
                deck_id: row.get(1)?,
                page_number: row.get::<_, i64>(2)? as usize,
                image_blob: row.get(3)?,
                image_sas: sas_at(row, 4, 5)?,
                width: row.get(6)?,
                height: row.get(7)?,
                thumbnail_id: row.get(8)?,
                thumbnail_blob: row.get(9)?,
                thumbnail_sas: sas_at(row, 10, 11)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// The pages of `deck_id` whose image id appears in `image_ids`, in page
/// order. Ids from other decks are silently absent from the result.
pub fn get_slides(conn: &Connection, deck_id: i64, image_ids: &[i64]) -> Result<Vec<SlideRow>, DatabaseError> {
    let wanted: HashSet<i64> = image_ids.iter().copied().collect();
    Ok(list_slides(conn, deck_id)?
        .into_iter()
        .filter(|s| wanted.contains(&s.image_id))
        .collect())
}

pub fn update_image_sas(conn: &Connection, image_id: i64, sas: &SasToken) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE image SET sas_token = ?2, sas_token_expiry = ?3 WHERE image_id = ?1",
        params![image_id, sas.token, sas.expires_at],
    )?;
    Ok(())
}

pub fn update_thumbnail_sas(
    conn: &Connection,
    thumbnail_id: i64,
    sas: &SasToken,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE thumbnail SET sas_token = ?2, sas_token_expiry = ?3 WHERE thumbnail_id = ?1",
        params![thumbnail_id, sas.token, sas.expires_at],
    )?;
    Ok(())
}

// ── Slide sets ───────────────────────────────────────────────────────────

const SET_COLUMNS: &str = "set_id, deck_id, owner, name, blob_name, sas_token, sas_token_expiry,
     qrcode_blob_name, qrcode_sas_token, qrcode_sas_token_expiry, unique_code, slide_count,
     download_count, created_at";

fn set_from_row(row: &Row<'_>) -> rusqlite::Result<SlideSetRow> {
    Ok(SlideSetRow {
        set_id: row.get(0)?,
        deck_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        blob_name: row.get(4)?,
        sas: sas_at(row, 5, 6)?,
        qrcode_blob: row.get(7)?,
        qrcode_sas: sas_at(row, 8, 9)?,
        unique_code: row.get(10)?,
        slide_count: row.get(11)?,
        download_count: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Insert a set and its members atomically. Returns the new set id.
pub fn insert_slide_set(conn: &mut Connection, set: &NewSlideSet) -> Result<i64, DatabaseError> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO slide_set (deck_id, owner, name, blob_name, sas_token, sas_token_expiry,
         qrcode_blob_name, qrcode_sas_token, qrcode_sas_token_expiry, unique_code, slide_count,
         created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            set.deck_id,
            set.owner,
            set.name,
            set.blob_name,
            set.sas.token,
            set.sas.expires_at,
            set.qrcode_blob,
            set.qrcode_sas.token,
            set.qrcode_sas.expires_at,
            set.unique_code,
            set.members.len() as i64,
            set.created_at,
        ],
    )?;
    let set_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO slide_set_member (set_id, position, image_id) VALUES (?1, ?2, ?3)",
        )?;
        for (position, image_id) in set.members.iter().enumerate() {
            stmt.execute(params![set_id, position as i64, image_id])?;
        }
    }
    tx.commit()?;
    Ok(set_id)
}

pub fn get_set(conn: &Connection, owner: &str, set_id: i64) -> Result<Option<SlideSetRow>, DatabaseError> {
    let sql = format!("SELECT {SET_COLUMNS} FROM slide_set WHERE set_id = ?1 AND owner = ?2");
    Ok(conn
        .query_row(&sql, params![set_id, owner], set_from_row)
        .optional()?)
}

pub fn get_set_by_code(conn: &Connection, code: &str) -> Result<Option<SlideSetRow>, DatabaseError> {
    let sql = format!("SELECT {SET_COLUMNS} FROM slide_set WHERE unique_code = ?1");
    Ok(conn.query_row(&sql, params![code], set_from_row).optional()?)
}

/// Owner's sets, newest first.
pub fn list_sets(conn: &Connection, owner: &str) -> Result<Vec<SlideSetRow>, DatabaseError> {
    let sql = format!(
        "SELECT {SET_COLUMNS} FROM slide_set WHERE owner = ?1 ORDER BY created_at DESC, set_id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner], set_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Page numbers of a set's slides in set order.
pub fn set_member_pages(conn: &Connection, set_id: i64) -> Result<Vec<usize>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT i.page_number FROM slide_set_member m JOIN image i ON i.image_id = m.image_id
         WHERE m.set_id = ?1 ORDER BY m.position",
    )?;
    let pages = stmt
        .query_map(params![set_id], |row| row.get::<_, i64>(0))?
        .map(|r| r.map(|p| p as usize))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(pages)
}

pub fn increment_set_downloads(conn: &Connection, set_id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE slide_set SET download_count = download_count + 1 WHERE set_id = ?1",
        params![set_id],
    )?;
    Ok(())
}

pub fn update_set_sas(conn: &Connection, set_id: i64, sas: &SasToken) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE slide_set SET sas_token = ?2, sas_token_expiry = ?3 WHERE set_id = ?1",
        params![set_id, sas.token, sas.expires_at],
    )?;
    Ok(())
}

pub fn update_set_qrcode_sas(
    conn: &Connection,
    set_id: i64,
    sas: &SasToken,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE slide_set SET qrcode_sas_token = ?2, qrcode_sas_token_expiry = ?3 WHERE set_id = ?1",
        params![set_id, sas.token, sas.expires_at],
    )?;
    Ok(())
}

/// Delete a set. Returns its PDF and QR blob names, or `None` when the owner
/// has no such set.
pub fn delete_set(
    conn: &Connection,
    owner: &str,
    set_id: i64,
) -> Result<Option<Vec<String>>, DatabaseError> {
    let Some(set) = get_set(conn, owner, set_id)? else {
        return Ok(None);
    };
    conn.execute("DELETE FROM slide_set WHERE set_id = ?1", params![set_id])?;
    Ok(Some(vec![set.blob_name, set.qrcode_blob]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{Duration, TimeZone};

    fn sas(tag: &str) -> SasToken {
        SasToken {
            token: format!("sig={tag}"),
            expires_at: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn new_deck(owner: &str, key: &str, code: &str) -> NewDeck {
        NewDeck {
            deck_key: key.into(),
            owner: owner.into(),
            original_filename: "quarterly.pptx".into(),
            blob_name: format!("{owner}/pdf/quarterly_{key}.pdf"),
            sas: sas("deck"),
            unique_code: code.into(),
            file_size_kb: 42,
            uploaded_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
        }
    }

    fn pages(owner: &str, key: &str, n: usize) -> Vec<NewPage> {
        (1..=n)
            .map(|p| NewPage {
                page_number: p,
                image_blob: format!("{owner}/images/{key}/slide_{p}.png"),
                image_sas: sas("img"),
                width: 1920,
                height: 1080,
                thumbnail_blob: format!("{owner}/thumbnails/{key}/slide_{p}.png"),
                thumbnail_sas: sas("thumb"),
            })
            .collect()
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        crate::db::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn deck_round_trip_with_pages() {
        let mut conn = conn();
        let id = insert_deck_with_pages(&mut conn, &new_deck("alice", "k1", "C1"), &pages("alice", "k1", 3))
            .unwrap();

        let deck = get_deck(&conn, "alice", id).unwrap().unwrap();
        assert_eq!(deck.num_slides, 3);
        assert_eq!(deck.sas, sas("deck"));
        assert_eq!(deck.download_count, 0);

        let slides = list_slides(&conn, id).unwrap();
        assert_eq!(slides.iter().map(|s| s.page_number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(slides[1].thumbnail_blob, "alice/thumbnails/k1/slide_2.png");
    }

    #[test]
    fn get_slides_filters_to_deck_in_page_order() {
        let mut conn = conn();
        let a = insert_deck_with_pages(&mut conn, &new_deck("alice", "k1", "C1"), &pages("alice", "k1", 3))
            .unwrap();
        let b = insert_deck_with_pages(&mut conn, &new_deck("alice", "k2", "C2"), &pages("alice", "k2", 1))
            .unwrap();
        let a_slides = list_slides(&conn, a).unwrap();
        let foreign = list_slides(&conn, b).unwrap()[0].image_id;

        let picked = get_slides(&conn, a, &[a_slides[2].image_id, foreign, a_slides[0].image_id]).unwrap();
        assert_eq!(picked.iter().map(|s| s.page_number).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn decks_are_owner_scoped() {
        let mut conn = conn();
        let id = insert_deck_with_pages(&mut conn, &new_deck("alice", "k1", "C1"), &pages("alice", "k1", 1))
            .unwrap();
        assert!(get_deck(&conn, "bob", id).unwrap().is_none());
        assert!(list_decks(&conn, "bob").unwrap().is_empty());
        assert_eq!(get_deck_by_code(&conn, "C1").unwrap().unwrap().deck_id, id);
    }

    #[test]
    fn failed_page_insert_rolls_back_deck() {
        let mut conn = conn();
        let mut bad = pages("alice", "k1", 2);
        bad[1].page_number = 1; // violates UNIQUE(deck_id, page_number)
        assert!(insert_deck_with_pages(&mut conn, &new_deck("alice", "k1", "C1"), &bad).is_err());
        assert!(list_decks(&conn, "alice").unwrap().is_empty());
        let images: i64 = conn
            .query_row("SELECT COUNT(*) FROM image", [], |r| r.get(0))
            .unwrap();
        assert_eq!(images, 0);
    }

    #[test]
    fn set_lifecycle_and_download_counter() {
        let mut conn = conn();
        let deck_id =
            insert_deck_with_pages(&mut conn, &new_deck("alice", "k1", "C1"), &pages("alice", "k1", 4))
                .unwrap();
        let slides = list_slides(&conn, deck_id).unwrap();

        let set = NewSlideSet {
            deck_id,
            owner: "alice".into(),
            name: "highlights".into(),
            blob_name: "alice/sets/k1/highlights_S1.pdf".into(),
            sas: sas("set"),
            qrcode_blob: "alice/qrcodes/S1_qr.png".into(),
            qrcode_sas: sas("qr"),
            unique_code: "S1".into(),
            created_at: Utc::now(),
            members: vec![slides[3].image_id, slides[0].image_id],
        };
        let set_id = insert_slide_set(&mut conn, &set).unwrap();
        assert_eq!(set_member_pages(&conn, set_id).unwrap(), vec![4, 1]);

        increment_set_downloads(&conn, set_id).unwrap();
        increment_set_downloads(&conn, set_id).unwrap();
        let row = get_set_by_code(&conn, "S1").unwrap().unwrap();
        assert_eq!(row.download_count, 2);
        assert_eq!(row.slide_count, 2);

        let refreshed = SasToken {
            token: "sig=new".into(),
            expires_at: row.sas.expires_at + Duration::days(7),
        };
        update_set_sas(&conn, set_id, &refreshed).unwrap();
        assert_eq!(get_set(&conn, "alice", set_id).unwrap().unwrap().sas, refreshed);

        assert!(delete_set(&conn, "bob", set_id).unwrap().is_none());
        let blobs = delete_set(&conn, "alice", set_id).unwrap().unwrap();
        assert_eq!(blobs, vec!["alice/sets/k1/highlights_S1.pdf", "alice/qrcodes/S1_qr.png"]);
        assert!(list_sets(&conn, "alice").unwrap().is_empty());
    }

    #[test]
    fn delete_deck_cascades_and_returns_blobs() {
        let mut conn = conn();
        let deck_id =
            insert_deck_with_pages(&mut conn, &new_deck("alice", "k1", "C1"), &pages("alice", "k1", 2))
                .unwrap();
        let slides = list_slides(&conn, deck_id).unwrap();
        insert_slide_set(
            &mut conn,
            &NewSlideSet {
                deck_id,
                owner: "alice".into(),
                name: "one".into(),
                blob_name: "alice/sets/k1/one_S1.pdf".into(),
                sas: sas("set"),
                qrcode_blob: "alice/qrcodes/S1_qr.png".into(),
                qrcode_sas: sas("qr"),
                unique_code: "S1".into(),
                created_at: Utc::now(),
                members: vec![slides[0].image_id],
            },
        )
        .unwrap();

        let blobs = delete_deck(&mut conn, "alice", deck_id).unwrap().unwrap();
        assert_eq!(blobs.len(), 1 + 2 + 2 + 2);
        assert!(blobs.contains(&"alice/qrcodes/S1_qr.png".to_string()));

        for table in ["image", "thumbnail", "slide_set", "slide_set_member"] {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0, "{table} not emptied");
        }
    }

    #[tokio::test]
    async fn works_through_database_handle() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .call(|conn| insert_deck_with_pages(conn, &new_deck("alice", "k1", "C1"), &pages("alice", "k1", 1)))
            .await
            .unwrap();
        db.call(move |conn| increment_deck_downloads(conn, id)).await.unwrap();
        let deck = db
            .call(move |conn| get_deck(conn, "alice", id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deck.download_count, 1);
    }
}
