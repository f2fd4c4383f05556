use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::model::{DetailRecord, GenericAlternative, ListingRecord, Source};

pub fn connect(path: &str) -> StoreResult<Connection> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).map_err(|source| StoreError::Open {
        path: path.to_string(),
        source,
    })?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS medicines (
            url                 TEXT PRIMARY KEY,
            medicine_id         TEXT,
            medicine_name       TEXT NOT NULL,
            mrp                 REAL,
            pack_size_quantity  TEXT,
            selling_price       REAL,
            discount_percentage REAL,
            source              TEXT NOT NULL,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at          TEXT NOT NULL DEFAULT (datetime('now')),
            in_stock            BOOLEAN NOT NULL DEFAULT 1,
            stock_status        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_medicines_source ON medicines(source);

        -- Work queue: one row per listing url, flipped once its detail lands
        CREATE TABLE IF NOT EXISTS medicine_details (
            url        TEXT PRIMARY KEY,
            source     TEXT NOT NULL,
            scraped    BOOLEAN NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_details_pending ON medicine_details(source, scraped);

        CREATE TABLE IF NOT EXISTS medicine_scraped_details (
            medicine_url                  TEXT PRIMARY KEY,
            medicine_name                 TEXT,
            medicine_composition          TEXT,
            medicine_marketer             TEXT,
            medicine_storage              TEXT,
            medicine_mrp                  REAL,
            medicine_selling_price        REAL,
            medicine_discount             REAL,
            pack_size_information         TEXT,
            substitutes                   TEXT NOT NULL DEFAULT '[]',
            generic_alternative_available BOOLEAN NOT NULL DEFAULT 0,
            generic_alternative           TEXT,
            source                        TEXT NOT NULL,
            created_at                    TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at                    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS brand_searches (
            brand_name TEXT NOT NULL,
            source     TEXT NOT NULL,
            scraped    BOOLEAN NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (brand_name, source)
        );
        ",
    )?;
    Ok(())
}

// ── Listings ──

pub fn upsert_listing(conn: &Connection, record: &ListingRecord) -> StoreResult<()> {
    upsert_listings(conn, std::slice::from_ref(record))?;
    Ok(())
}

/// Insert or refresh listings and (re)queue each url for a detail scrape.
pub fn upsert_listings(conn: &Connection, records: &[ListingRecord]) -> StoreResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut m_stmt = tx.prepare(
            "INSERT INTO medicines
             (url, medicine_id, medicine_name, mrp, pack_size_quantity, selling_price,
              discount_percentage, source, in_stock, stock_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(url) DO UPDATE SET
                medicine_id = excluded.medicine_id,
                medicine_name = excluded.medicine_name,
                mrp = excluded.mrp,
                pack_size_quantity = excluded.pack_size_quantity,
                selling_price = excluded.selling_price,
                discount_percentage = excluded.discount_percentage,
                source = excluded.source,
                in_stock = excluded.in_stock,
                stock_status = excluded.stock_status,
                updated_at = datetime('now')",
        )?;
        let mut q_stmt = tx.prepare(
            "INSERT INTO medicine_details (url, source, scraped) VALUES (?1, ?2, 0)
             ON CONFLICT(url) DO UPDATE SET
                scraped = 0,
                source = excluded.source,
                updated_at = datetime('now')",
        )?;
        for r in records {
            count += m_stmt.execute(rusqlite::params![
                r.url,
                r.medicine_id,
                r.name,
                r.mrp,
                r.pack_size,
                r.selling_price,
                r.discount_percentage,
                r.source.label(),
                r.in_stock,
                r.stock_status,
            ])?;
            q_stmt.execute(rusqlite::params![r.url, r.source.label()])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRow {
    pub url: String,
    pub medicine_id: Option<String>,
    pub name: String,
    pub mrp: Option<f64>,
    pub pack_size: Option<String>,
    pub selling_price: Option<f64>,
    pub discount_percentage: Option<f64>,
    pub source: String,
    pub in_stock: bool,
    pub stock_status: Option<String>,
    pub updated_at: String,
}

pub fn fetch_listings(conn: &Connection, source: Option<Source>, limit: Option<usize>) -> StoreResult<Vec<ListingRow>> {
    let sql = format!(
        "SELECT url, medicine_id, medicine_name, mrp, pack_size_quantity, selling_price,
                discount_percentage, source, in_stock, stock_status, updated_at
         FROM medicines
         WHERE (?1 IS NULL OR source = ?1)
         ORDER BY source, medicine_name{}",
        limit_clause(limit)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([source.map(|s| s.label())], |row| {
            Ok(ListingRow {
                url: row.get(0)?,
                medicine_id: row.get(1)?,
                name: row.get(2)?,
                mrp: row.get(3)?,
                pack_size: row.get(4)?,
                selling_price: row.get(5)?,
                discount_percentage: row.get(6)?,
                source: row.get(7)?,
                in_stock: row.get(8)?,
                stock_status: row.get(9)?,
                updated_at: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Details ──

pub fn upsert_detail(conn: &Connection, record: &DetailRecord) -> StoreResult<()> {
    let substitutes = serde_json::to_string(&record.substitutes)?;
    let generic = record
        .generic_alternative
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO medicine_scraped_details
         (medicine_url, medicine_name, medicine_composition, medicine_marketer, medicine_storage,
          medicine_mrp, medicine_selling_price, medicine_discount, pack_size_information,
          substitutes, generic_alternative_available, generic_alternative, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(medicine_url) DO UPDATE SET
            medicine_name = excluded.medicine_name,
            medicine_composition = excluded.medicine_composition,
            medicine_marketer = excluded.medicine_marketer,
            medicine_storage = excluded.medicine_storage,
            medicine_mrp = excluded.medicine_mrp,
            medicine_selling_price = excluded.medicine_selling_price,
            medicine_discount = excluded.medicine_discount,
            pack_size_information = excluded.pack_size_information,
            substitutes = excluded.substitutes,
            generic_alternative_available = excluded.generic_alternative_available,
            generic_alternative = excluded.generic_alternative,
            source = excluded.source,
            updated_at = datetime('now')",
        rusqlite::params![
            record.medicine_url,
            record.name,
            record.composition,
            record.marketer,
            record.storage_instructions,
            record.mrp,
            record.selling_price,
            record.discount_percentage,
            record.pack_size_info,
            substitutes,
            record.generic_alternative_available,
            generic,
            record.source.label(),
        ],
    )?;
    tx.execute(
        "INSERT INTO medicine_details (url, source, scraped) VALUES (?1, ?2, 1)
         ON CONFLICT(url) DO UPDATE SET scraped = 1, updated_at = datetime('now')",
        rusqlite::params![record.medicine_url, record.source.label()],
    )?;
    tx.commit()?;
    Ok(())
}

/// A stored detail, JSON columns decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub medicine_url: String,
    pub medicine_name: Option<String>,
    pub medicine_composition: Option<String>,
    pub medicine_marketer: Option<String>,
    pub medicine_storage: Option<String>,
    pub medicine_mrp: Option<f64>,
    pub medicine_selling_price: Option<f64>,
    pub medicine_discount: Option<f64>,
    pub pack_size_information: Option<String>,
    pub substitutes: Vec<serde_json::Value>,
    pub generic_alternative_available: bool,
    pub generic_alternative: Option<GenericAlternative>,
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
}

pub fn export(conn: &Connection) -> StoreResult<Vec<DetailRow>> {
    let mut stmt = conn.prepare(
        "SELECT medicine_url, medicine_name, medicine_composition, medicine_marketer,
                medicine_storage, medicine_mrp, medicine_selling_price, medicine_discount,
                pack_size_information, substitutes, generic_alternative_available,
                generic_alternative, source, created_at, updated_at
         FROM medicine_scraped_details
         ORDER BY source, medicine_name",
    )?;
    let raw = stmt
        .query_map([], |row| {
            let substitutes: String = row.get(9)?;
            let generic: Option<String> = row.get(11)?;
            let detail = DetailRow {
                medicine_url: row.get(0)?,
                medicine_name: row.get(1)?,
                medicine_composition: row.get(2)?,
                medicine_marketer: row.get(3)?,
                medicine_storage: row.get(4)?,
                medicine_mrp: row.get(5)?,
                medicine_selling_price: row.get(6)?,
                medicine_discount: row.get(7)?,
                pack_size_information: row.get(8)?,
                substitutes: Vec::new(),
                generic_alternative_available: row.get(10)?,
                generic_alternative: None,
                source: row.get(12)?,
                created_at: row.get(13)?,
                updated_at: row.get(14)?,
            };
            Ok((detail, substitutes, generic))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(mut detail, substitutes, generic)| -> StoreResult<DetailRow> {
            detail.substitutes = serde_json::from_str(&substitutes)?;
            detail.generic_alternative = generic.as_deref().map(serde_json::from_str).transpose()?;
            Ok(detail)
        })
        .collect()
}

// ── Work queue ──

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub url: String,
    pub name: Option<String>,
    pub source: String,
}

pub fn pending(conn: &Connection, source: Option<Source>, limit: Option<usize>) -> StoreResult<Vec<PendingRow>> {
    let sql = format!(
        "SELECT d.url, m.medicine_name, d.source
         FROM medicine_details d
         LEFT JOIN medicines m ON m.url = d.url
         WHERE d.scraped = 0 AND (?1 IS NULL OR d.source = ?1)
         ORDER BY d.created_at, d.url{}",
        limit_clause(limit)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([source.map(|s| s.label())], |row| {
            Ok(PendingRow {
                url: row.get(0)?,
                name: row.get(1)?,
                source: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop listings that never got a detail, and their queue rows.
pub fn clear_pending(conn: &Connection, source: Option<Source>) -> StoreResult<usize> {
    let label = source.map(|s| s.label());
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM medicines WHERE url IN (
             SELECT url FROM medicine_details
             WHERE scraped = 0 AND (?1 IS NULL OR source = ?1)
         )",
        [label],
    )?;
    let cleared = tx.execute(
        "DELETE FROM medicine_details WHERE scraped = 0 AND (?1 IS NULL OR source = ?1)",
        [label],
    )?;
    tx.commit()?;
    Ok(cleared)
}

// ── Search status ──

fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

pub fn mark_search_done(conn: &Connection, term: &str, source: Source) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO brand_searches (brand_name, source, scraped) VALUES (?1, ?2, 1)
         ON CONFLICT(brand_name, source) DO UPDATE SET scraped = 1, updated_at = datetime('now')",
        rusqlite::params![normalize_term(term), source.label()],
    )?;
    Ok(())
}

pub fn search_done(conn: &Connection, term: &str, source: Source) -> StoreResult<bool> {
    let scraped: Option<bool> = conn
        .query_row(
            "SELECT scraped FROM brand_searches WHERE brand_name = ?1 AND source = ?2",
            rusqlite::params![normalize_term(term), source.label()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(scraped.unwrap_or(false))
}

// ── Stats ──

#[derive(Debug, Default)]
pub struct SourceStats {
    pub source: String,
    pub listings: usize,
    pub pending: usize,
    pub details: usize,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub listings: usize,
    pub pending: usize,
    pub scraped: usize,
    pub details: usize,
    pub searches: usize,
    pub with_generic: usize,
    pub per_source: Vec<SourceStats>,
}

pub fn get_stats(conn: &Connection) -> StoreResult<Stats> {
    let count = |sql: &str| -> StoreResult<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };

    let mut stmt = conn.prepare(
        "SELECT s.source,
                (SELECT COUNT(*) FROM medicines m WHERE m.source = s.source),
                (SELECT COUNT(*) FROM medicine_details d WHERE d.source = s.source AND d.scraped = 0),
                (SELECT COUNT(*) FROM medicine_scraped_details x WHERE x.source = s.source)
         FROM (SELECT source FROM medicines
               UNION SELECT source FROM medicine_details
               UNION SELECT source FROM medicine_scraped_details) s
         ORDER BY s.source",
    )?;
    let per_source = stmt
        .query_map([], |row| {
            Ok(SourceStats {
                source: row.get(0)?,
                listings: row.get(1)?,
                pending: row.get(2)?,
                details: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        listings: count("SELECT COUNT(*) FROM medicines")?,
        pending: count("SELECT COUNT(*) FROM medicine_details WHERE scraped = 0")?,
        scraped: count("SELECT COUNT(*) FROM medicine_details WHERE scraped = 1")?,
        details: count("SELECT COUNT(*) FROM medicine_scraped_details")?,
        searches: count("SELECT COUNT(*) FROM brand_searches WHERE scraped = 1")?,
        with_generic: count(
            "SELECT COUNT(*) FROM medicine_scraped_details WHERE generic_alternative_available = 1",
        )?,
        per_source,
    })
}

fn limit_clause(limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn listing(url: &str, source: Source, price: f64) -> ListingRecord {
        ListingRecord::assemble(
            url.to_string(),
            source,
            Some("1".into()),
            Some("Telma 40 Tablet".into()),
            Some(250.0),
            Some(price),
            Some(15.0),
            Some("strip of 15 tablets".into()),
            true,
        )
        .unwrap()
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = mem();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn upsert_listing_twice_keeps_latest_and_requeues() {
        let conn = mem();
        let url = "https://www.1mg.com/drugs/telma-40-tablet-12345";
        upsert_listing(&conn, &listing(url, Source::OneMg, 213.5)).unwrap();
        upsert_detail(&conn, &DetailRecord::empty(url, Source::OneMg)).unwrap();
        assert!(pending(&conn, None, None).unwrap().is_empty());

        upsert_listing(&conn, &listing(url, Source::OneMg, 199.0)).unwrap();

        let rows = fetch_listings(&conn, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].selling_price, Some(199.0));
        assert_eq!(rows[0].source, "1MG");

        let queue = pending(&conn, None, None).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].url, url);
        assert_eq!(queue[0].name.as_deref(), Some("Telma 40 Tablet"));
    }

    #[test]
    fn search_status_is_case_insensitive() {
        let conn = mem();
        assert!(!search_done(&conn, "paracetamol", Source::OneMg).unwrap());
        mark_search_done(&conn, "Paracetamol", Source::OneMg).unwrap();
        assert!(search_done(&conn, "paracetamol", Source::OneMg).unwrap());
        assert!(search_done(&conn, "  PARACETAMOL ", Source::OneMg).unwrap());
        assert!(!search_done(&conn, "paracetamol", Source::TrueMeds).unwrap());
        mark_search_done(&conn, "paracetamol", Source::OneMg).unwrap();
        assert_eq!(get_stats(&conn).unwrap().searches, 1);
    }

    #[test]
    fn pending_filters_by_source() {
        let conn = mem();
        upsert_listings(
            &conn,
            &[
                listing("https://www.1mg.com/drugs/a-1", Source::OneMg, 10.0),
                listing("https://pharmeasy.in/online-medicine-order/b-2", Source::PharmEasy, 11.0),
            ],
        )
        .unwrap();
        assert_eq!(pending(&conn, None, None).unwrap().len(), 2);
        let only = pending(&conn, Some(Source::PharmEasy), None).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].source, "PharmEasy");
        assert_eq!(pending(&conn, None, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn detail_round_trips_and_marks_scraped() {
        let conn = mem();
        let url = "https://www.1mg.com/drugs/telma-40-tablet-12345";
        upsert_listing(&conn, &listing(url, Source::OneMg, 213.5)).unwrap();

        let mut d = DetailRecord::empty(url, Source::OneMg);
        d.name = Some("Telma 40 Tablet".into());
        d.composition = Some("Telmisartan (40mg)".into());
        d.selling_price = Some(213.5);
        d.substitutes = vec![json!({"substitute_name": "Telmikind 40", "price_per_unit": 7.2})];
        d.generic_alternative_available = true;
        d.generic_alternative = Some(GenericAlternative {
            alternate_name: Some("Telmisartan 40 Tablet".into()),
            price: Some(56.5),
            ..Default::default()
        });
        upsert_detail(&conn, &d).unwrap();
        upsert_detail(&conn, &d).unwrap();

        let rows = export(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.medicine_composition.as_deref(), Some("Telmisartan (40mg)"));
        assert_eq!(row.substitutes, d.substitutes);
        assert_eq!(row.generic_alternative, d.generic_alternative);
        assert!(row.generic_alternative_available);

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.scraped, 1);
        assert_eq!(stats.details, 1);
        assert_eq!(stats.with_generic, 1);
    }

    #[test]
    fn clear_pending_only_touches_unscraped_rows_of_source() {
        let conn = mem();
        let done = "https://www.1mg.com/drugs/done-1";
        upsert_listings(
            &conn,
            &[
                listing(done, Source::OneMg, 10.0),
                listing("https://www.1mg.com/drugs/todo-2", Source::OneMg, 10.0),
                listing("https://pharmeasy.in/online-medicine-order/todo-3", Source::PharmEasy, 10.0),
            ],
        )
        .unwrap();
        upsert_detail(&conn, &DetailRecord::empty(done, Source::OneMg)).unwrap();

        assert_eq!(clear_pending(&conn, Some(Source::OneMg)).unwrap(), 1);
        let listings = fetch_listings(&conn, None, None).unwrap();
        let urls: Vec<&str> = listings.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains(&done));

        assert_eq!(clear_pending(&conn, None).unwrap(), 1);
        assert!(pending(&conn, None, None).unwrap().is_empty());
        assert_eq!(fetch_listings(&conn, None, None).unwrap().len(), 1);
    }

    #[test]
    fn stats_per_source() {
        let conn = mem();
        upsert_listings(
            &conn,
            &[
                listing("https://www.1mg.com/drugs/a-1", Source::OneMg, 10.0),
                listing("https://www.truemeds.in/medicine/b", Source::TrueMeds, 10.0),
            ],
        )
        .unwrap();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.listings, 2);
        assert_eq!(stats.pending, 2);
        let labels: Vec<&str> = stats.per_source.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(labels, vec!["1MG", "TrueMeds"]);
        assert_eq!(stats.per_source[0].pending, 1);
    }
}
