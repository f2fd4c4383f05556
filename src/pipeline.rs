use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::adapters::SourceAdapter;
use crate::db::{self, PendingRow};
use crate::model::DetailRecord;

#[derive(Debug, Default, PartialEq)]
pub struct SearchReport {
    pub term: String,
    pub skipped: bool,
    pub listings: usize,
    pub details: usize,
    /// Inline details that could not be written; they stay pending.
    pub detail_errors: usize,
    /// Set when the search as a whole failed to persist.
    pub error: Option<String>,
}

/// Search one term on one source and persist what comes back.
///
/// A term already searched on that source is skipped unless `force` is set.
/// The search is only recorded as done when it produced listings and every
/// write succeeded, so a blocked fetch or a failed write is retried on the
/// next run. A detail that fails to save is logged and skipped.
pub async fn run_search(
    conn: &Connection,
    adapter: &dyn SourceAdapter,
    term: &str,
    max_results: usize,
    force: bool,
) -> Result<SearchReport> {
    let source = adapter.source();
    let mut report = SearchReport {
        term: term.trim().to_string(),
        ..Default::default()
    };

    if !force && db::search_done(conn, term, source)? {
        info!(source = %source, term, "already searched, skipping");
        report.skipped = true;
        return Ok(report);
    }

    let outcome = adapter.search(term, max_results).await;
    if outcome.is_empty() {
        warn!(source = %source, term, "search returned no products");
        return Ok(report);
    }

    report.listings = db::upsert_listings(conn, &outcome.listings)
        .with_context(|| format!("saving listings for '{}'", term))?;
    for detail in &outcome.details {
        match db::upsert_detail(conn, detail) {
            Ok(()) => report.details += 1,
            Err(e) => {
                warn!(url = %detail.medicine_url, error = %e, "could not save detail");
                report.detail_errors += 1;
            }
        }
    }
    if report.detail_errors == 0 {
        db::mark_search_done(conn, term, source)?;
    }
    Ok(report)
}

/// Run [`run_search`] for each term in order. Blank terms are ignored, and a
/// term that fails is reported without stopping the rest.
pub async fn run_brands(
    conn: &Connection,
    adapter: &dyn SourceAdapter,
    terms: &[String],
    max_results: usize,
    force: bool,
) -> Vec<SearchReport> {
    let mut reports = Vec::new();
    for term in terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        match run_search(conn, adapter, term, max_results, force).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(source = %adapter.source(), term, error = %reason, "search failed");
                reports.push(SearchReport {
                    term: term.to_string(),
                    error: Some(reason),
                    ..Default::default()
                });
            }
        }
    }
    reports
}

#[derive(Debug, Default, PartialEq)]
pub struct DetailStats {
    pub total: usize,
    pub ok: usize,
    pub empty: usize,
    pub errors: usize,
}

enum DetailResult {
    Scraped(DetailRecord),
    Empty(String),
    Failed(String, String),
}

/// Scrape detail pages for pending items with bounded parallelism.
///
/// Workers only fetch and parse; every write happens in the receiving loop
/// below, on the caller's connection. An item that fails or yields nothing
/// stays pending.
pub async fn run_details(
    conn: &Connection,
    adapter: Arc<dyn SourceAdapter>,
    items: Vec<PendingRow>,
    concurrency: usize,
) -> Result<DetailStats> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = items.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<DetailResult>(concurrency * 2);

    for item in items {
        let adapter = Arc::clone(&adapter);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = match adapter.detail(&item.url).await {
                Ok(Some(record)) => DetailResult::Scraped(record),
                Ok(None) => DetailResult::Empty(item.url),
                Err(e) => DetailResult::Failed(item.url, e.to_string()),
            };
            let _ = tx.send(result).await;
        });
    }

    // rx closes once every task has dropped its sender
    drop(tx);

    let mut stats = DetailStats {
        total,
        ..Default::default()
    };

    while let Some(result) = rx.recv().await {
        match result {
            DetailResult::Scraped(record) => match db::upsert_detail(conn, &record) {
                Ok(()) => {
                    debug!(url = %record.medicine_url, "detail saved");
                    stats.ok += 1;
                }
                Err(e) => {
                    warn!(url = %record.medicine_url, error = %e, "could not save detail");
                    stats.errors += 1;
                }
            },
            DetailResult::Empty(url) => {
                warn!(url = %url, "detail page had nothing usable");
                stats.empty += 1;
            }
            DetailResult::Failed(url, reason) => {
                warn!(url = %url, error = %reason, "detail fetch failed");
                stats.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Scraped {} details ({} ok, {} empty, {} errors)",
        stats.total, stats.ok, stats.empty, stats.errors
    );
    Ok(stats)
}
