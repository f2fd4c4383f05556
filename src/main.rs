mod adapters;
mod db;
mod error;
mod export;
mod extract;
mod fetch;
mod model;
mod pipeline;
mod settings;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::adapters::{site, Channel, SiteAdapter, SourceAdapter};
use crate::export::{ExportFilter, Format};
use crate::fetch::HttpFetcher;
use crate::model::Source;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "rx_scraper", about = "Pharmacy product scraper (1mg, PharmEasy, PlatinumRx, TrueMeds)")]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    /// SQLite file (default from config)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Search one term on one source
    Search {
        term: String,
        #[command(flatten)]
        opts: SearchOpts,
    },
    /// Search every non-empty line of a brand list file
    Brands {
        #[arg(short, long)]
        file: String,
        #[command(flatten)]
        opts: SearchOpts,
    },
    /// Scrape detail pages for pending items
    Detail {
        #[arg(short, long)]
        source: Source,
        /// Max items to scrape (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Listings table
    Listings {
        #[arg(short, long)]
        source: Option<Source>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// List items waiting for a detail scrape
    Pending {
        #[arg(short, long)]
        source: Option<Source>,
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Drop the pending queue (all sources unless one is given)
    ClearPending {
        #[arg(short, long)]
        source: Option<Source>,
    },
    /// Dump scraped details to CSV or JSON lines
    Export {
        #[arg(short, long, value_enum, default_value = "csv")]
        format: Format,
        /// Output file (default: scraped_data_<timestamp>.<ext>)
        #[arg(short, long)]
        out: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show database statistics
    Stats,
}

#[derive(Args)]
struct SearchOpts {
    #[arg(short, long)]
    source: Source,
    /// Max products per search (default from config)
    #[arg(short = 'n', long)]
    limit: Option<usize>,
    /// Channel to scrape through (default depends on the source)
    #[arg(long, value_enum)]
    via: Option<Channel>,
    /// Search again even if the term was already done
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct FilterArgs {
    /// Substring of name or composition
    #[arg(long)]
    search: Option<String>,
    #[arg(long = "source")]
    sources: Vec<Source>,
    #[arg(long = "marketer")]
    marketers: Vec<String>,
    /// Only rows with (true) or without (false) a generic alternative
    #[arg(long)]
    generic: Option<bool>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    min_discount: Option<f64>,
    #[arg(long)]
    max_discount: Option<f64>,
}

impl From<FilterArgs> for ExportFilter {
    fn from(a: FilterArgs) -> Self {
        ExportFilter {
            text: a.search,
            sources: a.sources,
            marketers: a.marketers,
            generic: a.generic,
            min_price: a.min_price,
            max_price: a.max_price,
            min_discount: a.min_discount,
            max_discount: a.max_discount,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let mut settings = Settings::load().context("loading settings")?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    info!(db = %settings.db_path, concurrency = settings.concurrency, "settings loaded");

    let t0 = Instant::now();
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Init => {
            println!("Schema ready at {}", settings.db_path);
            Ok(())
        }
        Commands::Search { term, opts } => {
            let adapter = build_adapter(&settings, opts.source, opts.via)?;
            let limit = opts.limit.unwrap_or(settings.default_limit);
            let r = pipeline::run_search(&conn, &adapter, &term, limit, opts.force).await?;
            print_report(&r);
            Ok(())
        }
        Commands::Brands { file, opts } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file))?;
            let terms: Vec<String> = text.lines().map(str::to_string).collect();
            let adapter = build_adapter(&settings, opts.source, opts.via)?;
            let limit = opts.limit.unwrap_or(settings.default_limit);
            let reports = pipeline::run_brands(&conn, &adapter, &terms, limit, opts.force).await;
            for r in &reports {
                print_report(r);
            }
            let total: usize = reports.iter().map(|r| r.listings).sum();
            let failed = reports.iter().filter(|r| r.error.is_some()).count();
            println!("\n{} terms ({} failed), {} listings saved", reports.len(), failed, total);
            Ok(())
        }
        Commands::Detail { source, limit, concurrency } => {
            let adapter = build_adapter(&settings, source, None)?;
            if !adapter.supports_detail() {
                println!("{} has no detail pass; its searches already store details.", source);
                return Ok(());
            }
            let items = db::pending(&conn, Some(source), limit)?;
            if items.is_empty() {
                println!("No pending {} items. Run 'search' first.", source);
                return Ok(());
            }
            println!("Scraping {} detail pages...", items.len());
            let concurrency = concurrency.unwrap_or(settings.concurrency);
            let stats = pipeline::run_details(&conn, Arc::new(adapter), items, concurrency).await?;
            println!(
                "Done: {} items ({} ok, {} empty, {} errors).",
                stats.total, stats.ok, stats.empty, stats.errors
            );
            Ok(())
        }
        Commands::Listings { source, limit } => {
            let rows = db::fetch_listings(&conn, source, Some(limit))?;
            if rows.is_empty() {
                println!("No listings found.");
                return Ok(());
            }
            println!(
                "{:>3} | {:<32} | {:<10} | {:>8} | {:>8} | {:>5} | {:<20} | {:<12}",
                "#", "Name", "Source", "Price", "MRP", "Off%", "Pack", "Stock"
            );
            println!("{}", "-".repeat(120));
            let money = |v: Option<f64>| v.map(|n| format!("{:.2}", n)).unwrap_or_else(|| "-".into());
            for (i, r) in rows.iter().enumerate() {
                let off = r.discount_percentage.map(|d| format!("{:.0}", d)).unwrap_or_else(|| "-".into());
                println!(
                    "{:>3} | {:<32} | {:<10} | {:>8} | {:>8} | {:>5} | {:<20} | {:<12}",
                    i + 1,
                    truncate(&r.name, 32),
                    r.source,
                    money(r.selling_price),
                    money(r.mrp),
                    off,
                    truncate(r.pack_size.as_deref().unwrap_or("-"), 20),
                    r.stock_status.as_deref().unwrap_or("-"),
                );
            }
            println!("\n{} listings", rows.len());
            Ok(())
        }
        Commands::Pending { source, limit } => {
            let rows = db::pending(&conn, source, Some(limit))?;
            if rows.is_empty() {
                println!("Nothing pending.");
                return Ok(());
            }
            println!("{:>3} | {:<10} | {:<32} | {}", "#", "Source", "Name", "URL");
            println!("{}", "-".repeat(100));
            for (i, r) in rows.iter().enumerate() {
                let name = truncate(r.name.as_deref().unwrap_or("-"), 32);
                println!("{:>3} | {:<10} | {:<32} | {}", i + 1, r.source, name, r.url);
            }
            Ok(())
        }
        Commands::ClearPending { source } => {
            let n = db::clear_pending(&conn, source)?;
            println!("Cleared {} pending items.", n);
            Ok(())
        }
        Commands::Export { format, out, filter } => {
            let rows = db::export(&conn)?;
            let filter = ExportFilter::from(filter);
            let selected = filter.apply(&rows);
            let path = out.unwrap_or_else(|| export::default_file_name(format, chrono::Local::now()));
            let writer = BufWriter::new(File::create(&path).with_context(|| format!("creating {}", path))?);
            match format {
                Format::Csv => export::write_csv(writer, &selected)?,
                Format::Jsonl => export::write_jsonl(writer, &selected)?,
            }
            println!("Exported {} of {} rows to {}", selected.len(), rows.len(), path);
            Ok(())
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Listings:  {}", s.listings);
            println!("Pending:   {}", s.pending);
            println!("Scraped:   {}", s.scraped);
            println!("Details:   {}", s.details);
            println!("Generic:   {}", s.with_generic);
            println!("Searches:  {}", s.searches);
            if !s.per_source.is_empty() {
                println!("\n{:<10} | {:>8} | {:>7} | {:>7}", "Source", "Listings", "Pending", "Details");
                for p in &s.per_source {
                    println!("{:<10} | {:>8} | {:>7} | {:>7}", p.source, p.listings, p.pending, p.details);
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_adapter(settings: &Settings, source: Source, via: Option<Channel>) -> anyhow::Result<SiteAdapter> {
    let fetcher = HttpFetcher::new(settings.timeout(), &settings.user_agent)?;
    Ok(SiteAdapter::new(site(source, via)?, Arc::new(fetcher)))
}

fn print_report(r: &pipeline::SearchReport) {
    if let Some(err) = &r.error {
        println!("'{}': failed: {}", r.term, err);
    } else if r.skipped {
        println!("'{}': already searched (use --force to repeat)", r.term);
    } else if r.detail_errors > 0 {
        println!(
            "'{}': {} listings, {} details ({} not saved, will retry)",
            r.term, r.listings, r.details, r.detail_errors
        );
    } else {
        println!("'{}': {} listings, {} details", r.term, r.listings, r.details);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
