mod checkpoint;
mod client;
mod crawl;
mod db;
mod export;
mod fetcher;
mod impute;
mod normalize;
mod parser;
mod record;
mod settings;
mod stats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::checkpoint::{FailureLog, Ledger};
use crate::client::HttpSource;
use crate::crawl::Crawler;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "guland_scraper", about = "guland.vn listing crawler and dataset builder")]
struct Cli {
    /// Settings file (default: ./guland.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every partition not yet in the checkpoint ledger
    Crawl {
        /// Only these province slugs (comma separated)
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,
        /// Only these property type slugs (comma separated)
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<String>>,
        /// Concurrent detail fetches per index page
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Union partition tables, impute from descriptions, write the typed dataset
    Normalize,
    /// Descriptive statistics over the normalized dataset
    Stats,
    /// Write the public CSV (no URLs or images)
    Export {
        /// Output file (default: <output_dir>/guland_public.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Checkpoint, failure and table counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Crawl {
            regions,
            categories,
            workers,
        } => {
            if let Some(r) = regions {
                settings.regions = r;
            }
            if let Some(c) = categories {
                settings.categories = c;
            }
            if let Some(w) = workers {
                settings.workers = w;
            }

            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let source = Arc::new(HttpSource::new(&settings).context("Failed to build HTTP client")?);
            let mut crawler = Crawler::new(source, &settings, &conn)?;
            let s = crawler.run().await?;
            println!(
                "Done: {} partitions ({} skipped, {} completed, {} failed), {} listings stored.",
                s.partitions, s.skipped, s.completed, s.failed, s.records
            );
            Ok(())
        }
        Commands::Normalize => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;

            let (rows, qc) = db::union_partitions(&conn)?;
            for q in &qc {
                info!(
                    table = %q.table,
                    rows = q.rows,
                    missing = q.missing,
                    empty = q.is_empty(),
                    "QC"
                );
            }
            db::save_qc_report(&conn, &qc)?;
            if rows.is_empty() {
                println!("No crawled listings. Run 'crawl' first.");
                return Ok(());
            }

            println!("Normalizing {} listings from {} tables...", rows.len(), qc.len());
            let (records, report) = normalize::normalize_all(rows);
            let saved = db::replace_normalized(&conn, &records)?;
            println!(
                "Saved {} of {} listings ({} dropped without a usable price).",
                saved,
                report.input,
                report.input - report.kept
            );
            println!("\n{:<12} | {:>8}", "Filled", "Rows");
            println!("{}", "-".repeat(23));
            for attr in normalize::Attribute::ALL {
                println!("{:<12} | {:>8}", attr.name(), report.filled(attr));
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let records = db::fetch_normalized(&conn)?;
            if records.is_empty() {
                println!("Normalized dataset is empty. Run 'normalize' first.");
                return Ok(());
            }
            print!("{}", stats::summarize(&records));
            Ok(())
        }
        Commands::Export { output } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let records = db::fetch_normalized(&conn)?;
            let path = output.unwrap_or_else(|| settings.output_dir.join("guland_public.csv"));
            let n = export::export_public(&records, &path)?;
            println!("Wrote {} rows to {}", n, path.display());
            Ok(())
        }
        Commands::Status => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let ledger = Ledger::open(&settings.ledger_path())?;
            let failures = FailureLog::new(&settings.failure_log_path()).count()?;
            let total = settings.regions.len() * settings.categories.len();

            println!("Partitions: {}/{} checkpointed", ledger.len(), total);
            println!("Failures:   {}", failures);
            println!("\n{:<28} | {:>8}", "Table", "Rows");
            println!("{}", "-".repeat(39));
            for (table, n) in db::table_counts(&conn)? {
                println!("{:<28} | {:>8}", table, n);
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
