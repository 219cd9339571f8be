//! Sequential partition loop: skip what the ledger already holds, paginate
//! the rest, store each partition, then checkpoint it.

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::checkpoint::{FailureLog, Ledger};
use crate::client::PageSource;
use crate::db;
use crate::fetcher::{self, FetchOptions};
use crate::parser::index;
use crate::record::{ListingRecord, PartitionKey};
use crate::settings::Settings;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub partitions: usize,
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub records: usize,
}

struct PartitionOutcome {
    pages: u32,
    stored: usize,
    /// Why pagination ended early, if an index request failed.
    stopped: Option<String>,
}

/// Every region × category pair, regions outermost, in configured order.
pub fn iterate_partitions(regions: &[String], categories: &[String]) -> Vec<PartitionKey> {
    regions
        .iter()
        .flat_map(|r| categories.iter().map(move |c| PartitionKey::new(r, c)))
        .collect()
}

pub struct Crawler<'a, S> {
    source: Arc<S>,
    settings: &'a Settings,
    conn: &'a Connection,
    ledger: Ledger,
    failures: FailureLog,
}

impl<'a, S: PageSource> Crawler<'a, S> {
    pub fn new(source: Arc<S>, settings: &'a Settings, conn: &'a Connection) -> Result<Self> {
        Ok(Self {
            source,
            settings,
            conn,
            ledger: Ledger::open(&settings.ledger_path())?,
            failures: FailureLog::new(&settings.failure_log_path()),
        })
    }

    pub fn should_skip(&self, key: &PartitionKey) -> bool {
        self.ledger.contains(key)
    }

    /// Crawl every unfinished partition. Partition failures are logged and
    /// the loop moves on; failing to write the ledger or the failure log
    /// ends the run.
    pub async fn run(&mut self) -> Result<CrawlSummary> {
        let partitions = iterate_partitions(&self.settings.regions, &self.settings.categories);
        let mut summary = CrawlSummary {
            partitions: partitions.len(),
            ..CrawlSummary::default()
        };
        info!(
            "{} partitions, {} already done",
            partitions.len(),
            self.ledger.len()
        );

        for key in &partitions {
            if self.should_skip(key) {
                debug!(partition = %key, "Already checkpointed");
                summary.skipped += 1;
                continue;
            }

            match self.crawl_partition(key).await {
                Ok(outcome) => {
                    if let Some(reason) = &outcome.stopped {
                        self.failures.record(key, reason)?;
                    }
                    self.ledger.record(key)?;
                    info!(
                        partition = %key,
                        pages = outcome.pages,
                        records = outcome.stored,
                        "Partition done"
                    );
                    summary.completed += 1;
                    summary.records += outcome.stored;
                }
                Err(e) => {
                    warn!(partition = %key, error = %format!("{:#}", e), "Partition failed");
                    self.failures.record(key, &format!("{:#}", e))?;
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn crawl_partition(&self, key: &PartitionKey) -> Result<PartitionOutcome> {
        let base = &self.settings.base_url;
        let opts = FetchOptions {
            workers: self.settings.workers,
            timeout: self.settings.detail_timeout(),
        };

        let mut records: Vec<ListingRecord> = Vec::new();
        let mut stopped = None;
        let mut page = 1;

        loop {
            let url = index::index_url(base, key, page);
            let html = match self.source.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(partition = %key, page, error = %e, "Index page failed");
                    stopped = Some(format!("page {}: {}", page, e));
                    break;
                }
            };

            let refs = index::parse_listing_refs(&html, base, key);
            if refs.is_empty() {
                debug!(partition = %key, page, "No listings, end of catalog");
                break;
            }

            let last_page = refs.len() < self.settings.cutoff_count;
            let label = format!("{} p{}", key, page);
            records.extend(fetcher::fetch_batch(&self.source, refs, &opts, &label).await);

            if last_page {
                break;
            }
            page += 1;
            tokio::time::sleep(self.settings.page_delay()).await;
        }

        let stored = db::append_partition(self.conn, &key.region, &records)
            .with_context(|| format!("Failed to store {}", key))?;

        Ok(PartitionOutcome {
            pages: page,
            stored,
            stopped,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::fetcher::testing::*;

    const BASE: &str = "https://guland.vn";

    fn settings(dir: &Path, regions: &[&str], categories: &[&str]) -> Settings {
        Settings {
            base_url: BASE.into(),
            user_agent: "test".into(),
            workers: 4,
            page_delay_ms: 0,
            detail_timeout_secs: 5,
            cutoff_count: 45,
            output_dir: dir.to_path_buf(),
            db_path: dir.join("guland.sqlite"),
            regions: regions.iter().map(|s| s.to_string()).collect(),
            categories: categories.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn detail_urls(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}/bds/{}-{}", BASE, prefix, i)).collect()
    }

    fn page_url(key: &PartitionKey, page: u32) -> String {
        index::index_url(BASE, key, page)
    }

    fn row_count(conn: &Connection, table: &str) -> usize {
        db::fetch_table(conn, table).unwrap().len()
    }

    #[test]
    fn partitions_in_configured_order() {
        let regions = vec!["soc-trang".to_string(), "ha-noi".to_string()];
        let categories = vec!["dat-tho-cu".to_string(), "van-phong".to_string()];
        let keys: Vec<String> = iterate_partitions(&regions, &categories)
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "soc-trang|dat-tho-cu",
                "soc-trang|van-phong",
                "ha-noi|dat-tho-cu",
                "ha-noi|van-phong"
            ]
        );
    }

    #[tokio::test]
    async fn checkpointed_partitions_make_no_requests() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["ha-noi", "ca-mau"], &["dat-tho-cu"]);
        let mut ledger = Ledger::open(&s.ledger_path()).unwrap();
        for key in iterate_partitions(&s.regions, &s.categories) {
            ledger.record(&key).unwrap();
        }

        let conn = db::connect(&s.db_path).unwrap();
        let site = Arc::new(FakeSite::default());
        let mut crawler = Crawler::new(Arc::clone(&site), &s, &conn).unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.completed, 0);
        assert_eq!(site.request_count(), 0);
    }

    #[tokio::test]
    async fn short_page_ends_partition_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["ha-noi"], &["dat-tho-cu"]);
        let key = PartitionKey::new("ha-noi", "dat-tho-cu");
        let urls = detail_urls("hn", 3);

        let mut site = FakeSite::default().with(&page_url(&key, 1), Reply::Page(index_html(&urls)));
        for (i, u) in urls.iter().enumerate() {
            site = site.with(u, Reply::Page(detail_html(&format!("Nhà {}", i), "3 tỷ")));
        }
        let site = Arc::new(site);

        let conn = db::connect(&s.db_path).unwrap();
        let mut crawler = Crawler::new(Arc::clone(&site), &s, &conn).unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.records, 3);
        // one index page plus three details; page 2 is never requested
        assert_eq!(site.request_count(), 4);
        assert_eq!(row_count(&conn, "raw_ha_noi"), 3);
        assert!(Ledger::open(&s.ledger_path()).unwrap().contains(&key));
    }

    #[tokio::test]
    async fn paginates_until_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), &["ca-mau"], &["phong-tro"]);
        s.cutoff_count = 2;
        let key = PartitionKey::new("ca-mau", "phong-tro");
        let first = detail_urls("p1", 2);
        let second = detail_urls("p2", 2);

        let mut site = FakeSite::default()
            .with(&page_url(&key, 1), Reply::Page(index_html(&first)))
            .with(&page_url(&key, 2), Reply::Page(index_html(&second)))
            .with(&page_url(&key, 3), Reply::Page(index_html(&[])));
        for u in first.iter().chain(&second) {
            site = site.with(u, Reply::Page(detail_html("Phòng trọ", "3 triệu")));
        }
        let site = Arc::new(site);

        let conn = db::connect(&s.db_path).unwrap();
        let summary = Crawler::new(Arc::clone(&site), &s, &conn)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(summary.records, 4);
        assert_eq!(site.request_count(), 3 + 4);
        assert_eq!(row_count(&conn, "raw_ca_mau"), 4);
    }

    #[tokio::test]
    async fn slow_details_are_dropped_from_partition() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), &["ha-noi"], &["van-phong"]);
        s.detail_timeout_secs = 1;
        let key = PartitionKey::new("ha-noi", "van-phong");
        let urls = detail_urls("vp", 10);

        let mut site = FakeSite::default().with(&page_url(&key, 1), Reply::Page(index_html(&urls)));
        for (i, u) in urls.iter().enumerate() {
            let reply = if i == 2 || i == 5 {
                Reply::Hang
            } else {
                Reply::Page(detail_html("Văn phòng", "20 triệu"))
            };
            site = site.with(u, reply);
        }
        let site = Arc::new(site);

        let conn = db::connect(&s.db_path).unwrap();
        let summary = Crawler::new(Arc::clone(&site), &s, &conn)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(summary.records, 8);
        assert_eq!(row_count(&conn, "raw_ha_noi"), 8);
        assert!(site.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn index_failure_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["ha-noi"], &["khach-san"]);
        let key = PartitionKey::new("ha-noi", "khach-san");
        let site = Arc::new(FakeSite::default().with(&page_url(&key, 1), Reply::Status(503)));

        let conn = db::connect(&s.db_path).unwrap();
        Crawler::new(Arc::clone(&site), &s, &conn)
            .unwrap()
            .run()
            .await
            .unwrap();

        let log = std::fs::read_to_string(s.failure_log_path()).unwrap();
        assert_eq!(log, "ha-noi|khach-san - page 1: unexpected status 503\n");
        assert_eq!(site.request_count(), 1);
        assert_eq!(row_count(&conn, "raw_ha_noi"), 0);
        assert!(Ledger::open(&s.ledger_path()).unwrap().contains(&key));
    }

    #[tokio::test]
    async fn waits_between_index_pages_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), &["ca-mau"], &["kho-nha-xuong"]);
        s.cutoff_count = 2;
        s.page_delay_ms = 200;
        let key = PartitionKey::new("ca-mau", "kho-nha-xuong");
        let first = detail_urls("k1", 2);
        let second = detail_urls("k2", 1);

        let mut site = FakeSite::default()
            .with(&page_url(&key, 1), Reply::Page(index_html(&first)))
            .with(&page_url(&key, 2), Reply::Page(index_html(&second)));
        for u in first.iter().chain(&second) {
            site = site.with(u, Reply::Page(detail_html("Kho", "15 tỷ")));
        }
        let site = Arc::new(site);

        let conn = db::connect(&s.db_path).unwrap();
        let started = std::time::Instant::now();
        let summary = Crawler::new(Arc::clone(&site), &s, &conn)
            .unwrap()
            .run()
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(summary.records, 3);
        // page 2 is short, so it ends the partition without a trailing sleep
        assert_eq!(site.request_count(), 2 + 3);
        assert!(elapsed >= s.page_delay(), "{:?}", elapsed);
        assert!(elapsed < s.page_delay() * 2, "{:?}", elapsed);
    }

    #[tokio::test]
    async fn storage_failure_skips_checkpoint_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), &["bad region", "ha-noi"], &["dat-tho-cu"]);
        let good = PartitionKey::new("ha-noi", "dat-tho-cu");
        let bad = PartitionKey::new("bad region", "dat-tho-cu");
        let site = Arc::new(
            FakeSite::default()
                .with(&page_url(&bad, 1), Reply::Page(index_html(&[])))
                .with(&page_url(&good, 1), Reply::Page(index_html(&[]))),
        );

        let conn = db::connect(&s.db_path).unwrap();
        let summary = Crawler::new(Arc::clone(&site), &s, &conn)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
        let ledger = Ledger::open(&s.ledger_path()).unwrap();
        assert!(!ledger.contains(&bad));
        assert!(ledger.contains(&good));
        let log = std::fs::read_to_string(s.failure_log_path()).unwrap();
        assert!(log.starts_with("bad region|dat-tho-cu - Failed to store bad region|dat-tho-cu"));
    }
}
