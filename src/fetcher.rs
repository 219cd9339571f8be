use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::client::{FetchError, PageSource};
use crate::parser::detail;
use crate::record::{ListingRecord, ListingRef};

pub struct FetchOptions {
    pub workers: usize,
    pub timeout: Duration,
}

/// Fetch and extract one index page's listings, at most `workers` at a
/// time. Failed listings are dropped, never retried. Records come back in
/// completion order and the call returns only once every task is done.
pub async fn fetch_batch<S: PageSource>(
    source: &Arc<S>,
    refs: Vec<ListingRef>,
    opts: &FetchOptions,
    label: &str,
) -> Vec<ListingRecord> {
    let workers = opts.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let total = refs.len();

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{msg} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(label.to_string());

    // Workers report every outcome so the progress bar counts drops too.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Option<ListingRecord>>(workers * 2);

    for listing in refs {
        let source = Arc::clone(source);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let timeout = opts.timeout;

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let outcome = match fetch_one(source.as_ref(), &listing, timeout).await {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(url = %listing.url, error = %e, "Dropping listing");
                    None
                }
            };
            let _ = tx.send(outcome).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut records = Vec::with_capacity(total);
    while let Some(outcome) = rx.recv().await {
        records.extend(outcome);
        pb.inc(1);
    }

    pb.finish_and_clear();
    debug!("{}: kept {} of {} listings", label, records.len(), total);
    records
}

async fn fetch_one<S: PageSource>(
    source: &S,
    listing: &ListingRef,
    timeout: Duration,
) -> Result<ListingRecord, FetchError> {
    let html = tokio::time::timeout(timeout, source.fetch(&listing.url))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;
    Ok(detail::extract_listing(&html, listing, captured_now()))
}

/// Capture time, truncated to whole seconds as it is stored.
pub fn captured_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
