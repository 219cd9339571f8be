//! Append-only text files written by the crawl loop: the ledger of finished
//! partitions and the human-readable failure log.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::record::PartitionKey;

/// One partition key per line. Membership is exact line equality, so
/// `ha-noi|van-phong` never matches a `ha-noi|van-phong-cho-thue` entry.
pub struct Ledger {
    path: PathBuf,
    done: HashSet<String>,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        let done = match fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read ledger {:?}", path));
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            done,
        })
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.done.contains(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// Record a partition as finished. Re-recording is a no-op.
    pub fn record(&mut self, key: &PartitionKey) -> Result<()> {
        let line = key.to_string();
        if self.done.contains(&line) {
            return Ok(());
        }
        append_line(&self.path, &line)?;
        self.done.insert(line);
        Ok(())
    }
}

/// Observational only; nothing reads it back for control flow.
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn record(&self, key: &PartitionKey, summary: &str) -> Result<()> {
        let summary = summary.replace(['\n', '\r'], " ");
        append_line(&self.path, &format!("{} - {}", key, summary))
    }

    pub fn count(&self) -> Result<usize> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().filter(|l| !l.trim().is_empty()).count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", self.path)),
        }
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    writeln!(file, "{}", line).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
