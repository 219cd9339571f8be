use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://guland.vn";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

pub const DEFAULT_REGIONS: &[&str] = &[
    "soc-trang", "ha-noi", "ha-giang", "cao-bang", "bac-kan", "tuyen-quang", "lao-cai",
    "dien-bien", "lai-chau", "son-la", "yen-bai", "hoa-binh", "thai-nguyen", "lang-son",
    "quang-ninh", "bac-giang", "phu-tho", "vinh-phuc", "bac-ninh", "hai-duong", "hai-phong",
    "hung-yen", "thai-binh", "ha-nam", "nam-dinh", "ninh-binh", "thanh-hoa", "nghe-an",
    "ha-tinh", "quang-binh", "quang-tri", "thua-thien-hue", "da-nang", "quang-nam",
    "quang-ngai", "binh-dinh", "phu-yen", "khanh-hoa", "ninh-thuan", "binh-thuan", "kon-tum",
    "gia-lai", "dak-lak", "dak-nong", "lam-dong", "binh-phuoc", "tay-ninh", "binh-duong",
    "dong-nai", "ba-ria-vung-tau", "tp-ho-chi-minh", "long-an", "tien-giang", "ben-tre",
    "tra-vinh", "vinh-long", "dong-thap", "an-giang", "kien-giang", "can-tho", "hau-giang",
    "bac-lieu", "ca-mau",
];

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "nha-mat-pho-mat-tien",
    "dat-tho-cu",
    "can-ho-chung-cu",
    "kho-nha-xuong",
    "van-phong",
    "phong-tro",
    "khach-san",
];

/// Runtime settings: built-in defaults, then `guland.toml` (or the file
/// passed with `--config`), then `GULAND_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub user_agent: String,
    /// Concurrent detail fetches per index page.
    pub workers: usize,
    pub page_delay_ms: u64,
    pub detail_timeout_secs: u64,
    /// A page with fewer listings than this is the last one.
    pub cutoff_count: usize,
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
    pub regions: Vec<String>,
    pub categories: Vec<String>,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("guland").required(false),
        };

        let settings = Config::builder()
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("workers", 16_i64)?
            .set_default("page_delay_ms", 2000_i64)?
            .set_default("detail_timeout_secs", 15_i64)?
            .set_default("cutoff_count", 45_i64)?
            .set_default("output_dir", "scraped-data")?
            .set_default("db_path", "scraped-data/guland.sqlite")?
            .set_default("regions", DEFAULT_REGIONS.to_vec())?
            .set_default("categories", DEFAULT_CATEGORIES.to_vec())?
            .add_source(file)
            .add_source(
                Environment::with_prefix("GULAND")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("regions")
                    .with_list_parse_key("categories"),
            )
            .build()
            .context("Failed to load settings")?;

        settings
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join("checkpoint").join("done.log")
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.output_dir.join("failed.log")
    }
}
