//! Descriptive statistics over the normalized dataset.

use std::collections::HashMap;
use std::fmt;

use crate::record::{Field, ListingRecord};

const TOP_VALUES: usize = 10;
const UNKNOWN_LABEL: &str = "(unknown)";

type IsMissing = fn(&ListingRecord) -> bool;
type Numeric = fn(&ListingRecord) -> Option<f64>;
type Categorical = fn(&ListingRecord) -> Option<&str>;

fn text_missing(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn field_f64(f: &Field<f64>) -> Option<f64> {
    f.get()
}

fn field_u32(f: &Field<u32>) -> Option<f64> {
    f.get().map(f64::from)
}

const MISSING_CHECKS: &[(&str, IsMissing)] = &[
    ("title", |r| text_missing(&r.title)),
    ("listing_id", |r| text_missing(&r.listing_id)),
    ("price", |r| r.price.get().is_none()),
    ("area", |r| r.area.get().is_none()),
    ("location", |r| text_missing(&r.location)),
    ("property_type", |r| text_missing(&r.property_type)),
    ("width", |r| r.width.get().is_none()),
    ("length", |r| r.length.get().is_none()),
    ("bedrooms", |r| r.bedrooms.get().is_none()),
    ("bathrooms", |r| r.bathrooms.get().is_none()),
    ("floors", |r| r.floors.get().is_none()),
    ("position", |r| text_missing(&r.position)),
    ("direction", |r| text_missing(&r.direction)),
    ("alley_width", |r| r.alley_width.get().is_none()),
    ("road_type", |r| text_missing(&r.road_type)),
    ("description", |r| text_missing(&r.description)),
    ("images", |r| r.images.is_empty()),
    ("coordinates", |r| r.coordinates.is_none()),
    ("agent_avatar", |r| text_missing(&r.agent.avatar)),
    ("agent_role", |r| text_missing(&r.agent.role)),
    ("agent_name", |r| text_missing(&r.agent.name)),
    ("agent_listing_count", |r| r.agent.listing_count.is_none()),
    ("last_updated_at", |r| r.last_updated_at.is_none()),
];

const NUMERIC_COLUMNS: &[(&str, Numeric)] = &[
    ("price", |r| field_f64(&r.price)),
    ("area", |r| field_f64(&r.area)),
    ("width", |r| field_f64(&r.width)),
    ("length", |r| field_f64(&r.length)),
    ("bedrooms", |r| field_u32(&r.bedrooms)),
    ("bathrooms", |r| field_u32(&r.bathrooms)),
    ("floors", |r| field_f64(&r.floors)),
    ("alley_width", |r| field_f64(&r.alley_width)),
    ("agent_listing_count", |r| r.agent.listing_count.map(f64::from)),
];

const CATEGORICAL_COLUMNS: &[(&str, Categorical)] = &[
    ("position", |r| r.position.as_deref()),
    ("direction", |r| r.direction.as_deref()),
    ("road_type", |r| r.road_type.as_deref()),
    ("property_type", |r| r.property_type.as_deref()),
    ("region", |r| Some(r.region.as_str())),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Missing {
    pub column: &'static str,
    pub count: usize,
    pub pct: f64,
}

/// Count, mean, sample std and the five-number summary. Quantiles use
/// linear interpolation between closest ranks.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

pub struct DatasetStats {
    pub rows: usize,
    pub missing: Vec<Missing>,
    pub numeric: Vec<(&'static str, Summary)>,
    pub categorical: Vec<(&'static str, Vec<(String, usize)>)>,
}

pub fn describe(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std = (n > 1).then(|| {
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        var.sqrt()
    });

    Some(Summary {
        count: n,
        mean,
        std,
        min: sorted[0],
        q1: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q3: quantile(&sorted, 0.75),
        max: sorted[n - 1],
    })
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Most frequent values, unknowns included. Ties break alphabetically.
pub fn value_counts<'a>(values: impl Iterator<Item = Option<&'a str>>, top: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values {
        let label = v.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(UNKNOWN_LABEL);
        *counts.entry(label).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(top);
    counts
}

pub fn summarize(records: &[ListingRecord]) -> DatasetStats {
    let rows = records.len();

    let missing = MISSING_CHECKS
        .iter()
        .map(|(column, is_missing)| {
            let count = records.iter().filter(|r| is_missing(r)).count();
            let pct = if rows == 0 {
                0.0
            } else {
                (count as f64 / rows as f64 * 10_000.0).round() / 100.0
            };
            Missing {
                column: *column,
                count,
                pct,
            }
        })
        .collect();

    let numeric = NUMERIC_COLUMNS
        .iter()
        .filter_map(|(column, get)| {
            let values: Vec<f64> = records.iter().filter_map(get).collect();
            describe(&values).map(|s| (*column, s))
        })
        .collect();

    let categorical = CATEGORICAL_COLUMNS
        .iter()
        .map(|(column, get)| (*column, value_counts(records.iter().map(get), TOP_VALUES)))
        .collect();

    DatasetStats {
        rows,
        missing,
        numeric,
        categorical,
    }
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows: {}", self.rows)?;

        writeln!(f, "\n--- Missing ---")?;
        writeln!(f, "{:<20} | {:>7} | {:>7}", "Column", "Count", "Pct")?;
        for m in &self.missing {
            writeln!(f, "{:<20} | {:>7} | {:>6.2}%", m.column, m.count, m.pct)?;
        }

        writeln!(f, "\n--- Numeric ---")?;
        writeln!(
            f,
            "{:<20} | {:>6} | {:>10} | {:>10} | {:>9} | {:>9} | {:>9} | {:>9} | {:>10}",
            "Column", "Count", "Mean", "Std", "Min", "25%", "50%", "75%", "Max"
        )?;
        for (column, s) in &self.numeric {
            let std = s.std.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
            writeln!(
                f,
                "{:<20} | {:>6} | {:>10.2} | {:>10} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2} | {:>10.2}",
                column, s.count, s.mean, std, s.min, s.q1, s.median, s.q3, s.max
            )?;
        }

        for (column, counts) in &self.categorical {
            writeln!(f, "\n--- {} (top {}) ---", column, TOP_VALUES)?;
            for (value, n) in counts {
                writeln!(f, "  {:<32} {}", value, n)?;
            }
        }
        Ok(())
    }
}
