//! Merge imputed candidates into scraped records and coerce every field to
//! its final type.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDateTime};
use rayon::prelude::*;
use regex::Regex;
use tracing::info;

use crate::impute;
use crate::record::{Candidates, Field, ListingRecord};

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").unwrap());
static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s*(tháng|tuần|ngày|giờ|phút|giây) trước").unwrap()
});

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_FORMATS: &[&str] = &[TIMESTAMP_FORMAT, "%Y-%m-%d %H:%M", "%d/%m/%Y %H:%M"];

/// Attributes the description miner can fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Width,
    Length,
    Bedrooms,
    Bathrooms,
    Floors,
    Position,
    Direction,
    AlleyWidth,
    RoadType,
}

impl Attribute {
    pub const ALL: [Attribute; 9] = [
        Attribute::Width,
        Attribute::Length,
        Attribute::Bedrooms,
        Attribute::Bathrooms,
        Attribute::Floors,
        Attribute::Position,
        Attribute::Direction,
        Attribute::AlleyWidth,
        Attribute::RoadType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Width => "Width",
            Attribute::Length => "Length",
            Attribute::Bedrooms => "Bedrooms",
            Attribute::Bathrooms => "Bathrooms",
            Attribute::Floors => "Floors",
            Attribute::Position => "Position",
            Attribute::Direction => "Direction",
            Attribute::AlleyWidth => "Alley Width",
            Attribute::RoadType => "Road Type",
        }
    }
}

pub struct Normalized {
    /// `None` when the price could not be read; such rows leave the dataset.
    pub record: Option<ListingRecord>,
    pub filled: Vec<Attribute>,
}

pub struct NormalizeReport {
    pub input: usize,
    pub kept: usize,
    pub filled: HashMap<Attribute, usize>,
}

impl NormalizeReport {
    pub fn filled(&self, attr: Attribute) -> usize {
        self.filled.get(&attr).copied().unwrap_or(0)
    }
}

/// Impute, reconcile and type every record. Output keeps input order.
pub fn normalize_all(records: Vec<ListingRecord>) -> (Vec<ListingRecord>, NormalizeReport) {
    let input = records.len();
    let results: Vec<Normalized> = records.into_par_iter().map(normalize_record).collect();

    let mut filled: HashMap<Attribute, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(results.len());
    for result in results {
        if let Some(record) = result.record {
            for attr in result.filled {
                *filled.entry(attr).or_default() += 1;
            }
            kept.push(record);
        }
    }

    info!("Dropped {} rows without a usable price", input - kept.len());

    let report = NormalizeReport {
        input,
        kept: kept.len(),
        filled,
    };
    (kept, report)
}

pub fn normalize_record(record: ListingRecord) -> Normalized {
    let candidates = impute::extract(record.description.as_deref().unwrap_or(""));
    reconcile(record, candidates)
}

pub fn reconcile(mut record: ListingRecord, candidates: Candidates) -> Normalized {
    let mut filled = Vec::new();
    let mut note = |used: bool, attr: Attribute| {
        if used {
            filled.push(attr);
        }
    };

    let (width, used) = merge_numeric(record.width, candidates.width, parse_measure);
    record.width = width;
    note(used, Attribute::Width);

    let (length, used) = merge_numeric(record.length, candidates.length, parse_measure);
    record.length = length;
    note(used, Attribute::Length);

    let (bedrooms, used) = merge_numeric(record.bedrooms, candidates.bedrooms, parse_count);
    record.bedrooms = bedrooms;
    note(used, Attribute::Bedrooms);

    let (bathrooms, used) = merge_numeric(record.bathrooms, candidates.bathrooms, parse_count);
    record.bathrooms = bathrooms;
    note(used, Attribute::Bathrooms);

    let (floors, used) = merge_numeric(record.floors, candidates.floors, parse_float);
    record.floors = floors;
    note(used, Attribute::Floors);

    let (alley_width, used) =
        merge_numeric(record.alley_width, candidates.alley_width, parse_measure);
    record.alley_width = alley_width;
    note(used, Attribute::AlleyWidth);

    let (position, used) = merge_text(
        record.position,
        candidates.position.map(|p| p.label().to_string()),
    );
    record.position = position;
    note(used, Attribute::Position);

    let (direction, used) = merge_text(record.direction, candidates.direction);
    record.direction = direction;
    note(used, Attribute::Direction);

    let (road_type, used) = merge_text(
        record.road_type,
        candidates.road_type.map(|r| r.label().to_string()),
    );
    record.road_type = road_type;
    note(used, Attribute::RoadType);

    record.area = coerce(record.area, parse_area);
    record.last_updated_at = record.scraped_at.map(|captured| {
        let age = parse_relative(record.last_updated.as_deref().unwrap_or(""));
        captured.checked_sub_signed(age).unwrap_or(captured)
    });

    record.price = coerce(record.price, parse_price_million);
    let record = (!record.price.is_unknown()).then_some(record);

    Normalized { record, filled }
}

/// Keep a valid original; otherwise fall back to the candidate.
fn merge_numeric<T>(
    original: Field<T>,
    candidate: Option<T>,
    parse: fn(&str) -> Option<T>,
) -> (Field<T>, bool) {
    match coerce(original, parse) {
        Field::Unknown => match candidate {
            Some(v) => (Field::Value(v), true),
            None => (Field::Unknown, false),
        },
        typed => (typed, false),
    }
}

fn merge_text(original: Option<String>, candidate: Option<String>) -> (Option<String>, bool) {
    let missing = original
        .as_deref()
        .map(|t| {
            let t = t.trim();
            t.is_empty() || t.eq_ignore_ascii_case("nan")
        })
        .unwrap_or(true);

    match candidate {
        Some(c) if missing => (Some(c), true),
        _ => (original, false),
    }
}

/// `Raw` text becomes `Value` or `Unknown`; typed values pass through.
pub fn coerce<T>(field: Field<T>, parse: fn(&str) -> Option<T>) -> Field<T> {
    match field {
        Field::Raw(text) => parse(&text).map_or(Field::Unknown, Field::Value),
        other => other,
    }
}

fn parse_float(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Width, length and alley width may carry a trailing metre marker.
pub fn parse_measure(text: &str) -> Option<f64> {
    let t = text.trim();
    let t = t
        .strip_suffix('m')
        .or_else(|| t.strip_suffix('M'))
        .unwrap_or(t);
    parse_float(t)
}

pub fn parse_count(text: &str) -> Option<u32> {
    let v = parse_float(text)?;
    (v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u32::MAX)).then_some(v as u32)
}

/// "2.5 tỷ" is 2500 million VND, "800 triệu" is 800; anything else is not a
/// price.
pub fn parse_price_million(text: &str) -> Option<f64> {
    let t = text.trim().to_lowercase();
    let v: f64 = NUMBER_RE.find(&t)?.as_str().parse().ok()?;
    if t.contains("tỷ") {
        Some(v * 1000.0)
    } else if t.contains("triệu") {
        Some(v)
    } else {
        None
    }
}

pub fn parse_area(text: &str) -> Option<f64> {
    let t = text.trim().to_lowercase();
    let t = t
        .strip_suffix("m²")
        .or_else(|| t.strip_suffix("m2"))
        .unwrap_or(&t);
    parse_float(t)
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(t, fmt).ok())
}

/// "3 ngày trước" → three days. Unrecognized or out-of-range phrases are
/// zero.
pub fn parse_relative(text: &str) -> Duration {
    let t = text.trim().to_lowercase();
    let Some(caps) = RELATIVE_RE.captures(&t) else {
        return Duration::zero();
    };
    let Ok(n) = caps[1].parse::<i64>() else {
        return Duration::zero();
    };
    let age = match &caps[2] {
        "tháng" => n.checked_mul(30).and_then(Duration::try_days),
        "tuần" => Duration::try_weeks(n),
        "ngày" => Duration::try_days(n),
        "giờ" => Duration::try_hours(n),
        "phút" => Duration::try_minutes(n),
        "giây" => Duration::try_seconds(n),
        _ => None,
    };
    age.unwrap_or_else(Duration::zero)
}
