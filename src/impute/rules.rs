//! Phrase tables for description mining.
//!
//! Every attribute owns an ordered list of rules; the first rule whose
//! pattern matches and whose extractor yields a value wins. New phrasings
//! go here without touching the merge logic.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::record::{Position, RoadType};

pub type Extract<T> = fn(&Captures<'_>) -> Option<T>;

pub struct Rule<T> {
    pattern: Regex,
    extract: Extract<T>,
}

impl<T> Rule<T> {
    fn new(pattern: &str, extract: Extract<T>) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap(),
            extract,
        }
    }

    /// First match, left to right, whose extractor yields a value.
    pub fn apply(&self, text: &str) -> Option<T> {
        self.pattern
            .captures_iter(text)
            .find_map(|caps| (self.extract)(&caps))
    }
}

pub fn first_match<T>(rules: &[Rule<T>], text: &str) -> Option<T> {
    rules.iter().find_map(|rule| rule.apply(text))
}

fn float(caps: &Captures<'_>, name: &str) -> Option<f64> {
    caps.name(name)?.as_str().parse().ok()
}

fn int(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name)?.as_str().parse().ok()
}

// ── Dimensions ──

pub static DIMENSION_PAIR: LazyLock<Vec<Rule<(f64, f64)>>> = LazyLock::new(|| {
    vec![Rule::new(
        r"(?P<w>\d+(?:\.\d+)?)\s*m?\s*x\s*(?P<l>\d+(?:\.\d+)?)\s*m?",
        |c| Some((float(c, "w")?, float(c, "l")?)),
    )]
});

pub static WIDTH: LazyLock<Vec<Rule<f64>>> = LazyLock::new(|| {
    vec![Rule::new(r"ngang\s*(?P<v>\d+(?:\.\d+)?)\s*m", |c| float(c, "v"))]
});

pub static LENGTH: LazyLock<Vec<Rule<f64>>> = LazyLock::new(|| {
    vec![Rule::new(r"(?:dài|dai)\s*(?P<v>\d+(?:\.\d+)?)\s*m", |c| float(c, "v"))]
});

// ── Rooms ──

pub static BEDROOMS: LazyLock<Vec<Rule<u32>>> = LazyLock::new(|| {
    vec![Rule::new(r"(?P<n>\d+)\s*(?:pn|phòng ngủ)", |c| int(c, "n"))]
});

pub static BATHROOMS: LazyLock<Vec<Rule<u32>>> = LazyLock::new(|| {
    vec![Rule::new(r"(?P<n>\d+)\s*(?:wc|nhà vệ sinh)", |c| int(c, "n"))]
});

// ── Floors ──

pub const GROUND_FLOOR_MARKER: &str = "trệt";

pub static FLOOR_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:lầu|tầng)").unwrap());

pub static HALF_FLOOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"tum|gác").unwrap());

// ── Direction ──

/// Combined directions are listed before their parts so "đông bắc" is not
/// read as "đông".
pub static DIRECTION: LazyLock<Vec<Rule<String>>> = LazyLock::new(|| {
    vec![Rule::new(
        r"hướng\s*(?P<d>đông bắc|tây nam|đông nam|tây bắc|đông|tây|nam|bắc)",
        |c| Some(c.name("d")?.as_str().to_string()),
    )]
});

// ── Position / road ──

/// Checked in order; an alley mention outranks a road mention.
pub const POSITION_MARKERS: &[(&str, Position)] = &[
    ("hẻm", Position::InAlley),
    ("đường", Position::MainRoad),
];

pub static ALLEY_WIDTH: LazyLock<Vec<Rule<f64>>> = LazyLock::new(|| {
    vec![Rule::new(
        r"(?:hẻm|lộ|đường)[^\d]{0,5}(?P<v>\d+(?:\.\d+)?)\s*m",
        |c| float(c, "v"),
    )]
});

pub const ROAD_TYPE_MARKERS: &[(&str, RoadType)] = &[
    ("bê tông", RoadType::Concrete),
    ("nhựa", RoadType::Asphalt),
    ("đường đất", RoadType::Dirt),
    ("đường đá", RoadType::Stone),
];

pub fn first_marker<T: Copy>(markers: &[(&str, T)], text: &str) -> Option<T> {
    markers
        .iter()
        .find(|(marker, _)| text.contains(marker))
        .map(|(_, value)| *value)
}
