use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One crawl unit: a province slug paired with a property-type slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub region: String,
    pub category: String,
}

impl PartitionKey {
    pub fn new(region: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            category: category.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.region, self.category)
    }
}

/// A detail-page URL discovered on an index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRef {
    pub url: String,
    pub partition: PartitionKey,
}

/// A captured attribute that may still be raw text.
///
/// `Unknown` is the explicit "nothing observed" state and is distinct from
/// a zero value or an empty string. `Raw` holds the page text before type
/// coercion; `Value` holds the coerced value. Coercion never turns a
/// `Value` back into anything else, which keeps normalization idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field<T> {
    Unknown,
    Raw(String),
    Value(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unknown
    }
}

impl<T> Field<T> {
    pub fn from_text(text: Option<String>) -> Self {
        text.map_or(Field::Unknown, Field::Raw)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Field::Unknown)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Copy> Field<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// `None` when the page shows the default profile placeholder.
    pub avatar: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub listing_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    // identity
    pub title: Option<String>,
    pub listing_id: Option<String>,
    pub url: String,
    pub is_vip: bool,

    // commercial: price in million VND, area in m² once normalized
    pub price: Field<f64>,
    pub area: Field<f64>,
    pub location: Option<String>,

    // structural
    pub property_type: Option<String>,
    pub width: Field<f64>,
    pub length: Field<f64>,
    pub bedrooms: Field<u32>,
    pub bathrooms: Field<u32>,
    pub floors: Field<f64>,
    pub position: Option<String>,
    pub direction: Option<String>,
    pub alley_width: Field<f64>,
    pub road_type: Option<String>,

    // descriptive
    pub description: Option<String>,
    pub images: Vec<String>,
    pub coordinates: Option<GeoPoint>,

    pub agent: Agent,

    // provenance
    pub region: String,
    pub category: String,
    pub scraped_at: Option<NaiveDateTime>,
    /// Relative phrase as shown on the page, e.g. "3 ngày trước".
    pub last_updated: Option<String>,
    pub last_updated_at: Option<NaiveDateTime>,
}

impl ListingRecord {
    /// Number of attributes still holding the unknown sentinel.
    pub fn unknown_count(&self) -> usize {
        let texts = [
            &self.title,
            &self.listing_id,
            &self.location,
            &self.property_type,
            &self.position,
            &self.direction,
            &self.road_type,
            &self.description,
            &self.agent.avatar,
            &self.agent.role,
            &self.agent.name,
            &self.last_updated,
        ];
        let floats = [
            &self.price,
            &self.area,
            &self.width,
            &self.length,
            &self.floors,
            &self.alley_width,
        ];
        texts.iter().filter(|t| t.is_none()).count()
            + floats.iter().filter(|f| f.is_unknown()).count()
            + [&self.bedrooms, &self.bathrooms]
                .iter()
                .filter(|f| f.is_unknown())
                .count()
            + usize::from(self.images.is_empty())
            + usize::from(self.coordinates.is_none())
            + usize::from(self.agent.listing_count.is_none())
            + usize::from(self.scraped_at.is_none())
            + usize::from(self.last_updated_at.is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    InAlley,
    MainRoad,
}

impl Position {
    pub fn label(self) -> &'static str {
        match self {
            Position::InAlley => "Trong hẻm",
            Position::MainRoad => "Đường chính",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadType {
    Concrete,
    Asphalt,
    Dirt,
    Stone,
}

impl RoadType {
    pub fn label(self) -> &'static str {
        match self {
            RoadType::Concrete => "Đường bê tông",
            RoadType::Asphalt => "Đường nhựa",
            RoadType::Dirt => "Đường đất",
            RoadType::Stone => "Đường đá",
        }
    }
}

/// Values recovered from a free-text description. `None` means no
/// pattern matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub width: Option<f64>,
    pub length: Option<f64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub floors: Option<f64>,
    pub direction: Option<String>,
    pub position: Option<Position>,
    pub alley_width: Option<f64>,
    pub road_type: Option<RoadType>,
}
