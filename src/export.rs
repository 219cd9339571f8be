use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::normalize::TIMESTAMP_FORMAT;
use crate::record::ListingRecord;

const PUBLIC_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Public dataset row: no URL, no images, and the agent avatar reduced to
/// a 0/1 flag.
#[derive(Debug, Serialize)]
struct PublicRow<'a> {
    title: Option<&'a str>,
    listing_id: Option<&'a str>,
    is_vip: u8,
    price: Option<f64>,
    area: Option<f64>,
    location: Option<&'a str>,
    property_type: Option<&'a str>,
    width: Option<f64>,
    length: Option<f64>,
    bedrooms: Option<u32>,
    bathrooms: Option<u32>,
    floors: Option<f64>,
    position: Option<&'a str>,
    direction: Option<&'a str>,
    alley_width: Option<f64>,
    road_type: Option<&'a str>,
    description: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    has_avatar: u8,
    agent_role: Option<&'a str>,
    agent_name: Option<&'a str>,
    agent_listing_count: Option<u32>,
    region: &'a str,
    category: &'a str,
    scraped_at: Option<String>,
    last_updated_at: Option<String>,
}

impl<'a> From<&'a ListingRecord> for PublicRow<'a> {
    fn from(r: &'a ListingRecord) -> Self {
        let has_avatar = r
            .agent
            .avatar
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty());
        Self {
            title: r.title.as_deref(),
            listing_id: r.listing_id.as_deref(),
            is_vip: u8::from(r.is_vip),
            price: r.price.get(),
            area: r.area.get(),
            location: r.location.as_deref(),
            property_type: r.property_type.as_deref(),
            width: r.width.get(),
            length: r.length.get(),
            bedrooms: r.bedrooms.get(),
            bathrooms: r.bathrooms.get(),
            floors: r.floors.get(),
            position: r.position.as_deref(),
            direction: r.direction.as_deref(),
            alley_width: r.alley_width.get(),
            road_type: r.road_type.as_deref(),
            description: r.description.as_deref(),
            latitude: r.coordinates.map(|c| c.lat),
            longitude: r.coordinates.map(|c| c.lon),
            has_avatar: u8::from(has_avatar),
            agent_role: r.agent.role.as_deref(),
            agent_name: r.agent.name.as_deref(),
            agent_listing_count: r.agent.listing_count,
            region: &r.region,
            category: &r.category,
            scraped_at: r.scraped_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            last_updated_at: r
                .last_updated_at
                .map(|t| t.format(PUBLIC_DATE_FORMAT).to_string()),
        }
    }
}

pub fn write_public<W: Write>(records: &[ListingRecord], out: W) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    for r in records {
        writer.serialize(PublicRow::from(r))?;
    }
    writer.flush()?;
    Ok(records.len())
}

pub fn export_public(records: &[ListingRecord], path: &Path) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    write_public(records, file).with_context(|| format!("Failed to write {:?}", path))
}
