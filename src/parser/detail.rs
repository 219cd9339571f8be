//! Detail page → [`ListingRecord`].
//!
//! Each field is read by its own rule and falls back to the unknown
//! sentinel when its markup is absent, so a sparse page still yields a
//! record.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::record::{Agent, Field, GeoPoint, ListingRecord, ListingRef};

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-tle"));
static VIP_BADGE: LazyLock<Selector> = LazyLock::new(|| sel(".vrf-bdg"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-prc__ttl"));
static AREA: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-prc__dtc"));
static STAT_ROW_SPAN: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-stl__row span"));
static LOCATION: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-stl__row > span"));
static BOLD: LazyLock<Selector> = LazyLock::new(|| sel("b"));
static INFO_LABEL: LazyLock<Selector> = LazyLock::new(|| sel(".s-dtl-inf__lbl"));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-inf__dsr"));
static MAP_LINK: LazyLock<Selector> = LazyLock::new(|| sel("a.map-direction"));
static THUMB: LazyLock<Selector> = LazyLock::new(|| sel(".media-thumb-wrap__inner"));
static AVATAR: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-aut__avt img"));
static AGENT_ROLE: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-aut__rol"));
static AGENT_NAME: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-aut__tle"));
static AGENT_STATS: LazyLock<Selector> = LazyLock::new(|| sel(".dtl-aut__stl"));

static COORDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"query=([\d.]+),([\d.]+)").unwrap());
static BG_URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"url\('([^']+)'\)").unwrap());
static FIRST_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const LISTING_ID_MARKER: &str = "Mã tin";
const UPDATED_MARKER: &str = "Cập nhật";
const MAP_PLACEHOLDER: &str = "map-icon.jpg";
const AVATAR_PLACEHOLDER: &str = "profile.png";

/// Labelled rows of the "Thông tin" block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    PropertyType,
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

const DETAIL_LABELS: &[(&str, Detail)] = &[
    ("Loại BĐS", Detail::PropertyType),
    ("Chiều ngang", Detail::Width),
    ("Chiều dài", Detail::Length),
    ("Số phòng ngủ", Detail::Bedrooms),
    ("Số phòng tắm", Detail::Bathrooms),
    ("Số tầng", Detail::Floors),
    ("Vị trí", Detail::Position),
    ("Hướng cửa chính", Detail::Direction),
    ("Đường/hẻm vào rộng", Detail::AlleyWidth),
    ("Loại đường", Detail::RoadType),
];

pub fn extract_listing(html: &str, listing: &ListingRef, scraped_at: NaiveDateTime) -> ListingRecord {
    let doc = Html::parse_document(html);

    let (title, is_vip) = title_and_badge(&doc);
    let mut record = ListingRecord {
        title,
        is_vip,
        listing_id: listing_id(&doc),
        url: listing.url.clone(),
        price: Field::from_text(first_text(&doc, &PRICE)),
        area: Field::from_text(first_text(&doc, &AREA)),
        location: first_text(&doc, &LOCATION),
        description: first_text(&doc, &DESCRIPTION),
        images: images(&doc),
        coordinates: coordinates(&doc),
        agent: agent(&doc),
        region: listing.partition.region.clone(),
        category: listing.partition.category.clone(),
        scraped_at: Some(scraped_at),
        last_updated: last_updated(&doc),
        ..Default::default()
    };

    for &(label, detail) in DETAIL_LABELS {
        let value = labelled_value(&doc, label);
        match detail {
            Detail::PropertyType => record.property_type = value,
            Detail::Width => record.width = Field::from_text(value),
            Detail::Length => record.length = Field::from_text(value),
            Detail::Bedrooms => record.bedrooms = Field::from_text(value),
            Detail::Bathrooms => record.bathrooms = Field::from_text(value),
            Detail::Floors => record.floors = Field::from_text(value),
            Detail::Position => record.position = value,
            Detail::Direction => record.direction = value,
            Detail::AlleyWidth => record.alley_width = Field::from_text(value),
            Detail::RoadType => record.road_type = value,
        }
    }

    record
}

fn clean(raw: &str) -> String {
    WHITESPACE_RE.replace_all(raw, " ").trim().to_string()
}

fn element_text(el: ElementRef<'_>) -> String {
    clean(&el.text().collect::<String>())
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector).next().map(element_text)
}

/// Title text with the verified-account badge cut out.
fn title_and_badge(doc: &Html) -> (Option<String>, bool) {
    let Some(title) = doc.select(&TITLE).next() else {
        return (None, false);
    };

    let badges: HashSet<_> = title.select(&VIP_BADGE).map(|b| b.id()).collect();
    let text: String = title
        .descendants()
        .filter(|node| !node.ancestors().any(|a| badges.contains(&a.id())))
        .filter_map(|node| node.value().as_text().map(|t| t.to_string()))
        .collect();

    (Some(clean(&text)), !badges.is_empty())
}

fn listing_id(doc: &Html) -> Option<String> {
    let span = doc
        .select(&STAT_ROW_SPAN)
        .find(|s| s.text().collect::<String>().contains(LISTING_ID_MARKER))?;
    span.select(&BOLD).next().map(element_text)
}

fn last_updated(doc: &Html) -> Option<String> {
    doc.select(&STAT_ROW_SPAN)
        .map(element_text)
        .filter(|t| t.contains(UPDATED_MARKER))
        .last()
        .map(|t| t.replace(UPDATED_MARKER, "").trim().to_string())
}

/// Value cell next to the first label containing `label`.
fn labelled_value(doc: &Html, label: &str) -> Option<String> {
    let label_el = doc
        .select(&INFO_LABEL)
        .find(|el| el.text().collect::<String>().contains(label))?;
    label_el
        .next_siblings()
        .find_map(ElementRef::wrap)
        .map(element_text)
}

fn coordinates(doc: &Html) -> Option<GeoPoint> {
    let href = doc.select(&MAP_LINK).next()?.value().attr("href")?;
    let caps = COORDS_RE.captures(href)?;
    Some(GeoPoint {
        lat: caps[1].parse().ok()?,
        lon: caps[2].parse().ok()?,
    })
}

fn images(doc: &Html) -> Vec<String> {
    doc.select(&THUMB)
        .filter_map(|div| div.value().attr("style"))
        .filter_map(|style| BG_URL_RE.captures(style).map(|c| c[1].to_string()))
        .filter(|url| !url.ends_with(MAP_PLACEHOLDER))
        .collect()
}

fn agent(doc: &Html) -> Agent {
    let avatar = doc
        .select(&AVATAR)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.contains(AVATAR_PLACEHOLDER))
        .map(str::to_string);

    let listing_count = first_text(doc, &AGENT_STATS)
        .and_then(|t| FIRST_INT_RE.captures(&t).and_then(|c| c[1].parse().ok()));

    Agent {
        avatar,
        role: first_text(doc, &AGENT_ROLE),
        name: first_text(doc, &AGENT_NAME),
        listing_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::parse_timestamp;
    use crate::record::PartitionKey;

    fn listing() -> ListingRef {
        ListingRef {
            url: "https://guland.vn/mua-ban-nha-123".into(),
            partition: PartitionKey::new("tp-ho-chi-minh", "nha-mat-pho-mat-tien"),
        }
    }

    fn at() -> NaiveDateTime {
        parse_timestamp("2025-06-10 08:30:00").unwrap()
    }

    fn fixture(name: &str) -> ListingRecord {
        let html = std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap();
        extract_listing(&html, &listing(), at())
    }

    #[test]
    fn full_detail_page() {
        let r = fixture("detail_full");
        assert_eq!(r.title.as_deref(), Some("Bán nhà mặt tiền Quận 3, 4x18m"));
        assert!(r.is_vip);
        assert_eq!(r.listing_id.as_deref(), Some("2245871"));
        assert_eq!(r.price, Field::Raw("12.5 tỷ".into()));
        assert_eq!(r.area, Field::Raw("72 m²".into()));
        assert_eq!(r.location.as_deref(), Some("Phường 6, Quận 3, TP. Hồ Chí Minh"));
        assert_eq!(r.last_updated.as_deref(), Some("2 ngày trước"));
        assert_eq!(r.property_type.as_deref(), Some("Nhà mặt phố"));
        assert_eq!(r.width, Field::Raw("4 m".into()));
        assert_eq!(r.length, Field::Raw("18 m".into()));
        assert_eq!(r.bedrooms, Field::Raw("4".into()));
        assert_eq!(r.bathrooms, Field::Raw("3".into()));
        assert_eq!(r.floors, Field::Raw("3".into()));
        assert_eq!(r.position.as_deref(), Some("Mặt tiền"));
        assert_eq!(r.direction.as_deref(), Some("Đông Nam"));
        assert_eq!(r.alley_width, Field::Raw("12 m".into()));
        assert_eq!(r.road_type.as_deref(), Some("Đường nhựa"));
        assert!(r.description.as_deref().unwrap().starts_with("Nhà 1 trệt 2 lầu"));
        assert_eq!(r.coordinates, Some(GeoPoint { lat: 10.7812, lon: 106.6871 }));
        assert_eq!(
            r.images,
            vec![
                "https://img.guland.vn/a.jpg".to_string(),
                "https://img.guland.vn/b.jpg".to_string()
            ]
        );
        assert_eq!(r.agent.avatar.as_deref(), Some("https://img.guland.vn/avt/77.jpg"));
        assert_eq!(r.agent.role.as_deref(), Some("Môi giới"));
        assert_eq!(r.agent.name.as_deref(), Some("Nguyễn Văn A"));
        assert_eq!(r.agent.listing_count, Some(37));
        assert_eq!(r.region, "tp-ho-chi-minh");
        assert_eq!(r.category, "nha-mat-pho-mat-tien");
        assert_eq!(r.scraped_at, Some(at()));
        assert_eq!(r.url, "https://guland.vn/mua-ban-nha-123");
    }

    #[test]
    fn sparse_page_yields_unknowns() {
        let r = fixture("detail_sparse");
        assert_eq!(r.title.as_deref(), Some("Đất thổ cư Sóc Sơn"));
        assert!(!r.is_vip);
        assert_eq!(r.listing_id, None);
        assert_eq!(r.price, Field::Raw("Thỏa thuận".into()));
        assert!(r.area.is_unknown());
        assert!(r.width.is_unknown());
        assert!(r.bedrooms.is_unknown());
        assert_eq!(r.direction, None);
        assert_eq!(r.coordinates, None);
        assert!(r.images.is_empty());
        assert_eq!(r.agent.avatar, None, "placeholder avatar is not an avatar");
        assert_eq!(r.agent.listing_count, None);
        assert_eq!(r.last_updated, None);
    }

    #[test]
    fn empty_document() {
        let r = extract_listing("", &listing(), at());
        assert_eq!(r.title, None);
        assert!(r.price.is_unknown());
        assert_eq!(r.description, None);
        assert_eq!(r.url, listing().url);
    }

    #[test]
    fn map_link_without_coordinates() {
        let html = r#"<a class="map-direction" href="https://maps.google.com/?q=somewhere">map</a>"#;
        let r = extract_listing(html, &listing(), at());
        assert_eq!(r.coordinates, None);
    }
}
