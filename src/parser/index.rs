use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::record::{ListingRef, PartitionKey};

static CARD: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".l-sdb-list__single").unwrap());
static CARD_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".c-sdb-card__tle a[href]").unwrap());

/// Catalog index URL for one partition page.
pub fn index_url(base_url: &str, key: &PartitionKey, page: u32) -> String {
    format!(
        "{}/mua-ban-{}-{}?page={}",
        base_url.trim_end_matches('/'),
        key.category,
        key.region,
        page
    )
}

/// Detail links on one index page, resolved against `base_url`.
pub fn parse_listing_refs(html: &str, base_url: &str, key: &PartitionKey) -> Vec<ListingRef> {
    let doc = Html::parse_document(html);
    doc.select(&CARD)
        .filter_map(|card| card.select(&CARD_LINK).next())
        .filter_map(|link| link.value().attr("href"))
        .map(|href| ListingRef {
            url: resolve_url(base_url, href.trim()),
            partition: key.clone(),
        })
        .collect()
}

pub fn resolve_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}
