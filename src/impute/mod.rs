//! Recover structured attributes from listing descriptions.
//!
//! Pure: one description in, one [`Candidates`] out.

pub mod rules;

use std::sync::LazyLock;

use regex::Regex;

use crate::record::Candidates;
use rules::first_match;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, unify multiplication glyphs, turn decimal commas into
/// points and collapse whitespace.
pub fn preprocess(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['×', '*'], "x");

    let chars: Vec<char> = lowered.chars().collect();
    let decimal: String = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let between_digits = c == ','
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if between_digits {
                '.'
            } else {
                c
            }
        })
        .collect();

    WHITESPACE_RE.replace_all(&decimal, " ").trim().to_string()
}

pub fn extract(description: &str) -> Candidates {
    let text = preprocess(description);
    let (width, length) = dimensions(&text);

    Candidates {
        width,
        length,
        bedrooms: first_match(&rules::BEDROOMS, &text),
        bathrooms: first_match(&rules::BATHROOMS, &text),
        floors: floors(&text),
        direction: first_match(&rules::DIRECTION, &text).map(|d| title_case(&d)),
        position: rules::first_marker(rules::POSITION_MARKERS, &text),
        alley_width: first_match(&rules::ALLEY_WIDTH, &text),
        road_type: rules::first_marker(rules::ROAD_TYPE_MARKERS, &text),
    }
}

fn dimensions(text: &str) -> (Option<f64>, Option<f64>) {
    match first_match(&rules::DIMENSION_PAIR, text) {
        Some((w, l)) => (Some(w), Some(l)),
        None => (
            first_match(&rules::WIDTH, text),
            first_match(&rules::LENGTH, text),
        ),
    }
}

/// Ground floor counts one, every "N lầu" adds N, each mezzanine or attic
/// adds a half. A total of zero means no marker was seen.
fn floors(text: &str) -> Option<f64> {
    let ground = if text.contains(rules::GROUND_FLOOR_MARKER) {
        1.0
    } else {
        0.0
    };
    let upper: f64 = rules::FLOOR_COUNT
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .map(f64::from)
        .sum();
    let half = 0.5 * rules::HALF_FLOOR.find_iter(text).count() as f64;

    let total = ground + upper + half;
    (total != 0.0).then_some(total)
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
