use chrono::{Datelike, Utc};
use regex::Regex;

use crate::chart::ChartEntry;
use crate::detail::RawDetail;
use crate::error::ScrapeError;

// Films older than this are assumed to be scrape garbage.
const OLDEST_PLAUSIBLE_YEAR: i32 = 1870;

const MAX_BILLED_CAST: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Film {
    pub title: String,
    pub year: i32,
    pub rating: f64,
    pub runtime_min: i32,
    pub metascore: Option<i32>,
}

impl Film {
    /// `(title, year)` identity as a single key, e.g. `"Vertigo (1958)"`.
    pub fn identity(&self) -> String {
        format!("{} ({})", self.title, self.year)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastCredit {
    pub name: String,
    pub position: i32,
}

/// Pure conversion from one chart row plus its detail bag into typed records.
/// Any failure here drops this one film only.
pub fn normalize(
    entry: &ChartEntry,
    raw: &RawDetail,
) -> Result<(Film, Vec<CastCredit>), ScrapeError> {
    let title = entry.title.trim();
    if title.is_empty() {
        return Err(ScrapeError::normalize("<unknown>", "empty title"));
    }

    let runtime_text = entry
        .runtime_text
        .as_deref()
        .ok_or_else(|| ScrapeError::normalize(title, "missing runtime"))?;
    let runtime_min = parse_runtime_minutes(runtime_text)
        .ok_or_else(|| ScrapeError::normalize(title, format!("bad runtime '{runtime_text}'")))?;

    let rating_text = entry
        .rating_text
        .as_deref()
        .ok_or_else(|| ScrapeError::normalize(title, "missing rating"))?;
    let rating: f64 = rating_text
        .trim()
        .parse()
        .map_err(|_| ScrapeError::normalize(title, format!("bad rating '{rating_text}'")))?;
    if !(0.0..=10.0).contains(&rating) {
        return Err(ScrapeError::normalize(
            title,
            format!("rating {rating} out of [0,10]"),
        ));
    }

    let year_text = raw
        .year_text
        .as_deref()
        .ok_or_else(|| ScrapeError::normalize(title, "missing release year"))?;
    let year = parse_year(year_text)
        .ok_or_else(|| ScrapeError::normalize(title, format!("bad year '{}'", year_text.trim())))?;

    let metascore = match raw.metascore_text.as_deref() {
        None => None,
        Some(text) => {
            let score: i32 = text.trim().parse().map_err(|_| {
                ScrapeError::normalize(title, format!("bad metascore '{}'", text.trim()))
            })?;
            if !(0..=100).contains(&score) {
                return Err(ScrapeError::normalize(
                    title,
                    format!("metascore {score} out of [0,100]"),
                ));
            }
            Some(score)
        }
    };

    let film = Film {
        title: title.to_string(),
        year,
        // numeric(3,1) in the store; one decimal is all the source ever has
        rating: (rating * 10.0).round() / 10.0,
        runtime_min,
        metascore,
    };

    Ok((film, billed_cast(&raw.cast)))
}

/// Accepts both the JSON-LD ISO form (`PT2H22M`) and human text (`2h 22min`).
fn parse_runtime_minutes(text: &str) -> Option<i32> {
    let hours_re = Regex::new(r"(?i)(\d+)\s*h").unwrap();
    let minutes_re = Regex::new(r"(?i)(\d+)\s*m").unwrap();

    let mut total = 0;
    if let Some(cap) = hours_re.captures(text) {
        total += cap[1].parse::<i32>().ok()? * 60;
    }
    if let Some(cap) = minutes_re.captures(text) {
        total += cap[1].parse::<i32>().ok()?;
    }

    (total > 0).then_some(total)
}

fn parse_year(text: &str) -> Option<i32> {
    let year_re = Regex::new(r"\d{4}").unwrap();
    let year: i32 = year_re.find(text)?.as_str().parse().ok()?;
    (OLDEST_PLAUSIBLE_YEAR..=Utc::now().year()).contains(&year).then_some(year)
}

/// Trim, drop exact duplicates (first occurrence wins), cap at three,
/// positions assigned 1..k in encounter order.
fn billed_cast(names: &[String]) -> Vec<CastCredit> {
    let mut credits: Vec<CastCredit> = Vec::new();

    for name in names {
        let name = name.trim();
        if name.is_empty() || credits.iter().any(|c| c.name == name) {
            continue;
        }
        credits.push(CastCredit {
            name: name.to_string(),
            position: credits.len() as i32 + 1,
        });
        if credits.len() == MAX_BILLED_CAST {
            break;
        }
    }

    credits
}
