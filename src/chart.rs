use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::http::Fetcher;

/// One chart row: rank order is the vector order.
///
/// The chart's JSON-LD already carries the rating and the ISO-8601 runtime,
/// so both travel with the entry as raw text and get typed later by the
/// normalizer together with the detail-page fields.
#[derive(Debug, Clone)]
pub struct ChartEntry {
    pub title: String,
    pub url: String,
    pub rating_text: Option<String>,
    pub runtime_text: Option<String>,
}

#[derive(Deserialize)]
struct ItemList {
    #[serde(rename = "itemListElement")]
    elements: Vec<ListElement>,
}

#[derive(Deserialize)]
struct ListElement {
    item: ListedMovie,
}

#[derive(Deserialize)]
struct ListedMovie {
    name: String,
    url: String,
    duration: Option<String>,
    #[serde(rename = "aggregateRating")]
    aggregate_rating: Option<AggregateRating>,
}

#[derive(Deserialize)]
struct AggregateRating {
    #[serde(rename = "ratingValue")]
    rating_value: serde_json::Value,
}

pub async fn fetch_top(
    fetcher: &Fetcher,
    chart_url: &str,
    limit: usize,
) -> Result<Vec<ChartEntry>, ScrapeError> {
    let html = fetcher.get_html(chart_url).await?;
    let entries = parse_chart(chart_url, &html, limit)?;
    debug!(entries = entries.len(), "parsed chart");
    Ok(entries)
}

/// The chart embeds an `ItemList` JSON-LD block with every ranked film.
pub fn parse_chart(
    chart_url: &str,
    html: &str,
    limit: usize,
) -> Result<Vec<ChartEntry>, ScrapeError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script[type='application/ld+json']").unwrap();

    let block = document
        .select(&selector)
        .map(|script| script.text().collect::<String>())
        .find(|text| text.contains("ItemList"))
        .ok_or_else(|| ScrapeError::parse(chart_url, "no ItemList JSON-LD block"))?;

    let list: ItemList = serde_json::from_str(&block)
        .map_err(|e| ScrapeError::parse(chart_url, format!("invalid ItemList JSON-LD: {e}")))?;

    let entries = list
        .elements
        .into_iter()
        .take(limit)
        .map(|elem| {
            let movie = elem.item;
            ChartEntry {
                url: absolute_url(chart_url, &movie.url),
                title: movie.name,
                rating_text: movie.aggregate_rating.map(|r| rating_text(r.rating_value)),
                runtime_text: movie.duration,
            }
        })
        .collect();

    Ok(entries)
}

// ratingValue shows up both as a JSON number and as a string
fn rating_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn absolute_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}
