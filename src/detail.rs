use scraper::{Html, Selector};
use tracing::debug;

use crate::error::ScrapeError;
use crate::http::Fetcher;

/// Raw string fields scraped off a film's detail page. Everything stays text
/// until the normalizer types it; `metascore_text: None` is the explicit
/// absent marker for films Metacritic never scored.
#[derive(Debug, Clone, Default)]
pub struct RawDetail {
    pub year_text: Option<String>,
    pub metascore_text: Option<String>,
    pub cast: Vec<String>,
}

pub async fn fetch_detail(fetcher: &Fetcher, url: &str) -> Result<RawDetail, ScrapeError> {
    let html = fetcher.get_html(url).await?;
    let detail = parse_detail(url, &html)?;
    debug!(url = %url, cast = detail.cast.len(), "parsed detail page");
    Ok(detail)
}

pub fn parse_detail(url: &str, html: &str) -> Result<RawDetail, ScrapeError> {
    let document = Html::parse_document(html);

    let release_selector = Selector::parse("li[data-testid='title-details-releasedate']").unwrap();
    let metascore_selector = Selector::parse("span.metacritic-score-box").unwrap();
    let cast_selector = Selector::parse(
        "section[data-testid='title-cast'] div[data-testid='title-cast-item'] \
         a[data-testid='title-cast-item__actor']",
    )
    .unwrap();

    let year_text = document
        .select(&release_selector)
        .next()
        .map(|li| li.text().collect::<String>());

    let metascore_text = document
        .select(&metascore_selector)
        .next()
        .map(|span| span.text().collect::<String>().trim().to_string());

    let cast: Vec<String> = document
        .select(&cast_selector)
        .map(|a| a.text().collect::<String>())
        .collect();

    // A page with none of the expected markers is layout drift, not a film
    // that merely lacks optional fields.
    if year_text.is_none() && metascore_text.is_none() && cast.is_empty() {
        return Err(ScrapeError::parse(url, "no recognizable detail markup"));
    }

    Ok(RawDetail {
        year_text,
        metascore_text,
        cast,
    })
}
