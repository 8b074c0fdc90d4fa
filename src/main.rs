mod chart;
mod config;
mod db;
mod detail;
mod error;
mod export;
mod http;
mod normalize;
mod sink;

use anyhow::Result;
use futures::{Stream, StreamExt, pin_mut, stream};
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::sink::Sink;

#[derive(Debug, Default)]
struct RunReport {
    processed: usize,
    skipped: usize,
    sink_failed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = config::load(args.get(1).map(String::as_str))?;

    info!(
        chart = %config.chart_url,
        limit = config.limit,
        sinks = %config.sinks,
        "crawler started"
    );

    let fetcher = http::Fetcher::new(&config)?;
    let mut sinks = sink::build(&config)?;

    // Nothing to iterate without the chart, so this error is fatal.
    let entries = chart::fetch_top(&fetcher, &config.chart_url, config.limit).await?;
    info!(entries = entries.len(), "chart fetched");

    // Detail fetches overlap behind the shared politeness gate; sink order
    // therefore need not match rank order.
    let fetcher_ref = &fetcher;
    let details = stream::iter(entries)
        .map(|entry| async move {
            let fetched = detail::fetch_detail(fetcher_ref, &entry.url).await;
            (entry, fetched)
        })
        .buffer_unordered(config.max_concurrent.max(1));

    let report = run(&mut sinks, details).await;
    info!(
        processed = report.processed,
        skipped = report.skipped,
        sink_failed = report.sink_failed,
        "run complete"
    );

    for sink in &sinks {
        if let Sink::Database(db) = sink {
            log_analytics(db.conn())?;
        }
    }

    Ok(())
}

async fn run<S>(sinks: &mut [Sink], details: S) -> RunReport
where
    S: Stream<Item = (chart::ChartEntry, Result<detail::RawDetail, error::ScrapeError>)>,
{
    let mut report = RunReport::default();
    let mut disabled = vec![false; sinks.len()];

    pin_mut!(details);

    while let Some((entry, fetched)) = details.next().await {
        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                warn!(title = %entry.title, error = %e, "detail fetch failed, skipping");
                report.skipped += 1;
                continue;
            }
        };

        let (film, cast) = match normalize::normalize(&entry, &raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(title = %entry.title, error = %e, "normalization failed, skipping");
                report.skipped += 1;
                continue;
            }
        };

        let mut failed_here = false;
        for (i, sink) in sinks.iter_mut().enumerate() {
            if disabled[i] {
                continue;
            }
            if let Err(e) = sink.write(&film, &cast) {
                error!(sink = sink.name(), film = %film.identity(), error = %e, "sink write failed");
                failed_here = true;
                if sink.disable_on_failure() {
                    disabled[i] = true;
                    warn!(sink = sink.name(), "sink disabled for the rest of the run");
                }
            }
        }

        report.processed += 1;
        if failed_here {
            report.sink_failed += 1;
        }
    }

    report
}

fn log_analytics(conn: &Connection) -> Result<()> {
    for row in db::top_runtime_per_decade(conn)? {
        info!(
            decade = row.decade,
            rank = row.rank,
            title = %row.title,
            year = row.year,
            runtime_min = row.runtime_min,
            decade_avg = %format!("{:.1}", row.decade_avg),
            "decade runtime ranking"
        );
    }

    for row in db::rating_stddev_by_year(conn)? {
        info!(
            year = row.year,
            films = row.films,
            stddev = %format!("{:.3}", row.stddev),
            "rating spread by year"
        );
    }

    for row in db::rating_metascore_divergence(conn)? {
        info!(
            title = %row.title,
            year = row.year,
            rating = row.rating,
            metascore = row.metascore,
            relative = %format!("{:.0}%", row.relative * 100.0),
            "rating/metascore divergence"
        );
    }

    // ad-hoc cast filter over the pelicula_reparto view
    if let Ok(actor) = std::env::var("FILTER_ACTOR") {
        let position = std::env::var("FILTER_POSITION")
            .ok()
            .and_then(|p| p.parse().ok());
        for row in db::films_by_actor(conn, &actor, position)? {
            info!(
                title = %row.title,
                year = row.year,
                actor = %row.name,
                position = row.position,
                "cast filter match"
            );
        }
    }

    Ok(())
}
