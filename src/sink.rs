use anyhow::{Result, bail};
use tracing::error;

use crate::config::Config;
use crate::db::DbSink;
use crate::error::ScrapeError;
use crate::export::CsvSink;
use crate::normalize::{CastCredit, Film};

/// Closed set of output destinations. Which variants get built is decided
/// once at startup from `config.sinks`.
pub enum Sink {
    Csv(CsvSink),
    Database(DbSink),
    #[cfg(test)]
    Broken,
}

impl Sink {
    pub fn name(&self) -> &'static str {
        match self {
            Sink::Csv(_) => "csv",
            Sink::Database(_) => "database",
            #[cfg(test)]
            Sink::Broken => "broken",
        }
    }

    pub fn write(&mut self, film: &Film, cast: &[CastCredit]) -> Result<(), ScrapeError> {
        match self {
            Sink::Csv(csv) => csv.write(film, cast),
            Sink::Database(db) => db.write(film, cast),
            #[cfg(test)]
            Sink::Broken => Err(ScrapeError::Sink {
                sink: "broken",
                cause: anyhow::anyhow!("disk full"),
            }),
        }
    }

    /// A CSV file that failed once stays broken for the rest of the run;
    /// the database gets retried on the next film.
    pub fn disable_on_failure(&self) -> bool {
        match self {
            Sink::Csv(_) => true,
            Sink::Database(_) => false,
            #[cfg(test)]
            Sink::Broken => true,
        }
    }
}

pub fn build(config: &Config) -> Result<Vec<Sink>> {
    let mut sinks = Vec::new();

    match config.sinks.as_str() {
        "all" => {
            // an unusable CSV destination must not keep the database sink
            // from running
            match CsvSink::open(&config.csv_dir) {
                Ok(csv) => sinks.push(Sink::Csv(csv)),
                Err(e) => error!(
                    dir = %config.csv_dir,
                    error = %e,
                    "CSV sink unavailable, continuing with database only"
                ),
            }
            sinks.push(Sink::Database(DbSink::open(&config.database_path)?));
        }
        "csv" => sinks.push(Sink::Csv(CsvSink::open(&config.csv_dir)?)),
        "db" => sinks.push(Sink::Database(DbSink::open(&config.database_path)?)),
        other => bail!("unknown sink selection '{other}' (expected all, csv or db)"),
    }

    Ok(sinks)
}
